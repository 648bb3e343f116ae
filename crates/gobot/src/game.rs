//! Per-game descriptor
//!
//! Each live game owns a small actor task holding its engine. The engine
//! is borrowed from the pool on the first move turn and returned when the
//! game closes; commands for one turn are committed atomically on that
//! engine, so no other game interleaves with a borrowed instance.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use gtp_bridge::{Engine, EnginePool, GtpError, StderrEvent};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::clock::{time_commands, TurnContext};
use crate::config::Config;
use crate::protocol::{Clock, Color, GameId, Speed, TimeControl};

/// Engine failures tolerated on one game before it is resigned.
const MAX_TURN_FAILURES: u32 = 3;

/// Delay before a finished game's descriptor is reaped, absorbing late
/// `gamedata` events that race the phase change.
const FINISH_GRACE: Duration = Duration::from_secs(1);

enum GameCommand {
    Turn {
        time_control: TimeControl,
        clock: Clock,
        color: Color,
        reply: oneshot::Sender<Result<String, GtpError>>,
    },
    Terminate,
}

/// Handle to one game's actor, owned by the session controller.
pub struct GameHandle {
    pub game_id: GameId,
    pub speed: Speed,
    tx: mpsc::Sender<GameCommand>,
    grace: Option<tokio::task::JoinHandle<()>>,
}

impl GameHandle {
    pub fn start(
        game_id: GameId,
        speed: Speed,
        config: Arc<Config>,
        pool: Arc<EnginePool>,
    ) -> GameHandle {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(run_game(game_id, config, pool, rx));
        GameHandle {
            game_id,
            speed,
            tx,
            grace: None,
        }
    }

    /// Generate one move: clock setup plus `genmove`, in order, on this
    /// game's engine. Resolves to the engine's move (`q16`, `pass`,
    /// `resign`).
    pub async fn play_turn(
        &self,
        time_control: TimeControl,
        clock: Clock,
        color: Color,
    ) -> Result<String, GtpError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(GameCommand::Turn {
                time_control,
                clock,
                color,
                reply,
            })
            .await
            .map_err(|_| GtpError::DeadEngine)?;
        rx.await.unwrap_or(Err(GtpError::DeadEngine))
    }

    /// Tear the game down and return its engine to the pool.
    pub fn terminate(&self) {
        let _ = self.tx.try_send(GameCommand::Terminate);
    }

    /// Arm the finish-grace timer; idempotent. `expired` receives the game
    /// id once the grace elapses.
    pub fn schedule_finish(&mut self, expired: mpsc::UnboundedSender<GameId>) {
        if self.grace.is_some() {
            return;
        }
        let game_id = self.game_id;
        self.grace = Some(tokio::spawn(async move {
            tokio::time::sleep(FINISH_GRACE).await;
            let _ = expired.send(game_id);
        }));
    }
}

impl Drop for GameHandle {
    fn drop(&mut self) {
        if let Some(grace) = self.grace.take() {
            grace.abort();
        }
        // Dropping `tx` closes the actor's channel; cleanup happens there.
    }
}

struct GameEngine {
    engine: Engine,
    chat_rx: Option<mpsc::UnboundedReceiver<StderrEvent>>,
}

async fn run_game(
    game_id: GameId,
    config: Arc<Config>,
    pool: Arc<EnginePool>,
    mut rx: mpsc::Receiver<GameCommand>,
) {
    let mut held: Option<GameEngine> = None;
    let mut failures = 0u32;

    loop {
        // Relay chat while waiting so PV and DISCUSSION lines surface even
        // between turns.
        let command = if let Some(chat_rx) = held.as_mut().and_then(|h| h.chat_rx.as_mut()) {
            tokio::select! {
                command = rx.recv() => command,
                event = chat_rx.recv() => {
                    if let Some(event) = event {
                        relay_stderr(game_id, event);
                    }
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match command {
            Some(GameCommand::Turn {
                time_control,
                clock,
                color,
                reply,
            }) => {
                let result = take_turn(
                    game_id,
                    &config,
                    &pool,
                    &mut held,
                    &mut failures,
                    &time_control,
                    &clock,
                    color,
                )
                .await;
                let _ = reply.send(result);
            }
            Some(GameCommand::Terminate) | None => break,
        }
    }

    if let Some(mut held) = held.take() {
        // Scrub game state before the instance goes back for reuse.
        let _ = held.engine.command("clear_board").await;
        if let Some(chat_rx) = held.chat_rx.take() {
            held.engine.restore_stderr_events(chat_rx);
        }
        pool.release(held.engine);
    }
    debug!(game_id, "game closed");
}

#[allow(clippy::too_many_arguments)]
async fn take_turn(
    game_id: GameId,
    config: &Config,
    pool: &Arc<EnginePool>,
    held: &mut Option<GameEngine>,
    failures: &mut u32,
    time_control: &TimeControl,
    clock: &Clock,
    color: Color,
) -> Result<String, GtpError> {
    loop {
        if held.is_none() {
            let mut engine = pool.acquire().await?;
            engine.set_first_move(true);
            let chat_rx = engine.take_stderr_events();
            debug!(game_id, "engine attached");
            *held = Some(GameEngine { engine, chat_rx });
        }
        let engine = &held.as_ref().expect("engine attached above").engine;

        match issue_turn(config, engine, time_control, clock, color).await {
            Ok(mv) => {
                engine.set_first_move(false);
                return Ok(mv);
            }
            Err(e) => {
                *failures += 1;
                warn!(game_id, error = %e, failures, "move turn failed");
                if *failures >= MAX_TURN_FAILURES {
                    info!(game_id, "resigning after repeated engine failures");
                    return Ok("resign".to_string());
                }
                if engine.is_dead() {
                    // Hand the corpse back (the pool respawns a
                    // replacement) and retry on a fresh instance.
                    let held = held.take().expect("engine attached above");
                    pool.release(held.engine);
                }
            }
        }
    }
}

async fn issue_turn(
    config: &Config,
    engine: &Engine,
    time_control: &TimeControl,
    clock: &Clock,
    color: Color,
) -> Result<String, GtpError> {
    let mut setup: Vec<String> = Vec::new();
    if !config.noclock {
        let ctx = TurnContext {
            first_move: engine.first_move(),
            startup_buffer_ms: config.startupbuffer,
            clock_drift_ms: 0,
            now_ms: epoch_ms(),
        };
        setup.extend(time_commands(time_control, clock, &engine.caps(), &ctx));
    }
    if config.showboard {
        setup.push("showboard".to_string());
    }
    let genmove = format!("genmove {}", color.as_gtp());

    if config.json {
        // Nothing reaches a JSON-transport engine until the final command
        // closes the batch, so the whole turn is submitted at once.
        let batch = futures::future::join_all(setup.iter().map(|command| engine.command(command)));
        let (results, mv) = tokio::join!(batch, engine.command_final(&genmove));
        for result in results {
            result?;
        }
        mv
    } else {
        for command in &setup {
            engine.command(command).await?;
        }
        engine.command(&genmove).await
    }
}

fn relay_stderr(game_id: GameId, event: StderrEvent) {
    match event {
        StderrEvent::Chat { channel, body } => {
            info!(game_id, channel = %channel, body = %body, "engine chat")
        }
        StderrEvent::Pv(moves) => {
            info!(game_id, pv = %moves.join(" "), "engine pv")
        }
        StderrEvent::Line(line) => debug!(game_id, line = %line, "engine stderr"),
    }
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
