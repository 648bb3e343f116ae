//! Session controller
//!
//! Owns the server connection end-to-end: authenticates once the engine
//! pools are ready, admits or declines challenges, tracks one descriptor
//! per live game and keeps the server's view of ongoing game counts fresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gtp_bridge::EnginePool;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::admission::{self, OngoingCounts};
use crate::config::Config;
use crate::error::BotError;
use crate::game::GameHandle;
use crate::protocol::{
    ActiveGame, BotIdentity, Challenge, GameId, GamePhase, Notification, ServerEvent,
    ServerMessage, Speed,
};
use crate::rest::RestClient;
use crate::transport::MessageSender;

/// How often ongoing counts are compared against the last report.
const STATUS_INTERVAL: Duration = Duration::from_millis(100);
/// How often a status line is dumped to the log.
const DUMP_INTERVAL: Duration = Duration::from_secs(60);

/// Notification types with no bot-side action.
const IGNORED_NOTIFICATIONS: &[&str] = &[
    "delete",
    "gameStarted",
    "gameEnded",
    "gameDeclined",
    "gameResumedFromStoneRemoval",
    "tournamentStarted",
    "tournamentEnded",
    "aiReviewDone",
];

pub struct GamePools {
    pub main: Arc<EnginePool>,
    pub opening: Option<Arc<EnginePool>>,
    pub ending: Option<Arc<EnginePool>>,
    pub resign_check: Option<Arc<EnginePool>>,
}

pub struct SessionController {
    config: Arc<Config>,
    rest: RestClient,
    pools: GamePools,
    outbound: MessageSender,
    games: HashMap<GameId, GameHandle>,
    identity: Option<BotIdentity>,
    connected: bool,
    last_status: Option<OngoingCounts>,
}

impl SessionController {
    pub fn new(
        config: Arc<Config>,
        rest: RestClient,
        pools: GamePools,
        outbound: MessageSender,
    ) -> Self {
        SessionController {
            config,
            rest,
            pools,
            outbound,
            games: HashMap::new(),
            identity: None,
            connected: false,
            last_status: None,
        }
    }

    /// Drive the session until the event stream closes or authentication
    /// fails. The caller must only connect the transport after every
    /// configured engine pool is ready.
    pub async fn run(mut self, mut events: mpsc::Receiver<ServerEvent>) -> Result<(), BotError> {
        let (expired_tx, mut expired_rx) = mpsc::unbounded_channel();
        let mut status_tick = tokio::time::interval(STATUS_INTERVAL);
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut dump_tick = tokio::time::interval(DUMP_INTERVAL);
        dump_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event, &expired_tx).await?,
                    None => break,
                },
                Some(game_id) = expired_rx.recv() => {
                    if let Some(game) = self.games.remove(&game_id) {
                        info!(game_id, "game finished");
                        game.terminate();
                    }
                },
                _ = status_tick.tick() => self.report_status(),
                _ = dump_tick.tick() => self.dump_availability(),
            }
        }
        Ok(())
    }

    async fn handle_event(
        &mut self,
        event: ServerEvent,
        expired_tx: &mpsc::UnboundedSender<GameId>,
    ) -> Result<(), BotError> {
        match event {
            ServerEvent::Connected => {
                self.connected = true;
                info!(username = %self.config.username, "connected, authenticating");
                self.outbound.send(ServerMessage::Authenticate {
                    bot_username: self.config.username.clone(),
                    bot_apikey: self.config.apikey.clone(),
                    bot_config: json!({ "hidden": self.config.hidden }),
                });
            }
            ServerEvent::Authenticated { id, username } => match id {
                Some(id) => {
                    let identity = BotIdentity {
                        id,
                        username: username.unwrap_or_else(|| self.config.username.clone()),
                    };
                    info!(bot_id = identity.id, username = %identity.username, "authenticated");
                    self.identity = Some(identity);
                    if self.config.hidden {
                        self.outbound.send(ServerMessage::BotHidden(true));
                    }
                }
                None => {
                    return Err(BotError::AuthFailed(format!(
                        "unknown bot account {}",
                        self.config.username
                    )));
                }
            },
            ServerEvent::Disconnected => {
                self.connected = false;
                info!(games = self.games.len(), "disconnected, tearing down games");
                for (_, game) in self.games.drain() {
                    game.terminate();
                }
            }
            ServerEvent::ActiveGame(game) => self.on_active_game(game, expired_tx),
            ServerEvent::Notification(notification) => self.on_notification(notification).await,
        }
        Ok(())
    }

    fn on_active_game(&mut self, game: ActiveGame, expired_tx: &mpsc::UnboundedSender<GameId>) {
        if game.phase == GamePhase::Finished {
            // Connect even a never-seen finished game so late gamedata
            // still finds a live descriptor, then let the grace timer
            // reap it.
            let config = Arc::clone(&self.config);
            let pool = Arc::clone(&self.pools.main);
            let handle = self.games.entry(game.id).or_insert_with(|| {
                debug!(game_id = game.id, "descriptor for already-finished game");
                GameHandle::start(game.id, game.speed(), config, pool)
            });
            handle.schedule_finish(expired_tx.clone());
        } else if !self.games.contains_key(&game.id) {
            info!(game_id = game.id, speed = %game.speed(), "game connected");
            self.games.insert(
                game.id,
                GameHandle::start(
                    game.id,
                    game.speed(),
                    Arc::clone(&self.config),
                    Arc::clone(&self.pools.main),
                ),
            );
        }
        // A repeated active_game for a connected live game is a no-op.
    }

    async fn on_notification(&mut self, notification: Notification) {
        match notification.kind.as_str() {
            "challenge" => self.on_challenge(notification).await,
            "friendRequest" => {
                let from_user = notification
                    .payload
                    .get("user")
                    .and_then(|user| user.get("id"))
                    .and_then(Value::as_i64);
                match from_user {
                    Some(user_id) => match self.rest.accept_friend_request(user_id).await {
                        Ok(()) => info!(user_id, "friend request accepted"),
                        Err(e) => warn!(user_id, error = %e, "friend request accept failed"),
                    },
                    None => warn!("friendRequest without a user id"),
                }
            }
            kind if IGNORED_NOTIFICATIONS.contains(&kind) => {}
            other => {
                info!(kind = other, id = %notification.id, "unhandled notification, deleting");
                self.outbound.send(ServerMessage::NotificationDelete {
                    notification_id: notification.id,
                });
            }
        }
    }

    async fn on_challenge(&mut self, notification: Notification) {
        let challenge: Challenge =
            match serde_json::from_value(Value::Object(notification.payload)) {
                Ok(challenge) => challenge,
                Err(e) => {
                    warn!(error = %e, "undecodable challenge payload");
                    self.outbound.send(ServerMessage::NotificationDelete {
                        notification_id: notification.id,
                    });
                    return;
                }
            };

        let counts = self.counts();
        match admission::evaluate(&challenge, &counts, &self.config) {
            Ok(()) => {
                info!(
                    challenge_id = challenge.challenge_id,
                    user = %challenge.user.username,
                    "accepting challenge"
                );
                if let Err(e) = self.rest.accept_challenge(challenge.challenge_id).await {
                    warn!(error = %e, "challenge accept failed, declining instead");
                    if let Err(e) = self.rest.decline_challenge(challenge.challenge_id, None).await
                    {
                        warn!(error = %e, "challenge decline failed");
                    }
                }
            }
            Err(rejection) => {
                info!(
                    challenge_id = challenge.challenge_id,
                    user = %challenge.user.username,
                    code = ?rejection.rejection_code,
                    "declining challenge"
                );
                if let Err(e) = self
                    .rest
                    .decline_challenge(challenge.challenge_id, Some(&rejection))
                    .await
                {
                    warn!(error = %e, "challenge decline failed");
                }
            }
        }
    }

    fn counts(&self) -> OngoingCounts {
        let mut counts = OngoingCounts::default();
        for game in self.games.values() {
            match game.speed {
                Speed::Blitz => counts.blitz += 1,
                Speed::Live => counts.live += 1,
                Speed::Correspondence => counts.correspondence += 1,
            }
        }
        counts
    }

    fn report_status(&mut self) {
        if !self.connected {
            return;
        }
        let counts = self.counts();
        if self.last_status != Some(counts) {
            self.outbound.send(ServerMessage::BotStatus {
                ongoing_blitz_count: counts.blitz,
                ongoing_live_count: counts.live,
                ongoing_correspondence_count: counts.correspondence,
            });
            self.last_status = Some(counts);
        }
    }

    fn dump_availability(&self) {
        info!(
            games = self.games.len(),
            main_available = self.pools.main.count_available(),
            opening_available = ?self.pools.opening.as_ref().map(|p| p.count_available()),
            ending_available = ?self.pools.ending.as_ref().map(|p| p.count_available()),
            resign_check_available =
                ?self.pools.resign_check.as_ref().map(|p| p.count_available()),
            "session status"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gtp_bridge::{EngineOptions, Role};
    use tokio::time::timeout;

    fn test_config() -> Arc<Config> {
        Arc::new(
            serde_json::from_value(json!({
                "username": "testbot",
                "apikey": "secret",
                "bot_command": ["gnugo", "--mode", "gtp"],
                "allowed_live_settings": { "concurrent_games": 3 },
            }))
            .unwrap(),
        )
    }

    async fn start_controller() -> (
        tokio::task::JoinHandle<Result<(), BotError>>,
        mpsc::Sender<ServerEvent>,
        mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        let config = test_config();
        // Size-zero pool: ready immediately, and these tests never reach
        // a move turn.
        let main = EnginePool::start(
            Role::Main,
            config.bot_command.clone(),
            0,
            EngineOptions::default(),
        )
        .await
        .unwrap();
        let pools = GamePools {
            main,
            opening: None,
            ending: None,
            resign_check: None,
        };
        let rest = RestClient::new("http://127.0.0.1:1", "secret").unwrap();
        let (transport, event_tx, out_rx) = crate::transport::Transport::channel(16);
        let controller = SessionController::new(config, rest, pools, transport.outbound.clone());
        let task = tokio::spawn(controller.run(transport.events));
        (task, event_tx, out_rx)
    }

    async fn next_message(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for outbound message")
            .expect("outbound channel closed")
    }

    /// Skip non-status traffic until a bot/status with the wanted counts.
    async fn wait_for_status(
        rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
        want: (usize, usize, usize),
    ) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let message = timeout(remaining, rx.recv())
                .await
                .expect("timed out waiting for bot/status")
                .expect("outbound channel closed");
            if let ServerMessage::BotStatus {
                ongoing_blitz_count,
                ongoing_live_count,
                ongoing_correspondence_count,
            } = message
            {
                if (
                    ongoing_blitz_count,
                    ongoing_live_count,
                    ongoing_correspondence_count,
                ) == want
                {
                    return;
                }
            }
        }
    }

    fn live_game(id: GameId, phase: GamePhase) -> ServerEvent {
        ServerEvent::ActiveGame(ActiveGame {
            id,
            phase,
            time_control: Some(crate::protocol::TimeControl::Fischer {
                speed: Speed::Live,
                initial_time: 600,
                time_increment: 30,
                max_time: 600,
            }),
            width: Some(19),
            height: Some(19),
        })
    }

    #[tokio::test]
    async fn test_authenticates_on_connect() {
        let (task, event_tx, mut out_rx) = start_controller().await;
        event_tx.send(ServerEvent::Connected).await.unwrap();

        match next_message(&mut out_rx).await {
            ServerMessage::Authenticate { bot_username, .. } => {
                assert_eq!(bot_username, "testbot")
            }
            other => panic!("expected authenticate, got {other:?}"),
        }
        drop(event_tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_auth_failure_ends_session() {
        let (task, event_tx, _out_rx) = start_controller().await;
        event_tx.send(ServerEvent::Connected).await.unwrap();
        event_tx
            .send(ServerEvent::Authenticated {
                id: None,
                username: None,
            })
            .await
            .unwrap();

        let result = timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(matches!(result, Err(BotError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn test_active_game_is_idempotent_and_counted() {
        let (task, event_tx, mut out_rx) = start_controller().await;
        event_tx.send(ServerEvent::Connected).await.unwrap();
        wait_for_status(&mut out_rx, (0, 0, 0)).await;

        event_tx.send(live_game(100, GamePhase::Play)).await.unwrap();
        event_tx.send(live_game(100, GamePhase::Play)).await.unwrap();
        event_tx.send(live_game(101, GamePhase::Play)).await.unwrap();

        // Two games, not three: the repeated id is a no-op.
        wait_for_status(&mut out_rx, (0, 2, 0)).await;
        drop(event_tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_finished_game_reaped_after_grace() {
        let (task, event_tx, mut out_rx) = start_controller().await;
        event_tx.send(ServerEvent::Connected).await.unwrap();

        event_tx.send(live_game(200, GamePhase::Play)).await.unwrap();
        wait_for_status(&mut out_rx, (0, 1, 0)).await;

        event_tx
            .send(live_game(200, GamePhase::Finished))
            .await
            .unwrap();
        // The descriptor survives the 1s grace, then the count drops.
        wait_for_status(&mut out_rx, (0, 0, 0)).await;
        drop(event_tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_tears_down_games() {
        let (task, event_tx, mut out_rx) = start_controller().await;
        event_tx.send(ServerEvent::Connected).await.unwrap();
        event_tx.send(live_game(300, GamePhase::Play)).await.unwrap();
        wait_for_status(&mut out_rx, (0, 1, 0)).await;

        event_tx.send(ServerEvent::Disconnected).await.unwrap();
        event_tx.send(ServerEvent::Connected).await.unwrap();
        wait_for_status(&mut out_rx, (0, 0, 0)).await;
        drop(event_tx);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_notification_is_deleted() {
        let (task, event_tx, mut out_rx) = start_controller().await;
        event_tx.send(ServerEvent::Connected).await.unwrap();

        let notification: Notification = serde_json::from_value(json!({
            "id": "n-9",
            "type": "lightningStrike",
        }))
        .unwrap();
        event_tx
            .send(ServerEvent::Notification(notification))
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match timeout(remaining, out_rx.recv()).await.unwrap().unwrap() {
                ServerMessage::NotificationDelete { notification_id } => {
                    assert_eq!(notification_id, "n-9");
                    break;
                }
                _ => continue,
            }
        }
        drop(event_tx);
        task.await.unwrap().unwrap();
    }
}
