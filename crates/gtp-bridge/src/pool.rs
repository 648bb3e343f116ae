//! Engine pool
//!
//! Owns the fixed set of engine subprocesses for one role and hands them out
//! to games. `start` resolves once every instance has finished its
//! `list_commands` handshake, which is what gates authentication upstream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::adapter::{Engine, EngineOptions};
use crate::error::GtpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Main,
    Opening,
    Ending,
    ResignCheck,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Main => "main",
            Role::Opening => "opening",
            Role::Ending => "ending",
            Role::ResignCheck => "resign-check",
        }
    }
}

pub struct EnginePool {
    role: Role,
    argv: Vec<String>,
    options: EngineOptions,
    idle: Mutex<mpsc::Receiver<Engine>>,
    returns: mpsc::Sender<Engine>,
    available: AtomicUsize,
    this: Weak<EnginePool>,
}

impl EnginePool {
    /// Spawn and handshake `size` engines. Resolves only when every
    /// instance is ready, so the first acquired engine can serve a game
    /// immediately.
    pub async fn start(
        role: Role,
        argv: Vec<String>,
        size: usize,
        options: EngineOptions,
    ) -> Result<Arc<EnginePool>, GtpError> {
        let (returns, idle) = mpsc::channel(size.max(1));

        let pool = Arc::new_cyclic(|this| EnginePool {
            role,
            argv,
            options,
            idle: Mutex::new(idle),
            returns,
            available: AtomicUsize::new(0),
            this: this.clone(),
        });

        for n in 0..size {
            let engine = pool.spawn_instance().await?;
            info!(role = role.as_str(), instance = n, "engine ready");
            pool.returns
                .send(engine)
                .await
                .map_err(|_| GtpError::Spawn("pool closed during start".into()))?;
            pool.available.fetch_add(1, Ordering::SeqCst);
        }

        Ok(pool)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Number of ready, idle instances.
    pub fn count_available(&self) -> usize {
        self.available.load(Ordering::SeqCst)
    }

    /// Take an engine, waiting until one is free.
    pub async fn acquire(&self) -> Result<Engine, GtpError> {
        let mut idle = self.idle.lock().await;
        let engine = idle
            .recv()
            .await
            .ok_or_else(|| GtpError::Spawn("pool closed".into()))?;
        self.available.fetch_sub(1, Ordering::SeqCst);
        Ok(engine)
    }

    /// Return an engine. A dead instance is replaced asynchronously so the
    /// pool's capacity recovers without blocking the caller.
    pub fn release(&self, engine: Engine) {
        if engine.is_dead() {
            warn!(role = self.role.as_str(), "released engine is dead, respawning");
            let Some(pool) = self.this.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                match pool.spawn_instance().await {
                    Ok(replacement) => {
                        if pool.returns.send(replacement).await.is_ok() {
                            pool.available.fetch_add(1, Ordering::SeqCst);
                            info!(role = pool.role.as_str(), "replacement engine ready");
                        }
                    }
                    Err(e) => {
                        error!(role = pool.role.as_str(), error = %e, "failed to respawn engine");
                    }
                }
            });
        } else if self.returns.try_send(engine).is_ok() {
            self.available.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn spawn_instance(&self) -> Result<Engine, GtpError> {
        let mut engine = Engine::spawn(&self.argv, self.options)?;
        engine.handshake().await?;
        Ok(engine)
    }
}

impl Drop for EnginePool {
    fn drop(&mut self) {
        // Remaining idle engines shut down when their handles drop; games
        // holding acquired engines keep them alive until release.
        if let Ok(mut idle) = self.idle.try_lock() {
            while let Ok(engine) = idle.try_recv() {
                engine.kill();
            }
        }
    }
}
