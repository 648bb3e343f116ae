//! gobot — a GTP bridge client for an online Go server
//!
//! Spawns the configured engines, connects to the server, accepts
//! challenges within policy and plays games on behalf of a registered bot
//! account. Runs until signaled; exits 1 on configuration or
//! authentication failure.

mod admission;
mod clock;
mod config;
mod error;
mod game;
mod protocol;
mod rest;
mod session;
mod transport;

use std::sync::Arc;

use gtp_bridge::{EngineOptions, EnginePool, Role};
use tracing::info;

use crate::config::Config;
use crate::error::BotError;
use crate::rest::RestClient;
use crate::session::{GamePools, SessionController};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local dev before anything reads the environment.
    let _ = dotenvy::dotenv();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GOBOT_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = Arc::new(Config::load(&config_path)?);

    let default_level = if config.verbosity > 0 {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.into()),
        )
        .init();

    info!(
        username = %config.username,
        server = %config.server_url,
        engine = %config.bot_command[0],
        "config loaded"
    );

    let engine_options = EngineOptions {
        json_transport: config.json,
        pv_chat: config.ogspv,
        chat_extraction: config.aichat,
    };

    // Authentication waits on every configured pool, so an accepted game
    // can always be served.
    let main = EnginePool::start(
        Role::Main,
        config.bot_command.clone(),
        config.engine_instances,
        engine_options,
    )
    .await
    .map_err(BotError::Gtp)?;
    let opening = start_optional(Role::Opening, &config.opening_bot, engine_options).await?;
    let ending = start_optional(Role::Ending, &config.ending_bot, engine_options).await?;
    let resign_check =
        start_optional(Role::ResignCheck, &config.resign_bot, engine_options).await?;
    info!(
        main = main.count_available(),
        "engine pools ready"
    );

    let rest = RestClient::new(&config.server_url, &config.apikey)?;
    let transport = transport::connect(&socket_url(&config.server_url)).await?;
    let controller = SessionController::new(
        Arc::clone(&config),
        rest,
        GamePools {
            main,
            opening,
            ending,
            resign_check,
        },
        transport.outbound,
    );

    controller.run(transport.events).await?;
    Ok(())
}

async fn start_optional(
    role: Role,
    argv: &Option<Vec<String>>,
    options: EngineOptions,
) -> anyhow::Result<Option<Arc<EnginePool>>> {
    match argv {
        Some(argv) => {
            let pool = EnginePool::start(role, argv.clone(), 1, options)
                .await
                .map_err(BotError::Gtp)?;
            Ok(Some(pool))
        }
        None => Ok(None),
    }
}

fn socket_url(server_url: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws}/socket")
}
