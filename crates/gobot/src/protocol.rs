//! Server wire model
//!
//! Serde types for the events and messages exchanged with the Go server:
//! challenges, game state, clocks and the socket RPC envelope. The socket
//! itself lives in `transport`; this module is just the vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::TimeSystem;

pub type GameId = u64;
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speed {
    Blitz,
    Live,
    Correspondence,
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speed::Blitz => write!(f, "blitz"),
            Speed::Live => write!(f, "live"),
            Speed::Correspondence => write!(f, "correspondence"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Black,
    White,
}

impl Color {
    pub fn as_gtp(&self) -> &'static str {
        match self {
            Color::Black => "black",
            Color::White => "white",
        }
    }
}

/// The server's time control, tagged by `system`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "system", rename_all = "lowercase")]
pub enum TimeControl {
    Fischer {
        speed: Speed,
        initial_time: i64,
        time_increment: i64,
        max_time: i64,
    },
    Byoyomi {
        speed: Speed,
        main_time: i64,
        period_time: i64,
        periods: i64,
    },
    Canadian {
        speed: Speed,
        main_time: i64,
        period_time: i64,
        stones_per_period: i64,
    },
    Simple {
        speed: Speed,
        per_move: i64,
    },
    Absolute {
        speed: Speed,
        total_time: i64,
    },
    None {
        speed: Speed,
    },
}

impl TimeControl {
    pub fn speed(&self) -> Speed {
        match self {
            TimeControl::Fischer { speed, .. }
            | TimeControl::Byoyomi { speed, .. }
            | TimeControl::Canadian { speed, .. }
            | TimeControl::Simple { speed, .. }
            | TimeControl::Absolute { speed, .. }
            | TimeControl::None { speed } => *speed,
        }
    }

    pub fn system(&self) -> TimeSystem {
        match self {
            TimeControl::Fischer { .. } => TimeSystem::Fischer,
            TimeControl::Byoyomi { .. } => TimeSystem::Byoyomi,
            TimeControl::Canadian { .. } => TimeSystem::Canadian,
            TimeControl::Simple { .. } => TimeSystem::Simple,
            TimeControl::Absolute { .. } => TimeSystem::Absolute,
            TimeControl::None { .. } => TimeSystem::None,
        }
    }
}

/// One player's clock inside a game-state snapshot. The shape varies by
/// time system; `Timestamp` is the bare expiration the server sends for
/// simple clocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PlayerClock {
    Byoyomi {
        thinking_time: f64,
        periods: i64,
        period_time: f64,
    },
    Canadian {
        thinking_time: f64,
        moves_left: i64,
        block_time: f64,
    },
    Plain {
        thinking_time: f64,
    },
    Timestamp(f64),
}

impl PlayerClock {
    pub fn thinking_time(&self) -> f64 {
        match self {
            PlayerClock::Byoyomi { thinking_time, .. }
            | PlayerClock::Canadian { thinking_time, .. }
            | PlayerClock::Plain { thinking_time } => *thinking_time,
            PlayerClock::Timestamp(_) => 0.0,
        }
    }
}

/// A game-state clock snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct Clock {
    pub current_player: UserId,
    pub black_player_id: UserId,
    pub white_player_id: UserId,
    /// Epoch milliseconds of the last move the server observed.
    pub last_move: i64,
    pub black_time: PlayerClock,
    pub white_time: PlayerClock,
}

impl Clock {
    pub fn to_move(&self) -> Color {
        if self.current_player == self.black_player_id {
            Color::Black
        } else {
            Color::White
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChallengeUser {
    pub id: UserId,
    pub username: String,
}

/// An incoming challenge reduced to the fields admission evaluates.
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    pub challenge_id: u64,
    #[serde(default)]
    pub game_id: Option<GameId>,
    pub user: ChallengeUser,
    pub time_control: TimeControl,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub handicap: i64,
    #[serde(default)]
    pub ranked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum GamePhase {
    #[serde(rename = "play")]
    Play,
    #[serde(rename = "stone removal")]
    StoneRemoval,
    #[serde(rename = "finished")]
    Finished,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActiveGame {
    pub id: GameId,
    pub phase: GamePhase,
    #[serde(default)]
    pub time_control: Option<TimeControl>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl ActiveGame {
    /// Speed class for concurrency accounting; `live` when the payload
    /// omitted the time control.
    pub fn speed(&self) -> Speed {
        self.time_control
            .as_ref()
            .map(TimeControl::speed)
            .unwrap_or(Speed::Live)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BotIdentity {
    pub id: UserId,
    pub username: String,
}

/// Inbound socket events, already decoded from the wire envelope.
#[derive(Debug)]
pub enum ServerEvent {
    Connected,
    Disconnected,
    Authenticated {
        id: Option<UserId>,
        username: Option<String>,
    },
    ActiveGame(ActiveGame),
    Notification(Notification),
}

/// Outbound socket messages. The transport wraps these as
/// `[name, payload]` JSON frames.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Authenticate {
        bot_username: String,
        bot_apikey: String,
        bot_config: Value,
    },
    BotHidden(bool),
    BotStatus {
        ongoing_blitz_count: usize,
        ongoing_live_count: usize,
        ongoing_correspondence_count: usize,
    },
    NotificationDelete {
        notification_id: String,
    },
}

impl ServerMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::Authenticate { .. } => "authenticate",
            ServerMessage::BotHidden(_) => "bot/hidden",
            ServerMessage::BotStatus { .. } => "bot/status",
            ServerMessage::NotificationDelete { .. } => "notification/delete",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            ServerMessage::Authenticate {
                bot_username,
                bot_apikey,
                bot_config,
            } => json!({
                "jwt": "",
                "bot_username": bot_username,
                "bot_apikey": bot_apikey,
                "bot_config": bot_config,
            }),
            ServerMessage::BotHidden(hidden) => json!(hidden),
            ServerMessage::BotStatus {
                ongoing_blitz_count,
                ongoing_live_count,
                ongoing_correspondence_count,
            } => json!({
                "ongoing_blitz_count": ongoing_blitz_count,
                "ongoing_live_count": ongoing_live_count,
                "ongoing_correspondence_count": ongoing_correspondence_count,
            }),
            ServerMessage::NotificationDelete { notification_id } => json!({
                "notification_id": notification_id,
            }),
        }
    }
}
