//! Bot configuration
//!
//! Loaded once from a JSON file at startup and immutable afterwards. The
//! authenticated identity assigned by the server lives in the session
//! controller, not here.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::BotError;
use crate::protocol::Speed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSystem {
    Fischer,
    Byoyomi,
    Canadian,
    Simple,
    Absolute,
    None,
}

impl fmt::Display for TimeSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeSystem::Fischer => "fischer",
            TimeSystem::Byoyomi => "byoyomi",
            TimeSystem::Canadian => "canadian",
            TimeSystem::Simple => "simple",
            TimeSystem::Absolute => "absolute",
            TimeSystem::None => "none",
        };
        write!(f, "{name}")
    }
}

/// A blacklist/whitelist entry: numeric user id or username.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Id(i64),
    Name(String),
}

/// Which board sizes challenges may use.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardSizeRule {
    All,
    Square,
    Sizes(Vec<u32>),
}

impl<'de> Deserialize<'de> for BoardSizeRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Word(String),
            Sizes(Vec<u32>),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Word(w) if w == "all" => Ok(BoardSizeRule::All),
            Raw::Word(w) if w == "square" => Ok(BoardSizeRule::Square),
            Raw::Word(w) => Err(serde::de::Error::custom(format!(
                "allowed_board_sizes must be \"all\", \"square\" or a list, got {w:?}"
            ))),
            Raw::Sizes(sizes) => Ok(BoardSizeRule::Sizes(sizes)),
        }
    }
}

/// Per-speed admission limits.
#[derive(Debug, Clone, Deserialize)]
pub struct SpeedSettings {
    pub concurrent_games: usize,
    #[serde(default = "range_unbounded")]
    pub per_move_time_range: [i64; 2],
    #[serde(default = "range_unbounded")]
    pub main_time_range: [i64; 2],
    #[serde(default = "range_unbounded")]
    pub periods_range: [i64; 2],
}

fn range_unbounded() -> [i64; 2] {
    [0, i64::MAX]
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub username: String,
    pub apikey: String,

    /// Start the bot hidden from the public bot list.
    #[serde(default)]
    pub hidden: bool,

    /// Argv for the main engine.
    pub bot_command: Vec<String>,
    #[serde(default)]
    pub opening_bot: Option<Vec<String>>,
    #[serde(default)]
    pub ending_bot: Option<Vec<String>>,
    #[serde(default)]
    pub resign_bot: Option<Vec<String>>,
    #[serde(default = "default_instances")]
    pub engine_instances: usize,

    /// Relay engine principal variations as in-game chat.
    #[serde(default)]
    pub ogspv: bool,
    /// Extract DISCUSSION:/MALKOVICH: stderr lines as chat.
    #[serde(default)]
    pub aichat: bool,
    /// Drive engines with the JSON-framed GTP transport.
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub verbosity: u8,
    /// Skip clock translation entirely.
    #[serde(default)]
    pub noclock: bool,
    /// Milliseconds added to the offset on a game's first move.
    #[serde(default = "default_startup_buffer")]
    pub startupbuffer: i64,
    /// Issue `showboard` after loading state into the engine.
    #[serde(default)]
    pub showboard: bool,

    #[serde(default)]
    pub allow_handicap: bool,
    #[serde(default)]
    pub allow_unranked: bool,
    #[serde(default = "default_board_sizes")]
    pub allowed_board_sizes: BoardSizeRule,
    #[serde(default = "default_time_systems")]
    pub allowed_time_control_systems: Vec<TimeSystem>,
    #[serde(default)]
    pub allowed_blitz_settings: Option<SpeedSettings>,
    #[serde(default)]
    pub allowed_live_settings: Option<SpeedSettings>,
    #[serde(default)]
    pub allowed_correspondence_settings: Option<SpeedSettings>,

    #[serde(default)]
    pub blacklist: Vec<UserRef>,
    #[serde(default)]
    pub whitelist: Vec<UserRef>,

    #[serde(default = "default_server_url")]
    pub server_url: String,
}

fn default_instances() -> usize {
    1
}

fn default_startup_buffer() -> i64 {
    5_000
}

fn default_board_sizes() -> BoardSizeRule {
    BoardSizeRule::Square
}

fn default_time_systems() -> Vec<TimeSystem> {
    vec![
        TimeSystem::Fischer,
        TimeSystem::Byoyomi,
        TimeSystem::Canadian,
        TimeSystem::Simple,
        TimeSystem::Absolute,
    ]
}

fn default_server_url() -> String {
    "https://online-go.com".to_string()
}

impl Config {
    /// Read and validate the configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, BotError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BotError::Config(format!("{}: {e}", path.display())))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| BotError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), BotError> {
        if self.username.is_empty() {
            return Err(BotError::Config("username must not be empty".into()));
        }
        if self.apikey.is_empty() {
            return Err(BotError::Config("apikey must not be empty".into()));
        }
        if self.bot_command.is_empty() {
            return Err(BotError::Config("bot_command must not be empty".into()));
        }
        if self.engine_instances == 0 {
            return Err(BotError::Config("engine_instances must be at least 1".into()));
        }
        for settings in [
            &self.allowed_blitz_settings,
            &self.allowed_live_settings,
            &self.allowed_correspondence_settings,
        ]
        .into_iter()
        .flatten()
        {
            for range in [
                settings.per_move_time_range,
                settings.main_time_range,
                settings.periods_range,
            ] {
                if range[0] > range[1] {
                    return Err(BotError::Config(format!(
                        "invalid range [{}, {}]",
                        range[0], range[1]
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn speed_settings(&self, speed: Speed) -> Option<&SpeedSettings> {
        match speed {
            Speed::Blitz => self.allowed_blitz_settings.as_ref(),
            Speed::Live => self.allowed_live_settings.as_ref(),
            Speed::Correspondence => self.allowed_correspondence_settings.as_ref(),
        }
    }

    pub fn is_blacklisted(&self, id: i64, username: &str) -> bool {
        matches_user(&self.blacklist, id, username)
    }

    pub fn is_whitelisted(&self, id: i64, username: &str) -> bool {
        matches_user(&self.whitelist, id, username)
    }
}

fn matches_user(list: &[UserRef], id: i64, username: &str) -> bool {
    list.iter().any(|entry| match entry {
        UserRef::Id(entry_id) => *entry_id == id,
        UserRef::Name(name) => name == username,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> serde_json::Value {
        serde_json::json!({
            "username": "testbot",
            "apikey": "secret",
            "bot_command": ["gnugo", "--mode", "gtp"],
        })
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config: Config = serde_json::from_value(minimal()).unwrap();
        config.validate().unwrap();
        assert!(!config.hidden);
        assert_eq!(config.engine_instances, 1);
        assert_eq!(config.allowed_board_sizes, BoardSizeRule::Square);
        assert_eq!(config.startupbuffer, 5_000);
        assert!(config.allowed_live_settings.is_none());
    }

    #[test]
    fn test_board_sizes_variants() {
        for (raw, expected) in [
            (serde_json::json!("all"), BoardSizeRule::All),
            (serde_json::json!("square"), BoardSizeRule::Square),
            (
                serde_json::json!([9, 13, 19]),
                BoardSizeRule::Sizes(vec![9, 13, 19]),
            ),
        ] {
            let rule: BoardSizeRule = serde_json::from_value(raw).unwrap();
            assert_eq!(rule, expected);
        }
        assert!(serde_json::from_value::<BoardSizeRule>(serde_json::json!("round")).is_err());
    }

    #[test]
    fn test_user_lists_match_id_or_name() {
        let mut raw = minimal();
        raw["blacklist"] = serde_json::json!([123, "spammer"]);
        let config: Config = serde_json::from_value(raw).unwrap();
        assert!(config.is_blacklisted(123, "whoever"));
        assert!(config.is_blacklisted(9, "spammer"));
        assert!(!config.is_blacklisted(9, "friend"));
    }

    #[test]
    fn test_invalid_range_rejected() {
        let mut raw = minimal();
        raw["allowed_live_settings"] = serde_json::json!({
            "concurrent_games": 1,
            "per_move_time_range": [60, 10],
        });
        let config: Config = serde_json::from_value(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_bot_command_rejected() {
        let mut raw = minimal();
        raw["bot_command"] = serde_json::json!([]);
        let config: Config = serde_json::from_value(raw).unwrap();
        assert!(config.validate().is_err());
    }
}
