//! Challenge admission policy
//!
//! A pure predicate over `(challenge, current counts, config)`. Rejections
//! carry a human-readable message, a stable machine code and enough detail
//! to reconstruct the violation; the whitelist clears any rejection.

use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{BoardSizeRule, Config, SpeedSettings};
use crate::protocol::{Challenge, Speed, TimeControl};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCode {
    Blacklisted,
    BoardSizeNotSquare,
    BoardSizeNotAllowed,
    HandicapNotAllowed,
    UnrankedNotAllowed,
    BlitzNotAllowed,
    TooManyBlitzGames,
    LiveNotAllowed,
    TooManyLiveGames,
    CorrespondenceNotAllowed,
    TooManyCorrespondenceGames,
    TimeControlSystemNotAllowed,
    TimeIncrementOutOfRange,
    PeriodTimeOutOfRange,
    PeriodsOutOfRange,
    MainTimeOutOfRange,
    PerMoveTimeOutOfRange,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub message: String,
    pub rejection_code: RejectionCode,
    pub details: Value,
}

impl Rejection {
    fn new(message: impl Into<String>, code: RejectionCode, details: Value) -> Self {
        Rejection {
            message: message.into(),
            rejection_code: code,
            details,
        }
    }
}

/// Live game counts per speed class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OngoingCounts {
    pub blitz: usize,
    pub live: usize,
    pub correspondence: usize,
}

impl OngoingCounts {
    pub fn for_speed(&self, speed: Speed) -> usize {
        match speed {
            Speed::Blitz => self.blitz,
            Speed::Live => self.live,
            Speed::Correspondence => self.correspondence,
        }
    }
}

/// Decide whether to accept a challenge.
pub fn evaluate(
    challenge: &Challenge,
    counts: &OngoingCounts,
    config: &Config,
) -> Result<(), Rejection> {
    let verdict = ladder(challenge, counts, config);
    if verdict.is_err() && config.is_whitelisted(challenge.user.id, &challenge.user.username) {
        return Ok(());
    }
    verdict
}

fn ladder(
    challenge: &Challenge,
    counts: &OngoingCounts,
    config: &Config,
) -> Result<(), Rejection> {
    let user = &challenge.user;
    if config.is_blacklisted(user.id, &user.username) {
        return Err(Rejection::new(
            "You are not allowed to challenge this bot.",
            RejectionCode::Blacklisted,
            json!({ "user_id": user.id, "username": user.username }),
        ));
    }

    let system = challenge.time_control.system();
    if !config.allowed_time_control_systems.contains(&system) {
        return Err(Rejection::new(
            format!("Time control system {system} is not allowed."),
            RejectionCode::TimeControlSystemNotAllowed,
            json!({
                "time_control_system": system,
                "allowed": config.allowed_time_control_systems,
            }),
        ));
    }

    let speed = challenge.time_control.speed();
    let Some(settings) = config.speed_settings(speed) else {
        return Err(Rejection::new(
            format!("This bot does not play {speed} games."),
            speed_not_allowed(speed),
            json!({ "speed": speed }),
        ));
    };

    check_time_ranges(&challenge.time_control, settings)?;

    let ongoing = counts.for_speed(speed);
    if ongoing >= settings.concurrent_games {
        return Err(Rejection::new(
            format!("This bot is already playing its maximum number of {speed} games."),
            too_many_games(speed),
            json!({ "ongoing": ongoing, "limit": settings.concurrent_games }),
        ));
    }

    check_board_size(challenge, config)?;

    if challenge.handicap != 0 && !config.allow_handicap {
        return Err(Rejection::new(
            "Handicap games are not allowed against this bot.",
            RejectionCode::HandicapNotAllowed,
            json!({ "handicap": challenge.handicap }),
        ));
    }

    if !challenge.ranked && !config.allow_unranked {
        return Err(Rejection::new(
            "Unranked games are not allowed against this bot.",
            RejectionCode::UnrankedNotAllowed,
            json!({ "ranked": challenge.ranked }),
        ));
    }

    Ok(())
}

fn check_time_ranges(tc: &TimeControl, settings: &SpeedSettings) -> Result<(), Rejection> {
    match tc {
        TimeControl::Fischer { time_increment, .. } => in_range(
            *time_increment,
            settings.per_move_time_range,
            "time_increment",
            RejectionCode::TimeIncrementOutOfRange,
        ),
        TimeControl::Byoyomi {
            main_time,
            period_time,
            periods,
            ..
        } => {
            in_range(
                *period_time,
                settings.per_move_time_range,
                "period_time",
                RejectionCode::PeriodTimeOutOfRange,
            )?;
            in_range(
                *periods,
                settings.periods_range,
                "periods",
                RejectionCode::PeriodsOutOfRange,
            )?;
            in_range(
                *main_time,
                settings.main_time_range,
                "main_time",
                RejectionCode::MainTimeOutOfRange,
            )
        }
        TimeControl::Simple { per_move, .. } => in_range(
            *per_move,
            settings.per_move_time_range,
            "per_move",
            RejectionCode::PerMoveTimeOutOfRange,
        ),
        TimeControl::Canadian { .. } | TimeControl::Absolute { .. } | TimeControl::None { .. } => {
            Ok(())
        }
    }
}

fn in_range(
    value: i64,
    range: [i64; 2],
    field: &str,
    code: RejectionCode,
) -> Result<(), Rejection> {
    if value < range[0] || value > range[1] {
        let mut details = serde_json::Map::new();
        details.insert(field.to_string(), json!(value));
        details.insert("range".to_string(), json!(range));
        return Err(Rejection::new(
            format!(
                "{field} {value}s is out of the allowed range {}-{}s.",
                range[0], range[1]
            ),
            code,
            Value::Object(details),
        ));
    }
    Ok(())
}

fn check_board_size(challenge: &Challenge, config: &Config) -> Result<(), Rejection> {
    let (width, height) = (challenge.width, challenge.height);
    match &config.allowed_board_sizes {
        BoardSizeRule::All => Ok(()),
        BoardSizeRule::Square if width == height => Ok(()),
        BoardSizeRule::Square => Err(Rejection::new(
            "This bot only plays square boards.",
            RejectionCode::BoardSizeNotSquare,
            json!({ "width": width, "height": height }),
        )),
        BoardSizeRule::Sizes(sizes) => {
            if width == height && sizes.contains(&width) {
                Ok(())
            } else {
                Err(Rejection::new(
                    format!("Board size {width}x{height} is not allowed."),
                    RejectionCode::BoardSizeNotAllowed,
                    json!({ "width": width, "height": height, "allowed": sizes }),
                ))
            }
        }
    }
}

fn speed_not_allowed(speed: Speed) -> RejectionCode {
    match speed {
        Speed::Blitz => RejectionCode::BlitzNotAllowed,
        Speed::Live => RejectionCode::LiveNotAllowed,
        Speed::Correspondence => RejectionCode::CorrespondenceNotAllowed,
    }
}

fn too_many_games(speed: Speed) -> RejectionCode {
    match speed {
        Speed::Blitz => RejectionCode::TooManyBlitzGames,
        Speed::Live => RejectionCode::TooManyLiveGames,
        Speed::Correspondence => RejectionCode::TooManyCorrespondenceGames,
    }
}
