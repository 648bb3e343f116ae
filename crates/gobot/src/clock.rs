//! Clock translation
//!
//! Converts a server clock snapshot into the GTP time-setup commands an
//! engine with a given capability profile understands. Pure data in, data
//! out: the caller decides when (and whether) to issue the commands.
//!
//! GTP's base `time_settings` cannot express Japanese byoyomi; without the
//! KGS extension the last period is mapped to a one-stone Canadian overtime
//! so the engine budgets a full period per move instead of spreading the
//! remainder across the game.

use gtp_bridge::EngineCaps;

use crate::protocol::{Clock, Color, PlayerClock, TimeControl};

/// Per-turn inputs that are not part of the clock snapshot itself.
#[derive(Debug, Clone, Copy)]
pub struct TurnContext {
    /// First generated move of this game on this engine; adds the startup
    /// buffer to the elapsed-time offset.
    pub first_move: bool,
    pub startup_buffer_ms: i64,
    /// Signed offset between server and local wall clocks.
    pub clock_drift_ms: i64,
    /// Local wall clock, epoch milliseconds.
    pub now_ms: i64,
}

/// Build the ordered GTP command sequence for one move turn: the time-setup
/// command followed by `time_left` for black and white.
pub fn time_commands(
    tc: &TimeControl,
    clock: &Clock,
    caps: &EngineCaps,
    ctx: &TurnContext,
) -> Vec<String> {
    let now = ctx.now_ms - ctx.clock_drift_ms;
    let buffer = if ctx.first_move {
        ctx.startup_buffer_ms
    } else {
        0
    };
    // Time already spent on this move, charged to whoever is to move.
    let offset = (buffer + now - clock.last_move) as f64 / 1000.0;
    let (black_offset, white_offset) = match clock.to_move() {
        Color::Black => (offset, 0.0),
        Color::White => (0.0, offset),
    };

    match tc {
        TimeControl::Byoyomi {
            main_time,
            period_time,
            periods,
            ..
        } => byoyomi_commands(
            clock,
            caps,
            *main_time,
            *period_time,
            *periods,
            black_offset,
            white_offset,
        ),
        TimeControl::Canadian {
            main_time,
            period_time,
            stones_per_period,
            ..
        } => {
            let setup = if caps.kgs_time_settings {
                format!("kgs-time_settings canadian {main_time} {period_time} {stones_per_period}")
            } else {
                format!("time_settings {main_time} {period_time} {stones_per_period}")
            };
            vec![
                setup,
                canadian_time_left(Color::Black, &clock.black_time, black_offset),
                canadian_time_left(Color::White, &clock.white_time, white_offset),
            ]
        }
        TimeControl::Fischer {
            initial_time,
            time_increment,
            max_time,
            ..
        } => {
            if caps.kata_time_settings && caps.fischer_capped {
                vec![
                    format!(
                        "kata-time_settings fischer-capped {initial_time} {time_increment} {max_time} -1"
                    ),
                    format!(
                        "time_left black {} 0",
                        floor0(clock.black_time.thinking_time() - black_offset)
                    ),
                    format!(
                        "time_left white {} 0",
                        floor0(clock.white_time.thinking_time() - white_offset)
                    ),
                ]
            } else {
                fischer_as_canadian(
                    caps,
                    *initial_time,
                    *time_increment,
                    black_offset,
                    white_offset,
                    clock,
                )
            }
        }
        TimeControl::Simple { per_move, .. } => {
            // The server's thinking field is unreliable for simple clocks;
            // the per-move budget is authoritative for both colors.
            vec![
                format!("time_settings 0 {per_move} 1"),
                format!("time_left black {per_move} 1"),
                format!("time_left white {per_move} 1"),
            ]
        }
        TimeControl::Absolute { total_time, .. } => vec![
            format!("time_settings {total_time} 0 0"),
            format!(
                "time_left black {} 0",
                floor0(clock.black_time.thinking_time() - black_offset)
            ),
            format!(
                "time_left white {} 0",
                floor0(clock.white_time.thinking_time() - white_offset)
            ),
        ],
        TimeControl::None { .. } => Vec::new(),
    }
}

fn byoyomi_commands(
    clock: &Clock,
    caps: &EngineCaps,
    main_time: i64,
    period_time: i64,
    periods: i64,
    black_offset: f64,
    white_offset: f64,
) -> Vec<String> {
    if caps.kgs_time_settings {
        vec![
            format!("kgs-time_settings byoyomi {main_time} {period_time} {periods}"),
            byoyomi_time_left(
                Color::Black,
                &clock.black_time,
                period_time,
                periods,
                black_offset,
            ),
            byoyomi_time_left(
                Color::White,
                &clock.white_time,
                period_time,
                periods,
                white_offset,
            ),
        ]
    } else {
        // Emulate as Canadian with a one-stone quota: all but the last
        // period fold into main time, the last period becomes the per-move
        // overtime block.
        let emulated_main = main_time + (periods - 1) * period_time;
        vec![
            format!("time_settings {emulated_main} {period_time} 1"),
            byoyomi_emulated_time_left(
                Color::Black,
                &clock.black_time,
                period_time,
                periods,
                black_offset,
            ),
            byoyomi_emulated_time_left(
                Color::White,
                &clock.white_time,
                period_time,
                periods,
                white_offset,
            ),
        ]
    }
}

fn byoyomi_state(pc: &PlayerClock, tc_period_time: i64, tc_periods: i64) -> (f64, i64, f64) {
    match pc {
        PlayerClock::Byoyomi {
            thinking_time,
            periods,
            period_time,
        } => (*thinking_time, *periods, *period_time),
        other => (other.thinking_time(), tc_periods, tc_period_time as f64),
    }
}

/// `time_left` with the KGS byoyomi vocabulary. A negative balance rolls
/// down through the remaining periods.
fn byoyomi_time_left(
    color: Color,
    pc: &PlayerClock,
    tc_period_time: i64,
    tc_periods: i64,
    offset: f64,
) -> String {
    let (thinking, periods, period_time) = byoyomi_state(pc, tc_period_time, tc_periods);
    let t = thinking - offset;
    if t < 0.0 && period_time > 0.0 {
        let overtime = -t;
        let consumed = (overtime / period_time).floor();
        let periods_left = (periods - consumed as i64).max(0);
        let in_period = if periods_left == 0 {
            0
        } else {
            floor0(period_time - (overtime - consumed * period_time))
        };
        format!("time_left {} {in_period} {periods_left}", color.as_gtp())
    } else {
        format!("time_left {} {} {periods}", color.as_gtp(), floor0(t))
    }
}

/// `time_left` for the Canadian-1-stone emulation of Japanese byoyomi:
/// everything above one period counts as main time (stones 0), the final
/// period is the one-stone block.
fn byoyomi_emulated_time_left(
    color: Color,
    pc: &PlayerClock,
    tc_period_time: i64,
    tc_periods: i64,
    offset: f64,
) -> String {
    let (thinking, periods, period_time) = byoyomi_state(pc, tc_period_time, tc_periods);
    let total = thinking - offset + periods as f64 * period_time;
    if total <= period_time {
        format!("time_left {} {} 1", color.as_gtp(), floor0(total))
    } else {
        format!("time_left {} {} 0", color.as_gtp(), floor0(total - period_time))
    }
}

fn canadian_time_left(color: Color, pc: &PlayerClock, offset: f64) -> String {
    match pc {
        PlayerClock::Canadian {
            thinking_time,
            moves_left,
            block_time,
        } => {
            let t = thinking_time - offset;
            if t > 0.0 {
                format!("time_left {} {} 0", color.as_gtp(), floor0(t))
            } else {
                // Rolled into the overtime block.
                format!(
                    "time_left {} {} {moves_left}",
                    color.as_gtp(),
                    floor0(block_time + t)
                )
            }
        }
        other => format!(
            "time_left {} {} 0",
            color.as_gtp(),
            floor0(other.thinking_time() - offset)
        ),
    }
}

/// Fischer expressed as Canadian with a one-stone quota: the increment is
/// the per-move block, everything above it is main time.
fn fischer_as_canadian(
    caps: &EngineCaps,
    initial_time: i64,
    time_increment: i64,
    black_offset: f64,
    white_offset: f64,
    clock: &Clock,
) -> Vec<String> {
    let setup = if caps.kgs_time_settings {
        format!(
            "kgs-time_settings canadian {} {time_increment} 1",
            initial_time - time_increment
        )
    } else {
        format!(
            "time_settings {} {time_increment} 1",
            initial_time - time_increment
        )
    };
    let time_left = |color: Color, pc: &PlayerClock, offset: f64| {
        let t = pc.thinking_time() - offset;
        if t > time_increment as f64 {
            format!(
                "time_left {} {} 0",
                color.as_gtp(),
                floor0(t - time_increment as f64)
            )
        } else {
            format!("time_left {} {} 1", color.as_gtp(), floor0(t))
        }
    };
    vec![
        setup,
        time_left(Color::Black, &clock.black_time, black_offset),
        time_left(Color::White, &clock.white_time, white_offset),
    ]
}

fn floor0(x: f64) -> i64 {
    (x.floor() as i64).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Speed;

    const BLACK_ID: i64 = 1;
    const WHITE_ID: i64 = 2;

    fn clock(current: i64, black: PlayerClock, white: PlayerClock) -> Clock {
        Clock {
            current_player: current,
            black_player_id: BLACK_ID,
            white_player_id: WHITE_ID,
            last_move: 1_000_000,
            black_time: black,
            white_time: white,
        }
    }

    /// A context that charges exactly `offset_s` seconds to the mover.
    fn ctx(offset_s: i64) -> TurnContext {
        TurnContext {
            first_move: false,
            startup_buffer_ms: 0,
            clock_drift_ms: 0,
            now_ms: 1_000_000 + offset_s * 1000,
        }
    }

    fn kgs_caps() -> EngineCaps {
        EngineCaps {
            kgs_time_settings: true,
            ..EngineCaps::default()
        }
    }

    fn byo(thinking: f64, periods: i64, period_time: f64) -> PlayerClock {
        PlayerClock::Byoyomi {
            thinking_time: thinking,
            periods,
            period_time,
        }
    }

    #[test]
    fn test_byoyomi_rollover() {
        // Black exhausted main time and 35s of overtime have elapsed: one
        // full 30s period is consumed, 25s remain in the next.
        let tc = TimeControl::Byoyomi {
            speed: Speed::Live,
            main_time: 600,
            period_time: 30,
            periods: 3,
        };
        let c = clock(BLACK_ID, byo(0.0, 3, 30.0), byo(600.0, 3, 30.0));
        let cmds = time_commands(&tc, &c, &kgs_caps(), &ctx(35));
        assert_eq!(
            cmds,
            vec![
                "kgs-time_settings byoyomi 600 30 3",
                "time_left black 25 2",
                "time_left white 600 3",
            ]
        );
    }

    #[test]
    fn test_byoyomi_zero_thinking_is_not_a_rollover() {
        let tc = TimeControl::Byoyomi {
            speed: Speed::Live,
            main_time: 0,
            period_time: 30,
            periods: 1,
        };
        let c = clock(BLACK_ID, byo(0.0, 1, 30.0), byo(0.0, 1, 30.0));
        let cmds = time_commands(&tc, &c, &kgs_caps(), &ctx(0));
        assert_eq!(cmds[1], "time_left black 0 1");
    }

    #[test]
    fn test_byoyomi_emulation_without_kgs() {
        // 3 periods of 30s fold into main time: 600 + 2*30 = 660.
        let tc = TimeControl::Byoyomi {
            speed: Speed::Live,
            main_time: 600,
            period_time: 30,
            periods: 3,
        };
        let c = clock(BLACK_ID, byo(600.0, 3, 30.0), byo(600.0, 3, 30.0));
        let cmds = time_commands(&tc, &c, &EngineCaps::default(), &ctx(0));
        assert_eq!(cmds[0], "time_settings 660 30 1");
        assert_eq!(cmds[1], "time_left black 660 0");

        // Inside the final period the stone quota kicks in.
        let c = clock(BLACK_ID, byo(0.0, 1, 30.0), byo(600.0, 3, 30.0));
        let cmds = time_commands(&tc, &c, &EngineCaps::default(), &ctx(10));
        assert_eq!(cmds[1], "time_left black 20 1");
    }

    #[test]
    fn test_canadian_rolls_into_overtime() {
        let tc = TimeControl::Canadian {
            speed: Speed::Live,
            main_time: 300,
            period_time: 180,
            stones_per_period: 25,
        };
        let black = PlayerClock::Canadian {
            thinking_time: 10.0,
            moves_left: 25,
            block_time: 180.0,
        };
        let white = PlayerClock::Canadian {
            thinking_time: 300.0,
            moves_left: 25,
            block_time: 180.0,
        };
        let cmds = time_commands(&tc, &clock(BLACK_ID, black, white), &kgs_caps(), &ctx(30));
        assert_eq!(cmds[0], "kgs-time_settings canadian 300 180 25");
        // 10 - 30 = -20 of main time: 160s left of the 180s block.
        assert_eq!(cmds[1], "time_left black 160 25");
        assert_eq!(cmds[2], "time_left white 300 0");
    }

    #[test]
    fn test_fischer_capped_with_kata() {
        let tc = TimeControl::Fischer {
            speed: Speed::Live,
            initial_time: 600,
            time_increment: 30,
            max_time: 600,
        };
        let caps = EngineCaps {
            kata_time_settings: true,
            fischer_capped: true,
            ..EngineCaps::default()
        };
        let c = clock(
            WHITE_ID,
            PlayerClock::Plain { thinking_time: 400.0 },
            PlayerClock::Plain { thinking_time: 500.0 },
        );
        let cmds = time_commands(&tc, &c, &caps, &ctx(20));
        assert_eq!(cmds[0], "kata-time_settings fischer-capped 600 30 600 -1");
        assert_eq!(cmds[1], "time_left black 400 0");
        assert_eq!(cmds[2], "time_left white 480 0");
    }

    #[test]
    fn test_fischer_as_canadian_fallback() {
        let tc = TimeControl::Fischer {
            speed: Speed::Live,
            initial_time: 600,
            time_increment: 30,
            max_time: 600,
        };
        let c = clock(
            BLACK_ID,
            PlayerClock::Plain { thinking_time: 500.0 },
            PlayerClock::Plain { thinking_time: 25.0 },
        );
        let cmds = time_commands(&tc, &c, &kgs_caps(), &ctx(0));
        assert_eq!(cmds[0], "kgs-time_settings canadian 570 30 1");
        // Above one increment: increment reserved, rest is main time.
        assert_eq!(cmds[1], "time_left black 470 0");
        // At or below one increment: one-stone block.
        assert_eq!(cmds[2], "time_left white 25 1");
    }

    #[test]
    fn test_simple_uses_per_move_budget() {
        let tc = TimeControl::Simple {
            speed: Speed::Blitz,
            per_move: 15,
        };
        let c = clock(
            BLACK_ID,
            PlayerClock::Timestamp(1_700_000_000_000.0),
            PlayerClock::Timestamp(1_700_000_000_000.0),
        );
        let cmds = time_commands(&tc, &c, &EngineCaps::default(), &ctx(5));
        assert_eq!(
            cmds,
            vec![
                "time_settings 0 15 1",
                "time_left black 15 1",
                "time_left white 15 1",
            ]
        );
    }

    #[test]
    fn test_absolute_charges_mover_only() {
        let tc = TimeControl::Absolute {
            speed: Speed::Live,
            total_time: 900,
        };
        let c = clock(
            BLACK_ID,
            PlayerClock::Plain { thinking_time: 100.0 },
            PlayerClock::Plain { thinking_time: 200.0 },
        );
        let cmds = time_commands(&tc, &c, &EngineCaps::default(), &ctx(40));
        assert_eq!(cmds[0], "time_settings 900 0 0");
        assert_eq!(cmds[1], "time_left black 60 0");
        assert_eq!(cmds[2], "time_left white 200 0");
    }

    #[test]
    fn test_none_emits_nothing() {
        let tc = TimeControl::None { speed: Speed::Live };
        let c = clock(
            BLACK_ID,
            PlayerClock::Plain { thinking_time: 0.0 },
            PlayerClock::Plain { thinking_time: 0.0 },
        );
        assert!(time_commands(&tc, &c, &EngineCaps::default(), &ctx(0)).is_empty());
    }

    #[test]
    fn test_first_move_startup_buffer_and_drift() {
        let tc = TimeControl::Absolute {
            speed: Speed::Live,
            total_time: 900,
        };
        let c = clock(
            BLACK_ID,
            PlayerClock::Plain { thinking_time: 100.0 },
            PlayerClock::Plain { thinking_time: 200.0 },
        );
        // 10s elapsed + 5s startup buffer - 3s of clock drift = 12s charged.
        let ctx = TurnContext {
            first_move: true,
            startup_buffer_ms: 5_000,
            clock_drift_ms: 3_000,
            now_ms: 1_000_000 + 10_000,
        };
        let cmds = time_commands(&tc, &c, &EngineCaps::default(), &ctx);
        assert_eq!(cmds[1], "time_left black 88 0");
    }

    #[test]
    fn test_clamped_at_zero() {
        let tc = TimeControl::Absolute {
            speed: Speed::Live,
            total_time: 900,
        };
        let c = clock(
            BLACK_ID,
            PlayerClock::Plain { thinking_time: 5.0 },
            PlayerClock::Plain { thinking_time: 200.0 },
        );
        let cmds = time_commands(&tc, &c, &EngineCaps::default(), &ctx(60));
        assert_eq!(cmds[1], "time_left black 0 0");
    }
}
