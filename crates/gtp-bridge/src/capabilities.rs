//! Engine capability discovery
//!
//! Discovered once after spawn from `list_commands` and, for engines that
//! advertise it, `kata-list_time_settings`. The flags decide which time
//! vocabulary the clock layer may use.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCaps {
    /// Engine accepts the KGS `kgs-time_settings` extension.
    pub kgs_time_settings: bool,
    /// Engine accepts `kata-time_settings`.
    pub kata_time_settings: bool,
    /// `kata-list_time_settings` reported `fischer-capped`.
    pub fischer_capped: bool,
}

impl EngineCaps {
    /// Parse the body of a `list_commands` reply (one command per line).
    pub fn from_command_list(list: &str) -> Self {
        let mut caps = EngineCaps::default();
        for cmd in list.lines().map(str::trim) {
            match cmd {
                "kgs-time_settings" => caps.kgs_time_settings = true,
                "kata-time_settings" => caps.kata_time_settings = true,
                _ => {}
            }
        }
        caps
    }

    /// Whether the engine can be asked which kata time systems it knows.
    pub fn has_kata_time_listing(list: &str) -> bool {
        list.lines().any(|cmd| cmd.trim() == "kata-list_time_settings")
    }

    /// Fold in the body of a `kata-list_time_settings` reply.
    pub fn apply_kata_time_listing(&mut self, listing: &str) {
        if listing.contains("fischer-capped") {
            self.fischer_capped = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kgs_flag_from_list() {
        let caps = EngineCaps::from_command_list("genmove\nplay\nkgs-time_settings\n");
        assert!(caps.kgs_time_settings);
        assert!(!caps.kata_time_settings);
    }

    #[test]
    fn test_kata_listing_flow() {
        let list = "genmove\nkata-time_settings\nkata-list_time_settings";
        let mut caps = EngineCaps::from_command_list(list);
        assert!(caps.kata_time_settings);
        assert!(EngineCaps::has_kata_time_listing(list));

        caps.apply_kata_time_listing("[\"fischer\", \"fischer-capped\", \"byoyomi\"]");
        assert!(caps.fischer_capped);
    }

    #[test]
    fn test_plain_gtp_engine() {
        let caps = EngineCaps::from_command_list("genmove\nplay\ntime_settings\ntime_left");
        assert_eq!(caps, EngineCaps::default());
    }
}
