/// Application-level constants
pub const APP_NAME: &str = "GolfSum Scorecard";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Path to a JSON pipeline configuration file.
pub const CONFIG_ENV: &str = "SCORECARD_CONFIG";

/// Overall pipeline deadline in milliseconds.
pub const TIMEOUT_ENV: &str = "SCORECARD_TIMEOUT_MS";

/// Directory receiving debug artifacts when debug mode is requested.
pub const DUMP_DIR_ENV: &str = "SCORECARD_DUMP_DIR";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> String {
    format!("{}=info", env!("CARGO_CRATE_NAME"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }

    #[test]
    fn default_filter_targets_this_crate() {
        assert_eq!(default_log_filter(), "golfsum_scorecard=info");
    }
}
