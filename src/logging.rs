//! Logger initialisation.

use crate::config::LoggingConfig;

/// Environment variable that overrides the configured filter
pub const LOG_ENV: &str = "ROOM_SIGNAL_LOG";

/// Build the env_logger builder used by [`init`].
pub fn builder(config: &LoggingConfig) -> env_logger::Builder {
    let filters = std::env::var(LOG_ENV).unwrap_or_else(|_| config.level.clone());
    let mut builder = env_logger::Builder::new();
    builder
        .parse_filters(&filters)
        .filter_module("tungstenite", log::LevelFilter::Warn)
        .filter_module("tokio_tungstenite", log::LevelFilter::Warn);
    builder
}

/// Install the global logger. Returns false if one was already installed.
pub fn init(config: &LoggingConfig) -> bool {
    builder(config).try_init().is_ok()
}
