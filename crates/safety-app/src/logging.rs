//! Logging setup

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::AppError;

/// Parse a configured level name, case-insensitive
pub fn parse_level(level: &str) -> Result<Level, AppError> {
    Level::from_str(level.trim())
        .map_err(|_| AppError::InvalidConfig(format!("unknown log level '{}'", level)))
}

/// Install the global fmt subscriber
pub fn init_logging(level: &str) -> Result<(), AppError> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(level)?)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(|e| AppError::Logging(e.to_string()))
}
