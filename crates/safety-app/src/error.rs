//! Application errors

use thiserror::Error;

use host::HostError;
use safety_component::ComponentError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Component error: {0}")]
    Component(#[from] ComponentError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}
