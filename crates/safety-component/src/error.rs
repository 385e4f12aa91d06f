//! Safety component errors

use thiserror::Error;

use host::HostError;

#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("Unknown safety mechanism kind: {0}")]
    UnknownMechanism(String),

    #[error("Safety mechanism {0} is already initialized")]
    DuplicateMechanism(String),

    #[error("Safety mechanism {mechanism} is missing parameter '{key}'")]
    MissingParameter { mechanism: String, key: String },

    #[error("Unknown safety component: {0}")]
    UnknownComponent(String),

    #[error("Safety mechanism {0} not found")]
    NotFound(String),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}
