//! Recovery errors

use thiserror::Error;

use host::HostError;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("No recovery action registered for symptom {0}")]
    UnknownAction(String),

    #[error("Unknown safety component: {0}")]
    UnknownModule(String),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}
