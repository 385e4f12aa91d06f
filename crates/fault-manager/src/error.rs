//! Fault manager errors

use thiserror::Error;

use host::HostError;

#[derive(Debug, Error)]
pub enum FaultError {
    #[error("Unknown symptom: {0}")]
    UnknownSymptom(String),

    #[error("Unknown fault: {0}")]
    UnknownFault(String),

    #[error("No faults associated with safety mechanism '{0}'")]
    UnmappedMechanism(String),

    #[error("Multiple faults ({count}) associated with safety mechanism '{sm_name}'")]
    AmbiguousMechanism { sm_name: String, count: usize },

    #[error("Unknown safety component: {0}")]
    UnknownModule(String),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}
