//! Host Error Types

use thiserror::Error;

/// Errors reported by the host runtime
#[derive(Debug, Clone, Error)]
pub enum HostError {
    /// Entity write rejected by the runtime
    #[error("Failed to write entity {entity_id}: {reason}")]
    WriteFailed { entity_id: String, reason: String },

    /// Unknown timer or listener handle
    #[error("Unknown handle: {0}")]
    UnknownHandle(u64),

    /// Notification transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Internal lock poisoned
    #[error("Lock error: {0}")]
    Lock(String),
}
