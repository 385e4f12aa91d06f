//! Recovery Orchestrator
//!
//! Computes a remediation for a triggered symptom, vetoes it when it would
//! raise another mechanism or fight a higher-level fault, applies it and
//! watches the touched entities for completion.

mod error;
mod orchestrator;

pub use error::RecoveryError;
pub use orchestrator::{RecoveryManager, Veto};
