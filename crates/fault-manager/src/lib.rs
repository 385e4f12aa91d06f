//! Fault Manager
//!
//! Aggregates debounced symptoms into severity-leveled faults:
//! - many symptoms (through their safety mechanism name) map to one fault
//! - every transition mints an incident tag for notification and recovery
//! - fault and system severity are mirrored to host entities

mod annotation;
mod error;
mod interfaces;
mod manager;
mod registry;
mod tag;
mod types;

pub use annotation::merge_annotations;
pub use error::FaultError;
pub use interfaces::{NotifyInterface, RecoveryInterface, SafetyModule};
pub use manager::{FaultManager, SYSTEM_STATE_ENTITY};
pub use registry::FaultRegistry;
pub use tag::incident_tag;
pub use types::{
    fault_entity_id, EntityChanges, Fault, FaultState, Info, Parameters, RecoveryAction,
    RecoveryActionState, RecoveryFn, RecoveryResult, SmState, Symptom,
};
