//! Deferred callbacks and change subscriptions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::HostError;

/// A callback with its bound arguments.
///
/// The runtime hands jobs back to the application root, which routes them to
/// the owning component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Job {
    /// Evaluate a safety mechanism again
    RunMechanism { component: String, symptom: String },
    /// An entity touched by a recovery changed
    RecoveryPerformed { symptom: String },
    /// Take the next derivative sample of an entity
    Sample { entity: String },
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::RunMechanism { component, symptom } => write!(f, "run {}::{}", component, symptom),
            Job::RecoveryPerformed { symptom } => write!(f, "recovery performed for {}", symptom),
            Job::Sample { entity } => write!(f, "sample {}", entity),
        }
    }
}

/// Handle of a scheduled one-shot timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerHandle(pub u64);

/// Handle of an entity change subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenHandle(pub u64);

/// Time-deferred and change-driven callbacks
pub trait Scheduler {
    /// Run `job` once after `delay`
    fn run_in(&self, delay: Duration, job: Job) -> Result<TimerHandle, HostError>;

    /// Cancel a timer that has not fired yet
    fn cancel_timer(&self, handle: TimerHandle) -> Result<(), HostError>;

    /// Run `job` every time the state value of `entity_id` changes
    fn listen_state(&self, entity_id: &str, job: Job) -> Result<ListenHandle, HostError>;

    /// Drop a subscription
    fn cancel_listen(&self, handle: ListenHandle) -> Result<(), HostError>;
}
