//! Symptom, fault and recovery data model

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use host::{CommonEntities, Host};

/// Mechanism parameters as configured
pub type Parameters = Map<String, Value>;

/// Human readable context attached to a symptom transition
pub type Info = BTreeMap<String, String>;

/// Entity id to substituted value
pub type EntityChanges = BTreeMap<String, String>;

/// State of a symptom or a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultState {
    #[default]
    NotTested,
    Set,
    Cleared,
}

impl FaultState {
    /// Value published on the fault entity
    pub fn entity_value(&self) -> &'static str {
        match self {
            FaultState::NotTested => "Not_tested",
            FaultState::Set => "Set",
            FaultState::Cleared => "Cleared",
        }
    }
}

impl fmt::Display for FaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity_value())
    }
}

/// Operational state of a safety mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SmState {
    Error,
    #[default]
    NonInitialized,
    Disabled,
    Enabled,
}

/// Low-level debounced detection bound to one mechanism instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symptom {
    /// Unique id
    pub name: String,
    /// Mechanism identity, shared by every instance of the same evaluator
    pub sm_name: String,
    /// Name of the owning safety component
    pub module: String,
    pub state: FaultState,
    pub sm_state: SmState,
    pub parameters: Parameters,
}

impl Symptom {
    pub fn new(
        name: impl Into<String>,
        sm_name: impl Into<String>,
        module: impl Into<String>,
        parameters: Parameters,
    ) -> Self {
        Self {
            name: name.into(),
            sm_name: sm_name.into(),
            module: module.into(),
            state: FaultState::NotTested,
            sm_state: SmState::NonInitialized,
            parameters,
        }
    }
}

/// Aggregated condition with a severity level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub name: String,
    pub state: FaultState,
    /// State before the last transition
    pub previous_val: FaultState,
    /// Mechanism names (not symptom names) able to set this fault
    pub related_symptoms: Vec<String>,
    pub level: u32,
}

impl Fault {
    pub fn new(name: impl Into<String>, related_symptoms: Vec<String>, level: u32) -> Self {
        Self {
            name: name.into(),
            state: FaultState::NotTested,
            previous_val: FaultState::NotTested,
            related_symptoms,
            level,
        }
    }
}

/// Whether a recovery action is currently expected to be acted upon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryActionState {
    #[default]
    DoNotPerform,
    ToPerform,
}

impl RecoveryActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryActionState::DoNotPerform => "DO_NOT_PERFORM",
            RecoveryActionState::ToPerform => "TO_PERFORM",
        }
    }
}

/// Remediation proposal, nothing is applied yet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Sensor values asserted as facts once the recovery is applied
    pub changed_sensors: EntityChanges,
    /// Actuators to command
    pub changed_actuators: EntityChanges,
    /// Requests for human intervention
    pub notifications: Vec<String>,
}

impl RecoveryResult {
    /// Every entity the recovery touches
    pub fn touched_entities(&self) -> Vec<String> {
        let mut entities: Vec<String> = self
            .changed_sensors
            .keys()
            .chain(self.changed_actuators.keys())
            .cloned()
            .collect();
        entities.sort();
        entities.dedup();
        entities
    }
}

/// Computes a remediation proposal for a triggered symptom
pub type RecoveryFn =
    fn(&dyn Host, &Symptom, &CommonEntities, &Parameters) -> Option<RecoveryResult>;

/// Remediation registered for one symptom
#[derive(Clone)]
pub struct RecoveryAction {
    pub name: String,
    pub params: Parameters,
    pub action: RecoveryFn,
    pub current_status: RecoveryActionState,
}

impl RecoveryAction {
    pub fn new(name: impl Into<String>, params: Parameters, action: RecoveryFn) -> Self {
        Self {
            name: name.into(),
            params,
            action,
            current_status: RecoveryActionState::DoNotPerform,
        }
    }

    /// Entity mirroring the action status
    pub fn entity_id(&self) -> String {
        format!("sensor.recovery_{}", self.name).to_lowercase()
    }
}

impl fmt::Debug for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryAction")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("current_status", &self.current_status)
            .finish()
    }
}

/// Entity mirroring a fault
pub fn fault_entity_id(fault: &str) -> String {
    format!("sensor.fault_{}", fault)
}
