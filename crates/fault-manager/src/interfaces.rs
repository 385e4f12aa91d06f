//! Seams to collaborators

use crate::{EntityChanges, FaultManager, FaultRegistry, FaultState, Info, Parameters, SmState, Symptom};

/// Receives fault transitions for user-facing notification
pub trait NotifyInterface {
    fn notify(&self, fault: &str, level: u32, state: FaultState, info: &Info, tag: &str);
}

/// Receives symptom transitions for remediation
pub trait RecoveryInterface {
    fn recovery(&self, registry: &FaultRegistry, symptom: &Symptom, tag: &str);
}

/// A domain component hosting safety mechanisms
pub trait SafetyModule {
    /// Name the component is configured under
    fn component_name(&self) -> &str;

    /// Bind mechanism `name` of kind `sm_name` to its parameters
    fn init_safety_mechanism(&self, sm_name: &str, name: &str, parameters: &Parameters) -> bool;

    /// Turn evaluation of mechanism `name` on or off
    fn enable_safety_mechanism(&self, name: &str, state: SmState) -> bool;

    /// Evaluate mechanism `name` and feed the result to the fault manager
    fn run_safety_mechanism(&self, fault_manager: Option<&mut FaultManager>, name: &str);

    /// Evaluate mechanism `name` with substituted entity values, without side effects
    fn evaluate_with_changes(&self, name: &str, changes: &EntityChanges) -> bool;
}
