//! Symptom Processor

use tracing::{debug, error};

use debounce::{debounce, DebounceAction, DebounceState};
use fault_manager::{FaultManager, FaultState, Info};

/// Debounce one evaluation of symptom `symptom_id` and forward settled
/// transitions to the fault manager.
///
/// Evaluations that agree with an already settled symptom state are ignored.
/// The returned `force` flag asks the caller to evaluate again shortly.
pub fn process_symptom(
    fault_manager: Option<&mut FaultManager>,
    symptom_id: &str,
    counter: i32,
    detected: bool,
    info: &Info,
    limit: i32,
) -> DebounceState {
    let Some(fm) = fault_manager else {
        error!("Fault manager not initialized, {} not processed", symptom_id);
        return DebounceState::new(counter, false);
    };

    let Some(current) = fm.check_symptom(symptom_id) else {
        return DebounceState::new(counter, false);
    };

    let pending = match current {
        FaultState::NotTested => true,
        FaultState::Cleared => detected,
        FaultState::Set => !detected,
    };
    if !pending {
        return DebounceState::new(counter, false);
    }

    let result = debounce(counter, detected, limit);
    let force = match result.action {
        DebounceAction::SymptomSet => {
            fm.set_symptom(symptom_id, info);
            debug!("Symptom {} with {:?} was set", symptom_id, info);
            false
        }
        DebounceAction::SymptomHealed => {
            fm.clear_symptom(symptom_id, info);
            debug!("Symptom {} with {:?} was cleared", symptom_id, info);
            false
        }
        DebounceAction::NoAction => true,
    };

    debug!(
        "Leaving process_symptom for {} with counter {} and force {}",
        symptom_id, result.counter, force
    );
    DebounceState::new(result.counter, force)
}
