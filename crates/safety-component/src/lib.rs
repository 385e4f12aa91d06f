//! Safety Components
//!
//! Evaluation side of the fault-management core:
//! - symptom processor: debounce an evaluation and forward settled transitions
//! - mechanism registry: entity bindings, enable state, rerun scheduling, dry runs
//! - derivative monitor: smoothed rate of change of sampled entities
//! - domain components built from configuration (temperature)

mod component;
mod derivative;
mod error;
mod mechanism;
mod processor;
mod temperature;

pub use component::{build_component, ComponentContext, ComponentData, SafetyComponent};
pub use derivative::DerivativeMonitor;
pub use error::ComponentError;
pub use mechanism::{
    EntityReader, Evaluator, MechanismKind, MechanismResult, MechanismTable, SafetyMechanism,
};
pub use processor::process_symptom;
pub use temperature::{forecast_temperature, risky_temperature_recovery, TemperatureComponent};
