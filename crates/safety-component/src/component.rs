//! Domain component seam and factory

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use fault_manager::{Parameters, RecoveryAction, SafetyModule, Symptom};
use host::Host;

use crate::{ComponentError, DerivativeMonitor, TemperatureComponent};

/// Symptoms and recovery actions a component derives from its configuration,
/// both keyed by symptom name
#[derive(Debug, Default)]
pub struct ComponentData {
    pub symptoms: BTreeMap<String, Symptom>,
    pub recovery_actions: BTreeMap<String, RecoveryAction>,
}

/// Shared services handed to every component
#[derive(Clone)]
pub struct ComponentContext {
    pub host: Arc<dyn Host>,
    pub derivative: Rc<DerivativeMonitor>,
    /// Delay before an unsettled mechanism is evaluated again
    pub rerun_delay: Duration,
}

/// A configurable domain component
pub trait SafetyComponent {
    fn name(&self) -> &str;

    /// Build symptoms and recovery actions from per-location configuration
    fn symptoms_data(&self, config: &[BTreeMap<String, Parameters>]) -> ComponentData;

    fn into_module(self: Rc<Self>) -> Rc<dyn SafetyModule>;
}

/// Instantiate the component configured under `name`
pub fn build_component(
    name: &str,
    context: &ComponentContext,
) -> Result<Rc<dyn SafetyComponent>, ComponentError> {
    match name {
        TemperatureComponent::NAME => Ok(Rc::new(TemperatureComponent::new(context))),
        other => Err(ComponentError::UnknownComponent(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use host::InMemoryHost;

    fn context() -> ComponentContext {
        let host: Arc<dyn Host> = Arc::new(InMemoryHost::new());
        ComponentContext {
            derivative: Rc::new(DerivativeMonitor::new(host.clone())),
            host,
            rerun_delay: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_build_known_component() {
        let component = build_component("TemperatureComponent", &context()).unwrap();
        assert_eq!(component.name(), "TemperatureComponent");
        assert_eq!(component.into_module().component_name(), "TemperatureComponent");
    }

    #[test]
    fn test_build_unknown_component() {
        assert!(matches!(
            build_component("DoorWindowComponent", &context()),
            Err(ComponentError::UnknownComponent(_))
        ));
    }
}
