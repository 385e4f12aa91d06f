//! Safety mechanism registry

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, warn};

use debounce::DebounceState;
use fault_manager::{EntityChanges, FaultManager, Info, Parameters};
use host::{numeric_state, Host, HostError, Job, ListenHandle, TimerHandle};

use crate::{process_symptom, ComponentError};

/// Outcome of one evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MechanismResult {
    pub detected: bool,
    pub info: Info,
}

impl MechanismResult {
    pub fn undetected() -> Self {
        Self::default()
    }
}

/// Reads numeric entity values, preferring substituted ones
pub struct EntityReader<'a> {
    host: &'a dyn Host,
    changes: Option<&'a EntityChanges>,
}

impl<'a> EntityReader<'a> {
    pub fn new(host: &'a dyn Host, changes: Option<&'a EntityChanges>) -> Self {
        Self { host, changes }
    }

    pub fn numeric(&self, entity_id: &str) -> Option<f64> {
        match self.changes.and_then(|c| c.get(entity_id)) {
            Some(value) => match value.trim().parse::<f64>() {
                Ok(v) => Some(v),
                Err(e) => {
                    error!("Invalid substituted value '{}' for {}: {}", value, entity_id, e);
                    None
                }
            },
            None => numeric_state(self.host, entity_id),
        }
    }
}

/// Evaluates the raw condition of a mechanism instance
pub type Evaluator = fn(&EntityReader<'_>, &SafetyMechanism) -> MechanismResult;

/// Static description of one kind of safety mechanism
#[derive(Clone, Copy)]
pub struct MechanismKind {
    pub sm_name: &'static str,
    /// Parameters an instance must carry
    pub required_keys: &'static [&'static str],
    /// Entity ids the instance is re-evaluated on
    pub watched: fn(&Parameters) -> Vec<String>,
    pub evaluator: Evaluator,
    pub debounce_limit: i32,
}

/// One configured instance of a mechanism kind
#[derive(Debug, Clone)]
pub struct SafetyMechanism {
    pub name: String,
    pub sm_name: String,
    pub parameters: Parameters,
    pub enabled: bool,
    debounce: DebounceState,
    rerun: Option<TimerHandle>,
    listeners: Vec<ListenHandle>,
}

impl SafetyMechanism {
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        match self.parameters.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn debounce_state(&self) -> DebounceState {
        self.debounce
    }
}

/// Mechanism instances of one component
pub struct MechanismTable {
    component: String,
    host: Arc<dyn Host>,
    kinds: Vec<MechanismKind>,
    rerun_delay: Duration,
    mechanisms: RefCell<BTreeMap<String, SafetyMechanism>>,
}

impl MechanismTable {
    pub fn new(
        component: &str,
        host: Arc<dyn Host>,
        kinds: Vec<MechanismKind>,
        rerun_delay: Duration,
    ) -> Self {
        Self {
            component: component.to_string(),
            host,
            kinds,
            rerun_delay,
            mechanisms: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn kind(&self, sm_name: &str) -> Result<MechanismKind, ComponentError> {
        self.kinds
            .iter()
            .find(|k| k.sm_name == sm_name)
            .copied()
            .ok_or_else(|| ComponentError::UnknownMechanism(sm_name.to_string()))
    }

    /// Create instance `name`, disabled, and subscribe it to its entities
    pub fn init(
        &self,
        sm_name: &str,
        name: &str,
        parameters: &Parameters,
    ) -> Result<(), ComponentError> {
        let kind = self.kind(sm_name)?;
        if self.mechanisms.borrow().contains_key(name) {
            return Err(ComponentError::DuplicateMechanism(name.to_string()));
        }

        let mut extracted = Parameters::new();
        for key in kind.required_keys {
            let value = parameters
                .get(*key)
                .ok_or_else(|| ComponentError::MissingParameter {
                    mechanism: name.to_string(),
                    key: key.to_string(),
                })?;
            extracted.insert(key.to_string(), value.clone());
        }
        extracted.insert(
            "actuator".to_string(),
            parameters.get("actuator").cloned().unwrap_or(Value::Null),
        );

        let mut listeners = Vec::new();
        for entity in (kind.watched)(&extracted) {
            let job = Job::RunMechanism {
                component: self.component.clone(),
                symptom: name.to_string(),
            };
            listeners.push(self.host.listen_state(&entity, job)?);
            debug!("{} listens to {}", name, entity);
        }

        self.mechanisms.borrow_mut().insert(
            name.to_string(),
            SafetyMechanism {
                name: name.to_string(),
                sm_name: sm_name.to_string(),
                parameters: extracted,
                enabled: false,
                debounce: DebounceState::default(),
                rerun: None,
                listeners,
            },
        );
        Ok(())
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), ComponentError> {
        let mut mechanisms = self.mechanisms.borrow_mut();
        let mechanism = mechanisms
            .get_mut(name)
            .ok_or_else(|| ComponentError::NotFound(name.to_string()))?;
        mechanism.enabled = enabled;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SafetyMechanism> {
        self.mechanisms.borrow().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.mechanisms.borrow().keys().cloned().collect()
    }

    /// Evaluate `name`, debounce the result and keep the rerun timer in step
    pub fn run(&self, fault_manager: Option<&mut FaultManager>, name: &str) {
        let Some((kind, mechanism)) = self.prepare(name) else {
            return;
        };
        if !mechanism.enabled {
            debug!("{} is disabled, skipping execution", name);
            return;
        }

        let reader = EntityReader::new(self.host.as_ref(), None);
        let result = (kind.evaluator)(&reader, &mechanism);
        let state = process_symptom(
            fault_manager,
            name,
            mechanism.debounce.counter,
            result.detected,
            &result.info,
            kind.debounce_limit,
        );

        let stale = {
            let mut mechanisms = self.mechanisms.borrow_mut();
            let Some(stored) = mechanisms.get_mut(name) else {
                return;
            };
            stored.debounce = state;
            stored.rerun.take()
        };
        if let Some(handle) = stale {
            self.cancel_rerun(name, handle);
        }

        if state.force {
            let job = Job::RunMechanism {
                component: self.component.clone(),
                symptom: name.to_string(),
            };
            match self.host.run_in(self.rerun_delay, job) {
                Ok(handle) => {
                    debug!("Scheduling {} to run again in {:?}", name, self.rerun_delay);
                    if let Some(stored) = self.mechanisms.borrow_mut().get_mut(name) {
                        stored.rerun = Some(handle);
                    }
                }
                Err(e) => error!("Failed to schedule rerun of {}: {}", name, e),
            }
        }
    }

    /// Evaluate `name` with substituted entity values, no debounce or fault update
    pub fn dry_run(&self, name: &str, changes: &EntityChanges) -> bool {
        let Some((kind, mechanism)) = self.prepare(name) else {
            return false;
        };
        if !mechanism.enabled {
            return false;
        }
        debug!("{} running in dry mode with changes {:?}", name, changes);
        let reader = EntityReader::new(self.host.as_ref(), Some(changes));
        (kind.evaluator)(&reader, &mechanism).detected
    }

    fn prepare(&self, name: &str) -> Option<(MechanismKind, SafetyMechanism)> {
        let Some(mechanism) = self.get(name) else {
            error!("{}", ComponentError::NotFound(name.to_string()));
            return None;
        };
        match self.kind(&mechanism.sm_name) {
            Ok(kind) => Some((kind, mechanism)),
            Err(e) => {
                error!("{}", e);
                None
            }
        }
    }

    fn cancel_rerun(&self, name: &str, handle: TimerHandle) {
        match self.host.cancel_timer(handle) {
            Ok(()) => debug!("Pending rerun of {} cancelled", name),
            Err(HostError::UnknownHandle(_)) => {}
            Err(e) => warn!("Failed to cancel rerun of {}: {}", name, e),
        }
    }
}

impl Drop for MechanismTable {
    fn drop(&mut self) {
        for mechanism in self.mechanisms.get_mut().values() {
            for handle in &mechanism.listeners {
                if let Err(e) = self.host.cancel_listen(*handle) {
                    warn!("Failed to drop listener of {}: {}", mechanism.name, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fault_manager::{Fault, FaultState, SafetyModule, Symptom};
    use host::InMemoryHost;
    use serde_json::json;
    use std::collections::HashMap;

    fn watch_sensor(params: &Parameters) -> Vec<String> {
        params
            .get("sensor")
            .and_then(Value::as_str)
            .map(|s| vec![s.to_string()])
            .unwrap_or_default()
    }

    fn above_limit(reader: &EntityReader<'_>, sm: &SafetyMechanism) -> MechanismResult {
        let (Some(sensor), Some(limit)) = (sm.param_str("sensor"), sm.param_f64("limit")) else {
            return MechanismResult::undetected();
        };
        match reader.numeric(sensor) {
            Some(value) => MechanismResult {
                detected: value > limit,
                info: Info::new(),
            },
            None => MechanismResult::undetected(),
        }
    }

    const ABOVE: MechanismKind = MechanismKind {
        sm_name: "sm_above",
        required_keys: &["sensor", "limit"],
        watched: watch_sensor,
        evaluator: above_limit,
        debounce_limit: 2,
    };

    fn table(host: &Arc<InMemoryHost>) -> MechanismTable {
        let table = MechanismTable::new("Test", host.clone(), vec![ABOVE], Duration::from_secs(30));
        table
            .init("sm_above", "Hot", json!({"sensor": "sensor.t", "limit": 25}).as_object().unwrap())
            .unwrap();
        table
    }

    fn fault_manager(host: &Arc<InMemoryHost>) -> FaultManager {
        let symptoms = [("Hot".to_string(), Symptom::new("Hot", "sm_above", "Test", Parameters::new()))]
            .into_iter()
            .collect();
        let faults = [("F".to_string(), Fault::new("F", vec!["sm_above".to_string()], 3))]
            .into_iter()
            .collect();
        let modules: HashMap<String, std::rc::Rc<dyn SafetyModule>> = HashMap::new();
        FaultManager::new(host.clone(), modules, symptoms, faults)
    }

    #[test]
    fn test_init_validates_parameters() {
        let host = Arc::new(InMemoryHost::new());
        let table = table(&host);

        assert!(matches!(
            table.init("sm_above", "Hot", &Parameters::new()),
            Err(ComponentError::DuplicateMechanism(_))
        ));
        assert!(matches!(
            table.init("sm_above", "Other", json!({"sensor": "x"}).as_object().unwrap()),
            Err(ComponentError::MissingParameter { .. })
        ));
        assert!(matches!(
            table.init("sm_unknown", "Other", &Parameters::new()),
            Err(ComponentError::UnknownMechanism(_))
        ));
        assert_eq!(host.listener_count("sensor.t"), 1);
        assert!(!table.get("Hot").unwrap().enabled);
    }

    #[test]
    fn test_disabled_mechanism_skips_evaluation() {
        let host = Arc::new(InMemoryHost::new());
        let table = table(&host);
        let mut fm = fault_manager(&host);
        host.update_entity("sensor.t", "30").unwrap();

        table.run(Some(&mut fm), "Hot");

        assert_eq!(table.get("Hot").unwrap().debounce_state(), DebounceState::default());
        assert!(!table.dry_run("Hot", &EntityChanges::new()));
    }

    #[test]
    fn test_rerun_scheduled_then_cancelled_when_settled() {
        let host = Arc::new(InMemoryHost::new());
        let table = table(&host);
        let mut fm = fault_manager(&host);
        table.set_enabled("Hot", true).unwrap();
        host.update_entity("sensor.t", "30").unwrap();

        table.run(Some(&mut fm), "Hot");
        assert_eq!(table.get("Hot").unwrap().debounce_state(), DebounceState::new(1, true));
        assert_eq!(host.pending_timers(), 1);

        // Settles before the timer fires
        table.run(Some(&mut fm), "Hot");
        assert_eq!(fm.check_symptom("Hot"), Some(FaultState::Set));
        assert_eq!(host.pending_timers(), 0);
    }

    #[test]
    fn test_rerun_replaces_pending_timer() {
        let host = Arc::new(InMemoryHost::new());
        let table = table(&host);
        let mut fm = fault_manager(&host);
        table.set_enabled("Hot", true).unwrap();
        host.update_entity("sensor.t", "30").unwrap();

        table.run(Some(&mut fm), "Hot");
        host.update_entity("sensor.t", "20").unwrap();
        table.run(Some(&mut fm), "Hot");

        assert_eq!(table.get("Hot").unwrap().debounce_state(), DebounceState::new(0, true));
        assert_eq!(host.pending_timers(), 1);
    }

    #[test]
    fn test_dry_run_uses_substituted_values() {
        let host = Arc::new(InMemoryHost::new());
        let table = table(&host);
        table.set_enabled("Hot", true).unwrap();
        host.update_entity("sensor.t", "20").unwrap();

        let mut changes = EntityChanges::new();
        changes.insert("sensor.t".to_string(), "40".to_string());
        assert!(table.dry_run("Hot", &changes));
        assert!(!table.dry_run("Hot", &EntityChanges::new()));

        changes.insert("sensor.t".to_string(), "hot".to_string());
        assert!(!table.dry_run("Hot", &changes));
        assert_eq!(table.get("Hot").unwrap().debounce_state(), DebounceState::default());
    }

    #[test]
    fn test_listeners_dropped_with_table() {
        let host = Arc::new(InMemoryHost::new());
        drop(table(&host));
        assert_eq!(host.listener_count("sensor.t"), 0);
    }

    #[test]
    fn test_drop_tolerates_listener_already_gone() {
        use host::Scheduler;

        let host = Arc::new(InMemoryHost::new());
        let table = table(&host);
        let handle = table.mechanisms.borrow()["Hot"].listeners[0];
        host.cancel_listen(handle).unwrap();

        drop(table);
        assert_eq!(host.listener_count("sensor.t"), 0);
    }
}
