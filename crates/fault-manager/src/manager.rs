//! Fault Aggregator

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use host::{Attributes, Host};

use crate::{
    fault_entity_id, incident_tag, merge_annotations, Fault, FaultError, FaultRegistry,
    FaultState, Info, NotifyInterface, RecoveryInterface, SafetyModule, SmState, Symptom,
};

/// Entity carrying the aggregate severity
pub const SYSTEM_STATE_ENTITY: &str = "sensor.system_state";

/// Aggregates symptoms into faults and fans transitions out to the
/// notification and recovery collaborators
pub struct FaultManager {
    host: Arc<dyn Host>,
    registry: FaultRegistry,
    modules: HashMap<String, Rc<dyn SafetyModule>>,
    notify: Option<Rc<dyn NotifyInterface>>,
    recovery: Option<Rc<dyn RecoveryInterface>>,
}

impl FaultManager {
    pub fn new(
        host: Arc<dyn Host>,
        modules: HashMap<String, Rc<dyn SafetyModule>>,
        symptoms: BTreeMap<String, Symptom>,
        faults: BTreeMap<String, Fault>,
    ) -> Self {
        info!(
            "Fault manager created with {} faults and {} symptoms",
            faults.len(),
            symptoms.len()
        );
        Self {
            host,
            registry: FaultRegistry::new(symptoms, faults),
            modules,
            notify: None,
            recovery: None,
        }
    }

    pub fn register_callbacks(
        &mut self,
        recovery: Rc<dyn RecoveryInterface>,
        notify: Rc<dyn NotifyInterface>,
    ) {
        self.recovery = Some(recovery);
        self.notify = Some(notify);
    }

    pub fn registry(&self) -> &FaultRegistry {
        &self.registry
    }

    pub fn modules(&self) -> &HashMap<String, Rc<dyn SafetyModule>> {
        &self.modules
    }

    /// Publish every fault as `Not_tested` and the initial system state
    pub fn register_fault_entities(&self) {
        for fault in self.registry.faults.values() {
            let mut attributes = Attributes::new();
            attributes.insert("friendly_name".into(), json!(format!("Fault: {}", fault.name)));
            attributes.insert("description".into(), json!(format!("Status of the {} fault.", fault.name)));
            attributes.insert("level".into(), json!(format!("level_{}", fault.level)));

            let entity_id = fault_entity_id(&fault.name);
            if let Err(e) =
                self.host
                    .set_state(&entity_id, FaultState::NotTested.entity_value(), Some(attributes))
            {
                warn!("Failed to register {}: {}", entity_id, e);
            }
        }
        self.update_system_state_entity();
    }

    /// Bind every symptom's mechanism: DISABLED on success, ERROR otherwise
    pub fn init_safety_mechanisms(&mut self) {
        for symptom in self.registry.symptoms.values_mut() {
            let initialized = match self.modules.get(&symptom.module) {
                Some(module) => {
                    module.init_safety_mechanism(&symptom.sm_name, &symptom.name, &symptom.parameters)
                }
                None => {
                    error!("{}", FaultError::UnknownModule(symptom.module.clone()));
                    false
                }
            };

            symptom.sm_state = if initialized {
                SmState::Disabled
            } else {
                error!("Safety mechanism {} failed to initialize", symptom.name);
                SmState::Error
            };
        }
    }

    /// Enable every DISABLED mechanism, priming each with one evaluation
    pub fn enable_all_symptoms(&mut self) {
        let disabled: Vec<String> = self
            .registry
            .symptoms
            .values()
            .filter(|s| s.sm_state == SmState::Disabled)
            .map(|s| s.name.clone())
            .collect();

        for name in disabled {
            self.enable_sm(&name, SmState::Enabled);
        }
    }

    pub fn set_symptom(&mut self, symptom_id: &str, info: &Info) {
        if let Err(e) = self.set_fault(symptom_id, info) {
            error!("Setting symptom {} failed: {}", symptom_id, e);
        }
    }

    pub fn clear_symptom(&mut self, symptom_id: &str, info: &Info) {
        let result = self
            .registry
            .symptom_mut(symptom_id)
            .map(|s| s.state = FaultState::Cleared)
            .and_then(|_| self.clear_fault(symptom_id, info));
        if let Err(e) = result {
            error!("Clearing symptom {} failed: {}", symptom_id, e);
        }
    }

    /// Force a symptom back to NOT_TESTED and release its fault
    pub fn disable_symptom(&mut self, symptom_id: &str, info: &Info) {
        let result = self
            .registry
            .symptom_mut(symptom_id)
            .map(|s| s.state = FaultState::NotTested)
            .and_then(|_| self.clear_fault(symptom_id, info));
        if let Err(e) = result {
            error!("Disabling symptom {} failed: {}", symptom_id, e);
        }
    }

    pub fn check_symptom(&self, symptom_id: &str) -> Option<FaultState> {
        match self.registry.symptom(symptom_id) {
            Ok(symptom) => Some(symptom.state),
            Err(e) => {
                error!("{}", e);
                None
            }
        }
    }

    pub fn check_fault(&self, fault_id: &str) -> Option<FaultState> {
        match self.registry.faults.get(fault_id) {
            Some(fault) => Some(fault.state),
            None => {
                error!("{}", FaultError::UnknownFault(fault_id.to_string()));
                None
            }
        }
    }

    pub fn found_mapped_fault(&self, symptom_id: &str, sm_name: &str) -> Option<&Fault> {
        self.registry.found_mapped_fault(symptom_id, sm_name)
    }

    /// Drive the mechanism of symptom `name` to ENABLED or DISABLED
    pub fn enable_sm(&mut self, name: &str, desired: SmState) {
        let module = match self.module_of(name) {
            Ok(module) => module,
            Err(e) => {
                error!("Cannot change state of safety mechanism {}: {}", name, e);
                return;
            }
        };

        match desired {
            SmState::Enabled => {
                let enabled = module.enable_safety_mechanism(name, SmState::Enabled);
                self.set_sm_state(name, if enabled { SmState::Enabled } else { SmState::Error });
                if enabled {
                    debug!("Safety mechanism {} enabled, priming", name);
                    module.run_safety_mechanism(Some(&mut *self), name);
                } else {
                    error!("Safety mechanism {} could not be enabled", name);
                }
            }
            SmState::Disabled => {
                module.enable_safety_mechanism(name, SmState::Disabled);
                self.set_sm_state(name, SmState::Disabled);
                self.disable_symptom(name, &Info::new());
            }
            other => {
                error!("Unknown SmState '{:?}' for safety mechanism '{}'", other, name);
            }
        }
    }

    pub fn get_system_fault_level(&self) -> u32 {
        self.registry.system_fault_level()
    }

    pub fn update_system_state_entity(&self) {
        let level = self.registry.system_fault_level();
        let mut attributes = Attributes::new();
        attributes.insert("fault_count".into(), Value::from(self.registry.set_fault_count()));
        attributes.insert("highest_fault_level".into(), Value::from(level));

        if let Err(e) = self
            .host
            .set_state(SYSTEM_STATE_ENTITY, &level.to_string(), Some(attributes))
        {
            warn!("Failed to update {}: {}", SYSTEM_STATE_ENTITY, e);
        }
    }

    fn module_of(&self, name: &str) -> Result<Rc<dyn SafetyModule>, FaultError> {
        let symptom = self.registry.symptom(name)?;
        self.modules
            .get(&symptom.module)
            .cloned()
            .ok_or_else(|| FaultError::UnknownModule(symptom.module.clone()))
    }

    fn set_sm_state(&mut self, name: &str, state: SmState) {
        if let Ok(symptom) = self.registry.symptom_mut(name) {
            symptom.sm_state = state;
        }
    }

    fn set_fault(&mut self, symptom_id: &str, info: &Info) -> Result<(), FaultError> {
        let symptom = self.registry.symptom_mut(symptom_id)?;
        symptom.state = FaultState::Set;
        let sm_name = symptom.sm_name.clone();

        let fault_name = self.registry.mapped_fault(&sm_name)?.name.clone();
        let tag = incident_tag(&fault_name, info);

        let fault = self.registry.fault_mut(&fault_name)?;
        fault.previous_val = fault.state;
        fault.state = FaultState::Set;
        let level = fault.level;

        self.update_system_state_entity();
        debug!("Fault {} was set", fault_name);
        self.publish_fault(&fault_name, FaultState::Set, level, info);

        match &self.notify {
            Some(notify) => notify.notify(&fault_name, level, FaultState::Set, info, &tag),
            None => warn!("No notification interface"),
        }
        self.call_recovery(symptom_id, &tag)
    }

    fn clear_fault(&mut self, symptom_id: &str, info: &Info) -> Result<(), FaultError> {
        let sm_name = self.registry.symptom(symptom_id)?.sm_name.clone();
        let fault_name = self.registry.mapped_fault(&sm_name)?.name.clone();

        // A held clear leaves its info in the fault annotation; only the
        // releasing clear subtracts, and only its own info
        if self.registry.any_symptom_set(&sm_name) {
            debug!(
                "Fault {} held by another symptom of {}, not clearing",
                fault_name, sm_name
            );
            return Ok(());
        }

        let tag = incident_tag(&fault_name, info);
        let fault = self.registry.fault_mut(&fault_name)?;
        fault.previous_val = fault.state;
        fault.state = FaultState::Cleared;
        let (level, previous) = (fault.level, fault.previous_val);
        debug!("Fault {} was cleared", fault_name);

        self.publish_fault(&fault_name, FaultState::Cleared, level, info);
        self.update_system_state_entity();

        if previous == FaultState::Set {
            match &self.notify {
                Some(notify) => notify.notify(&fault_name, level, FaultState::Cleared, info, &tag),
                None => warn!("No notification interface"),
            }
        }
        self.call_recovery(symptom_id, &tag)
    }

    fn call_recovery(&self, symptom_id: &str, tag: &str) -> Result<(), FaultError> {
        let symptom = self.registry.symptom(symptom_id)?;
        match &self.recovery {
            Some(recovery) => recovery.recovery(&self.registry, symptom, tag),
            None => warn!("No recovery interface"),
        }
        Ok(())
    }

    fn publish_fault(&self, fault: &str, state: FaultState, level: u32, info: &Info) {
        let entity_id = fault_entity_id(fault);
        let current = self.host.get_state(&entity_id);
        let mut attributes = merge_annotations(current.as_ref().map(|s| &s.attributes), info, state)
            .or_else(|| current.map(|s| s.attributes))
            .unwrap_or_default();
        attributes.insert("level".into(), json!(format!("level_{}", level)));

        if let Err(e) = self
            .host
            .set_state(&entity_id, state.entity_value(), Some(attributes))
        {
            warn!("Failed to publish {}: {}", entity_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityChanges, Parameters};
    use host::{EntityStore, InMemoryHost};
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct FakeModule {
        runs: RefCell<Vec<String>>,
        enabled: RefCell<Vec<(String, SmState)>>,
        fail_init: Cell<bool>,
        fail_enable: Cell<bool>,
        detect_on_run: Cell<bool>,
    }

    impl SafetyModule for FakeModule {
        fn component_name(&self) -> &str {
            "Fake"
        }

        fn init_safety_mechanism(&self, _sm_name: &str, _name: &str, _p: &Parameters) -> bool {
            !self.fail_init.get()
        }

        fn enable_safety_mechanism(&self, name: &str, state: SmState) -> bool {
            self.enabled.borrow_mut().push((name.to_string(), state));
            !self.fail_enable.get()
        }

        fn run_safety_mechanism(&self, fault_manager: Option<&mut FaultManager>, name: &str) {
            self.runs.borrow_mut().push(name.to_string());
            if let (Some(fm), true) = (fault_manager, self.detect_on_run.get()) {
                fm.set_symptom(name, &Info::new());
            }
        }

        fn evaluate_with_changes(&self, _name: &str, _changes: &EntityChanges) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct Recorder {
        notified: RefCell<Vec<(String, u32, FaultState, String)>>,
        recovered: RefCell<Vec<(String, FaultState)>>,
    }

    impl NotifyInterface for Recorder {
        fn notify(&self, fault: &str, level: u32, state: FaultState, _info: &Info, tag: &str) {
            self.notified
                .borrow_mut()
                .push((fault.to_string(), level, state, tag.to_string()));
        }
    }

    impl RecoveryInterface for Recorder {
        fn recovery(&self, _registry: &FaultRegistry, symptom: &Symptom, _tag: &str) {
            self.recovered
                .borrow_mut()
                .push((symptom.name.clone(), symptom.state));
        }
    }

    struct Fixture {
        host: Arc<InMemoryHost>,
        module: Rc<FakeModule>,
        recorder: Rc<Recorder>,
        fm: FaultManager,
    }

    fn fixture(symptoms: &[(&str, &str)], faults: Vec<Fault>) -> Fixture {
        let host = Arc::new(InMemoryHost::new());
        let module = Rc::new(FakeModule::default());
        let recorder = Rc::new(Recorder::default());

        let mut modules: HashMap<String, Rc<dyn SafetyModule>> = HashMap::new();
        modules.insert("Fake".to_string(), module.clone());

        let symptoms = symptoms
            .iter()
            .map(|(name, sm)| (name.to_string(), Symptom::new(*name, *sm, "Fake", Parameters::new())))
            .collect();
        let faults = faults.into_iter().map(|f| (f.name.clone(), f)).collect();

        let mut fm = FaultManager::new(host.clone(), modules, symptoms, faults);
        fm.register_callbacks(recorder.clone(), recorder.clone());
        Fixture { host, module, recorder, fm }
    }

    fn location(value: &str) -> Info {
        let mut info = Info::new();
        info.insert("Location".to_string(), value.to_string());
        info
    }

    #[test]
    fn test_set_symptom_sets_fault_and_fans_out() {
        let mut f = fixture(
            &[("TempKitchen", "sm_tc_1")],
            vec![Fault::new("RiskyTemperature", vec!["sm_tc_1".to_string()], 2)],
        );

        f.fm.set_symptom("TempKitchen", &location("Kitchen"));

        assert_eq!(f.fm.check_symptom("TempKitchen"), Some(FaultState::Set));
        assert_eq!(f.fm.check_fault("RiskyTemperature"), Some(FaultState::Set));
        assert_eq!(f.fm.get_system_fault_level(), 2);

        let notified = f.recorder.notified.borrow();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].3, incident_tag("RiskyTemperature", &location("Kitchen")));
        assert_eq!(
            *f.recorder.recovered.borrow(),
            vec![("TempKitchen".to_string(), FaultState::Set)]
        );

        let entity = f.host.get_state("sensor.fault_RiskyTemperature").unwrap();
        assert_eq!(entity.state, "Set");
        assert_eq!(entity.attributes["Location"], "Kitchen");
        assert_eq!(entity.attributes["level"], "level_2");

        let system = f.host.get_state(SYSTEM_STATE_ENTITY).unwrap();
        assert_eq!(system.state, "2");
        assert_eq!(system.attributes["fault_count"], 1);
    }

    #[test]
    fn test_ambiguous_mapping_changes_nothing() {
        let mut f = fixture(
            &[("A", "sm_a")],
            vec![
                Fault::new("F1", vec!["sm_a".to_string()], 2),
                Fault::new("F2", vec!["sm_a".to_string()], 3),
            ],
        );

        f.fm.set_symptom("A", &Info::new());

        assert!(f.fm.found_mapped_fault("A", "sm_a").is_none());
        assert_eq!(f.fm.check_fault("F1"), Some(FaultState::NotTested));
        assert_eq!(f.fm.check_fault("F2"), Some(FaultState::NotTested));
        assert!(f.recorder.notified.borrow().is_empty());
    }

    #[test]
    fn test_clear_gated_by_sibling_symptom() {
        let mut f = fixture(
            &[("A", "sm_shared"), ("B", "sm_shared")],
            vec![Fault::new("F", vec!["sm_shared".to_string()], 3)],
        );

        f.fm.set_symptom("A", &Info::new());
        f.fm.set_symptom("B", &Info::new());
        assert_eq!(f.fm.check_fault("F"), Some(FaultState::Set));

        f.fm.clear_symptom("A", &Info::new());
        assert_eq!(f.fm.check_fault("F"), Some(FaultState::Set));

        f.fm.clear_symptom("B", &Info::new());
        assert_eq!(f.fm.check_fault("F"), Some(FaultState::Cleared));

        let cleared: Vec<_> = f
            .recorder
            .notified
            .borrow()
            .iter()
            .filter(|n| n.2 == FaultState::Cleared)
            .cloned()
            .collect();
        assert_eq!(cleared.len(), 1);
    }

    #[test]
    fn test_held_clear_keeps_its_annotation() {
        let mut f = fixture(
            &[("A", "sm_shared"), ("B", "sm_shared")],
            vec![Fault::new("F", vec!["sm_shared".to_string()], 3)],
        );

        f.fm.set_symptom("A", &location("Kitchen"));
        f.fm.set_symptom("B", &location("Office"));
        f.fm.clear_symptom("A", &location("Kitchen"));
        f.fm.clear_symptom("B", &location("Office"));

        let entity = f.host.get_state("sensor.fault_F").unwrap();
        assert_eq!(entity.state, "Cleared");
        assert_eq!(entity.attributes["Location"], "Kitchen");
    }

    #[test]
    fn test_clear_without_prior_set_is_silent() {
        let mut f = fixture(&[("A", "sm_a")], vec![Fault::new("F", vec!["sm_a".to_string()], 2)]);

        f.fm.clear_symptom("A", &Info::new());

        assert_eq!(f.fm.check_fault("F"), Some(FaultState::Cleared));
        assert!(f.recorder.notified.borrow().is_empty());
        // Recovery still hears about the clear
        assert_eq!(
            *f.recorder.recovered.borrow(),
            vec![("A".to_string(), FaultState::Cleared)]
        );
    }

    #[test]
    fn test_annotations_follow_set_and_clear() {
        let mut f = fixture(
            &[("Kitchen", "sm_a"), ("Office", "sm_b")],
            vec![Fault::new("F", vec!["sm_a".to_string(), "sm_b".to_string()], 2)],
        );
        f.fm.register_fault_entities();

        f.fm.set_symptom("Kitchen", &location("Kitchen"));
        f.fm.set_symptom("Office", &location("Office"));
        let entity = f.host.get_state("sensor.fault_F").unwrap();
        assert_eq!(entity.attributes["Location"], "Kitchen, Office");

        f.fm.clear_symptom("Office", &location("Office"));
        let entity = f.host.get_state("sensor.fault_F").unwrap();
        assert_eq!(entity.state, "Cleared");
        assert_eq!(entity.attributes["Location"], "Kitchen");
        assert_eq!(entity.attributes["friendly_name"], "Fault: F");
    }

    #[test]
    fn test_init_and_enable_all() {
        let mut f = fixture(&[("A", "sm_a")], vec![Fault::new("F", vec!["sm_a".to_string()], 2)]);

        f.fm.init_safety_mechanisms();
        assert_eq!(f.fm.registry().symptoms["A"].sm_state, SmState::Disabled);

        f.module.detect_on_run.set(true);
        f.fm.enable_all_symptoms();
        assert_eq!(f.fm.registry().symptoms["A"].sm_state, SmState::Enabled);
        assert_eq!(*f.module.runs.borrow(), vec!["A".to_string()]);
        assert_eq!(f.fm.check_fault("F"), Some(FaultState::Set));
    }

    #[test]
    fn test_failed_init_and_enable_mark_error() {
        let mut f = fixture(&[("A", "sm_a")], vec![Fault::new("F", vec!["sm_a".to_string()], 2)]);
        f.module.fail_init.set(true);
        f.fm.init_safety_mechanisms();
        assert_eq!(f.fm.registry().symptoms["A"].sm_state, SmState::Error);

        f.module.fail_enable.set(true);
        f.fm.enable_sm("A", SmState::Enabled);
        assert_eq!(f.fm.registry().symptoms["A"].sm_state, SmState::Error);
        assert!(f.module.runs.borrow().is_empty());
    }

    #[test]
    fn test_disable_resets_symptom() {
        let mut f = fixture(&[("A", "sm_a")], vec![Fault::new("F", vec!["sm_a".to_string()], 2)]);
        f.fm.set_symptom("A", &Info::new());

        f.fm.enable_sm("A", SmState::Disabled);

        assert_eq!(f.fm.registry().symptoms["A"].sm_state, SmState::Disabled);
        assert_eq!(f.fm.check_symptom("A"), Some(FaultState::NotTested));
        assert_eq!(f.fm.check_fault("F"), Some(FaultState::Cleared));
        assert_eq!(f.fm.get_system_fault_level(), 0);
        assert_eq!(
            f.module.enabled.borrow().last(),
            Some(&("A".to_string(), SmState::Disabled))
        );
    }

    #[test]
    fn test_unrecognized_desired_state_is_ignored() {
        let mut f = fixture(&[("A", "sm_a")], vec![Fault::new("F", vec!["sm_a".to_string()], 2)]);
        f.fm.enable_sm("A", SmState::Error);
        assert_eq!(f.fm.registry().symptoms["A"].sm_state, SmState::NonInitialized);
        assert!(f.module.enabled.borrow().is_empty());
    }

    #[test]
    fn test_unknown_ids_are_contained() {
        let mut f = fixture(&[("A", "sm_a")], vec![Fault::new("F", vec!["sm_a".to_string()], 2)]);
        f.fm.set_symptom("missing", &Info::new());
        f.fm.clear_symptom("missing", &Info::new());
        f.fm.enable_sm("missing", SmState::Enabled);
        assert_eq!(f.fm.check_symptom("missing"), None);
        assert_eq!(f.fm.check_fault("missing"), None);
    }

    #[test]
    fn test_missing_collaborators_do_not_block() {
        let host = Arc::new(InMemoryHost::new());
        let symptoms = [("A".to_string(), Symptom::new("A", "sm_a", "Fake", Parameters::new()))]
            .into_iter()
            .collect();
        let faults = [("F".to_string(), Fault::new("F", vec!["sm_a".to_string()], 1))]
            .into_iter()
            .collect();
        let mut fm = FaultManager::new(host, HashMap::new(), symptoms, faults);

        fm.set_symptom("A", &Info::new());
        assert_eq!(fm.check_fault("F"), Some(FaultState::Set));
    }

    #[test]
    fn test_failing_entity_write_does_not_block() {
        let mut f = fixture(&[("A", "sm_a")], vec![Fault::new("F", vec!["sm_a".to_string()], 2)]);
        f.host.fail_writes_to("sensor.fault_F");

        f.fm.set_symptom("A", &Info::new());

        assert_eq!(f.fm.check_fault("F"), Some(FaultState::Set));
        assert_eq!(f.recorder.notified.borrow().len(), 1);
    }
}
