//! Recovery Manager Implementation

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use fault_manager::{
    EntityChanges, FaultRegistry, FaultState, RecoveryAction, RecoveryActionState,
    RecoveryInterface, RecoveryResult, SafetyModule, SmState, Symptom,
};
use host::{CommonEntities, Host, Job, ListenHandle};
use notification::NotificationDispatcher;

use crate::RecoveryError;

/// Why a recovery proposal was not applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Veto {
    /// Applying the proposal would newly trigger another mechanism
    DryTestFailed { mechanism: String },
    /// A name-matched action belongs to a fault of higher level
    PriorityConflict { symptom: String, level: u32 },
}

impl fmt::Display for Veto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Veto::DryTestFailed { mechanism } => write!(f, "would trigger {}", mechanism),
            Veto::PriorityConflict { symptom, level } => {
                write!(f, "conflicts with {} (level {})", symptom, level)
            }
        }
    }
}

/// Recovery orchestrator, one action per symptom name
pub struct RecoveryManager {
    host: Arc<dyn Host>,
    actions: RefCell<BTreeMap<String, RecoveryAction>>,
    modules: HashMap<String, Rc<dyn SafetyModule>>,
    common: CommonEntities,
    dispatcher: Rc<NotificationDispatcher>,
    /// Completion listeners by symptom
    watchers: RefCell<HashMap<String, Vec<ListenHandle>>>,
}

impl RecoveryManager {
    pub fn new(
        host: Arc<dyn Host>,
        actions: BTreeMap<String, RecoveryAction>,
        modules: HashMap<String, Rc<dyn SafetyModule>>,
        common: CommonEntities,
        dispatcher: Rc<NotificationDispatcher>,
    ) -> Self {
        info!("Creating recovery manager with {} actions", actions.len());
        let manager = Self {
            host,
            actions: RefCell::new(actions),
            modules,
            common,
            dispatcher,
            watchers: RefCell::new(HashMap::new()),
        };
        for action in manager.actions.borrow().values() {
            manager.publish(action);
        }
        manager
    }

    /// Snapshot of every action keyed by symptom
    pub fn actions(&self) -> BTreeMap<String, RecoveryAction> {
        self.actions.borrow().clone()
    }

    pub fn status(&self, symptom: &str) -> Option<RecoveryActionState> {
        self.actions.borrow().get(symptom).map(|a| a.current_status)
    }

    /// An entity touched by the recovery of `symptom` changed
    pub fn recovery_performed(&self, symptom: &str) {
        debug!("Recovery for {} was acted upon", symptom);
        self.drop_watchers(symptom);
        self.set_status(symptom, RecoveryActionState::DoNotPerform);
    }

    fn propose(&self, symptom: &Symptom) -> Option<RecoveryResult> {
        let action = match self.actions.borrow().get(&symptom.name) {
            Some(action) => action.clone(),
            None => {
                debug!("{}", RecoveryError::UnknownAction(symptom.name.clone()));
                return None;
            }
        };

        let proposal = (action.action)(self.host.as_ref(), symptom, &self.common, &action.params);
        if proposal.is_none() {
            debug!("No changes determined for recovery of {}", symptom.name);
        }
        proposal
    }

    fn validate(
        &self,
        registry: &FaultRegistry,
        symptom: &Symptom,
        proposal: &RecoveryResult,
    ) -> Result<(), Veto> {
        self.dry_test(registry, &symptom.name, &proposal.changed_sensors)?;
        self.check_conflict(registry, symptom)
    }

    /// Re-run every enabled mechanism with the proposed sensor values
    fn dry_test(
        &self,
        registry: &FaultRegistry,
        recovering: &str,
        changes: &EntityChanges,
    ) -> Result<(), Veto> {
        let enabled = registry
            .symptoms
            .values()
            .filter(|s| s.sm_state == SmState::Enabled && s.name != recovering);

        for symptom in enabled {
            let Some(module) = self.modules.get(&symptom.module) else {
                error!("{}", RecoveryError::UnknownModule(symptom.module.clone()));
                continue;
            };
            if module.evaluate_with_changes(&symptom.name, changes)
                && !module.evaluate_with_changes(&symptom.name, &EntityChanges::new())
            {
                return Err(Veto::DryTestFailed {
                    mechanism: symptom.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Actions whose name is contained in this action's name must not belong
    /// to a fault of higher level
    fn check_conflict(&self, registry: &FaultRegistry, symptom: &Symptom) -> Result<(), Veto> {
        let actions = self.actions.borrow();
        let Some(current) = actions.get(&symptom.name) else {
            return Ok(());
        };
        let Some(own_fault) = registry.found_mapped_fault(&symptom.name, &symptom.sm_name) else {
            return Ok(());
        };

        for (name, action) in actions.iter() {
            if name == &symptom.name || !current.name.contains(action.name.as_str()) {
                continue;
            }
            let Some(other) = registry.symptoms.get(name) else {
                continue;
            };
            if let Some(fault) = registry.found_mapped_fault(&other.name, &other.sm_name) {
                if fault.level > own_fault.level {
                    return Err(Veto::PriorityConflict {
                        symptom: other.name.clone(),
                        level: fault.level,
                    });
                }
            }
        }
        Ok(())
    }

    fn execute(&self, registry: &FaultRegistry, symptom: &Symptom, proposal: &RecoveryResult, tag: &str) {
        self.set_status(&symptom.name, RecoveryActionState::ToPerform);

        for (entity, value) in &proposal.changed_actuators {
            if let Err(e) = self.host.set_state(entity, value, None) {
                error!("Setting {} to {} failed: {}", entity, value, e);
            }
        }

        if registry
            .found_mapped_fault(&symptom.name, &symptom.sm_name)
            .is_some()
        {
            for text in &proposal.notifications {
                self.dispatcher.append_recovery_message(tag, text);
            }
        }

        self.watch(&symptom.name, &proposal.touched_entities());
    }

    fn watch(&self, symptom: &str, entities: &[String]) {
        self.drop_watchers(symptom);

        let mut handles = Vec::with_capacity(entities.len());
        for entity in entities {
            let job = Job::RecoveryPerformed {
                symptom: symptom.to_string(),
            };
            match self.host.listen_state(entity, job) {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!("Cannot watch {} for {}: {}", entity, symptom, e),
            }
        }
        self.watchers.borrow_mut().insert(symptom.to_string(), handles);
    }

    fn drop_watchers(&self, symptom: &str) {
        let handles = self.watchers.borrow_mut().remove(symptom).unwrap_or_default();
        for handle in handles {
            if let Err(e) = self.host.cancel_listen(handle) {
                warn!("Failed to cancel recovery watcher of {}: {}", symptom, e);
            }
        }
    }

    fn set_status(&self, symptom: &str, status: RecoveryActionState) {
        let updated = {
            let mut actions = self.actions.borrow_mut();
            match actions.get_mut(symptom) {
                Some(action) => {
                    action.current_status = status;
                    action.clone()
                }
                None => return,
            }
        };
        self.publish(&updated);
    }

    fn publish(&self, action: &RecoveryAction) {
        let entity_id = action.entity_id();
        if let Err(e) = self
            .host
            .set_state(&entity_id, action.current_status.as_str(), None)
        {
            warn!("Failed to publish {}: {}", entity_id, e);
        }
    }
}

impl RecoveryInterface for RecoveryManager {
    fn recovery(&self, registry: &FaultRegistry, symptom: &Symptom, tag: &str) {
        debug!("Starting recovery process for symptom: {}", symptom.name);

        if symptom.state == FaultState::Cleared {
            self.drop_watchers(&symptom.name);
            self.set_status(&symptom.name, RecoveryActionState::DoNotPerform);
            return;
        }

        let Some(proposal) = self.propose(symptom) else {
            return;
        };

        if let Err(veto) = self.validate(registry, symptom, &proposal) {
            debug!("Recovery for {} aborted: {}", symptom.name, veto);
            return;
        }

        self.execute(registry, symptom, &proposal, tag);
        debug!("Recovery process completed for symptom: {}", symptom.name);
    }
}
