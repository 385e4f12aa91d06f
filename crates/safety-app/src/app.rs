//! Application root

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use fault_manager::{Fault, FaultManager, RecoveryAction, SafetyModule, Symptom};
use host::{Attributes, CommonEntities, Host, InMemoryHost, Job};
use notification::NotificationDispatcher;
use recovery::RecoveryManager;
use safety_component::{build_component, ComponentContext, DerivativeMonitor};

use crate::{AppConfig, AppError};

/// Entity reporting the application lifecycle
pub const HEALTH_ENTITY: &str = "sensor.safety_app_health";

/// Upper bound of dispatch rounds per pump, guards against listener loops
const MAX_PUMP_ROUNDS: usize = 1000;

/// Wired fault-management core
pub struct SafetyApp {
    host: Arc<dyn Host>,
    config: AppConfig,
    fault_manager: FaultManager,
    dispatcher: Rc<NotificationDispatcher>,
    recovery: Rc<RecoveryManager>,
    derivative: Rc<DerivativeMonitor>,
}

impl SafetyApp {
    /// Validate the configuration, wire every collaborator and enable all
    /// safety mechanisms. The health entity ends up `running`, or
    /// `invalid_cfg` when startup is refused.
    pub fn start(host: Arc<dyn Host>, config: AppConfig) -> Result<Self, AppError> {
        set_health(host.as_ref(), "init", Attributes::new());

        match Self::build(host.clone(), config) {
            Ok(app) => {
                app.report_running();
                info!("Safety app started");
                Ok(app)
            }
            Err(e) => {
                error!("Safety app not started: {}", e);
                set_health(host.as_ref(), "invalid_cfg", Attributes::new());
                Err(e)
            }
        }
    }

    fn build(host: Arc<dyn Host>, config: AppConfig) -> Result<Self, AppError> {
        config.validate()?;

        let derivative = Rc::new(DerivativeMonitor::new(host.clone()));
        let context = ComponentContext {
            host: host.clone(),
            derivative: derivative.clone(),
            rerun_delay: config.runtime.rerun_delay(),
        };

        let mut modules: HashMap<String, Rc<dyn SafetyModule>> = HashMap::new();
        let mut symptoms: BTreeMap<String, Symptom> = BTreeMap::new();
        let mut actions: BTreeMap<String, RecoveryAction> = BTreeMap::new();
        for (name, component_config) in &config.safety_components {
            let component = build_component(name, &context)?;
            let data = component.symptoms_data(component_config);
            debug!(
                "{} provides {} symptoms and {} recovery actions",
                name,
                data.symptoms.len(),
                data.recovery_actions.len()
            );
            symptoms.extend(data.symptoms);
            actions.extend(data.recovery_actions);
            modules.insert(name.clone(), component.into_module());
        }

        let faults: BTreeMap<String, Fault> = config
            .faults
            .iter()
            .map(|(name, fault)| {
                (name.clone(), Fault::new(name, fault.related_sms.clone(), fault.level))
            })
            .collect();

        let mut fault_manager = FaultManager::new(host.clone(), modules.clone(), symptoms, faults);
        let dispatcher = Rc::new(NotificationDispatcher::new(
            host.clone(),
            config.notification.clone(),
        ));
        let recovery = Rc::new(RecoveryManager::new(
            host.clone(),
            actions,
            modules,
            CommonEntities::new(&config.common_entities),
            dispatcher.clone(),
        ));
        fault_manager.register_callbacks(recovery.clone(), dispatcher.clone());

        fault_manager.register_fault_entities();
        fault_manager.init_safety_mechanisms();
        fault_manager.enable_all_symptoms();

        Ok(Self {
            host,
            config,
            fault_manager,
            dispatcher,
            recovery,
            derivative,
        })
    }

    pub fn fault_manager(&self) -> &FaultManager {
        &self.fault_manager
    }

    pub fn fault_manager_mut(&mut self) -> &mut FaultManager {
        &mut self.fault_manager
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Route a fired callback to its owner
    pub fn dispatch(&mut self, job: Job) {
        debug!("Dispatching {}", job);
        match job {
            Job::RunMechanism { component, symptom } => {
                let Some(module) = self.fault_manager.modules().get(&component).cloned() else {
                    warn!("No component {} for {}", component, symptom);
                    return;
                };
                module.run_safety_mechanism(Some(&mut self.fault_manager), &symptom);
            }
            Job::RecoveryPerformed { symptom } => self.recovery.recovery_performed(&symptom),
            Job::Sample { entity } => self.derivative.sample(&entity),
        }
    }

    /// Dispatch queued change events and due timers until both are drained.
    /// Returns the number of dispatched jobs.
    pub fn pump(&mut self, host: &InMemoryHost) -> usize {
        let mut dispatched = 0;
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut jobs = host.take_events();
            jobs.extend(host.advance(Duration::ZERO));
            if jobs.is_empty() {
                return dispatched;
            }
            dispatched += jobs.len();
            for job in jobs {
                self.dispatch(job);
            }
        }
        warn!("Jobs still pending after {} dispatch rounds", MAX_PUMP_ROUNDS);
        dispatched
    }

    /// Move the clock forward and dispatch everything that came due
    pub fn advance(&mut self, host: &InMemoryHost, by: Duration) -> usize {
        let due = host.advance(by);
        let mut dispatched = due.len();
        for job in due {
            self.dispatch(job);
        }
        dispatched += self.pump(host);
        dispatched
    }

    fn report_running(&self) {
        let registry = self.fault_manager.registry();
        let symptoms: serde_json::Map<String, Value> = registry
            .symptoms
            .values()
            .map(|s| {
                (
                    s.name.clone(),
                    json!({
                        "state": s.state.entity_value(),
                        "sm_state": s.sm_state,
                        "parameters": s.parameters,
                    }),
                )
            })
            .collect();
        let actions: serde_json::Map<String, Value> = self
            .recovery
            .actions()
            .into_iter()
            .map(|(symptom, action)| {
                (
                    symptom,
                    json!({
                        "name": action.name,
                        "params": action.params,
                        "status": action.current_status.as_str(),
                    }),
                )
            })
            .collect();

        let mut attributes = Attributes::new();
        attributes.insert(
            "configuration".into(),
            serde_json::to_value(&self.config).unwrap_or(Value::Null),
        );
        attributes.insert("symptoms".into(), Value::Object(symptoms));
        attributes.insert("recovery_actions".into(), Value::Object(actions));
        attributes.insert("start_time".into(), json!(Utc::now().to_rfc3339()));
        set_health(self.host.as_ref(), "running", attributes);
    }
}

fn set_health(host: &dyn Host, state: &str, attributes: Attributes) {
    if let Err(e) = host.set_state(HEALTH_ENTITY, state, Some(attributes)) {
        warn!("Failed to update {}: {}", HEALTH_ENTITY, e);
    }
}
