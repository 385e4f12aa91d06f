//! Temperature safety component
//!
//! Two mechanisms per location:
//! - `sm_tc_1`: room temperature below `CAL_LOW_TEMP_THRESHOLD`
//! - `sm_tc_2`: temperature forecast after `CAL_FORECAST_TIMESPAN` hours below
//!   the same threshold, extrapolated from `<sensor>_rate`
//!
//! Both map to the `ManipulateWindow<Location>` recovery action.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, error, info};

use fault_manager::{
    EntityChanges, FaultManager, Info, Parameters, RecoveryAction, RecoveryResult, SafetyModule,
    SmState, Symptom,
};
use host::{numeric_state, CommonEntities, Host};

use crate::{
    ComponentContext, ComponentData, DerivativeMonitor, EntityReader, MechanismKind,
    MechanismResult, MechanismTable, SafetyComponent, SafetyMechanism,
};

/// Minutes between two derivative samples of a forecast sensor
const FORECAST_SAMPLING_MINUTES: f64 = 15.0;
const DERIVATIVE_LOW_SATURATION: f64 = -2.0;
const DERIVATIVE_HIGH_SATURATION: f64 = 2.0;

const SENSOR: &str = "temperature_sensor";
const THRESHOLD: &str = "CAL_LOW_TEMP_THRESHOLD";
const TIMESPAN: &str = "CAL_FORECAST_TIMESPAN";
const LOCATION: &str = "location";

const SM_TC_1: MechanismKind = MechanismKind {
    sm_name: "sm_tc_1",
    required_keys: &[SENSOR, THRESHOLD, LOCATION],
    watched: watch_temperature,
    evaluator: low_temperature,
    debounce_limit: 2,
};

const SM_TC_2: MechanismKind = MechanismKind {
    sm_name: "sm_tc_2",
    required_keys: &[SENSOR, THRESHOLD, TIMESPAN, LOCATION],
    watched: watch_temperature_and_rate,
    evaluator: low_temperature_forecast,
    debounce_limit: 2,
};

fn sensor_of(params: &Parameters) -> Option<&str> {
    params.get(SENSOR).and_then(Value::as_str)
}

fn watch_temperature(params: &Parameters) -> Vec<String> {
    sensor_of(params).map(|s| vec![s.to_string()]).unwrap_or_default()
}

fn watch_temperature_and_rate(params: &Parameters) -> Vec<String> {
    sensor_of(params)
        .map(|s| vec![s.to_string(), DerivativeMonitor::rate_entity(s)])
        .unwrap_or_default()
}

fn location_info(sm: &SafetyMechanism) -> Info {
    let mut info = Info::new();
    if let Some(location) = sm.param_str(LOCATION) {
        info.insert("Location".to_string(), location.to_string());
    }
    info
}

fn low_temperature(reader: &EntityReader<'_>, sm: &SafetyMechanism) -> MechanismResult {
    let (Some(sensor), Some(threshold)) = (sm.param_str(SENSOR), sm.param_f64(THRESHOLD)) else {
        error!("{} has invalid parameters", sm.name);
        return MechanismResult::undetected();
    };
    let Some(temperature) = reader.numeric(sensor) else {
        return MechanismResult::undetected();
    };

    MechanismResult {
        detected: temperature < threshold,
        info: location_info(sm),
    }
}

fn low_temperature_forecast(reader: &EntityReader<'_>, sm: &SafetyMechanism) -> MechanismResult {
    let (Some(sensor), Some(threshold), Some(hours)) = (
        sm.param_str(SENSOR),
        sm.param_f64(THRESHOLD),
        sm.param_f64(TIMESPAN),
    ) else {
        error!("{} has invalid parameters", sm.name);
        return MechanismResult::undetected();
    };
    let (Some(temperature), Some(rate)) = (
        reader.numeric(sensor),
        reader.numeric(&DerivativeMonitor::rate_entity(sensor)),
    ) else {
        return MechanismResult::undetected();
    };

    let forecast = forecast_temperature(temperature, rate, hours);
    if !forecast.is_finite() {
        debug!("{} forecast is not finite for T0={} dT={}", sm.name, temperature, rate);
        return MechanismResult::undetected();
    }

    MechanismResult {
        detected: forecast < threshold,
        info: location_info(sm),
    }
}

/// Exponential decay forecast of the temperature after `hours`.
///
/// `rate` is the temperature change over one sampling period.
pub fn forecast_temperature(initial: f64, rate: f64, hours: f64) -> f64 {
    let k = -((initial + rate / FORECAST_SAMPLING_MINUTES) / initial).ln();
    initial * (-k * hours * 60.0).exp()
}

/// Propose closing or opening the windows of the symptom's location
pub fn risky_temperature_recovery(
    host: &dyn Host,
    symptom: &Symptom,
    common: &CommonEntities,
    params: &Parameters,
) -> Option<RecoveryResult> {
    let location = params.get(LOCATION).and_then(Value::as_str).unwrap_or_default();
    let window_sensors: Vec<String> = match params.get("window_sensor") {
        Some(Value::String(sensor)) => vec![sensor.clone()],
        Some(Value::Array(sensors)) => sensors
            .iter()
            .filter_map(|s| s.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    if window_sensors.is_empty() {
        error!("No window sensor configured for {}", location);
        return None;
    }

    let room_sensor = symptom.parameters.get(SENSOR).and_then(Value::as_str)?;
    let room = numeric_state(host, room_sensor)?;

    let mut result = RecoveryResult::default();
    let Some(outside) = common.outside_temperature(host) else {
        debug!("Outside temperature unavailable, no recovery for {}", location);
        return Some(result);
    };

    let (state, notification) = if outside < room {
        ("off", format!("Please close windows in {} as recovery action", location))
    } else {
        ("on", format!("Please open windows in {} as recovery action", location))
    };

    for sensor in window_sensors {
        result.changed_sensors.insert(sensor, state.to_string());
    }
    match params.get("actuator").and_then(Value::as_str) {
        Some(actuator) if !actuator.is_empty() => {
            result.changed_actuators.insert(actuator.to_string(), state.to_string());
        }
        _ => result.notifications.push(notification),
    }
    Some(result)
}

/// Temperature monitoring per room
pub struct TemperatureComponent {
    table: MechanismTable,
    derivative: Rc<DerivativeMonitor>,
}

impl TemperatureComponent {
    pub const NAME: &'static str = "TemperatureComponent";

    pub fn new(context: &ComponentContext) -> Self {
        Self {
            table: MechanismTable::new(
                Self::NAME,
                context.host.clone(),
                vec![SM_TC_1, SM_TC_2],
                context.rerun_delay,
            ),
            derivative: context.derivative.clone(),
        }
    }

    pub fn mechanisms(&self) -> &MechanismTable {
        &self.table
    }
}

impl SafetyComponent for TemperatureComponent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn symptoms_data(&self, config: &[BTreeMap<String, Parameters>]) -> ComponentData {
        let mut data = ComponentData::default();

        for rooms in config {
            for (location, room) in rooms {
                info!("Processing symptoms for location {}", location);
                let mut parameters = room.clone();
                parameters.insert(LOCATION.to_string(), json!(location));

                let mut action_params = Parameters::new();
                action_params.insert(LOCATION.to_string(), json!(location));
                action_params.insert(
                    "actuator".to_string(),
                    room.get("actuator").cloned().unwrap_or(Value::Null),
                );
                action_params.insert(
                    "window_sensor".to_string(),
                    room.get("window_sensor").cloned().unwrap_or(Value::Null),
                );

                for (sm_name, symptom_name) in [
                    (SM_TC_1.sm_name, format!("RiskyTemperature{}", location)),
                    (SM_TC_2.sm_name, format!("RiskyTemperature{}ForeCast", location)),
                ] {
                    data.symptoms.insert(
                        symptom_name.clone(),
                        Symptom::new(&symptom_name, sm_name, Self::NAME, parameters.clone()),
                    );
                    data.recovery_actions.insert(
                        symptom_name,
                        RecoveryAction::new(
                            format!("ManipulateWindow{}", location),
                            action_params.clone(),
                            risky_temperature_recovery,
                        ),
                    );
                }
            }
        }
        data
    }

    fn into_module(self: Rc<Self>) -> Rc<dyn SafetyModule> {
        self
    }
}

impl SafetyModule for TemperatureComponent {
    fn component_name(&self) -> &str {
        Self::NAME
    }

    fn init_safety_mechanism(&self, sm_name: &str, name: &str, parameters: &Parameters) -> bool {
        if let Err(e) = self.table.init(sm_name, name, parameters) {
            error!("Failed to initialize {}: {}", name, e);
            return false;
        }
        if sm_name == SM_TC_2.sm_name {
            if let Some(sensor) = sensor_of(parameters) {
                self.derivative.register_entity(
                    sensor,
                    Duration::from_secs_f64(FORECAST_SAMPLING_MINUTES * 60.0),
                    DERIVATIVE_LOW_SATURATION,
                    DERIVATIVE_HIGH_SATURATION,
                );
            }
        }
        true
    }

    fn enable_safety_mechanism(&self, name: &str, state: SmState) -> bool {
        let enabled = match state {
            SmState::Enabled => true,
            SmState::Disabled => false,
            other => {
                error!("Invalid state {:?} for safety mechanism {}", other, name);
                return false;
            }
        };
        match self.table.set_enabled(name, enabled) {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    fn run_safety_mechanism(&self, fault_manager: Option<&mut FaultManager>, name: &str) {
        self.table.run(fault_manager, name);
    }

    fn evaluate_with_changes(&self, name: &str, changes: &EntityChanges) -> bool {
        self.table.dry_run(name, changes)
    }
}
