//! Rate-of-change sampling service

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, warn};

use host::{numeric_state, Attributes, Host, Job};

/// Moving average window of the derivative filters
const FILTER_WINDOW: usize = 4;

struct Tracked {
    sample_time: Duration,
    low_saturation: f64,
    high_saturation: f64,
    prev_value: Option<f64>,
    first_derivative: Option<f64>,
    second_derivative: Option<f64>,
    first_history: VecDeque<f64>,
    second_history: VecDeque<f64>,
}

fn push(history: &mut VecDeque<f64>, value: f64) {
    if history.len() >= FILTER_WINDOW {
        history.pop_front();
    }
    history.push_back(value);
}

fn filtered(history: &VecDeque<f64>) -> f64 {
    let mean = history.iter().sum::<f64>() / history.len().max(1) as f64;
    (mean * 1000.0).round() / 1000.0
}

fn saturate(value: f64, low: f64, high: f64) -> f64 {
    value.max(low).min(high)
}

/// Periodically samples registered entities and publishes their smoothed
/// first derivative (per minute) to `<entity>_rate`
pub struct DerivativeMonitor {
    host: Arc<dyn Host>,
    entities: RefCell<HashMap<String, Tracked>>,
}

impl DerivativeMonitor {
    pub fn new(host: Arc<dyn Host>) -> Self {
        debug!("DerivativeMonitor initialized");
        Self {
            host,
            entities: RefCell::new(HashMap::new()),
        }
    }

    /// Entity holding the smoothed first derivative of `entity_id`
    pub fn rate_entity(entity_id: &str) -> String {
        format!("{}_rate", entity_id)
    }

    /// Start sampling `entity_id` every `sample_time`, first sample immediately
    pub fn register_entity(
        &self,
        entity_id: &str,
        sample_time: Duration,
        low_saturation: f64,
        high_saturation: f64,
    ) {
        if self.entities.borrow().contains_key(entity_id) {
            debug!("{} already registered for derivative monitoring", entity_id);
            return;
        }
        if sample_time.is_zero() {
            error!("Sample time of {} must not be zero", entity_id);
            return;
        }

        self.entities.borrow_mut().insert(
            entity_id.to_string(),
            Tracked {
                sample_time,
                low_saturation: low_saturation.min(high_saturation),
                high_saturation: high_saturation.max(low_saturation),
                prev_value: None,
                first_derivative: None,
                second_derivative: None,
                first_history: VecDeque::from([0.0]),
                second_history: VecDeque::from([0.0]),
            },
        );

        for (suffix, name) in [("_rate", "Rate"), ("_rateOfRate", "Rate of Rate")] {
            let mut attributes = Attributes::new();
            attributes.insert("friendly_name".into(), json!(format!("{} {}", entity_id, name)));
            attributes.insert("unit_of_measurement".into(), json!("°C/min"));
            let derived = format!("{}{}", entity_id, suffix);
            if let Err(e) = self.host.set_state(&derived, "unknown", Some(attributes)) {
                warn!("Failed to create {}: {}", derived, e);
            }
        }

        self.schedule(entity_id, Duration::ZERO);
    }

    /// Take one sample of `entity_id` and schedule the next one
    pub fn sample(&self, entity_id: &str) {
        let sample_time = match self.entities.borrow().get(entity_id) {
            Some(tracked) => tracked.sample_time,
            None => {
                error!("Entity {} not registered for derivatives", entity_id);
                return;
            }
        };
        self.schedule(entity_id, sample_time);

        let Some(current) = numeric_state(self.host.as_ref(), entity_id) else {
            debug!("No value available for {}, skipping calculation", entity_id);
            return;
        };

        let (first, second) = {
            let mut entities = self.entities.borrow_mut();
            let Some(tracked) = entities.get_mut(entity_id) else {
                return;
            };
            let seconds = tracked.sample_time.as_secs_f64();
            let (low, high) = (tracked.low_saturation, tracked.high_saturation);

            if let Some(prev) = tracked.prev_value {
                let first = saturate((current - prev) * 60.0 / seconds, low, high);
                let second = tracked
                    .first_derivative
                    .map(|prev_first| saturate((first - prev_first) * 60.0 / seconds, low, high));

                if first != 0.0 {
                    push(&mut tracked.first_history, first);
                }
                if let Some(second) = second.filter(|s| *s != 0.0) {
                    push(&mut tracked.second_history, second);
                }

                tracked.first_derivative = Some(filtered(&tracked.first_history));
                tracked.second_derivative = Some(filtered(&tracked.second_history));
                debug!(
                    "Calculated for {}: first derivative {:?}, second derivative {:?}",
                    entity_id, tracked.first_derivative, tracked.second_derivative
                );
            }
            tracked.prev_value = Some(current);
            (tracked.first_derivative, tracked.second_derivative)
        };

        self.publish(&Self::rate_entity(entity_id), first);
        self.publish(&format!("{}_rateOfRate", entity_id), second);
    }

    pub fn first_derivative(&self, entity_id: &str) -> Option<f64> {
        self.entities.borrow().get(entity_id)?.first_derivative
    }

    pub fn second_derivative(&self, entity_id: &str) -> Option<f64> {
        self.entities.borrow().get(entity_id)?.second_derivative
    }

    fn publish(&self, entity_id: &str, value: Option<f64>) {
        let Some(value) = value else {
            return;
        };
        if let Err(e) = self.host.set_state(entity_id, &value.to_string(), None) {
            warn!("Failed to publish {}: {}", entity_id, e);
        }
    }

    fn schedule(&self, entity_id: &str, delay: Duration) {
        let job = Job::Sample {
            entity: entity_id.to_string(),
        };
        if let Err(e) = self.host.run_in(delay, job) {
            error!("Failed to schedule sampling of {}: {}", entity_id, e);
        }
    }
}
