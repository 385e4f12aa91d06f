//! In-memory host runtime

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
    Attributes, EntityState, EntityStore, HostError, Job, ListenHandle, NotifyTransport,
    PushMessage, Scheduler, TimerHandle,
};

/// Outbound user-facing call recorded by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCall {
    Push(PushMessage),
    ClearTag(String),
    Alarm(String),
    Light { entity_id: String, color: String },
}

#[derive(Debug, Clone)]
struct Timer {
    handle: TimerHandle,
    due: Duration,
    job: Job,
}

#[derive(Debug, Clone)]
struct Listener {
    handle: ListenHandle,
    entity_id: String,
    job: Job,
}

/// Single-process host runtime with a virtual clock.
///
/// Listener callbacks are never run re-entrantly: jobs fired by entity changes
/// are queued and handed out by [`InMemoryHost::take_events`].
pub struct InMemoryHost {
    entities: Mutex<HashMap<String, EntityState>>,
    clock: Mutex<Duration>,
    timers: Mutex<Vec<Timer>>,
    listeners: Mutex<Vec<Listener>>,
    events: Mutex<VecDeque<Job>>,
    outbox: Mutex<Vec<OutboundCall>>,
    failing_entities: Mutex<HashSet<String>>,
    next_handle: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, HostError> {
    mutex.lock().map_err(|e| HostError::Lock(e.to_string()))
}

impl InMemoryHost {
    /// Create an empty host at virtual time zero
    pub fn new() -> Self {
        info!("Creating in-memory host runtime");
        Self {
            entities: Mutex::new(HashMap::new()),
            clock: Mutex::new(Duration::ZERO),
            timers: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            events: Mutex::new(VecDeque::new()),
            outbox: Mutex::new(Vec::new()),
            failing_entities: Mutex::new(HashSet::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    /// Apply an external state change (a sensor report), keeping attributes
    pub fn update_entity(&self, entity_id: &str, state: &str) -> Result<(), HostError> {
        self.write(entity_id, state, None)
    }

    fn write(
        &self,
        entity_id: &str,
        state: &str,
        attributes: Option<Attributes>,
    ) -> Result<(), HostError> {
        if lock(&self.failing_entities)?.contains(entity_id) {
            return Err(HostError::WriteFailed {
                entity_id: entity_id.to_string(),
                reason: "entity rejected write".to_string(),
            });
        }

        let changed = {
            let mut entities = lock(&self.entities)?;
            match entities.get_mut(entity_id) {
                Some(entity) => {
                    let changed = entity.state != state;
                    if changed {
                        entity.state = state.to_string();
                        entity.last_changed = Utc::now();
                    }
                    if let Some(attributes) = attributes {
                        entity.attributes = attributes;
                    }
                    changed
                }
                None => {
                    entities.insert(
                        entity_id.to_string(),
                        EntityState::new(state, attributes.unwrap_or_default()),
                    );
                    true
                }
            }
        };

        if changed {
            let fired: Vec<Job> = lock(&self.listeners)?
                .iter()
                .filter(|l| l.entity_id == entity_id)
                .map(|l| l.job.clone())
                .collect();
            if !fired.is_empty() {
                debug!("Entity {} changed, queueing {} listener(s)", entity_id, fired.len());
                lock(&self.events)?.extend(fired);
            }
        }
        Ok(())
    }

    /// Make every future write to `entity_id` fail
    pub fn fail_writes_to(&self, entity_id: &str) {
        if let Ok(mut failing) = lock(&self.failing_entities) {
            failing.insert(entity_id.to_string());
        }
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        lock(&self.clock).map(|c| *c).unwrap_or_default()
    }

    /// Advance the virtual clock and return the timers that came due, oldest first
    pub fn advance(&self, by: Duration) -> Vec<Job> {
        let now = match lock(&self.clock) {
            Ok(mut clock) => {
                *clock += by;
                *clock
            }
            Err(e) => {
                warn!("Clock unavailable: {}", e);
                return Vec::new();
            }
        };

        let mut timers = match lock(&self.timers) {
            Ok(timers) => timers,
            Err(e) => {
                warn!("Timers unavailable: {}", e);
                return Vec::new();
            }
        };

        let (mut due, pending): (Vec<Timer>, Vec<Timer>) =
            timers.drain(..).partition(|t| t.due <= now);
        *timers = pending;
        due.sort_by_key(|t| (t.due, t.handle));
        due.into_iter().map(|t| t.job).collect()
    }

    /// Drain jobs queued by entity changes
    pub fn take_events(&self) -> Vec<Job> {
        lock(&self.events)
            .map(|mut events| events.drain(..).collect())
            .unwrap_or_default()
    }

    /// Number of timers that have not fired yet
    pub fn pending_timers(&self) -> usize {
        lock(&self.timers).map(|t| t.len()).unwrap_or(0)
    }

    /// Jobs of the timers that have not fired yet
    pub fn pending_jobs(&self) -> Vec<Job> {
        lock(&self.timers)
            .map(|t| t.iter().map(|timer| timer.job.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of subscriptions on an entity
    pub fn listener_count(&self, entity_id: &str) -> usize {
        lock(&self.listeners)
            .map(|l| l.iter().filter(|l| l.entity_id == entity_id).count())
            .unwrap_or(0)
    }

    /// Every outbound call so far
    pub fn outbound(&self) -> Vec<OutboundCall> {
        lock(&self.outbox).map(|o| o.clone()).unwrap_or_default()
    }

    /// Push messages sent so far
    pub fn sent_notifications(&self) -> Vec<PushMessage> {
        self.outbound()
            .into_iter()
            .filter_map(|call| match call {
                OutboundCall::Push(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: OutboundCall) -> Result<(), HostError> {
        lock(&self.outbox)?.push(call);
        Ok(())
    }
}

impl Default for InMemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore for InMemoryHost {
    fn get_state(&self, entity_id: &str) -> Option<EntityState> {
        lock(&self.entities).ok()?.get(entity_id).cloned()
    }

    fn set_state(
        &self,
        entity_id: &str,
        state: &str,
        attributes: Option<Attributes>,
    ) -> Result<(), HostError> {
        self.write(entity_id, state, attributes)
    }
}

impl Scheduler for InMemoryHost {
    fn run_in(&self, delay: Duration, job: Job) -> Result<TimerHandle, HostError> {
        let handle = TimerHandle(self.next_handle());
        let due = *lock(&self.clock)? + delay;
        debug!("Scheduling {} in {:?}", job, delay);
        lock(&self.timers)?.push(Timer { handle, due, job });
        Ok(handle)
    }

    fn cancel_timer(&self, handle: TimerHandle) -> Result<(), HostError> {
        let mut timers = lock(&self.timers)?;
        let before = timers.len();
        timers.retain(|t| t.handle != handle);
        if timers.len() == before {
            return Err(HostError::UnknownHandle(handle.0));
        }
        Ok(())
    }

    fn listen_state(&self, entity_id: &str, job: Job) -> Result<ListenHandle, HostError> {
        let handle = ListenHandle(self.next_handle());
        lock(&self.listeners)?.push(Listener {
            handle,
            entity_id: entity_id.to_string(),
            job,
        });
        Ok(handle)
    }

    fn cancel_listen(&self, handle: ListenHandle) -> Result<(), HostError> {
        let mut listeners = lock(&self.listeners)?;
        let before = listeners.len();
        listeners.retain(|l| l.handle != handle);
        if listeners.len() == before {
            return Err(HostError::UnknownHandle(handle.0));
        }
        Ok(())
    }
}

impl NotifyTransport for InMemoryHost {
    fn send_notification(&self, message: &PushMessage) -> Result<(), HostError> {
        self.record(OutboundCall::Push(message.clone()))
    }

    fn clear_notification(&self, tag: &str) -> Result<(), HostError> {
        self.record(OutboundCall::ClearTag(tag.to_string()))
    }

    fn trigger_alarm(&self, entity_id: &str) -> Result<(), HostError> {
        self.record(OutboundCall::Alarm(entity_id.to_string()))
    }

    fn set_light_color(&self, entity_id: &str, color: &str) -> Result<(), HostError> {
        self.record(OutboundCall::Light {
            entity_id: entity_id.to_string(),
            color: color.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric_state;

    fn job(symptom: &str) -> Job {
        Job::RunMechanism {
            component: "TemperatureComponent".to_string(),
            symptom: symptom.to_string(),
        }
    }

    #[test]
    fn test_listener_fires_only_on_value_change() {
        let host = InMemoryHost::new();
        host.listen_state("sensor.kitchen", job("a")).unwrap();

        host.update_entity("sensor.kitchen", "20").unwrap();
        host.update_entity("sensor.kitchen", "20").unwrap();
        host.update_entity("sensor.kitchen", "21").unwrap();

        assert_eq!(host.take_events(), vec![job("a"), job("a")]);
        assert!(host.take_events().is_empty());
    }

    #[test]
    fn test_attributes_kept_when_not_given() {
        let host = InMemoryHost::new();
        let mut attributes = Attributes::new();
        attributes.insert("Location".to_string(), "Kitchen".into());
        host.set_state("sensor.fault_x", "Set", Some(attributes)).unwrap();
        host.update_entity("sensor.fault_x", "Cleared").unwrap();

        let state = host.get_state("sensor.fault_x").unwrap();
        assert_eq!(state.state, "Cleared");
        assert_eq!(state.attributes["Location"], "Kitchen");
    }

    #[test]
    fn test_timers_fire_in_order_and_cancel() {
        let host = InMemoryHost::new();
        let late = host.run_in(Duration::from_secs(30), job("late")).unwrap();
        host.run_in(Duration::from_secs(5), job("early")).unwrap();
        let cancelled = host.run_in(Duration::from_secs(10), job("cancelled")).unwrap();

        host.cancel_timer(cancelled).unwrap();
        assert!(host.cancel_timer(cancelled).is_err());

        assert_eq!(host.advance(Duration::from_secs(10)), vec![job("early")]);
        assert_eq!(host.pending_timers(), 1);
        assert_eq!(host.advance(Duration::from_secs(30)), vec![job("late")]);
        assert!(host.cancel_timer(late).is_err());
    }

    #[test]
    fn test_failing_writes() {
        let host = InMemoryHost::new();
        host.fail_writes_to("switch.window");
        assert!(host.set_state("switch.window", "on", None).is_err());
        assert!(host.get_state("switch.window").is_none());
    }

    #[test]
    fn test_numeric_state() {
        let host = InMemoryHost::new();
        host.update_entity("sensor.temp", "21.5").unwrap();
        host.update_entity("sensor.broken", "unavailable").unwrap();

        assert_eq!(numeric_state(&host, "sensor.temp"), Some(21.5));
        assert_eq!(numeric_state(&host, "sensor.broken"), None);
        assert_eq!(numeric_state(&host, "sensor.missing"), None);
    }

    #[test]
    fn test_outbound_recorded() {
        let host = InMemoryHost::new();
        host.trigger_alarm("alarm_control_panel.home").unwrap();
        host.set_light_color("light.hall", "red").unwrap();
        host.clear_notification("abc").unwrap();

        assert_eq!(
            host.outbound(),
            vec![
                OutboundCall::Alarm("alarm_control_panel.home".to_string()),
                OutboundCall::Light {
                    entity_id: "light.hall".to_string(),
                    color: "red".to_string()
                },
                OutboundCall::ClearTag("abc".to_string()),
            ]
        );
    }
}
