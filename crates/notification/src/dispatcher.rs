//! Notification Dispatcher Implementation

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use fault_manager::{FaultState, Info, NotifyInterface};
use host::{Host, PushMessage};

use crate::NotificationLevel;

/// Notification configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Indicator light driven on level 1 and 2 faults
    pub light_entity: String,
    /// Alarm panel triggered on level 1 faults
    pub alarm_entity: String,
    /// Page opened when the push message is tapped
    pub click_action: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            light_entity: String::new(),
            alarm_entity: String::new(),
            click_action: "/home-safety/home_safety_overview".to_string(),
        }
    }
}

/// Fault name plus one `key: value` line per info entry, `Location` excluded
pub fn compose_message(fault: &str, info: &Info) -> String {
    let mut message = format!("Fault: {}\n", fault);
    for (key, value) in info.iter().filter(|(key, _)| key.as_str() != "Location") {
        message.push_str(&format!("{}: {}\n", key, value));
    }
    message
}

/// Dispatches fault transitions to the notification transport
pub struct NotificationDispatcher {
    host: Arc<dyn Host>,
    config: NotificationConfig,
    /// Active push messages by incident tag
    active: RefCell<HashMap<String, PushMessage>>,
}

impl NotificationDispatcher {
    pub fn new(host: Arc<dyn Host>, config: NotificationConfig) -> Self {
        info!("Creating notification dispatcher with config: {:?}", config);
        Self {
            host,
            config,
            active: RefCell::new(HashMap::new()),
        }
    }

    /// Append remediation text to the active message of an incident and resend it
    pub fn append_recovery_message(&self, tag: &str, text: &str) {
        let updated = {
            let mut active = self.active.borrow_mut();
            match active.get_mut(tag) {
                Some(message) => {
                    message.message.push(' ');
                    message.message.push_str(text);
                    message.clone()
                }
                None => {
                    debug!("No active notification for tag {}, recovery message dropped", tag);
                    return;
                }
            }
        };
        self.send(&updated);
    }

    /// Active message registered under `tag`
    pub fn active_notification(&self, tag: &str) -> Option<PushMessage> {
        self.active.borrow().get(tag).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.active.borrow().len()
    }

    fn process_active_fault(&self, level: u32, message: String, tag: &str) {
        let Some(kind) = NotificationLevel::from_level(level) else {
            warn!("No notification configuration for level {}", level);
            return;
        };
        let (Some(title), Some(data)) = (kind.title(), kind.push_data(tag, &self.config.click_action))
        else {
            debug!("Level {} is silent, nothing sent", level);
            return;
        };

        let push = PushMessage {
            title: title.to_string(),
            message,
            data,
        };
        self.active.borrow_mut().insert(tag.to_string(), push.clone());
        self.send(&push);

        if kind.triggers_alarm() {
            self.trigger_alarm();
        }
        if let Some(color) = kind.light_color() {
            self.set_light(color);
        }
    }

    fn process_cleared_fault(&self, level: u32, tag: &str) {
        self.active.borrow_mut().remove(tag);
        if level == 4 {
            return;
        }
        match self.host.clear_notification(tag) {
            Ok(()) => debug!("Cleared notification (tag='{}')", tag),
            Err(e) => error!("Failed to clear notification {}: {}", tag, e),
        }
    }

    fn send(&self, push: &PushMessage) {
        if let Err(e) = self.host.send_notification(push) {
            error!("Failed to send notification {}: {}", push.data.tag, e);
        }
    }

    fn trigger_alarm(&self) {
        if self.config.alarm_entity.is_empty() {
            warn!("No alarm entity configured");
            return;
        }
        if let Err(e) = self.host.trigger_alarm(&self.config.alarm_entity) {
            error!("Failed to trigger {}: {}", self.config.alarm_entity, e);
        }
    }

    fn set_light(&self, color: &str) {
        if self.config.light_entity.is_empty() {
            warn!("No light entity configured");
            return;
        }
        if let Err(e) = self.host.set_light_color(&self.config.light_entity, color) {
            error!("Failed to set {} to {}: {}", self.config.light_entity, color, e);
        }
    }
}

impl NotifyInterface for NotificationDispatcher {
    fn notify(&self, fault: &str, level: u32, state: FaultState, info: &Info, tag: &str) {
        let location = info.get("Location").map(String::as_str).unwrap_or("Unknown Location");
        match state {
            FaultState::Set => {
                let message = compose_message(fault, info);
                debug!("Notification set for {} at {}: {:?}", fault, location, message);
                self.process_active_fault(level, message, tag);
            }
            FaultState::Cleared => {
                debug!("Notification cleared for {} at {}", fault, location);
                self.process_cleared_fault(level, tag);
            }
            FaultState::NotTested => warn!("Invalid fault status '{}' for {}", state, fault),
        }
    }
}
