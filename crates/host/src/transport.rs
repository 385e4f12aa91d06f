//! Notification transport

use serde::{Deserialize, Serialize};

use crate::HostError;

/// Metadata attached to a push message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushData {
    pub persistent: bool,
    #[serde(rename = "clickAction")]
    pub click_action: String,
    /// De-duplication / replacement key on the receiving device
    pub tag: String,
    pub color: String,
    pub sticky: bool,
    pub notification_icon: String,
    #[serde(rename = "vibrationPattern", skip_serializing_if = "Option::is_none")]
    pub vibration_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<String>,
}

/// Structured push message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub message: String,
    pub data: PushData,
}

/// User-facing side effects
pub trait NotifyTransport {
    /// Send (or replace, by tag) a push message
    fn send_notification(&self, message: &PushMessage) -> Result<(), HostError>;

    /// Remove a previously sent message by tag
    fn clear_notification(&self, tag: &str) -> Result<(), HostError>;

    /// Trigger an alarm panel
    fn trigger_alarm(&self, entity_id: &str) -> Result<(), HostError>;

    /// Turn a light on with a named color
    fn set_light_color(&self, entity_id: &str, color: &str) -> Result<(), HostError>;
}
