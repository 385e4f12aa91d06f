//! Severity levels

use serde::{Deserialize, Serialize};

use host::PushData;

/// Notification behavior of a fault level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationLevel {
    /// Alarm, red light and push
    Emergency,
    /// Yellow light and push
    Hazard,
    /// Push only
    Warning,
    /// Logged only
    Silent,
}

impl NotificationLevel {
    pub fn from_level(level: u32) -> Option<Self> {
        match level {
            1 => Some(NotificationLevel::Emergency),
            2 => Some(NotificationLevel::Hazard),
            3 => Some(NotificationLevel::Warning),
            4 => Some(NotificationLevel::Silent),
            _ => None,
        }
    }

    /// Push title, `None` for silent faults
    pub fn title(&self) -> Option<&'static str> {
        match self {
            NotificationLevel::Emergency => Some("Immediate Emergency!"),
            NotificationLevel::Hazard => Some("Hazard!"),
            NotificationLevel::Warning => Some("Warning!"),
            NotificationLevel::Silent => None,
        }
    }

    /// Light color driven on SET
    pub fn light_color(&self) -> Option<&'static str> {
        match self {
            NotificationLevel::Emergency => Some("red"),
            NotificationLevel::Hazard => Some("yellow"),
            _ => None,
        }
    }

    pub fn triggers_alarm(&self) -> bool {
        matches!(self, NotificationLevel::Emergency)
    }

    /// Push metadata, `None` for silent faults
    pub fn push_data(&self, tag: &str, click_action: &str) -> Option<PushData> {
        let (color, icon) = match self {
            NotificationLevel::Emergency => ("#FF0000", "mdi:exit-run"),
            NotificationLevel::Hazard => ("#FFA500", "mdi:hazard-lights"),
            NotificationLevel::Warning => ("#FFFF00", "mdi:home-alert"),
            NotificationLevel::Silent => return None,
        };
        let emergency = *self == NotificationLevel::Emergency;

        Some(PushData {
            persistent: true,
            click_action: click_action.to_string(),
            tag: tag.to_string(),
            color: color.to_string(),
            sticky: true,
            notification_icon: icon.to_string(),
            vibration_pattern: emergency.then(|| "100, 1000, 100, 1000, 100".to_string()),
            importance: emergency.then(|| "high".to_string()),
        })
    }
}
