//! Notification Dispatcher
//!
//! Maps fault severity to user-facing side effects and keeps one evolving
//! push message per incident tag.

mod dispatcher;
mod level;

pub use dispatcher::{compose_message, NotificationConfig, NotificationDispatcher};
pub use level::NotificationLevel;
