//! Home Safety Application
//!
//! Loads configuration, wires the fault-management core onto a host runtime
//! and routes fired callbacks to their owners.

mod app;
mod config;
mod error;
mod logging;

pub use app::{SafetyApp, HEALTH_ENTITY};
pub use config::{AppConfig, FaultConfig, RuntimeConfig};
pub use error::AppError;
pub use logging::{init_logging, parse_level};
