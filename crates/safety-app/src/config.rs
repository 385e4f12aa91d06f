//! Application configuration

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use fault_manager::Parameters;
use host::CommonEntitiesConfig;
use notification::NotificationConfig;

use crate::AppError;

/// Prefix of environment overrides, e.g. `SAFETY__RUNTIME__LOG_LEVEL`
const ENV_PREFIX: &str = "SAFETY";

/// One configured fault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Mechanism names able to set the fault
    pub related_sms: Vec<String>,
    pub level: u32,
}

/// Runtime tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Delay before an unsettled mechanism is evaluated again
    pub rerun_delay_secs: u64,
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rerun_delay_secs: 30,
            log_level: "info".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn rerun_delay(&self) -> Duration {
        Duration::from_secs(self.rerun_delay_secs)
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub faults: BTreeMap<String, FaultConfig>,
    /// Per component, a list of `{ <Location> = { parameters } }` maps
    pub safety_components: BTreeMap<String, Vec<BTreeMap<String, Parameters>>>,
    pub notification: NotificationConfig,
    pub common_entities: CommonEntitiesConfig,
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    /// Load from a TOML file with environment overrides
    pub fn load(path: &Path) -> Result<Self, AppError> {
        Self::build(Config::builder().add_source(File::from(path).format(FileFormat::Toml)))
    }

    /// Load from TOML text with environment overrides
    pub fn from_toml_str(toml: &str) -> Result<Self, AppError> {
        Self::build(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    fn build(builder: ConfigBuilder<config::builder::DefaultState>) -> Result<Self, AppError> {
        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Reject configurations the application cannot start with
    pub fn validate(&self) -> Result<(), AppError> {
        if self.faults.is_empty() {
            return Err(AppError::InvalidConfig("no faults configured".to_string()));
        }
        if self.safety_components.is_empty() {
            return Err(AppError::InvalidConfig(
                "no safety components configured".to_string(),
            ));
        }
        for (name, fault) in &self.faults {
            if fault.related_sms.is_empty() {
                return Err(AppError::InvalidConfig(format!(
                    "fault {} has no related safety mechanisms",
                    name
                )));
            }
        }
        Ok(())
    }
}
