//! Entities shared by every safety component

use serde::{Deserialize, Serialize};

use crate::{numeric_state, EntityStore};

/// Configuration of the shared entities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonEntitiesConfig {
    /// Outside temperature sensor
    pub outside_temp: String,
}

/// Accessors for entities that are not owned by any single component
#[derive(Debug, Clone)]
pub struct CommonEntities {
    outside_temp_sensor: String,
}

impl CommonEntities {
    /// Create from configuration
    pub fn new(config: &CommonEntitiesConfig) -> Self {
        Self {
            outside_temp_sensor: config.outside_temp.clone(),
        }
    }

    /// Outside temperature sensor id
    pub fn outside_temp_sensor(&self) -> &str {
        &self.outside_temp_sensor
    }

    /// Current outside temperature, `None` when unavailable
    pub fn outside_temperature<S: EntityStore + ?Sized>(&self, store: &S) -> Option<f64> {
        if self.outside_temp_sensor.is_empty() {
            return None;
        }
        numeric_state(store, &self.outside_temp_sensor)
    }
}
