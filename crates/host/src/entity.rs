//! Entity state storage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::HostError;

/// Entity attributes as published by the runtime
pub type Attributes = Map<String, Value>;

/// Current state of one named entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// State value
    pub state: String,
    /// Attribute map
    pub attributes: Attributes,
    /// When the state value last changed
    pub last_changed: DateTime<Utc>,
}

impl EntityState {
    /// Create a state stamped with the current time
    pub fn new(state: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            state: state.into(),
            attributes,
            last_changed: Utc::now(),
        }
    }
}

/// Read/write access to named entities
pub trait EntityStore {
    /// Current state of an entity, `None` when it does not exist
    fn get_state(&self, entity_id: &str) -> Option<EntityState>;

    /// Write the state of an entity.
    ///
    /// `None` attributes keep whatever attributes the entity already carries.
    fn set_state(
        &self,
        entity_id: &str,
        state: &str,
        attributes: Option<Attributes>,
    ) -> Result<(), HostError>;
}

/// Read an entity state as a number, `None` when missing or not numeric
pub fn numeric_state<S: EntityStore + ?Sized>(store: &S, entity_id: &str) -> Option<f64> {
    let entity = store.get_state(entity_id)?;
    match entity.state.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        _ => {
            tracing::warn!("Entity {} has non-numeric state '{}'", entity_id, entity.state);
            None
        }
    }
}
