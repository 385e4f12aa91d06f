//! Fault and symptom registry

use std::collections::BTreeMap;

use tracing::error;

use crate::{Fault, FaultError, FaultState, Symptom};

/// Every fault and symptom of a run, keyed by name
#[derive(Debug, Clone, Default)]
pub struct FaultRegistry {
    pub faults: BTreeMap<String, Fault>,
    pub symptoms: BTreeMap<String, Symptom>,
}

impl FaultRegistry {
    pub fn new(symptoms: BTreeMap<String, Symptom>, faults: BTreeMap<String, Fault>) -> Self {
        Self { faults, symptoms }
    }

    pub fn symptom(&self, symptom_id: &str) -> Result<&Symptom, FaultError> {
        self.symptoms
            .get(symptom_id)
            .ok_or_else(|| FaultError::UnknownSymptom(symptom_id.to_string()))
    }

    pub fn symptom_mut(&mut self, symptom_id: &str) -> Result<&mut Symptom, FaultError> {
        self.symptoms
            .get_mut(symptom_id)
            .ok_or_else(|| FaultError::UnknownSymptom(symptom_id.to_string()))
    }

    pub fn fault_mut(&mut self, fault_id: &str) -> Result<&mut Fault, FaultError> {
        self.faults
            .get_mut(fault_id)
            .ok_or_else(|| FaultError::UnknownFault(fault_id.to_string()))
    }

    /// The single fault listing `sm_name`
    pub fn mapped_fault(&self, sm_name: &str) -> Result<&Fault, FaultError> {
        let mut matching = self
            .faults
            .values()
            .filter(|fault| fault.related_symptoms.iter().any(|sm| sm == sm_name));

        match (matching.next(), matching.count()) {
            (Some(fault), 0) => Ok(fault),
            (Some(_), more) => Err(FaultError::AmbiguousMechanism {
                sm_name: sm_name.to_string(),
                count: more + 1,
            }),
            (None, _) => Err(FaultError::UnmappedMechanism(sm_name.to_string())),
        }
    }

    /// Like [`FaultRegistry::mapped_fault`], logging configuration errors
    pub fn found_mapped_fault(&self, symptom_id: &str, sm_name: &str) -> Option<&Fault> {
        match self.mapped_fault(sm_name) {
            Ok(fault) => Some(fault),
            Err(e) => {
                error!("Configuration error for symptom '{}': {}", symptom_id, e);
                None
            }
        }
    }

    /// Whether any symptom of the mechanism is still SET
    pub fn any_symptom_set(&self, sm_name: &str) -> bool {
        self.symptoms
            .values()
            .any(|s| s.sm_name == sm_name && s.state == FaultState::Set)
    }

    /// Highest level over SET faults, 0 when none
    pub fn system_fault_level(&self) -> u32 {
        self.faults
            .values()
            .filter(|f| f.state == FaultState::Set)
            .map(|f| f.level)
            .max()
            .unwrap_or(0)
    }

    pub fn set_fault_count(&self) -> usize {
        self.faults
            .values()
            .filter(|f| f.state == FaultState::Set)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Parameters;

    fn registry(faults: Vec<Fault>) -> FaultRegistry {
        let symptoms = [Symptom::new("A", "sm_a", "Comp", Parameters::new())]
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();
        FaultRegistry::new(
            symptoms,
            faults.into_iter().map(|f| (f.name.clone(), f)).collect(),
        )
    }

    #[test]
    fn test_mapped_fault_unique() {
        let reg = registry(vec![
            Fault::new("F1", vec!["sm_a".to_string()], 2),
            Fault::new("F2", vec!["sm_b".to_string()], 3),
        ]);
        assert_eq!(reg.found_mapped_fault("A", "sm_a").unwrap().name, "F1");
    }

    #[test]
    fn test_mapped_fault_ambiguous_or_missing() {
        let reg = registry(vec![
            Fault::new("F1", vec!["sm_a".to_string()], 2),
            Fault::new("F2", vec!["sm_a".to_string()], 3),
        ]);
        assert!(reg.found_mapped_fault("A", "sm_a").is_none());
        assert!(matches!(
            reg.mapped_fault("sm_a"),
            Err(FaultError::AmbiguousMechanism { count: 2, .. })
        ));
        assert!(matches!(
            reg.mapped_fault("sm_x"),
            Err(FaultError::UnmappedMechanism(_))
        ));
    }

    #[test]
    fn test_system_level() {
        let mut reg = registry(vec![
            Fault::new("F1", vec!["sm_a".to_string()], 2),
            Fault::new("F2", vec!["sm_b".to_string()], 3),
        ]);
        assert_eq!(reg.system_fault_level(), 0);
        reg.fault_mut("F1").unwrap().state = FaultState::Set;
        assert_eq!(reg.system_fault_level(), 2);
        reg.fault_mut("F2").unwrap().state = FaultState::Set;
        assert_eq!(reg.system_fault_level(), 3);
        assert_eq!(reg.set_fault_count(), 2);
    }
}
