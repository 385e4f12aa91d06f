//! Symmetric hysteresis debouncing

use serde::{Deserialize, Serialize};

/// Default number of consecutive agreeing samples needed to settle
pub const DEFAULT_DEBOUNCE_LIMIT: i32 = 2;

/// Outcome of one debounce step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebounceAction {
    /// Not settled yet
    NoAction,
    /// Detection is stable, the symptom must be set
    SymptomSet,
    /// Absence of detection is stable, the symptom must be cleared
    SymptomHealed,
}

/// Action plus the updated counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceResult {
    pub action: DebounceAction,
    pub counter: i32,
}

/// Per-mechanism debounce memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DebounceState {
    /// Counter in `[-limit, +limit]`
    pub counter: i32,
    /// The owning evaluator must be invoked again
    pub force: bool,
}

impl DebounceState {
    /// Create a state with the given counter and force flag
    pub fn new(counter: i32, force: bool) -> Self {
        Self { counter, force }
    }
}

/// Run one debounce step.
///
/// A detection moves the counter up, saturating at `limit`, and reports
/// [`DebounceAction::SymptomSet`] once the limit is reached. A missing
/// detection moves it down, saturating at `-limit`, and reports
/// [`DebounceAction::SymptomHealed`] once `-limit` is reached. Negative limits
/// are treated as zero.
pub fn debounce(counter: i32, detected: bool, limit: i32) -> DebounceResult {
    let limit = limit.max(0);

    if detected {
        let counter = counter.saturating_add(1).min(limit);
        let action = if counter >= limit {
            DebounceAction::SymptomSet
        } else {
            DebounceAction::NoAction
        };
        DebounceResult { action, counter }
    } else {
        let counter = counter.saturating_sub(1).max(-limit);
        let action = if counter <= -limit {
            DebounceAction::SymptomHealed
        } else {
            DebounceAction::NoAction
        };
        DebounceResult { action, counter }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_set_after_limit_samples() {
        let first = debounce(0, true, 2);
        assert_eq!(first.action, DebounceAction::NoAction);
        assert_eq!(first.counter, 1);

        let second = debounce(first.counter, true, 2);
        assert_eq!(second.action, DebounceAction::SymptomSet);
        assert_eq!(second.counter, 2);
    }

    #[test]
    fn test_healed_after_limit_samples() {
        let first = debounce(0, false, 2);
        assert_eq!(first.action, DebounceAction::NoAction);

        let second = debounce(first.counter, false, 2);
        assert_eq!(second.action, DebounceAction::SymptomHealed);
        assert_eq!(second.counter, -2);
    }

    #[test]
    fn test_counter_saturates() {
        let result = debounce(2, true, 2);
        assert_eq!(result.counter, 2);
        assert_eq!(result.action, DebounceAction::SymptomSet);

        let result = debounce(-2, false, 2);
        assert_eq!(result.counter, -2);
        assert_eq!(result.action, DebounceAction::SymptomHealed);
    }

    #[test]
    fn test_from_set_needs_full_swing_to_heal() {
        // From +2, healing takes four negative samples
        let mut counter = 2;
        let mut actions = Vec::new();
        for _ in 0..4 {
            let result = debounce(counter, false, 2);
            counter = result.counter;
            actions.push(result.action);
        }
        assert_eq!(
            actions,
            vec![
                DebounceAction::NoAction,
                DebounceAction::NoAction,
                DebounceAction::NoAction,
                DebounceAction::SymptomHealed,
            ]
        );
    }

    #[test]
    fn test_zero_limit_settles_immediately() {
        assert_eq!(debounce(0, true, 0).action, DebounceAction::SymptomSet);
        assert_eq!(debounce(0, false, 0).action, DebounceAction::SymptomHealed);
        assert_eq!(debounce(0, true, -3).counter, 0);
    }

    proptest! {
        #[test]
        fn test_counter_stays_bounded(
            limit in 0i32..10,
            samples in proptest::collection::vec(any::<bool>(), 0..200),
        ) {
            let mut counter = 0;
            for detected in samples {
                counter = debounce(counter, detected, limit).counter;
                prop_assert!(counter >= -limit && counter <= limit);
            }
        }

        #[test]
        fn test_single_opposite_sample_does_not_flip(
            limit in 2i32..10,
            magnitude in 2i32..10,
            positive in any::<bool>(),
        ) {
            let magnitude = magnitude.min(limit);
            let counter = if positive { magnitude } else { -magnitude };

            // One opposite sample from |counter| >= 2 never settles the other way
            let result = debounce(counter, !positive, limit);
            let flipped = if positive {
                result.action == DebounceAction::SymptomHealed
            } else {
                result.action == DebounceAction::SymptomSet
            };
            prop_assert!(!flipped);
        }
    }
}
