//! Fault entity annotations
//!
//! String attributes hold comma-joined lists of distinct values. A SET adds
//! values, a CLEAR removes them again but never deletes the key.

use serde_json::Value;

use host::Attributes;

use crate::{FaultState, Info};

const SEPARATOR: &str = ", ";

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() || s == "None",
        _ => false,
    }
}

/// Merge `info` into the current attributes of a fault entity.
///
/// Returns `None` when there is nothing to merge. Without a current snapshot a
/// SET passes `info` through and a CLEAR yields an empty map.
pub fn merge_annotations(
    current: Option<&Attributes>,
    info: &Info,
    state: FaultState,
) -> Option<Attributes> {
    if info.is_empty() {
        return None;
    }

    let Some(current) = current else {
        return Some(match state {
            FaultState::Set => info
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
            _ => Attributes::new(),
        });
    };

    let mut merged = current.clone();
    match state {
        FaultState::Set => {
            for (key, value) in info {
                match current.get(key) {
                    Some(existing) if !is_blank(existing) => {
                        if let Value::String(list) = existing {
                            if !list.split(SEPARATOR).any(|item| item == value) {
                                merged.insert(
                                    key.clone(),
                                    Value::String(format!("{}{}{}", list, SEPARATOR, value)),
                                );
                            }
                        }
                    }
                    _ => {
                        merged.insert(key.clone(), Value::String(value.clone()));
                    }
                }
            }
        }
        FaultState::Cleared => {
            for (key, value) in info {
                let remaining = match current.get(key) {
                    Some(Value::String(list)) if list.contains(SEPARATOR) => list
                        .split(SEPARATOR)
                        .filter(|item| item != value)
                        .collect::<Vec<_>>()
                        .join(SEPARATOR),
                    _ => String::new(),
                };
                merged.insert(key.clone(), Value::String(remaining));
            }
        }
        FaultState::NotTested => return None,
    }
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn info(pairs: &[(&str, &str)]) -> Info {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn test_no_snapshot() {
        let location = info(&[("Location", "Office")]);
        assert_eq!(
            merge_annotations(None, &location, FaultState::Set),
            Some(attrs(&[("Location", "Office")]))
        );
        assert_eq!(
            merge_annotations(None, &location, FaultState::Cleared),
            Some(Attributes::new())
        );
        assert_eq!(merge_annotations(None, &Info::new(), FaultState::Set), None);
    }

    #[test]
    fn test_set_then_clear_leaves_empty_marker() {
        let location = info(&[("Location", "Office")]);
        let set = merge_annotations(Some(&Attributes::new()), &location, FaultState::Set).unwrap();
        assert_eq!(set, attrs(&[("Location", "Office")]));

        let cleared = merge_annotations(Some(&set), &location, FaultState::Cleared).unwrap();
        assert_eq!(cleared, attrs(&[("Location", "")]));
    }

    #[test]
    fn test_union_and_subtract() {
        let kitchen = attrs(&[("Location", "Kitchen"), ("friendly_name", "Fault")]);
        let office = info(&[("Location", "Office")]);

        let set = merge_annotations(Some(&kitchen), &office, FaultState::Set).unwrap();
        assert_eq!(set["Location"], "Kitchen, Office");
        assert_eq!(set["friendly_name"], "Fault");

        // Re-adding is a no-op
        let again = merge_annotations(Some(&set), &office, FaultState::Set).unwrap();
        assert_eq!(again["Location"], "Kitchen, Office");

        let cleared = merge_annotations(Some(&set), &office, FaultState::Cleared).unwrap();
        assert_eq!(cleared["Location"], "Kitchen");
    }

    #[test]
    fn test_blank_values_are_replaced() {
        let current = attrs(&[("Location", ""), ("Room", "None")]);
        let merged = merge_annotations(
            Some(&current),
            &info(&[("Location", "Hall"), ("Room", "2")]),
            FaultState::Set,
        )
        .unwrap();
        assert_eq!(merged, attrs(&[("Location", "Hall"), ("Room", "2")]));
    }

    #[test]
    fn test_clear_missing_key_adds_marker() {
        let merged = merge_annotations(
            Some(&Attributes::new()),
            &info(&[("Location", "Hall")]),
            FaultState::Cleared,
        )
        .unwrap();
        assert_eq!(merged, attrs(&[("Location", "")]));
    }

    #[test]
    fn test_non_string_value_kept_on_set() {
        let mut current = Attributes::new();
        current.insert("count".to_string(), Value::from(3));
        let merged =
            merge_annotations(Some(&current), &info(&[("count", "4")]), FaultState::Set).unwrap();
        assert_eq!(merged["count"], 3);
    }

    proptest! {
        #[test]
        fn test_set_clear_round_trip(
            existing in proptest::collection::btree_set("[A-Z][a-z]{1,8}", 1..5),
            added in "[A-Z][a-z]{1,8}",
        ) {
            prop_assume!(!existing.contains(&added));
            let joined = existing.iter().cloned().collect::<Vec<_>>().join(", ");
            let current = attrs(&[("Location", joined.as_str())]);
            let location = info(&[("Location", added.as_str())]);

            let set = merge_annotations(Some(&current), &location, FaultState::Set).unwrap();
            let cleared = merge_annotations(Some(&set), &location, FaultState::Cleared).unwrap();
            prop_assert_eq!(&cleared["Location"], &Value::String(joined));
        }
    }
}
