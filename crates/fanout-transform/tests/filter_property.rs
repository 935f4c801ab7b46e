//! Property tests for the field filter processor.

use fanout_core::models::{FieldFilter, FilterId};
use fanout_transform::extract;
use proptest::prelude::*;
use serde_json::{Map, Value};

fn field_name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_]{0,15}"
}

fn payload_strategy() -> impl Strategy<Value = Map<String, Value>> {
    proptest::collection::btree_map(field_name(), "[ -~]{0,40}", 0..12).prop_map(|m| {
        m.into_iter().map(|(k, v)| (k, Value::String(v))).collect()
    })
}

fn filter_with(included: Vec<String>, excluded: Vec<String>) -> FieldFilter {
    FieldFilter {
        id: FilterId::new(),
        name: "prop".into(),
        included_fields: included,
        excluded_fields: excluded,
        sample_data: None,
    }
}

proptest! {
    #[test]
    fn no_filter_is_identity(payload in payload_strategy()) {
        let (out, matched) = extract(&payload, None);
        prop_assert_eq!(&out, &payload);
        prop_assert_eq!(matched, payload.len());
    }

    #[test]
    fn inclusion_yields_subset_in_filter_order(
        payload in payload_strategy(),
        included in proptest::collection::vec(field_name(), 0..6),
    ) {
        let filter = filter_with(included.clone(), vec![]);
        let (out, matched) = extract(&payload, Some(&filter));

        prop_assert_eq!(matched, out.len());
        for (key, value) in &out {
            prop_assert!(included.contains(key));
            prop_assert_eq!(Some(value), payload.get(key));
        }
        if !included.is_empty() {
            // Output order follows the include list, not the payload.
            let expected: Vec<&String> =
                included.iter().filter(|k| payload.contains_key(*k)).collect();
            let mut deduped: Vec<&String> = Vec::new();
            for key in expected {
                if !deduped.contains(&key) {
                    deduped.push(key);
                }
            }
            let actual: Vec<&String> = out.keys().collect();
            prop_assert_eq!(actual, deduped);
        }
    }

    #[test]
    fn exclusion_drops_only_named_fields(
        payload in payload_strategy(),
        excluded in proptest::collection::vec(field_name(), 0..6),
    ) {
        let filter = filter_with(vec![], excluded.clone());
        let (out, matched) = extract(&payload, Some(&filter));

        prop_assert_eq!(matched, out.len());
        for key in payload.keys() {
            if excluded.contains(key) {
                prop_assert!(!out.contains_key(key));
            } else {
                prop_assert_eq!(out.get(key), payload.get(key));
            }
        }
    }

    #[test]
    fn filtering_is_idempotent(
        payload in payload_strategy(),
        excluded in proptest::collection::vec(field_name(), 0..6),
    ) {
        let filter = filter_with(vec![], excluded);
        let (once, _) = extract(&payload, Some(&filter));
        let (twice, _) = extract(&once, Some(&filter));
        prop_assert_eq!(once, twice);
    }
}
