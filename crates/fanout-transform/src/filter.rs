//! Field filter processor.
//!
//! Restricts which top-level fields of a parsed payload are forwarded
//! to an integration. Lookup is flat; nested structures are treated as
//! opaque values.

use fanout_core::models::FieldFilter;
use serde_json::{Map, Value};

/// Applies a field filter to a parsed payload.
///
/// With no filter the payload passes through unchanged. A non-empty
/// include list copies exactly the named fields, in list order, and
/// silently skips names the payload lacks. An empty include list
/// copies every field except the excluded names, in payload order.
///
/// Returns the extracted fields and how many were copied.
pub fn extract(
    payload: &Map<String, Value>,
    filter: Option<&FieldFilter>,
) -> (Map<String, Value>, usize) {
    let Some(filter) = filter else {
        return (payload.clone(), payload.len());
    };

    let mut out = Map::new();
    if !filter.included_fields.is_empty() {
        for name in &filter.included_fields {
            if let Some(value) = payload.get(name) {
                out.insert(name.clone(), value.clone());
            }
        }
    } else {
        for (name, value) in payload {
            if !filter.excluded_fields.iter().any(|ex| ex == name) {
                out.insert(name.clone(), value.clone());
            }
        }
    }
    let matched = out.len();
    (out, matched)
}
