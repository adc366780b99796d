//! Conflict detection
//!
//! Optimistic concurrency at whole-document granularity: a write conflicts
//! when the client's assumed prior state differs from what is stored.

use serde_json::Value;

use crate::models::WireDocument;

/// Whether a write must be rejected given the stored row (decoded) and the
/// state the client assumed.
///
/// Without an assumed state, or without a stored row, there is nothing to
/// compare against and the write goes through.
pub fn is_conflict(stored: Option<&WireDocument>, assumed: Option<&WireDocument>) -> bool {
    match (stored, assumed) {
        (Some(stored), Some(assumed)) => !documents_equal(stored, assumed),
        _ => false,
    }
}

/// Deep structural equality between two wire documents.
pub fn documents_equal(left: &WireDocument, right: &WireDocument) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .all(|(key, value)| right.get(key).is_some_and(|other| values_equal(value, other)))
}

/// Deep equality where object key order never matters and numbers compare
/// by value (`1 == 1.0`). Arrays stay ordered.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Object(left), Value::Object(right)) => documents_equal(left, right),
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .zip(right)
                    .all(|(left, right)| values_equal(left, right))
        }
        (Value::Number(left), Value::Number(right)) => {
            if let (Some(left), Some(right)) = (left.as_i64(), right.as_i64()) {
                return left == right;
            }
            if let (Some(left), Some(right)) = (left.as_u64(), right.as_u64()) {
                return left == right;
            }
            #[allow(clippy::float_cmp)]
            let equal = left.as_f64() == right.as_f64();
            equal
        }
        _ => left == right,
    }
}
