//! Opaque data-binding values.
//!
//! Items held by a [`crate::LiveArray`] and payloads exchanged with the
//! host are JSON-shaped trees. `serde_json::Value` models the full tagged
//! union (scalar / string / map / array) without requiring deep equality.

pub use serde_json::Value;

/// Reads a value as a signed list index.
///
/// Hosts routinely serialize indices as floating point numbers, so an
/// integral float is accepted alongside a plain integer.
pub fn as_index(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < (i64::MAX as f64))
                    .map(|f| f as i64)
            }
        }
        _ => None,
    }
}
