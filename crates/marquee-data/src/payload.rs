//! Field extraction from host payload trees.
//!
//! Payloads arrive as JSON-shaped [`Value`] trees. These helpers pull
//! typed fields out and report what went wrong; callers translate a
//! [`PayloadError`] into the appropriate wire error reason.

use serde_json::Map;
use thiserror::Error;

use marquee_core::value::{as_index, Value};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not an object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` has the wrong type")]
    WrongType(&'static str),
}

pub fn object(payload: &Value) -> Result<&Map<String, Value>, PayloadError> {
    payload.as_object().ok_or(PayloadError::NotAnObject)
}

pub fn required_str<'a>(
    map: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, PayloadError> {
    match map.get(field) {
        None => Err(PayloadError::MissingField(field)),
        Some(value) => value.as_str().ok_or(PayloadError::WrongType(field)),
    }
}

pub fn optional_str<'a>(
    map: &'a Map<String, Value>,
    field: &'static str,
) -> Result<Option<&'a str>, PayloadError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or(PayloadError::WrongType(field)),
    }
}

pub fn required_index(map: &Map<String, Value>, field: &'static str) -> Result<i64, PayloadError> {
    match map.get(field) {
        None => Err(PayloadError::MissingField(field)),
        Some(value) => as_index(value).ok_or(PayloadError::WrongType(field)),
    }
}

pub fn optional_index(
    map: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<i64>, PayloadError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => as_index(value).map(Some).ok_or(PayloadError::WrongType(field)),
    }
}

pub fn required_array<'a>(
    map: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a [Value], PayloadError> {
    match map.get(field) {
        None => Err(PayloadError::MissingField(field)),
        Some(value) => value
            .as_array()
            .map(Vec::as_slice)
            .ok_or(PayloadError::WrongType(field)),
    }
}

pub fn optional_array<'a>(
    map: &'a Map<String, Value>,
    field: &'static str,
) -> Result<Option<&'a [Value]>, PayloadError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_array()
            .map(Vec::as_slice)
            .map(Some)
            .ok_or(PayloadError::WrongType(field)),
    }
}

/// Correlation tokens are strings on the wire but numeric in origin;
/// accept both spellings.
pub fn optional_correlation_token(
    map: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<u64>, PayloadError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => text
            .parse::<u64>()
            .map(Some)
            .map_err(|_| PayloadError::WrongType(field)),
        Some(value) => as_index(value)
            .filter(|i| *i >= 0)
            .map(|i| Some(i as u64))
            .ok_or(PayloadError::WrongType(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_fields() {
        let payload = json!({"listId": "abc", "startIndex": 10});
        let map = object(&payload).unwrap();
        assert_eq!(required_str(map, "listId"), Ok("abc"));
        assert_eq!(required_index(map, "startIndex"), Ok(10));
        assert_eq!(
            required_str(map, "pageToken"),
            Err(PayloadError::MissingField("pageToken"))
        );
        assert_eq!(
            required_index(map, "listId"),
            Err(PayloadError::WrongType("listId"))
        );
    }

    #[test]
    fn test_correlation_token_spellings() {
        let payload = json!({"a": "101", "b": 102, "c": true});
        let map = object(&payload).unwrap();
        assert_eq!(optional_correlation_token(map, "a"), Ok(Some(101)));
        assert_eq!(optional_correlation_token(map, "b"), Ok(Some(102)));
        assert_eq!(optional_correlation_token(map, "missing"), Ok(None));
        assert!(optional_correlation_token(map, "c").is_err());
    }

    #[test]
    fn test_null_counts_as_absent() {
        let payload = json!({"minimumInclusiveIndex": null});
        let map = object(&payload).unwrap();
        assert_eq!(optional_index(map, "minimumInclusiveIndex"), Ok(None));
    }

    #[test]
    fn test_non_object_payload() {
        assert_eq!(object(&json!([1, 2])).unwrap_err(), PayloadError::NotAnObject);
    }
}
