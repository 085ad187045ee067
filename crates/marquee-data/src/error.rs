//! Wire-level error accumulation.
//!
//! Data-source errors are values, not control flow: a provider appends
//! them to the shared [`ErrorSink`] and the host drains them on query.
//! Only a subset of reasons quarantines the provider; the trigger sites
//! decide that, the sink just records.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;

use marquee_core::Value;

/// Wire constants reported to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorReason {
    InternalError,
    InvalidListId,
    InconsistentListId,
    MissingListItems,
    LoadIndexOutOfRange,
    OccupiedListIndex,
    InconsistentRange,
    LoadTimeout,
    DuplicateListVersion,
    MissingListVersion,
    MissingListVersionInSendData,
    ListIndexOutOfRange,
    InvalidOperation,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::InternalError => "INTERNAL_ERROR",
            ErrorReason::InvalidListId => "INVALID_LIST_ID",
            ErrorReason::InconsistentListId => "INCONSISTENT_LIST_ID",
            ErrorReason::MissingListItems => "MISSING_LIST_ITEMS",
            ErrorReason::LoadIndexOutOfRange => "LOAD_INDEX_OUT_OF_RANGE",
            ErrorReason::OccupiedListIndex => "OCCUPIED_LIST_INDEX",
            ErrorReason::InconsistentRange => "INCONSISTENT_RANGE",
            ErrorReason::LoadTimeout => "LOAD_TIMEOUT",
            ErrorReason::DuplicateListVersion => "DUPLICATE_LIST_VERSION",
            ErrorReason::MissingListVersion => "MISSING_LIST_VERSION",
            ErrorReason::MissingListVersionInSendData => "MISSING_LIST_VERSION_IN_SEND_DATA",
            ErrorReason::ListIndexOutOfRange => "LIST_INDEX_OUT_OF_RANGE",
            ErrorReason::InvalidOperation => "INVALID_OPERATION",
        }
    }
}

/// One recorded error, queryable by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceError {
    pub reason: ErrorReason,
    pub list_id: String,
    pub operation_index: Option<usize>,
    pub message: String,
}

impl SourceError {
    pub fn new(reason: ErrorReason, list_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason,
            list_id: list_id.into(),
            operation_index: None,
            message: message.into(),
        }
    }

    pub fn with_operation_index(mut self, index: usize) -> Self {
        self.operation_index = Some(index);
        self
    }

    /// Serializes to the host-facing error object.
    pub fn to_value(&self) -> Value {
        let mut object = json!({
            "reason": self.reason.as_str(),
            "listId": self.list_id,
            "message": self.message,
        });
        if let Some(index) = self.operation_index {
            object["operationIndex"] = json!(index);
        }
        object
    }
}

/// Shared pending-error list for one document's registry.
#[derive(Clone, Default)]
pub struct ErrorSink {
    errors: Rc<RefCell<Vec<SourceError>>>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, error: SourceError) {
        log::warn!(
            "data source error {} list={} {}",
            error.reason.as_str(),
            error.list_id,
            error.message
        );
        self.errors.borrow_mut().push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.borrow().len()
    }

    /// Removes and returns every pending error, oldest first.
    pub fn drain(&self) -> Vec<SourceError> {
        self.errors.borrow_mut().drain(..).collect()
    }

    /// Drains into the host-facing array representation.
    pub fn drain_to_value(&self) -> Value {
        Value::Array(self.drain().iter().map(SourceError::to_value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_empties_sink() {
        let sink = ErrorSink::new();
        sink.push(SourceError::new(ErrorReason::LoadTimeout, "list", "request 101"));
        sink.push(SourceError::new(ErrorReason::InternalError, "list", "gave up"));
        assert_eq!(sink.len(), 2);
        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].reason, ErrorReason::LoadTimeout);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_drain_to_value_shapes_the_host_array() {
        let sink = ErrorSink::new();
        sink.push(SourceError::new(ErrorReason::MissingListItems, "list", "empty page"));
        let value = sink.drain_to_value();
        assert_eq!(value[0]["reason"], "MISSING_LIST_ITEMS");
        assert!(sink.is_empty());
    }

    #[test]
    fn test_to_value_carries_reason() {
        let error = SourceError::new(ErrorReason::InvalidOperation, "list", "bad op")
            .with_operation_index(3);
        let value = error.to_value();
        assert_eq!(value["reason"], "INVALID_OPERATION");
        assert_eq!(value["listId"], "list");
        assert_eq!(value["operationIndex"], 3);
    }
}
