//! Provider-to-host fetch request events.
//!
//! Providers never perform I/O. They push a [`FetchRequestEvent`] onto the
//! document's [`EventQueue`] and the host drains the queue, performs the
//! transport work, and feeds the response back through the registry.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use serde_json::json;

use marquee_core::Value;

/// What a fetch request is asking for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Locator {
    /// An index window `[start, start + count)`.
    Window { start: i64, count: i64 },
    /// An opaque page.
    Page { token: String },
}

impl Locator {
    /// True when two window locators overlap. Page locators overlap only
    /// when equal.
    pub fn overlaps(&self, other: &Locator) -> bool {
        match (self, other) {
            (
                Locator::Window { start: a, count: n },
                Locator::Window { start: b, count: m },
            ) => a < &(b + m) && b < &(a + n),
            (Locator::Page { token: a }, Locator::Page { token: b }) => a == b,
            _ => false,
        }
    }
}

/// A single fetch request surfaced to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequestEvent {
    pub source_type: String,
    pub list_id: String,
    pub correlation_token: u64,
    pub locator: Locator,
}

impl FetchRequestEvent {
    /// The event name, one of the dynamic source-type tags.
    pub fn name(&self) -> &str {
        &self.source_type
    }

    /// The event value map handed to the host. The correlation token is a
    /// string on the wire.
    pub fn value(&self) -> Value {
        let mut value = json!({
            "listId": self.list_id,
            "correlationToken": self.correlation_token.to_string(),
        });
        match &self.locator {
            Locator::Window { start, count } => {
                value["startIndex"] = json!(start);
                value["count"] = json!(count);
            }
            Locator::Page { token } => {
                value["pageToken"] = json!(token);
            }
        }
        value
    }
}

/// Per-document queue of fetch requests, drained by the host.
#[derive(Clone, Default)]
pub struct EventQueue {
    events: Rc<RefCell<VecDeque<FetchRequestEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: FetchRequestEvent) {
        log::debug!(
            "fetch request {} list={} token={}",
            event.source_type,
            event.list_id,
            event.correlation_token
        );
        self.events.borrow_mut().push_back(event);
    }

    pub fn has_event(&self) -> bool {
        !self.events.borrow().is_empty()
    }

    pub fn pop_event(&self) -> Option<FetchRequestEvent> {
        self.events.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }
}
