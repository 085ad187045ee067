//! Per-document registry of dynamic list sources.
//!
//! The registry owns every provider of one document, routes host
//! payloads to them by `listId`, and holds the shared correlation-token
//! counter, pending error list, and fetch-request event queue. A
//! `listId` is unique within a document; the same id in another document
//! is a different registry and therefore legal.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Map;

use marquee_core::collections::HashMap;
use marquee_core::{DataManager, LiveArrayObjectPtr, SchedulerPtr, Value};

use crate::config::DynamicListConfiguration;
use crate::error::{ErrorReason, ErrorSink, SourceError};
use crate::events::{EventQueue, FetchRequestEvent};
use crate::fetch::FIRST_CORRELATION_TOKEN;
use crate::index_provider::IndexProvider;
use crate::token_provider::TokenProvider;
use crate::{DYNAMIC_INDEX_LIST, DYNAMIC_TOKEN_LIST};

/// The two provider kinds share a capability surface, not a hierarchy.
#[derive(Clone)]
pub enum Provider {
    Index(Rc<IndexProvider>),
    Token(Rc<TokenProvider>),
}

impl Provider {
    pub fn list_id(&self) -> &str {
        match self {
            Provider::Index(p) => p.list_id(),
            Provider::Token(p) => p.list_id(),
        }
    }

    pub fn ensure(&self, index: i64) {
        match self {
            Provider::Index(p) => p.ensure(index),
            Provider::Token(p) => p.ensure(index),
        }
    }

    pub fn serialize(&self) -> Value {
        match self {
            Provider::Index(p) => p.serialize(),
            Provider::Token(p) => p.serialize(),
        }
    }

    pub fn array_object(&self) -> LiveArrayObjectPtr {
        match self {
            Provider::Index(p) => p.array_object(),
            Provider::Token(p) => p.array_object(),
        }
    }

    pub fn is_paginating(&self) -> bool {
        match self {
            Provider::Index(p) => p.is_paginating(),
            Provider::Token(p) => p.is_paginating(),
        }
    }

    fn process_response(&self, map: &Map<String, Value>) -> bool {
        match self {
            Provider::Index(p) => p.process_response(map),
            Provider::Token(p) => p.process_response(map),
        }
    }

    fn process_operations(&self, map: &Map<String, Value>) -> bool {
        match self {
            Provider::Index(p) => p.process_operations(map),
            Provider::Token(p) => p.process_operations(map),
        }
    }
}

pub struct DynamicSourceRegistry {
    config: DynamicListConfiguration,
    scheduler: SchedulerPtr,
    manager: Rc<DataManager>,
    events: EventQueue,
    errors: ErrorSink,
    tokens: Rc<Cell<u64>>,
    issued: Rc<RefCell<HashMap<u64, String>>>,
    providers: RefCell<HashMap<String, Provider>>,
}

impl DynamicSourceRegistry {
    pub fn new(
        config: DynamicListConfiguration,
        scheduler: SchedulerPtr,
        manager: Rc<DataManager>,
    ) -> Self {
        Self {
            config,
            scheduler,
            manager,
            events: EventQueue::new(),
            errors: ErrorSink::new(),
            tokens: Rc::new(Cell::new(FIRST_CORRELATION_TOKEN)),
            issued: Rc::new(RefCell::new(HashMap::default())),
            providers: RefCell::new(HashMap::default()),
        }
    }

    /// Builds an index-addressed source from construction metadata.
    /// Failures are recorded as pending errors and return `None`.
    pub fn create_index_source(&self, metadata: &Value) -> Option<Rc<IndexProvider>> {
        let list_id = self.admit_list_id(metadata)?;
        let result = IndexProvider::create(
            metadata,
            self.index_type(),
            self.config.clone(),
            self.scheduler.clone(),
            self.events.clone(),
            self.errors.clone(),
            self.tokens.clone(),
            self.issued.clone(),
            &self.manager,
        );
        match result {
            Ok(provider) => {
                self.providers
                    .borrow_mut()
                    .insert(list_id, Provider::Index(provider.clone()));
                Some(provider)
            }
            Err(error) => {
                self.errors.push(error);
                None
            }
        }
    }

    /// Builds a token-addressed source from construction metadata.
    pub fn create_token_source(&self, metadata: &Value) -> Option<Rc<TokenProvider>> {
        let list_id = self.admit_list_id(metadata)?;
        let result = TokenProvider::create(
            metadata,
            self.token_type(),
            self.config.clone(),
            self.scheduler.clone(),
            self.events.clone(),
            self.errors.clone(),
            self.tokens.clone(),
            self.issued.clone(),
            &self.manager,
        );
        match result {
            Ok(provider) => {
                self.providers
                    .borrow_mut()
                    .insert(list_id, Provider::Token(provider.clone()));
                Some(provider)
            }
            Err(error) => {
                self.errors.push(error);
                None
            }
        }
    }

    /// Routes a host payload (fetch response or CRUD batch) to the
    /// provider owning its `listId`. Returns whether it was accepted.
    pub fn process_update(&self, payload: &Value) -> bool {
        let Some(map) = payload.as_object() else {
            self.errors.push(SourceError::new(
                ErrorReason::InternalError,
                String::new(),
                "update payload is not an object",
            ));
            return false;
        };

        let list_id = match map.get("listId").and_then(Value::as_str) {
            Some(list_id) => list_id.to_string(),
            None => {
                self.errors.push(SourceError::new(
                    ErrorReason::InvalidListId,
                    String::new(),
                    "update payload without listId",
                ));
                return false;
            }
        };

        let provider = self.providers.borrow().get(&list_id).cloned();
        let Some(provider) = provider else {
            self.errors.push(SourceError::new(
                ErrorReason::InvalidListId,
                list_id,
                "unknown listId",
            ));
            return false;
        };

        if map.contains_key("operations") {
            provider.process_operations(map)
        } else {
            provider.process_response(map)
        }
    }

    /// Convenience wrapper accepting JSON text.
    pub fn process_update_str(&self, payload: &str) -> bool {
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => self.process_update(&value),
            Err(e) => {
                self.errors.push(SourceError::new(
                    ErrorReason::InternalError,
                    String::new(),
                    format!("unparsable payload: {e}"),
                ));
                false
            }
        }
    }

    pub fn get(&self, list_id: &str) -> Option<Provider> {
        self.providers.borrow().get(list_id).cloned()
    }

    /// Drains and returns the accumulated errors, oldest first.
    pub fn pending_errors(&self) -> Vec<SourceError> {
        self.errors.drain()
    }

    /// Drains errors into their host-facing array form.
    pub fn pending_errors_value(&self) -> Value {
        self.errors.drain_to_value()
    }

    pub fn has_pending_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_event(&self) -> bool {
        self.events.has_event()
    }

    pub fn pop_event(&self) -> Option<FetchRequestEvent> {
        self.events.pop_event()
    }

    pub fn event_queue(&self) -> EventQueue {
        self.events.clone()
    }

    /// Serializes every source for diagnostics, in creation-independent
    /// `listId` order.
    pub fn serialize(&self) -> Value {
        let mut entries: Vec<(String, Value)> = self
            .providers
            .borrow()
            .iter()
            .map(|(id, provider)| (id.clone(), provider.serialize()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Value::Array(entries.into_iter().map(|(_, v)| v).collect())
    }

    /// Drops every provider, cancelling outstanding requests and timers.
    /// Called at document teardown.
    pub fn detach_document(&self) {
        self.providers.borrow_mut().clear();
    }

    fn index_type(&self) -> String {
        self.config
            .source_type
            .clone()
            .unwrap_or_else(|| DYNAMIC_INDEX_LIST.to_string())
    }

    fn token_type(&self) -> String {
        self.config
            .source_type
            .clone()
            .unwrap_or_else(|| DYNAMIC_TOKEN_LIST.to_string())
    }

    /// Pulls the `listId` out of construction metadata and rejects
    /// duplicates within this document.
    fn admit_list_id(&self, metadata: &Value) -> Option<String> {
        let list_id = metadata
            .as_object()
            .and_then(|map| map.get("listId"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(list_id) = list_id else {
            self.errors.push(SourceError::new(
                ErrorReason::InternalError,
                String::new(),
                "source metadata without listId",
            ));
            return None;
        };
        if self.providers.borrow().contains_key(&list_id) {
            self.errors.push(SourceError::new(
                ErrorReason::InternalError,
                list_id,
                "listId already registered in this document",
            ));
            return None;
        }
        Some(list_id)
    }
}
