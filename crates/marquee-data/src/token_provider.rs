//! Token-addressed dynamic list source.
//!
//! Items arrive as opaque pages chained by `nextPageToken` in each
//! direction. The provider keeps one token per side, fetches one page per
//! side at a time, and appends accepted pages onto the matching end of
//! its [`LiveArray`]. There is no CRUD machinery; mutation payloads are
//! rejected outright.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::{json, Map};

use marquee_core::collections::HashMap;
use marquee_core::{
    DataManager, LiveArray, LiveArrayObject, LiveArrayObjectPtr, LiveArrayPtr, SchedulerPtr, Value,
};

use crate::config::DynamicListConfiguration;
use crate::error::{ErrorReason, ErrorSink, SourceError};
use crate::events::{EventQueue, Locator};
use crate::fetch::{FetchCoordinator, Side};
use crate::payload;

/// Token fetches run one page per direction at a time.
const MAX_REQUESTS_PER_SIDE: usize = 1;

pub struct TokenProvider {
    list_id: String,
    source_type: String,
    config: DynamicListConfiguration,
    errors: ErrorSink,
    coordinator: Rc<FetchCoordinator>,
    array: LiveArrayPtr,
    object: RefCell<Option<LiveArrayObjectPtr>>,
    /// Identifier of the initially loaded page; never refetchable.
    initial_token: String,
    /// Next page on each side; `None` means that side is exhausted.
    forward_token: RefCell<Option<String>>,
    backward_token: RefCell<Option<String>>,
    /// Set once a forward page has been accepted, which retires the
    /// initial token as a valid response address.
    saw_forward_page: Cell<bool>,
    failed: Cell<bool>,
}

impl TokenProvider {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create(
        metadata: &Value,
        source_type: String,
        config: DynamicListConfiguration,
        scheduler: SchedulerPtr,
        events: EventQueue,
        errors: ErrorSink,
        tokens: Rc<Cell<u64>>,
        issued: Rc<RefCell<HashMap<u64, String>>>,
        manager: &Rc<DataManager>,
    ) -> Result<Rc<Self>, SourceError> {
        let internal = |message: String| {
            SourceError::new(ErrorReason::InternalError, String::new(), message)
        };

        let map = payload::object(metadata).map_err(|e| internal(e.to_string()))?;
        let declared_type =
            payload::required_str(map, "type").map_err(|e| internal(e.to_string()))?;
        if declared_type != source_type {
            return Err(internal(format!("unexpected source type `{declared_type}`")));
        }
        let list_id = payload::required_str(map, "listId")
            .map_err(|e| internal(e.to_string()))?
            .to_string();

        let with_list = |message: String| {
            SourceError::new(ErrorReason::InternalError, list_id.clone(), message)
        };

        let initial_token = payload::required_str(map, "pageToken")
            .map_err(|e| with_list(e.to_string()))?
            .to_string();
        let seed = payload::required_array(map, "items")
            .map_err(|e| with_list(e.to_string()))?;
        let forward = payload::optional_str(map, "forwardPageToken")
            .map_err(|e| with_list(e.to_string()))?
            .map(str::to_string);
        let backward = payload::optional_str(map, "backwardPageToken")
            .map_err(|e| with_list(e.to_string()))?
            .map(str::to_string);

        let array = LiveArray::create(seed.to_vec());
        let coordinator = FetchCoordinator::new(
            source_type.clone(),
            list_id.clone(),
            scheduler,
            events,
            errors.clone(),
            tokens,
            issued,
            config.fetch_timeout_ms,
            config.fetch_retries,
            MAX_REQUESTS_PER_SIDE,
        );

        let provider = Rc::new(Self {
            list_id,
            source_type,
            config,
            errors,
            coordinator,
            array: array.clone(),
            object: RefCell::new(None),
            initial_token,
            forward_token: RefCell::new(forward),
            backward_token: RefCell::new(backward),
            saw_forward_page: Cell::new(false),
            failed: Cell::new(false),
        });

        let object = LiveArrayObject::create(&array, manager);
        let weak = Rc::downgrade(&provider);
        object.set_ensure_hook(move |index| {
            if let Some(provider) = weak.upgrade() {
                provider.ensure(index);
            }
        });
        *provider.object.borrow_mut() = Some(object);

        provider.sync_fetches();
        Ok(provider)
    }

    pub fn list_id(&self) -> &str {
        &self.list_id
    }

    pub fn live_array(&self) -> LiveArrayPtr {
        self.array.clone()
    }

    pub fn array_object(&self) -> LiveArrayObjectPtr {
        self.object
            .borrow()
            .as_ref()
            .expect("provider is attached at construction")
            .clone()
    }

    pub fn is_failed(&self) -> bool {
        self.failed.get()
    }

    pub fn is_paginating(&self) -> bool {
        self.coordinator.outstanding_count() > 0
    }

    /// Diagnostic snapshot of the source state. Exhausted sides serialize
    /// as empty strings.
    pub fn serialize(&self) -> Value {
        json!({
            "type": self.source_type,
            "listId": self.list_id,
            "backwardPageToken": self.backward_token.borrow().clone().unwrap_or_default(),
            "forwardPageToken": self.forward_token.borrow().clone().unwrap_or_default(),
        })
    }

    /// View hint: fetch the next page on whichever side `data_index`
    /// approaches.
    pub fn ensure(&self, data_index: i64) {
        if self.failed.get() {
            return;
        }
        let size = self.array.size() as i64;
        let buffer = self.config.list_update_buffer_size;
        if data_index - buffer <= 0 {
            self.request_side(Side::Backward);
        }
        if data_index + buffer >= size {
            self.request_side(Side::Forward);
        }
    }

    /// Accepts a page response routed here by the registry.
    pub(crate) fn process_response(&self, map: &Map<String, Value>) -> bool {
        if self.failed.get() {
            self.push_error(ErrorReason::InternalError, "list failed; update rejected");
            return false;
        }

        let token = match payload::optional_correlation_token(map, "correlationToken") {
            Ok(token) => token,
            Err(e) => {
                self.push_error(ErrorReason::InternalError, &e.to_string());
                return false;
            }
        };

        let mut acked = None;
        if let Some(token) = token {
            match self.coordinator.acknowledge(token) {
                Some(a) => acked = Some(a),
                None => match self.coordinator.issued_for(token) {
                    Some(owner) if owner != self.list_id => {
                        self.push_error(
                            ErrorReason::InconsistentListId,
                            &format!("correlation token {token} belongs to list {owner}"),
                        );
                    }
                    _ => {
                        self.push_error(
                            ErrorReason::InternalError,
                            &format!("unknown correlation token {token}"),
                        );
                        return false;
                    }
                },
            }
        }

        let page_token = match payload::required_str(map, "pageToken") {
            Ok(token) => token.to_string(),
            Err(e) => {
                self.push_error(ErrorReason::InternalError, &e.to_string());
                return false;
            }
        };

        let Some(side) = self.side_for_page(&page_token) else {
            self.push_error(
                ErrorReason::InvalidListId,
                &format!("page token `{page_token}` does not match either chain"),
            );
            return false;
        };

        // Unsolicited (or carrying another list's token) responses
        // settle the request for the same page, if one is in flight.
        if acked.is_none() {
            self.coordinator
                .acknowledge_overlapping(&Locator::Page { token: page_token.clone() });
        }

        let items = match payload::required_array(map, "items") {
            Ok(items) if !items.is_empty() => items.to_vec(),
            _ => {
                self.push_error(ErrorReason::MissingListItems, "page carried no items");
                if let Some(acked) = acked {
                    self.coordinator.retry(acked);
                }
                return false;
            }
        };

        let next_token = match payload::optional_str(map, "nextPageToken") {
            Ok(token) => token.map(str::to_string),
            Err(e) => {
                self.push_error(ErrorReason::InternalError, &e.to_string());
                return false;
            }
        };

        match side {
            Side::Forward => {
                self.array.push_back_range(items);
                *self.forward_token.borrow_mut() = next_token;
                self.saw_forward_page.set(true);
            }
            Side::Backward => {
                // Backward pages keep their in-page order at the front.
                self.array.insert_range(0, items);
                *self.backward_token.borrow_mut() = next_token;
            }
        }

        // Chains continue when the view approaches an edge (`ensure`),
        // not eagerly on acceptance; the host decides page cadence.
        true
    }

    /// Token lists accept no mutations; any CRUD payload is rejected
    /// without quarantining the provider.
    pub(crate) fn process_operations(&self, _map: &Map<String, Value>) -> bool {
        self.push_error(
            ErrorReason::InvalidOperation,
            "token lists do not accept operations",
        );
        false
    }

    /// Issues a fetch for each side that has a token and no page in
    /// flight.
    pub(crate) fn sync_fetches(&self) {
        if self.failed.get() {
            return;
        }
        self.request_side(Side::Forward);
        self.request_side(Side::Backward);
    }

    fn request_side(&self, side: Side) {
        let token = match side {
            Side::Forward => self.forward_token.borrow().clone(),
            Side::Backward => self.backward_token.borrow().clone(),
        };
        if let Some(token) = token {
            self.coordinator.request(Locator::Page { token }, side);
        }
    }

    /// Matches a response's page token against the current chains. The
    /// initial token stays addressable while the forward chain is
    /// otherwise idle, for hosts that answer the construction metadata
    /// late; it can never be refetched once a forward page lands.
    fn side_for_page(&self, page_token: &str) -> Option<Side> {
        if self.forward_token.borrow().as_deref() == Some(page_token) {
            return Some(Side::Forward);
        }
        if self.backward_token.borrow().as_deref() == Some(page_token) {
            return Some(Side::Backward);
        }
        if page_token == self.initial_token
            && !self.saw_forward_page.get()
            && self.forward_token.borrow().is_none()
        {
            return Some(Side::Forward);
        }
        None
    }

    fn push_error(&self, reason: ErrorReason, message: &str) {
        self.errors
            .push(SourceError::new(reason, self.list_id.clone(), message));
    }
}
