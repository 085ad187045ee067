//! Index-addressed dynamic list source.
//!
//! Items live inside a shrinking window `[min, max)`. The provider keeps
//! a sparse cache of fetched items, projects the contiguous block around
//! the seed anchor into its [`LiveArray`], lazily fetches chunks toward
//! the window edges, and applies host-pushed CRUD batches under strict
//! `listVersion` ordering with bounded out-of-order buffering.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use serde_json::{json, Map};

use marquee_core::collections::HashMap;
use marquee_core::{
    DataManager, LiveArray, LiveArrayObject, LiveArrayObjectPtr, LiveArrayPtr, Scheduler,
    SchedulerPtr, TimerId, Value,
};

use crate::bounds::Bounds;
use crate::config::DynamicListConfiguration;
use crate::error::{ErrorReason, ErrorSink, SourceError};
use crate::events::{EventQueue, Locator};
use crate::fetch::{FetchCoordinator, Side};
use crate::payload;

/// Index fetch requests run two-deep per side before deferring.
const MAX_REQUESTS_PER_SIDE: usize = 2;

pub struct IndexProvider {
    list_id: String,
    source_type: String,
    config: DynamicListConfiguration,
    scheduler: SchedulerPtr,
    errors: ErrorSink,
    coordinator: Rc<FetchCoordinator>,
    array: LiveArrayPtr,
    object: RefCell<Option<LiveArrayObjectPtr>>,
    bounds: Cell<Bounds>,
    /// Sparse item cache by absolute index. The contiguous block around
    /// `array_lo` is mirrored into the LiveArray; anything else is parked
    /// until the gap closes.
    items: RefCell<BTreeMap<i64, Value>>,
    /// Absolute index of LiveArray position 0; the anchor when empty.
    array_lo: Cell<i64>,
    next_version: Cell<u64>,
    pending_versions: RefCell<BTreeMap<u64, Vec<Value>>>,
    expiry_timer: Cell<Option<TimerId>>,
    failed: Cell<bool>,
    weak_self: RefCell<Weak<IndexProvider>>,
}

impl IndexProvider {
    /// Builds a provider from host metadata and subscribes it into the
    /// document. Construction errors surface as the returned
    /// [`SourceError`]; the registry records them.
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

        let start_index =
            payload::required_index(map, "startIndex").map_err(|e| with_list(e.to_string()))?;
        let declared_min = payload::optional_index(map, "minimumInclusiveIndex")
            .map_err(|e| with_list(e.to_string()))?;
        let declared_max = payload::optional_index(map, "maximumExclusiveIndex")
            .map_err(|e| with_list(e.to_string()))?;
        let seed = payload::optional_array(map, "items")
            .map_err(|e| with_list(e.to_string()))?
            .unwrap_or(&[]);

        let bounds = Bounds::new(declared_min, declared_max);
        if !bounds.is_empty() {
            if bounds.min() > start_index {
                return Err(with_list(format!(
                    "minimumInclusiveIndex {} is above startIndex {}",
                    bounds.min(),
                    start_index
                )));
            }
            if bounds.max() <= start_index {
                return Err(with_list(format!(
                    "maximumExclusiveIndex {} is at or below startIndex {}",
                    bounds.max(),
                    start_index
                )));
            }
        }

        let mut cache = BTreeMap::new();
        let mut projected = Vec::new();
        for (offset, item) in seed.iter().enumerate() {
            let index = start_index + offset as i64;
            if bounds.contains(index) {
                cache.insert(index, item.clone());
                projected.push(item.clone());
            } else {
                log::warn!("seed item at {index} outside bounds, dropped (list={list_id})");
            }
        }

        let array = LiveArray::create(projected);
        let coordinator = FetchCoordinator::new(
            source_type.clone(),
            list_id.clone(),
            scheduler.clone(),
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
            scheduler,
            errors,
            coordinator,
            array: array.clone(),
            object: RefCell::new(None),
            bounds: Cell::new(bounds),
            items: RefCell::new(cache),
            array_lo: Cell::new(start_index),
            next_version: Cell::new(1),
            pending_versions: RefCell::new(BTreeMap::new()),
            expiry_timer: Cell::new(None),
            failed: Cell::new(false),
            weak_self: RefCell::new(Weak::new()),
        });
        *provider.weak_self.borrow_mut() = Rc::downgrade(&provider);

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

    pub fn bounds(&self) -> Bounds {
        self.bounds.get()
    }

    pub fn is_failed(&self) -> bool {
        self.failed.get()
    }

    /// True while any fetch request is in flight.
    pub fn is_paginating(&self) -> bool {
        self.coordinator.outstanding_count() > 0
    }

    /// Diagnostic snapshot of the source state.
    pub fn serialize(&self) -> Value {
        json!({
            "type": self.source_type,
            "listId": self.list_id,
            "listVersion": self.next_version.get() - 1,
            "minimumInclusiveIndex": self.bounds.get().min(),
            "maximumExclusiveIndex": self.bounds.get().max(),
            "startIndex": self.projection_range().0,
        })
    }

    /// View hint: the item at `data_index` (a LiveArray position) is in
    /// use; fetch toward whichever window edge it approaches.
    pub fn ensure(&self, data_index: i64) {
        if self.failed.get() {
            return;
        }
        let (lo, hi) = self.projection_range();
        let absolute = lo + data_index;
        let buffer = self.config.list_update_buffer_size;
        if absolute - buffer < lo {
            self.request_backward();
        }
        if absolute + buffer >= hi {
            self.request_forward();
        }
    }

    /// Accepts a fetch response routed here by the registry. The registry
    /// has already verified the payload shape and `listId`.
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

        // An explicit token must match an outstanding request here, or at
        // least be recognizable as another provider's; anything else is a
        // late or fabricated response and is dropped.
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

        let start = match payload::required_index(map, "startIndex") {
            Ok(start) => start,
            Err(e) => {
                self.push_error(ErrorReason::InternalError, &e.to_string());
                return false;
            }
        };

        let items = match payload::required_array(map, "items") {
            Ok(items) if !items.is_empty() => items,
            _ => {
                self.push_error(ErrorReason::MissingListItems, "response carried no items");
                if let Some(acked) = acked {
                    self.coordinator.retry(acked);
                }
                return false;
            }
        };

        // Fetch responses may seed the version sequence before any CRUD
        // has been applied; afterwards the CRUD stream is authoritative.
        if let Ok(Some(version)) = payload::optional_index(map, "listVersion") {
            if version >= 0
                && self.next_version.get() == 1
                && self.pending_versions.borrow().is_empty()
            {
                self.next_version.set(version as u64 + 1);
            }
        }

        let declared_min = payload::optional_index(map, "minimumInclusiveIndex").unwrap_or(None);
        let declared_max = payload::optional_index(map, "maximumExclusiveIndex").unwrap_or(None);
        let mut bounds = self.bounds.get();
        let outcome = bounds.shrink_to(declared_min, declared_max);
        if outcome.widen_attempted {
            self.push_error(
                ErrorReason::InconsistentRange,
                "declared bounds would widen the current window",
            );
        }
        self.bounds.set(bounds);
        if outcome.narrowed {
            self.apply_bounds_shrink();
        }

        let bounds = self.bounds.get();
        let response_lo = start;
        let response_hi = start + items.len() as i64;
        let clip_lo = response_lo.max(bounds.min());
        let clip_hi = response_hi.min(bounds.max());
        if clip_lo > response_lo || clip_hi < response_hi {
            self.push_error(
                ErrorReason::LoadIndexOutOfRange,
                &format!("response [{response_lo}, {response_hi}) clipped to bounds"),
            );
        }
        if clip_hi <= clip_lo {
            return false;
        }

        if acked.is_none() {
            // Unsolicited (or carrying another list's token) but
            // coherent: credit the oldest outstanding request for the
            // same region.
            self.coordinator.acknowledge_overlapping(&Locator::Window {
                start: clip_lo,
                count: clip_hi - clip_lo,
            });
        }

        {
            let mut cache = self.items.borrow_mut();
            let (lo, hi) = self.projection_range();
            for index in clip_lo..clip_hi {
                let value = items[(index - response_lo) as usize].clone();
                if cache.insert(index, value.clone()).is_some() {
                    self.push_error(
                        ErrorReason::OccupiedListIndex,
                        &format!("index {index} was already cached; newer value wins"),
                    );
                    if index >= lo && index < hi {
                        self.array.update((index - lo) as usize, value);
                    }
                }
            }
        }

        self.splice_projection();
        self.sync_fetches();
        true
    }

    /// Accepts a CRUD payload routed here by the registry.
    pub(crate) fn process_operations(&self, map: &Map<String, Value>) -> bool {
        if self.failed.get() {
            self.push_error(ErrorReason::InternalError, "list failed; update rejected");
            return false;
        }

        let version = match payload::optional_index(map, "listVersion") {
            Ok(Some(version)) if version >= 0 => version as u64,
            _ => {
                self.push_error(
                    ErrorReason::MissingListVersionInSendData,
                    "CRUD payload without listVersion",
                );
                self.fail();
                return false;
            }
        };

        let operations = match payload::required_array(map, "operations") {
            Ok(operations) => operations.to_vec(),
            Err(e) => {
                self.push_error(ErrorReason::InvalidOperation, &e.to_string());
                self.fail();
                return false;
            }
        };

        let expected = self.next_version.get();
        if version < expected {
            self.push_error(
                ErrorReason::DuplicateListVersion,
                &format!("listVersion {version} already applied"),
            );
            self.fail();
            return false;
        }

        if version > expected {
            if self.pending_versions.borrow().contains_key(&version) {
                self.push_error(
                    ErrorReason::DuplicateListVersion,
                    &format!("listVersion {version} already buffered"),
                );
                self.fail();
                return false;
            }
            let lowest_buffered = self
                .pending_versions
                .borrow()
                .keys()
                .next()
                .copied();
            self.pending_versions.borrow_mut().insert(version, operations);
            match lowest_buffered {
                // First buffered version starts the expiry clock; a later
                // arrival restarts it only when it narrows the gap.
                None => self.restart_expiry_timer(),
                Some(lowest) if version < lowest => self.restart_expiry_timer(),
                Some(_) => {}
            }
            return true;
        }

        if !self.apply_batch(&operations) {
            return false;
        }
        self.next_version.set(expected + 1);
        self.drain_pending_versions();
        self.sync_fetches();
        true
    }

    fn apply_batch(&self, operations: &[Value]) -> bool {
        for (index, operation) in operations.iter().enumerate() {
            if let Err((reason, message)) = self.apply_operation(operation) {
                self.errors.push(
                    SourceError::new(reason, self.list_id.clone(), message)
                        .with_operation_index(index),
                );
                self.fail();
                return false;
            }
        }
        true
    }

    fn apply_operation(&self, operation: &Value) -> Result<(), (ErrorReason, String)> {
        let invalid = |message: String| (ErrorReason::InvalidOperation, message);

        let map = operation
            .as_object()
            .ok_or_else(|| invalid("operation is not an object".into()))?;
        let op_type =
            payload::required_str(map, "type").map_err(|e| invalid(e.to_string()))?;
        let index =
            payload::required_index(map, "index").map_err(|e| invalid(e.to_string()))?;

        match op_type {
            "InsertListItem" | "InsertItem" => {
                let item = map
                    .get("item")
                    .ok_or_else(|| invalid("insert without item".into()))?;
                self.insert_items(index, vec![item.clone()])
            }
            "InsertMultipleItems" => {
                let items = payload::required_array(map, "items")
                    .map_err(|e| invalid(e.to_string()))?;
                if items.is_empty() {
                    // Kept for wire compatibility: an empty multi-insert is
                    // reported as an internal error, not a bad operation.
                    return Err((
                        ErrorReason::InternalError,
                        "InsertMultipleItems with no items".into(),
                    ));
                }
                self.insert_items(index, items.to_vec())
            }
            "SetItem" | "ReplaceListItem" => {
                let item = map
                    .get("item")
                    .ok_or_else(|| invalid("set without item".into()))?;
                self.set_item(index, item.clone())
            }
            "DeleteListItem" | "DeleteItem" => self.delete_items(index, 1),
            "DeleteMultipleItems" => {
                let count = payload::required_index(map, "count")
                    .map_err(|e| invalid(e.to_string()))?;
                if count <= 0 {
                    return Err(invalid(format!("delete count {count} is not positive")));
                }
                self.delete_items(index, count)
            }
            other => Err(invalid(format!("unknown operation type `{other}`"))),
        }
    }

    fn insert_items(&self, at: i64, values: Vec<Value>) -> Result<(), (ErrorReason, String)> {
        let count = values.len() as i64;
        let mut bounds = self.bounds.get();
        let (lo, hi) = self.projection_range();
        let within = if self.array.size() == 0 {
            at == self.array_lo.get()
        } else {
            at >= lo && at <= hi
        };
        if !bounds.permits_insert(at) || !within {
            return Err((
                ErrorReason::ListIndexOutOfRange,
                format!("insert at {at} outside window or cached range"),
            ));
        }

        self.shift_keys_up(at, count);
        {
            let mut cache = self.items.borrow_mut();
            for (offset, value) in values.iter().enumerate() {
                cache.insert(at + offset as i64, value.clone());
            }
        }
        // CRUD is authoritative: inserting genuinely grows the window.
        bounds.extend_max(count);
        self.bounds.set(bounds);

        if self.array.size() == 0 {
            self.array_lo.set(at);
            self.array.insert_range(0, values);
        } else {
            self.array.insert_range((at - lo) as usize, values);
        }
        Ok(())
    }

    fn set_item(&self, at: i64, value: Value) -> Result<(), (ErrorReason, String)> {
        let bounds = self.bounds.get();
        let (lo, hi) = self.projection_range();
        if !bounds.contains(at) || at < lo || at >= hi {
            return Err((
                ErrorReason::ListIndexOutOfRange,
                format!("set at {at} outside window or cached range"),
            ));
        }
        self.items.borrow_mut().insert(at, value.clone());
        self.array.update((at - lo) as usize, value);
        Ok(())
    }

    fn delete_items(&self, at: i64, count: i64) -> Result<(), (ErrorReason, String)> {
        let mut bounds = self.bounds.get();
        let (lo, hi) = self.projection_range();
        let inside_bounds = at >= bounds.min() && at.saturating_add(count) <= bounds.max();
        if !inside_bounds || at < lo || at + count > hi {
            return Err((
                ErrorReason::ListIndexOutOfRange,
                format!("delete [{at}, {}) outside window or cached range", at + count),
            ));
        }

        {
            let mut cache = self.items.borrow_mut();
            for index in at..at + count {
                cache.remove(&index);
            }
        }
        self.shift_keys_down(at + count, count);
        bounds.contract_max(count);
        self.bounds.set(bounds);

        if self.array.size() as i64 == count {
            // Deleting the whole cache resets subscribers wholesale.
            self.array.clear();
        } else {
            self.array.remove((at - lo) as usize, count as usize);
        }
        Ok(())
    }

    fn drain_pending_versions(&self) {
        loop {
            let version = self.next_version.get();
            let operations = self.pending_versions.borrow_mut().remove(&version);
            match operations {
                Some(operations) => {
                    if !self.apply_batch(&operations) {
                        return;
                    }
                    self.next_version.set(version + 1);
                }
                None => break,
            }
        }
        if self.pending_versions.borrow().is_empty() {
            self.cancel_expiry_timer();
        } else {
            // The gap narrowed; the surviving buffer gets a fresh deadline.
            self.restart_expiry_timer();
        }
    }

    fn handle_expiry(&self) {
        self.expiry_timer.set(None);
        if self.pending_versions.borrow().is_empty() {
            return;
        }
        self.push_error(
            ErrorReason::MissingListVersion,
            "buffered list versions expired before the gap was filled",
        );
        self.pending_versions.borrow_mut().clear();
        self.fail();
    }

    fn restart_expiry_timer(&self) {
        self.cancel_expiry_timer();
        let weak = self.weak_self.borrow().clone();
        let id = self.scheduler.schedule(
            self.config.cache_expiry_timeout_ms,
            Box::new(move || {
                if let Some(provider) = weak.upgrade() {
                    provider.handle_expiry();
                }
            }),
        );
        self.expiry_timer.set(Some(id));
    }

    fn cancel_expiry_timer(&self) {
        if let Some(id) = self.expiry_timer.take() {
            self.scheduler.cancel(id);
        }
    }

    fn fail(&self) {
        self.failed.set(true);
        self.cancel_expiry_timer();
        self.coordinator.cancel_all();
    }

    /// Issues proactive fetches toward both window edges.
    pub(crate) fn sync_fetches(&self) {
        if self.failed.get() || self.bounds.get().is_empty() {
            return;
        }
        self.request_forward();
        self.request_backward();
    }

    fn request_forward(&self) {
        let bounds = self.bounds.get();
        let (_, hi) = self.projection_range();
        if hi >= bounds.max() {
            return;
        }
        // saturating: the far side may be the open sentinel
        let count = self.config.cache_chunk_size.min(bounds.max().saturating_sub(hi));
        self.coordinator
            .request(Locator::Window { start: hi, count }, Side::Forward);
    }

    fn request_backward(&self) {
        let bounds = self.bounds.get();
        let (lo, _) = self.projection_range();
        if lo <= bounds.min() {
            return;
        }
        let count = self.config.cache_chunk_size.min(lo.saturating_sub(bounds.min()));
        self.coordinator.request(
            Locator::Window { start: lo - count, count },
            Side::Backward,
        );
    }

    /// Absolute range the LiveArray currently mirrors; collapses to the
    /// anchor when empty.
    fn projection_range(&self) -> (i64, i64) {
        let lo = self.array_lo.get();
        (lo, lo + self.array.size() as i64)
    }

    /// Moves every cached key at or above `from` up by `by`.
    fn shift_keys_up(&self, from: i64, by: i64) {
        let mut cache = self.items.borrow_mut();
        let moved: Vec<i64> = cache.range(from..).map(|(k, _)| *k).collect();
        for key in moved.into_iter().rev() {
            if let Some(value) = cache.remove(&key) {
                cache.insert(key + by, value);
            }
        }
    }

    /// Moves every cached key at or above `from` down by `by`.
    fn shift_keys_down(&self, from: i64, by: i64) {
        let mut cache = self.items.borrow_mut();
        let moved: Vec<i64> = cache.range(from..).map(|(k, _)| *k).collect();
        for key in moved {
            if let Some(value) = cache.remove(&key) {
                cache.insert(key - by, value);
            }
        }
    }

    /// Grows the projection over any cache entries now adjacent to it.
    fn splice_projection(&self) {
        if self.array.size() == 0 {
            let anchor = self.array_lo.get();
            let cache = self.items.borrow();
            let mut lo = anchor;
            while cache.contains_key(&(lo - 1)) {
                lo -= 1;
            }
            let mut hi = anchor;
            while cache.contains_key(&hi) {
                hi += 1;
            }
            if hi == lo {
                return;
            }
            let run: Vec<Value> = (lo..hi).map(|k| cache[&k].clone()).collect();
            drop(cache);
            self.array_lo.set(lo);
            self.array.insert_range(0, run);
            return;
        }

        let (lo, hi) = self.projection_range();
        let (front, back) = {
            let cache = self.items.borrow();
            let mut front_lo = lo;
            while cache.contains_key(&(front_lo - 1)) {
                front_lo -= 1;
            }
            let mut back_hi = hi;
            while cache.contains_key(&back_hi) {
                back_hi += 1;
            }
            let front: Vec<Value> = (front_lo..lo).map(|k| cache[&k].clone()).collect();
            let back: Vec<Value> = (hi..back_hi).map(|k| cache[&k].clone()).collect();
            (front, back)
        };
        if !back.is_empty() {
            self.array.push_back_range(back);
        }
        if !front.is_empty() {
            self.array_lo.set(lo - front.len() as i64);
            self.array.insert_range(0, front);
        }
    }

    /// Evicts cache and projection entries outside the (narrowed) bounds
    /// and cancels fetches that no longer matter.
    fn apply_bounds_shrink(&self) {
        let bounds = self.bounds.get();
        let (lo, hi) = self.projection_range();

        if self.array.size() > 0 {
            let new_lo = lo.max(bounds.min());
            let new_hi = hi.min(bounds.max());
            if new_hi <= new_lo {
                let size = self.array.size();
                self.array.remove(0, size);
                self.array_lo.set(bounds.min().max(lo).min(bounds.max()));
            } else {
                if new_hi < hi {
                    self.array
                        .remove((new_hi - lo) as usize, (hi - new_hi) as usize);
                }
                if new_lo > lo {
                    self.array.remove(0, (new_lo - lo) as usize);
                    self.array_lo.set(new_lo);
                }
            }
        } else {
            let anchor = self.array_lo.get().clamp(bounds.min(), bounds.max());
            self.array_lo.set(anchor);
        }

        self.items
            .borrow_mut()
            .retain(|index, _| bounds.contains(*index));

        self.coordinator.cancel_where(|locator| match locator {
            Locator::Window { start, count } => {
                *start < bounds.max() && start + count > bounds.min()
            }
            Locator::Page { .. } => true,
        });
    }

    fn push_error(&self, reason: ErrorReason, message: &str) {
        self.errors
            .push(SourceError::new(reason, self.list_id.clone(), message));
    }
}

impl Drop for IndexProvider {
    fn drop(&mut self) {
        self.cancel_expiry_timer();
    }
}
