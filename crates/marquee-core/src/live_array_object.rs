//! Per-document change accumulator for a [`LiveArray`].
//!
//! A `LiveArrayObject` is the representation of a shared array inside one
//! document. It records every change broadcast by the array since the last
//! flush and can answer, for an index in the current array, which index
//! held the corresponding item before those changes. The document's
//! [`DataManager`] decides when to flush; layout rebuilders register flush
//! callbacks here to learn about the commit.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::data_manager::{DataManager, TrackerId};
use crate::live_array::{ArrayChange, CallbackToken, LiveArray, LiveArrayPtr};
use crate::value::Value;

pub type FlushToken = u32;
pub type LiveArrayObjectPtr = Rc<LiveArrayObject>;

type FlushCallback = Box<dyn Fn()>;
type EnsureHook = Box<dyn Fn(i64)>;

pub struct LiveArrayObject {
    array: Weak<LiveArray>,
    manager: Weak<DataManager>,
    tracker_id: TrackerId,
    change_token: Cell<Option<CallbackToken>>,
    changes: RefCell<SmallVec<[ArrayChange; 8]>>,
    replaced: Cell<bool>,
    flush_callbacks: RefCell<Vec<(FlushToken, FlushCallback)>>,
    next_flush_token: Cell<FlushToken>,
    ensure_hook: RefCell<Option<EnsureHook>>,
}

impl LiveArrayObject {
    /// Subscribes `array` into the document owning `manager`.
    pub fn create(array: &LiveArrayPtr, manager: &Rc<DataManager>) -> LiveArrayObjectPtr {
        let object = Rc::new_cyclic(|weak_self: &Weak<LiveArrayObject>| {
            let tracker_id = manager.register(weak_self.clone());
            LiveArrayObject {
                array: Rc::downgrade(array),
                manager: Rc::downgrade(manager),
                tracker_id,
                change_token: Cell::new(None),
                changes: RefCell::new(SmallVec::new()),
                replaced: Cell::new(false),
                flush_callbacks: RefCell::new(Vec::new()),
                next_flush_token: Cell::new(0),
                ensure_hook: RefCell::new(None),
            }
        });

        let weak = Rc::downgrade(&object);
        let token = array.add_change_callback(move |change| {
            if let Some(object) = weak.upgrade() {
                object.handle_change(change);
            }
        });
        object.change_token.set(Some(token));
        object
    }

    pub fn tracker_id(&self) -> TrackerId {
        self.tracker_id
    }

    pub fn size(&self) -> usize {
        self.array.upgrade().map(|a| a.size()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn at(&self, index: usize) -> Option<Value> {
        self.array.upgrade().and_then(|a| a.at(index))
    }

    /// True when no changes are pending and the replaced flag is clear.
    pub fn is_clean(&self) -> bool {
        self.changes.borrow().is_empty() && !self.replaced.get()
    }

    pub fn was_replaced(&self) -> bool {
        self.replaced.get()
    }

    /// Snapshot of the changes accumulated since the last flush.
    pub fn changes(&self) -> Vec<ArrayChange> {
        self.changes.borrow().to_vec()
    }

    /// Maps a current (post-change) index back to the index it occupied
    /// before the accumulated changes.
    ///
    /// Returns `(old_index, needs_refresh)`. The old index is `-1` when no
    /// prior slot corresponds: the item was newly inserted, or the array
    /// was wholesale replaced. `needs_refresh` reports that the slot
    /// survived but its value changed.
    pub fn new_to_old(&self, index: usize) -> (i64, bool) {
        if self.replaced.get() {
            return (-1, false);
        }

        let mut index = index as i64;
        let mut changed = false;

        for change in self.changes.borrow().iter().rev() {
            match *change {
                ArrayChange::Remove { position, count } => {
                    if index >= position as i64 {
                        index += count as i64;
                    }
                }
                ArrayChange::Update { position, count } => {
                    if index >= position as i64 && index < (position + count) as i64 {
                        changed = true;
                    }
                }
                ArrayChange::Insert { position, count } => {
                    if index >= (position + count) as i64 {
                        index -= count as i64;
                    } else if index >= position as i64 {
                        return (-1, false);
                    }
                }
                ArrayChange::Replace => return (-1, false),
            }
        }

        (index, changed)
    }

    /// Commits the accumulated changes: flush callbacks run first, while
    /// the change list is still queryable, then the log is cleared.
    pub fn flush(&self) {
        for (_, callback) in self.flush_callbacks.borrow().iter() {
            callback();
        }
        self.changes.borrow_mut().clear();
        self.replaced.set(false);
    }

    /// Registers a callback invoked on every flush, before the change log
    /// is cleared. Returns a token for removal.
    pub fn add_flush_callback(&self, callback: impl Fn() + 'static) -> FlushToken {
        let token = self.next_flush_token.get();
        self.next_flush_token.set(token + 1);
        self.flush_callbacks
            .borrow_mut()
            .push((token, Box::new(callback)));
        token
    }

    pub fn remove_flush_callback(&self, token: FlushToken) {
        self.flush_callbacks.borrow_mut().retain(|(t, _)| *t != token);
    }

    /// Installs the hook behind [`LiveArrayObject::ensure`]. Data source
    /// providers use this to learn which indices the view is touching.
    pub fn set_ensure_hook(&self, hook: impl Fn(i64) + 'static) {
        *self.ensure_hook.borrow_mut() = Some(Box::new(hook));
    }

    /// Hints that the view needs the item at `index` (and its neighbors).
    /// A plain array has nothing to fetch, so without a hook this is a
    /// no-op.
    pub fn ensure(&self, index: i64) {
        if let Some(hook) = self.ensure_hook.borrow().as_ref() {
            hook(index);
        }
    }

    fn handle_change(&self, change: &ArrayChange) {
        // Once replaced, positional changes are meaningless until flush.
        if self.replaced.get() {
            return;
        }

        if matches!(change, ArrayChange::Replace) {
            self.replaced.set(true);
            self.changes.borrow_mut().clear();
        } else {
            self.changes.borrow_mut().push(*change);
        }

        if let Some(manager) = self.manager.upgrade() {
            manager.mark_dirty(self.tracker_id);
        }
    }
}

impl Drop for LiveArrayObject {
    fn drop(&mut self) {
        if let (Some(array), Some(token)) = (self.array.upgrade(), self.change_token.take()) {
            array.remove_change_callback(token);
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.unregister(self.tracker_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live_array::LiveArray;
    use serde_json::json;

    fn setup(items: &[i64]) -> (LiveArrayPtr, Rc<DataManager>, LiveArrayObjectPtr) {
        let array = LiveArray::create(items.iter().map(|i| json!(i)).collect());
        let manager = DataManager::new();
        let object = LiveArrayObject::create(&array, &manager);
        (array, manager, object)
    }

    #[test]
    fn test_records_changes_until_flush() {
        let (array, _manager, object) = setup(&[1, 2, 3]);
        array.insert(0, json!(0));
        array.remove(2, 1);
        assert_eq!(object.changes().len(), 2);
        object.flush();
        assert!(object.is_clean());
    }

    #[test]
    fn test_replace_is_sticky() {
        let (array, _manager, object) = setup(&[1, 2, 3]);
        array.clear();
        array.push_back(json!(9));
        assert!(object.was_replaced());
        assert!(object.changes().is_empty());
        assert_eq!(object.new_to_old(0), (-1, false));
        object.flush();
        assert!(!object.was_replaced());
    }

    #[test]
    fn test_new_to_old_after_insert() {
        let (array, _manager, object) = setup(&[10, 20, 30]);
        array.insert(1, json!(15)); // now [10, 15, 20, 30]
        assert_eq!(object.new_to_old(0), (0, false));
        assert_eq!(object.new_to_old(1), (-1, false));
        assert_eq!(object.new_to_old(2), (1, false));
        assert_eq!(object.new_to_old(3), (2, false));
    }

    #[test]
    fn test_new_to_old_after_remove() {
        let (array, _manager, object) = setup(&[10, 20, 30]);
        array.remove(1, 1); // now [10, 30]
        assert_eq!(object.new_to_old(0), (0, false));
        assert_eq!(object.new_to_old(1), (2, false));
    }

    #[test]
    fn test_new_to_old_after_update() {
        let (array, _manager, object) = setup(&[10, 20, 30]);
        array.update(2, json!(33));
        assert_eq!(object.new_to_old(2), (2, true));
        assert_eq!(object.new_to_old(1), (1, false));
    }

    #[test]
    fn test_new_to_old_mixed_sequence() {
        // [a b c d] -> insert x at 1 -> [a x b c d] -> remove index 3 -> [a x b d]
        let (array, _manager, object) = setup(&[0, 1, 2, 3]);
        array.insert(1, json!(99));
        array.remove(3, 1);
        assert_eq!(object.new_to_old(0), (0, false));
        assert_eq!(object.new_to_old(1), (-1, false));
        assert_eq!(object.new_to_old(2), (1, false));
        assert_eq!(object.new_to_old(3), (3, false));
    }

    #[test]
    fn test_flush_callbacks_see_pending_changes() {
        let (array, _manager, object) = setup(&[1]);
        let seen = Rc::new(Cell::new(0usize));
        let sink = seen.clone();
        let weak = Rc::downgrade(&object);
        object.add_flush_callback(move || {
            if let Some(object) = weak.upgrade() {
                sink.set(object.changes().len());
            }
        });
        array.push_back(json!(2));
        object.flush();
        assert_eq!(seen.get(), 1);
        assert!(object.is_clean());
    }

    #[test]
    fn test_drop_detaches_from_array() {
        let (array, _manager, object) = setup(&[1]);
        drop(object);
        // Mutating after the subscriber is gone must not panic.
        array.push_back(json!(2));
        assert_eq!(array.size(), 2);
    }

    #[test]
    fn test_ensure_routes_to_hook() {
        let (_array, _manager, object) = setup(&[1]);
        let last = Rc::new(Cell::new(i64::MIN));
        let sink = last.clone();
        object.set_ensure_hook(move |index| sink.set(index));
        object.ensure(42);
        assert_eq!(last.get(), 42);
    }
}
