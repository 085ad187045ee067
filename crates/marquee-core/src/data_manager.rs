//! Per-document flush driver.
//!
//! The manager tracks every live data subscriber in a document and the
//! subset with pending changes. At a quiescent point the host calls
//! [`DataManager::flush`], which drains the dirty set to a fixpoint so
//! work raised by a flush callback is committed in the same pass.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

use crate::collections::HashMap;
use crate::live_array_object::LiveArrayObject;

pub type TrackerId = u64;

#[derive(Default)]
pub struct DataManager {
    trackers: RefCell<HashMap<TrackerId, Weak<LiveArrayObject>>>,
    // BTreeSet keeps the flush order at registration order, which keeps
    // multi-list documents deterministic.
    dirty: RefCell<BTreeSet<TrackerId>>,
    next_id: Cell<TrackerId>,
}

impl DataManager {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn register(&self, tracker: Weak<LiveArrayObject>) -> TrackerId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.trackers.borrow_mut().insert(id, tracker);
        id
    }

    pub fn unregister(&self, id: TrackerId) {
        self.trackers.borrow_mut().remove(&id);
        self.dirty.borrow_mut().remove(&id);
    }

    pub fn mark_dirty(&self, id: TrackerId) {
        if self.trackers.borrow().contains_key(&id) {
            self.dirty.borrow_mut().insert(id);
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.borrow().is_empty()
    }

    pub fn tracker_count(&self) -> usize {
        self.trackers.borrow().len()
    }

    /// Flushes every dirty subscriber, draining to a fixpoint: a flush
    /// callback that dirties another subscriber (or the same one again)
    /// extends the current pass.
    pub fn flush(&self) {
        loop {
            let next = self.dirty.borrow_mut().pop_first();
            let Some(id) = next else { break };

            let tracker = self.trackers.borrow().get(&id).cloned();
            match tracker.and_then(|weak| weak.upgrade()) {
                Some(tracker) => tracker.flush(),
                // Subscriber died between mark_dirty and flush.
                None => {
                    log::debug!("pruning dead tracker {id}");
                    self.trackers.borrow_mut().remove(&id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live_array::LiveArray;
    use crate::live_array_object::LiveArrayObject;
    use serde_json::json;

    #[test]
    fn test_flush_clears_dirty_set() {
        let manager = DataManager::new();
        let array = LiveArray::empty();
        let object = LiveArrayObject::create(&array, &manager);
        array.push_back(json!(1));
        assert!(manager.is_dirty());
        manager.flush();
        assert!(!manager.is_dirty());
        assert!(object.is_clean());
    }

    #[test]
    fn test_reentrant_mark_dirty_is_drained_in_same_pass() {
        let manager = DataManager::new();
        let first = LiveArray::empty();
        let second = LiveArray::empty();
        let first_object = LiveArrayObject::create(&first, &manager);
        let second_object = LiveArrayObject::create(&second, &manager);

        // Flushing the first array pushes onto the second one.
        let second_for_callback = second.clone();
        let fired = Rc::new(Cell::new(false));
        let fired_in_callback = fired.clone();
        first_object.add_flush_callback(move || {
            if !fired_in_callback.get() {
                fired_in_callback.set(true);
                second_for_callback.push_back(json!("chained"));
            }
        });

        first.push_back(json!(1));
        manager.flush();

        assert!(!manager.is_dirty());
        assert!(first_object.is_clean());
        assert!(second_object.is_clean());
        assert_eq!(second.size(), 1);
    }

    #[test]
    fn test_dead_subscriber_is_pruned() {
        let manager = DataManager::new();
        let array = LiveArray::empty();
        let object = LiveArrayObject::create(&array, &manager);
        array.push_back(json!(1));
        drop(object);
        manager.flush();
        assert_eq!(manager.tracker_count(), 0);
    }

    #[test]
    fn test_mark_dirty_on_unknown_id_is_ignored() {
        let manager = DataManager::new();
        manager.mark_dirty(777);
        assert!(!manager.is_dirty());
    }
}
