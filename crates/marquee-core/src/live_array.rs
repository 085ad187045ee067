//! A mutable ordered sequence of values with change callbacks.
//!
//! A `LiveArray` is created and mutated by the view host. Documents bind
//! to it through a [`crate::LiveArrayObject`], which records every change
//! broadcast here. The same array may back several documents at once, so
//! the handle type is reference counted and all methods take `&self`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::value::Value;

/// One edit applied to a [`LiveArray`].
///
/// `Replace` invalidates all previously held indices; the other variants
/// describe a positional splice whose indices refer to the array as it was
/// immediately before the edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayChange {
    Insert { position: usize, count: usize },
    Remove { position: usize, count: usize },
    Update { position: usize, count: usize },
    Replace,
}

pub type CallbackToken = u32;
pub type LiveArrayPtr = Rc<LiveArray>;

type ChangeCallback = Box<dyn Fn(&ArrayChange)>;

/// Callback tokens start high so a stray zero in logs is recognizable.
const FIRST_CALLBACK_TOKEN: CallbackToken = 100;

pub struct LiveArray {
    values: RefCell<Vec<Value>>,
    callbacks: RefCell<Vec<(CallbackToken, ChangeCallback)>>,
    next_callback_token: Cell<CallbackToken>,
}

impl LiveArray {
    /// Creates an empty array.
    pub fn empty() -> LiveArrayPtr {
        Self::create(Vec::new())
    }

    /// Creates an array seeded with `values`.
    pub fn create(values: Vec<Value>) -> LiveArrayPtr {
        Rc::new(Self {
            values: RefCell::new(values),
            callbacks: RefCell::new(Vec::new()),
            next_callback_token: Cell::new(FIRST_CALLBACK_TOKEN),
        })
    }

    pub fn size(&self) -> usize {
        self.values.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }

    /// Returns a clone of the value at `position`, or `None` out of range.
    pub fn at(&self, position: usize) -> Option<Value> {
        self.values.borrow().get(position).cloned()
    }

    /// Runs `f` over the current contents without cloning.
    pub fn with_values<R>(&self, f: impl FnOnce(&[Value]) -> R) -> R {
        f(&self.values.borrow())
    }

    /// Removes every element and broadcasts `Replace`.
    pub fn clear(&self) {
        self.values.borrow_mut().clear();
        self.broadcast(&ArrayChange::Replace);
    }

    /// Inserts `value` at `position`. Valid positions are `[0, size]`.
    pub fn insert(&self, position: usize, value: Value) -> bool {
        {
            let mut values = self.values.borrow_mut();
            if position > values.len() {
                return false;
            }
            values.insert(position, value);
        }
        self.broadcast(&ArrayChange::Insert { position, count: 1 });
        true
    }

    /// Inserts a run of values at `position`, broadcasting a single
    /// `Insert` record. Returns false for an empty run or a bad position.
    pub fn insert_range(&self, position: usize, items: impl IntoIterator<Item = Value>) -> bool {
        let count;
        {
            let mut values = self.values.borrow_mut();
            if position > values.len() {
                return false;
            }
            let tail: Vec<Value> = values.split_off(position);
            let before = values.len();
            values.extend(items);
            count = values.len() - before;
            values.extend(tail);
            if count == 0 {
                return false;
            }
        }
        self.broadcast(&ArrayChange::Insert { position, count });
        true
    }

    /// Removes `count` elements starting at `position`.
    ///
    /// Emits a `Remove` record even when the array becomes empty; only
    /// [`LiveArray::clear`] resets subscriber bookkeeping with `Replace`.
    pub fn remove(&self, position: usize, count: usize) -> bool {
        {
            let mut values = self.values.borrow_mut();
            if count == 0 || count > values.len() || position > values.len() - count {
                return false;
            }
            values.drain(position..position + count);
        }
        self.broadcast(&ArrayChange::Remove { position, count });
        true
    }

    /// Replaces the value at `position`. Valid positions are `[0, size)`.
    pub fn update(&self, position: usize, value: Value) -> bool {
        {
            let mut values = self.values.borrow_mut();
            if position >= values.len() {
                return false;
            }
            values[position] = value;
        }
        self.broadcast(&ArrayChange::Update { position, count: 1 });
        true
    }

    /// Replaces a run of values starting at `position`.
    pub fn update_range(&self, position: usize, items: impl IntoIterator<Item = Value>) -> bool {
        let count;
        {
            let mut values = self.values.borrow_mut();
            let incoming: Vec<Value> = items.into_iter().collect();
            count = incoming.len();
            if count == 0 || count > values.len() || position > values.len() - count {
                return false;
            }
            for (offset, item) in incoming.into_iter().enumerate() {
                values[position + offset] = item;
            }
        }
        self.broadcast(&ArrayChange::Update { position, count });
        true
    }

    pub fn push_back(&self, value: Value) {
        let position = {
            let mut values = self.values.borrow_mut();
            values.push(value);
            values.len() - 1
        };
        self.broadcast(&ArrayChange::Insert { position, count: 1 });
    }

    /// Appends a run of values. Returns false for an empty run.
    pub fn push_back_range(&self, items: impl IntoIterator<Item = Value>) -> bool {
        let (position, count) = {
            let mut values = self.values.borrow_mut();
            let position = values.len();
            values.extend(items);
            (position, values.len() - position)
        };
        if count == 0 {
            return false;
        }
        self.broadcast(&ArrayChange::Insert { position, count });
        true
    }

    /// Registers a change callback, returning a token for removal.
    ///
    /// Callbacks run synchronously after every successful mutation, in
    /// registration order. A callback must not mutate this array or alter
    /// the callback set while it runs.
    pub fn add_change_callback(&self, callback: impl Fn(&ArrayChange) + 'static) -> CallbackToken {
        let token = self.next_callback_token.get();
        self.next_callback_token.set(token + 1);
        self.callbacks.borrow_mut().push((token, Box::new(callback)));
        token
    }

    pub fn remove_change_callback(&self, token: CallbackToken) {
        let mut callbacks = self.callbacks.borrow_mut();
        let before = callbacks.len();
        callbacks.retain(|(t, _)| *t != token);
        if callbacks.len() == before {
            log::warn!("no change callback registered under token {token}");
        }
    }

    fn broadcast(&self, change: &ArrayChange) {
        for (_, callback) in self.callbacks.borrow().iter() {
            callback(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::rc::Rc;

    fn seeded(items: &[i64]) -> LiveArrayPtr {
        LiveArray::create(items.iter().map(|i| json!(i)).collect())
    }

    fn recorded(array: &LiveArrayPtr) -> Rc<RefCell<Vec<ArrayChange>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        array.add_change_callback(move |change| sink.borrow_mut().push(*change));
        log
    }

    #[test]
    fn test_insert_bounds() {
        let array = seeded(&[1, 2, 3]);
        assert!(array.insert(3, json!(4)));
        assert!(!array.insert(5, json!(9)));
        assert_eq!(array.size(), 4);
    }

    #[test]
    fn test_remove_last_item_emits_remove_not_replace() {
        let array = seeded(&[1]);
        let log = recorded(&array);
        assert!(array.remove(0, 1));
        assert_eq!(
            log.borrow().as_slice(),
            &[ArrayChange::Remove { position: 0, count: 1 }]
        );
    }

    #[test]
    fn test_clear_emits_replace() {
        let array = seeded(&[1, 2]);
        let log = recorded(&array);
        array.clear();
        assert_eq!(log.borrow().as_slice(), &[ArrayChange::Replace]);
        assert!(array.is_empty());
    }

    #[test]
    fn test_insert_range_emits_single_record() {
        let array = seeded(&[1, 4]);
        let log = recorded(&array);
        assert!(array.insert_range(1, vec![json!(2), json!(3)]));
        assert_eq!(
            log.borrow().as_slice(),
            &[ArrayChange::Insert { position: 1, count: 2 }]
        );
        assert_eq!(array.at(2), Some(json!(3)));
    }

    #[test]
    fn test_empty_range_operations_fail() {
        let array = seeded(&[1]);
        let log = recorded(&array);
        assert!(!array.insert_range(0, Vec::new()));
        assert!(!array.push_back_range(Vec::new()));
        assert!(!array.update_range(0, Vec::new()));
        assert!(!array.remove(0, 0));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_update_range_validates_window() {
        let array = seeded(&[1, 2, 3]);
        assert!(!array.update_range(2, vec![json!(8), json!(9)]));
        assert!(array.update_range(1, vec![json!(8), json!(9)]));
        assert_eq!(array.at(2), Some(json!(9)));
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let array = seeded(&[]);
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second"] {
            let sink = order.clone();
            array.add_change_callback(move |_| sink.borrow_mut().push(tag));
        }
        array.push_back(json!(1));
        assert_eq!(order.borrow().as_slice(), &["first", "second"]);
    }

    #[test]
    fn test_removed_callback_stops_firing() {
        let array = seeded(&[]);
        let log = recorded(&array);
        let token = array.add_change_callback(|_| panic!("removed callback fired"));
        array.remove_change_callback(token);
        array.push_back(json!(1));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_size_tracks_inserts_and_removes() {
        let array = seeded(&[1, 2, 3, 4, 5]);
        array.insert_range(0, vec![json!(0), json!(0)]);
        array.remove(3, 2);
        array.push_back(json!(6));
        assert_eq!(array.size(), 5 + 2 - 2 + 1);
    }
}
