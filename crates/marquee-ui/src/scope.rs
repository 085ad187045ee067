//! Per-child data-binding environment.
//!
//! Every data-bound child carries a scope with its binding variables.
//! The rebuilder writes them at build time and rewrites them in place on
//! reuse; dependent recomputation is modeled as a counter the view host
//! observes.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use marquee_core::collections::HashMap;
use marquee_core::Value;

/// Binding variable names used by the rebuilder.
pub mod keys {
    /// The item value.
    pub const DATA: &str = "data";
    /// Position among the inserted (non-filtered) children.
    pub const INDEX: &str = "index";
    /// Position in the data array.
    pub const DATA_INDEX: &str = "dataIndex";
    /// Data array length.
    pub const LENGTH: &str = "length";
    /// Ordinal among numbered children.
    pub const ORDINAL: &str = "ordinal";
    /// Identity of the rebuilder that created the scope.
    pub const TOKEN: &str = "_token";
    /// Deferred-inflation template marker.
    pub const ITEM: &str = "_item";
}

#[derive(Default)]
pub struct BindingScope {
    values: RefCell<HashMap<&'static str, Value>>,
    recalculations: Cell<u32>,
}

impl BindingScope {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn put(&self, key: &'static str, value: impl Into<Value>) {
        self.values.borrow_mut().insert(key, value.into());
    }

    pub fn opt(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }

    pub fn remove(&self, key: &str) {
        self.values.borrow_mut().remove(key);
    }

    /// Rewrites a binding and triggers dependent recomputation.
    pub fn update_and_recalculate(&self, key: &'static str, value: impl Into<Value>) {
        self.values.borrow_mut().insert(key, value.into());
        self.recalculations.set(self.recalculations.get() + 1);
    }

    /// How many recalculation-triggering updates this scope has seen.
    pub fn recalculations(&self) -> u32 {
        self.recalculations.get()
    }

    pub fn data_index(&self) -> Option<i64> {
        self.opt(keys::DATA_INDEX).as_ref().and_then(Value::as_i64)
    }

    pub fn token(&self) -> Option<i64> {
        self.opt(keys::TOKEN).as_ref().and_then(Value::as_i64)
    }
}
