//! Reconciliation scenarios against live arrays and (in the integration
//! module) a real dynamic data source.


use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::json;

use marquee_core::{DataManager, LiveArray, LiveArrayObject, LiveArrayObjectPtr, LiveArrayPtr, Value};

use crate::builder::Builder;
use crate::component::{Component, ComponentHandle, Numbering};
use crate::rebuilder::{LayoutRebuilder, RebuilderOptions};
use crate::scope::{keys, BindingScope};

/// Builder that expands every accepted item into a plain component named
/// after its data, recording what it built and inflated.
pub(crate) struct TestBuilder {
    accept: Box<dyn Fn(&Value) -> bool>,
    numbering: Box<dyn Fn(&Value) -> Numbering>,
    deferred: bool,
    pub built: Cell<u32>,
    pub inflated: RefCell<Vec<String>>,
}

impl TestBuilder {
    pub fn accepting_all() -> Rc<Self> {
        Rc::new(Self {
            accept: Box::new(|_| true),
            numbering: Box::new(|_| Numbering::Normal),
            deferred: false,
            built: Cell::new(0),
            inflated: RefCell::new(Vec::new()),
        })
    }

    pub fn with_filter(accept: impl Fn(&Value) -> bool + 'static) -> Rc<Self> {
        Rc::new(Self {
            accept: Box::new(accept),
            numbering: Box::new(|_| Numbering::Normal),
            deferred: false,
            built: Cell::new(0),
            inflated: RefCell::new(Vec::new()),
        })
    }

    pub fn with_numbering(numbering: impl Fn(&Value) -> Numbering + 'static) -> Rc<Self> {
        Rc::new(Self {
            accept: Box::new(|_| true),
            numbering: Box::new(numbering),
            deferred: false,
            built: Cell::new(0),
            inflated: RefCell::new(Vec::new()),
        })
    }

    pub fn deferring() -> Rc<Self> {
        Rc::new(Self {
            accept: Box::new(|_| true),
            numbering: Box::new(|_| Numbering::Normal),
            deferred: true,
            built: Cell::new(0),
            inflated: RefCell::new(Vec::new()),
        })
    }
}

pub(crate) fn value_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Builder for TestBuilder {
    fn expand_child(&self, scope: &Rc<BindingScope>) -> Option<ComponentHandle> {
        let data = scope.opt(keys::DATA)?;
        if !(self.accept)(&data) {
            return None;
        }
        self.built.set(self.built.get() + 1);
        let child = Component::with_scope(format!("item:{}", value_label(&data)), scope.clone());
        child.set_numbering((self.numbering)(&data));
        if self.deferred {
            scope.put(keys::ITEM, json!({ "template": "middle-item" }));
        }
        Some(child)
    }

    fn inflate_deferred(&self, child: &ComponentHandle, _item: &Value) {
        self.inflated.borrow_mut().push(child.name().to_string());
    }
}

pub(crate) struct Fixture {
    pub array: LiveArrayPtr,
    pub manager: Rc<DataManager>,
    pub object: LiveArrayObjectPtr,
    pub parent: ComponentHandle,
    pub builder: Rc<TestBuilder>,
    pub rebuilder: Rc<LayoutRebuilder>,
}

pub(crate) fn fixture(values: &[&str], builder: Rc<TestBuilder>, options: RebuilderOptions) -> Fixture {
    let array = LiveArray::create(values.iter().map(|v| json!(v)).collect());
    let manager = DataManager::new();
    let object = LiveArrayObject::create(&array, &manager);
    let parent = Component::new("container");
    if options.has_first_item {
        parent.append_child(Component::new("firstItem"));
    }
    let rebuilder = LayoutRebuilder::create(&parent, None, &object, builder.clone(), options);
    rebuilder.build();
    if options.has_last_item {
        parent.append_child(Component::new("lastItem"));
    }
    Fixture {
        array,
        manager,
        object,
        parent,
        builder,
        rebuilder,
    }
}

pub(crate) fn child_names(parent: &ComponentHandle) -> Vec<String> {
    (0..parent.child_count())
        .map(|i| parent.child_at(i).unwrap().name().to_string())
        .collect()
}
