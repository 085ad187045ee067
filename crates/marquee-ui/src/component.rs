//! Minimal view-component tree.
//!
//! Only as much of the view host as reconciliation needs: an ordered
//! child list, a binding scope per child, a numbering mode, and a
//! layout-dirty hook that bubbles to the root. Layout itself, drawing,
//! and gestures live outside this crate.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::scope::BindingScope;

pub type ComponentHandle = Rc<Component>;

/// How a child participates in ordinal numbering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Numbering {
    #[default]
    Normal,
    Skip,
    Reset,
}

pub struct Component {
    name: String,
    scope: Rc<BindingScope>,
    children: RefCell<Vec<ComponentHandle>>,
    parent: RefCell<Weak<Component>>,
    weak_self: Weak<Component>,
    numbering: Cell<Numbering>,
    layout_passes: Cell<u32>,
}

impl Component {
    pub fn new(name: impl Into<String>) -> ComponentHandle {
        Self::with_scope(name, BindingScope::new())
    }

    pub fn with_scope(name: impl Into<String>, scope: Rc<BindingScope>) -> ComponentHandle {
        let name = name.into();
        Rc::new_cyclic(|weak_self| Self {
            name,
            scope,
            children: RefCell::new(Vec::new()),
            parent: RefCell::new(Weak::new()),
            weak_self: weak_self.clone(),
            numbering: Cell::new(Numbering::Normal),
            layout_passes: Cell::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Rc<BindingScope> {
        self.scope.clone()
    }

    pub fn numbering(&self) -> Numbering {
        self.numbering.get()
    }

    pub fn set_numbering(&self, numbering: Numbering) {
        self.numbering.set(numbering);
    }

    pub fn child_count(&self) -> usize {
        self.children.borrow().len()
    }

    pub fn child_at(&self, index: usize) -> Option<ComponentHandle> {
        self.children.borrow().get(index).cloned()
    }

    pub fn append_child(&self, child: ComponentHandle) {
        *child.parent.borrow_mut() = self.weak_self.clone();
        self.children.borrow_mut().push(child);
    }

    pub fn insert_child_at(&self, index: usize, child: ComponentHandle) {
        *child.parent.borrow_mut() = self.weak_self.clone();
        let mut children = self.children.borrow_mut();
        let index = index.min(children.len());
        children.insert(index, child);
    }

    /// Detaches and returns the child at `index`.
    pub fn remove_child_at(&self, index: usize) -> Option<ComponentHandle> {
        let mut children = self.children.borrow_mut();
        if index >= children.len() {
            return None;
        }
        let child = children.remove(index);
        *child.parent.borrow_mut() = Weak::new();
        Some(child)
    }

    /// Convenience shortcut for the child's `dataIndex` binding.
    pub fn data_index(&self) -> Option<i64> {
        self.scope.data_index()
    }

    /// Re-drives layout on this component. Counted so tests can observe
    /// that reconciliation requested a pass.
    pub fn process_layout_changes(&self) {
        self.layout_passes.set(self.layout_passes.get() + 1);
    }

    pub fn layout_passes(&self) -> u32 {
        self.layout_passes.get()
    }

    /// Topmost ancestor, the document's layout root.
    pub fn layout_root(&self) -> ComponentHandle {
        let mut current = self
            .weak_self
            .upgrade()
            .expect("component is reachable through a handle");
        loop {
            let parent = current.parent.borrow().upgrade();
            match parent {
                Some(parent) => current = parent,
                None => return current,
            }
        }
    }
}
