//! Child reconciliation against a live data array.
//!
//! The rebuilder owns the data-bound middle region of its parent: an
//! optional fixed `firstItem` child sits before it and an optional fixed
//! `lastItem` after it, both out of reach. On flush it maps every new
//! index back through the change log and reuses, inserts, or drops
//! children so the region matches the array without re-inflating
//! survivors.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde_json::json;

use marquee_core::{FlushToken, LiveArrayObject, LiveArrayObjectPtr, Value};

use crate::builder::Builder;
use crate::component::{Component, ComponentHandle, Numbering};
use crate::scope::{keys, BindingScope};

thread_local! {
    static NEXT_REBUILDER_TOKEN: Cell<i64> = const { Cell::new(100) };
}

/// Walks the parent's existing data-bound children while the new
/// sequence is replayed over them.
struct ChildWalker {
    layout: ComponentHandle,
    index: usize,
}

impl ChildWalker {
    /// Starts past the `firstItem` slot if the parent has one.
    fn new(layout: ComponentHandle, has_first_item: bool) -> Self {
        Self {
            layout,
            index: usize::from(has_first_item),
        }
    }

    fn position(&self) -> usize {
        self.index
    }

    fn current_child(&self) -> Option<ComponentHandle> {
        self.layout.child_at(self.index)
    }

    fn advance(&mut self) {
        self.index += 1;
    }

    /// Drops children until one with `dataIndex == old_index` is under
    /// the cursor. Passing beyond it means that item never inflated, so
    /// there is nothing to reuse.
    fn advance_until(&mut self, old_index: i64) -> bool {
        while self.index < self.layout.child_count() {
            let child = self
                .layout
                .child_at(self.index)
                .expect("index bounded by child_count");
            if let Some(data_index) = child.data_index() {
                if data_index >= old_index {
                    return data_index == old_index;
                }
            }
            self.layout.remove_child_at(self.index);
        }
        log::error!("no child with dataIndex {old_index} remains");
        false
    }

    /// Destroys the rest of the middle region, sparing `lastItem`.
    fn finish(self, has_last_item: bool) {
        let mut end = self.layout.child_count();
        if has_last_item {
            end = end.saturating_sub(1);
        }
        while self.index < end {
            self.layout.remove_child_at(self.index);
            end -= 1;
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RebuilderOptions {
    pub numbered: bool,
    pub has_first_item: bool,
    pub has_last_item: bool,
}

pub struct LayoutRebuilder {
    layout: Weak<Component>,
    old: Weak<Component>,
    array: Weak<LiveArrayObject>,
    builder: Rc<dyn Builder>,
    options: RebuilderOptions,
    token: i64,
    flush_token: Cell<Option<FlushToken>>,
    weak_self: RefCell<Weak<LayoutRebuilder>>,
}

impl LayoutRebuilder {
    /// Attaches a rebuilder to `layout`'s middle region. `old` is the
    /// pre-reinflation component the builder may harvest from; it is
    /// allowed to be dead.
    pub fn create(
        layout: &ComponentHandle,
        old: Option<&ComponentHandle>,
        array: &LiveArrayObjectPtr,
        builder: Rc<dyn Builder>,
        options: RebuilderOptions,
    ) -> Rc<Self> {
        let token = NEXT_REBUILDER_TOKEN.with(|cell| {
            let token = cell.get();
            cell.set(token + 1);
            token
        });
        let rebuilder = Rc::new(Self {
            layout: Rc::downgrade(layout),
            old: old.map(Rc::downgrade).unwrap_or_default(),
            array: Rc::downgrade(array),
            builder,
            options,
            token,
            flush_token: Cell::new(None),
            weak_self: RefCell::new(Weak::new()),
        });
        *rebuilder.weak_self.borrow_mut() = Rc::downgrade(&rebuilder);
        rebuilder
    }

    pub fn token(&self) -> i64 {
        self.token
    }

    /// Initial expansion of the middle region, one child per array item
    /// whose template accepts it. Registers the flush callback that
    /// routes subsequent changes into [`LayoutRebuilder::rebuild`].
    pub fn build(&self) {
        let (Some(layout), Some(array)) = (self.layout.upgrade(), self.array.upgrade()) else {
            log::error!("building a layout without a layout or data array");
            return;
        };

        let mut ordinal: i64 = 1;
        let mut index: i64 = 0;
        let length = array.size();
        for data_index in 0..length {
            let scope = self.child_scope(&array, data_index, index);
            if self.options.numbered {
                scope.put(keys::ORDINAL, ordinal);
            }
            if let Some(child) = self.builder.expand_child(&scope) {
                layout.append_child(child.clone());
                index += 1;
                if self.options.numbered {
                    match child.numbering() {
                        Numbering::Normal => ordinal += 1,
                        Numbering::Reset => ordinal = 1,
                        Numbering::Skip => {}
                    }
                }
            }
        }

        let weak = self.weak_self.borrow().clone();
        let token = array.add_flush_callback(move || {
            if let Some(rebuilder) = weak.upgrade() {
                rebuilder.rebuild();
            }
        });
        self.flush_token.set(Some(token));
    }

    /// Incremental reconciliation, run on every flush while the change
    /// log is still queryable.
    pub fn rebuild(&self) {
        let (Some(layout), Some(array)) = (self.layout.upgrade(), self.array.upgrade()) else {
            log::error!("rebuilding a layout without a layout or data array");
            return;
        };

        let mut walker = ChildWalker::new(layout.clone(), self.options.has_first_item);
        let mut ordinal: i64 = 1;
        let mut index: i64 = 0;

        for new_index in 0..array.size() {
            let (old_index, needs_refresh) = array.new_to_old(new_index);

            if old_index == -1 {
                // No prior slot: build and insert at the cursor.
                let scope = self.child_scope(&array, new_index, index);
                if self.options.numbered {
                    scope.put(keys::ORDINAL, ordinal);
                }
                if let Some(child) = self.builder.expand_child(&scope) {
                    layout.insert_child_at(walker.position(), child.clone());
                    walker.advance();
                    index += 1;
                    if self.options.numbered {
                        match child.numbering() {
                            Numbering::Normal => ordinal += 1,
                            Numbering::Reset => ordinal = 1,
                            Numbering::Skip => {}
                        }
                    }
                }
            } else if walker.advance_until(old_index) {
                let child = walker
                    .current_child()
                    .expect("advance_until leaves the cursor on a child");
                if let Some(scope) = self.find_token_scope(&child) {
                    scope.update_and_recalculate(keys::INDEX, index);
                    if needs_refresh {
                        let data = array.at(new_index).unwrap_or(Value::Null);
                        scope.update_and_recalculate(keys::DATA, data);
                    }
                    scope.update_and_recalculate(keys::LENGTH, array.size() as i64);
                    scope.update_and_recalculate(keys::DATA_INDEX, new_index as i64);
                    if self.options.numbered {
                        scope.update_and_recalculate(keys::ORDINAL, ordinal);
                    }
                    index += 1;
                    walker.advance();
                    if self.options.numbered {
                        match child.numbering() {
                            Numbering::Normal => ordinal += 1,
                            Numbering::Reset => ordinal = 1,
                            Numbering::Skip => {}
                        }
                    }
                }
            }
        }

        walker.finish(self.options.has_last_item);

        // Let the parent lay out its changed children, then give the
        // whole tree a chance to absorb relative-size changes.
        layout.process_layout_changes();
        layout.layout_root().process_layout_changes();
    }

    /// Completes a deferred child when the view host reports it is about
    /// to become visible.
    pub fn inflate_if_required(&self, child: &ComponentHandle) {
        let scope = child.scope();
        let Some(item) = scope.opt(keys::ITEM) else {
            return;
        };
        self.builder.inflate_deferred(child, &item);
        scope.remove(keys::ITEM);
    }

    /// View-host callback: the child at `ui_index` came on screen.
    pub fn notify_item_on_screen(&self, ui_index: usize) {
        let (Some(layout), Some(array)) = (self.layout.upgrade(), self.array.upgrade()) else {
            return;
        };
        if let Some(data_index) = layout.child_at(ui_index).and_then(|c| c.data_index()) {
            array.ensure(data_index);
        }
    }

    /// View-host callback: scrolled to the start edge.
    pub fn notify_start_edge_reached(&self) {
        if let Some(array) = self.array.upgrade() {
            array.ensure(0);
        }
    }

    /// View-host callback: scrolled to the end edge.
    pub fn notify_end_edge_reached(&self) {
        if let Some(array) = self.array.upgrade() {
            array.ensure(array.size() as i64);
        }
    }

    fn child_scope(
        &self,
        array: &LiveArrayObjectPtr,
        data_index: usize,
        insert_index: i64,
    ) -> Rc<BindingScope> {
        let scope = BindingScope::new();
        scope.put(keys::DATA, array.at(data_index).unwrap_or(Value::Null));
        scope.put(keys::INDEX, insert_index);
        scope.put(keys::LENGTH, array.size() as i64);
        scope.put(keys::DATA_INDEX, data_index as i64);
        scope.put(keys::TOKEN, self.token);
        scope
    }

    /// The scope is only ours to rewrite when its `_token` matches; a
    /// nested rebuilder's children carry their own.
    fn find_token_scope(&self, child: &ComponentHandle) -> Option<Rc<BindingScope>> {
        let scope = child.scope();
        if scope.token() == Some(self.token) {
            Some(scope)
        } else {
            log::warn!("no scope with token {} on reused child", self.token);
            None
        }
    }

    /// The pre-reinflation component, when it is still alive.
    pub fn old_component(&self) -> Option<ComponentHandle> {
        self.old.upgrade()
    }

    pub fn is_numbered(&self) -> bool {
        self.options.numbered
    }
}

impl Drop for LayoutRebuilder {
    fn drop(&mut self) {
        if let (Some(array), Some(token)) = (self.array.upgrade(), self.flush_token.take()) {
            array.remove_flush_callback(token);
        }
    }
}

/// Serializes a scope's rebuilder-owned bindings, for diagnostics.
pub fn serialize_scope(scope: &BindingScope) -> Value {
    json!({
        keys::DATA: scope.opt(keys::DATA),
        keys::INDEX: scope.opt(keys::INDEX),
        keys::DATA_INDEX: scope.opt(keys::DATA_INDEX),
        keys::LENGTH: scope.opt(keys::LENGTH),
        keys::ORDINAL: scope.opt(keys::ORDINAL),
    })
}
