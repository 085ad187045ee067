//! The child-construction seam.
//!
//! Template expansion belongs to the document engine; the rebuilder only
//! asks it to produce a child for a binding scope, or to finish one that
//! was deferred. An expansion returning `None` means the template's
//! `when` clause rejected the item.

use std::rc::Rc;

use marquee_core::Value;

use crate::component::ComponentHandle;
use crate::scope::BindingScope;

pub trait Builder {
    /// Expands the middle-item template against `scope`. `None` when the
    /// template rejected the item.
    fn expand_child(&self, scope: &Rc<BindingScope>) -> Option<ComponentHandle>;

    /// Completes a child built in deferred mode. `item` is the template
    /// the child's scope carried in its `_item` marker.
    fn inflate_deferred(&self, child: &ComponentHandle, item: &Value);
}
