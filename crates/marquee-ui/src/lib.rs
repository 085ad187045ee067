//! Data-bound child reconciliation for the Marquee presentation engine.
//!
//! A [`LayoutRebuilder`] keeps the children of a parent view component
//! coherent with a [`marquee_core::LiveArrayObject`]: on every flush it
//! walks the existing children against the new sequence, reusing the
//! ones whose data survived, inserting fresh ones, and dropping the
//! rest. Child construction itself lives behind the [`Builder`] seam;
//! this crate only decides *which* children exist and what their
//! binding scopes say.

pub mod builder;
pub mod component;
pub mod rebuilder;
pub mod scope;

#[cfg(test)]
mod tests;

pub use builder::Builder;
pub use component::{Component, ComponentHandle, Numbering};
pub use rebuilder::{LayoutRebuilder, RebuilderOptions};
pub use scope::{keys, BindingScope};
