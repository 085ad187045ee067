//! Hashing selection for the runtime's maps and sets.
//!
//! `rustc-hash` keys the registries and `ahash` backs the
//! general-purpose hasher; the `std-hash` feature swaps both back to
//! the standard library implementations.

#[cfg(not(feature = "std-hash"))]
pub use ahash::AHasher as DefaultHasher;
#[cfg(not(feature = "std-hash"))]
pub use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

#[cfg(feature = "std-hash")]
pub use std::collections::hash_map::DefaultHasher;
#[cfg(feature = "std-hash")]
pub use std::collections::{HashMap, HashSet};

/// A fresh instance of the selected general-purpose hasher.
#[inline]
pub fn default_hasher() -> DefaultHasher {
    DefaultHasher::default()
}
