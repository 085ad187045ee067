//! Dynamic list data sources for the Marquee presentation engine.
//!
//! Two procurement models keep a host-side list coherent with a bound
//! [`marquee_core::LiveArray`]:
//!
//! - **dynamicIndexList** ([`IndexProvider`]): items addressed by signed
//!   integers inside a shrinking window, lazily fetched in chunks and
//!   mutated by versioned CRUD payloads.
//! - **dynamicTokenList** ([`TokenProvider`]): items addressed by opaque
//!   page tokens, fetched page by page in both directions.
//!
//! A [`DynamicSourceRegistry`] owns the providers of one document, routes
//! host payloads by `listId`, accumulates wire errors, and exposes the
//! fetch-request event queue the host drains.

pub mod bounds;
pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod index_provider;
pub mod payload;
pub mod registry;
pub mod token_provider;

#[cfg(test)]
mod tests;

pub use bounds::Bounds;
pub use config::DynamicListConfiguration;
pub use error::{ErrorReason, ErrorSink, SourceError};
pub use events::{EventQueue, FetchRequestEvent, Locator};
pub use fetch::{FetchCoordinator, Side};
pub use index_provider::IndexProvider;
pub use registry::{DynamicSourceRegistry, Provider};
pub use token_provider::TokenProvider;

/// Default source-type tag for index-addressed lists.
pub const DYNAMIC_INDEX_LIST: &str = "dynamicIndexList";
/// Default source-type tag for token-addressed lists.
pub const DYNAMIC_TOKEN_LIST: &str = "dynamicTokenList";
