//! Live data runtime for the Marquee presentation engine.
//!
//! The runtime keeps a host-mutated [`LiveArray`] coherent with every
//! document that binds to it. Each document subscribes through a
//! [`LiveArrayObject`], which accumulates edits between flushes, and a
//! [`DataManager`], which drives the per-document flush cycle. Timers are
//! abstracted behind [`Scheduler`] so the host controls all asynchrony.

pub mod collections;
pub mod data_manager;
pub mod live_array;
pub mod live_array_object;
pub mod scheduler;
pub mod value;

pub use data_manager::{DataManager, TrackerId};
pub use live_array::{ArrayChange, CallbackToken, LiveArray, LiveArrayPtr};
pub use live_array_object::{FlushToken, LiveArrayObject, LiveArrayObjectPtr};
pub use scheduler::{ManualScheduler, Scheduler, SchedulerPtr, TimerId};
pub use value::Value;
