//! # stage_events
//!
//! The notification layer every other stage crate builds on.
//!
//! This crate provides:
//!
//! - [`Watchable`] — named-event handler registry with immediate, deferred,
//!   one-shot and wildcard delivery.
//! - [`Observable`] — the trait that mixes a [`Watchable`] into any type.
//! - [`TurnQueue`] — the per-store queue deferred deliveries are parked on
//!   until the end of the current turn.
//! - [`AbortController`] / [`AbortSignal`] — scoped cancellation for
//!   handlers and waits.

pub mod error;
pub mod queue;
pub mod signal;
pub mod watchable;

pub use error::Aborted;
pub use queue::{FlushPolicy, TurnQueue};
pub use signal::{AbortController, AbortHook, AbortSignal};
pub use watchable::{Observable, WatchId, WatchOptions, Watchable};
