//! Notification-layer error types.

/// A wait was cancelled before the awaited event arrived.
///
/// Returned by [`Watchable::wait_for`](crate::Watchable::wait_for) when its
/// signal aborts first, or when the watchable is dropped while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("aborted")]
pub struct Aborted;
