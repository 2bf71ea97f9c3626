//! Store configuration.

use stage_events::FlushPolicy;

/// Configuration for a [`Stage`](crate::Stage).
#[derive(Debug, Clone, Default)]
pub struct StageConfig {
    /// How deferred notifications are drained at the end of a turn.
    pub flush: FlushPolicy,
}

impl StageConfig {
    /// Manual flushing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the flush policy.
    #[must_use]
    pub fn with_flush(mut self, flush: FlushPolicy) -> Self {
        self.flush = flush;
        self
    }
}
