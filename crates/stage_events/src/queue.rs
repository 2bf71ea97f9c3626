//! End-of-turn delivery queue.
//!
//! Deferred notifications are never delivered from inside the mutation that
//! caused them. Each [`Watchable`](crate::Watchable) parks one delivery job
//! per batch on the store's [`TurnQueue`], and the host drains the queue at a
//! well-defined point: explicitly with [`TurnQueue::flush`], or automatically
//! on the next scheduler turn when the queue runs with
//! [`FlushPolicy::SpawnLocal`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

type Job = Box<dyn FnOnce()>;

/// How a [`TurnQueue`] gets drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushPolicy {
    /// The host calls [`TurnQueue::flush`] at the end of each turn.
    #[default]
    Manual,
    /// The first job of a turn spawns a flush task with
    /// `tokio::task::spawn_local`, so delivery happens as soon as the
    /// current task yields. Requires a running `tokio::task::LocalSet`.
    SpawnLocal,
}

struct QueueInner {
    policy: FlushPolicy,
    jobs: RefCell<VecDeque<Job>>,
    scheduled: Cell<bool>,
}

/// A shared FIFO of deferred delivery jobs.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct TurnQueue {
    inner: Rc<QueueInner>,
}

impl TurnQueue {
    /// Create an empty queue drained according to `policy`.
    #[must_use]
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            inner: Rc::new(QueueInner {
                policy,
                jobs: RefCell::new(VecDeque::new()),
                scheduled: Cell::new(false),
            }),
        }
    }

    /// Returns the policy this queue was created with.
    #[must_use]
    pub fn policy(&self) -> FlushPolicy {
        self.inner.policy
    }

    /// Park a job until the end of the current turn.
    pub fn defer(&self, job: impl FnOnce() + 'static) {
        self.inner.jobs.borrow_mut().push_back(Box::new(job));
        if self.inner.policy == FlushPolicy::SpawnLocal && !self.inner.scheduled.replace(true) {
            let queue = self.clone();
            tokio::task::spawn_local(async move {
                queue.flush();
            });
        }
    }

    /// Run every parked job, including jobs parked by the jobs themselves.
    ///
    /// Returns the number of jobs that ran.
    pub fn flush(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self.inner.jobs.borrow_mut().pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => break,
            }
        }
        self.inner.scheduled.set(false);
        if ran > 0 {
            trace!(jobs = ran, "flushed deferred notifications");
        }
        ran
    }

    /// Returns the number of jobs waiting for the next flush.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.jobs.borrow().len()
    }

    /// Returns `true` if nothing is waiting for the next flush.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.jobs.borrow().is_empty()
    }
}

impl Default for TurnQueue {
    fn default() -> Self {
        Self::new(FlushPolicy::Manual)
    }
}

impl fmt::Debug for TurnQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnQueue")
            .field("policy", &self.inner.policy)
            .field("pending", &self.len())
            .finish()
    }
}
