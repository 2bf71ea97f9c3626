//! Scoped cancellation.
//!
//! An [`AbortController`] owns the right to cancel; the [`AbortSignal`] it
//! hands out is passed to whatever should stop when cancellation happens
//! (handler registrations, waits, reference resolution, asset loads). Each
//! hook registered on a signal runs exactly once, no matter how many times
//! the controller is aborted.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use futures::channel::oneshot;

type Hook = Box<dyn FnOnce()>;

#[derive(Default)]
struct SignalState {
    aborted: bool,
    next_hook: u64,
    hooks: Vec<(u64, Hook)>,
}

/// Handle to a hook registered with [`AbortSignal::on_abort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbortHook(u64);

/// The observing half of an [`AbortController`].
///
/// Cloning a signal yields another view of the same cancellation state.
#[derive(Clone, Default)]
pub struct AbortSignal {
    state: Rc<RefCell<SignalState>>,
}

impl AbortSignal {
    /// Returns `true` once the owning controller has aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.borrow().aborted
    }

    /// Register `hook` to run when the signal aborts.
    ///
    /// Returns `None` without running the hook if the signal has already
    /// aborted; callers treat that as "cancelled before it started".
    pub fn on_abort(&self, hook: impl FnOnce() + 'static) -> Option<AbortHook> {
        let mut state = self.state.borrow_mut();
        if state.aborted {
            return None;
        }
        let id = state.next_hook;
        state.next_hook += 1;
        state.hooks.push((id, Box::new(hook)));
        Some(AbortHook(id))
    }

    /// Drop a previously registered hook without running it.
    ///
    /// Returns `false` if the hook already ran or was already forgotten.
    pub fn forget(&self, hook: AbortHook) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.hooks.len();
        state.hooks.retain(|(id, _)| *id != hook.0);
        state.hooks.len() != before
    }

    #[cfg(test)]
    pub(crate) fn hook_count(&self) -> usize {
        self.state.borrow().hooks.len()
    }

    /// Resolves once the signal aborts (immediately if it already has).
    pub async fn aborted(&self) {
        let (tx, rx) = oneshot::channel::<()>();
        if self
            .on_abort(move || {
                let _ = tx.send(());
            })
            .is_none()
        {
            return;
        }
        let _ = rx.await;
    }

    fn abort(&self) {
        let hooks = {
            let mut state = self.state.borrow_mut();
            if state.aborted {
                return;
            }
            state.aborted = true;
            std::mem::take(&mut state.hooks)
        };
        for (_, hook) in hooks {
            hook();
        }
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("AbortSignal")
            .field("aborted", &state.aborted)
            .field("hooks", &state.hooks.len())
            .finish()
    }
}

/// Owns the right to cancel an [`AbortSignal`].
#[derive(Debug, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    /// Create a controller with a fresh, un-aborted signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to this controller's signal.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Abort the signal, running every registered hook once.
    ///
    /// Aborting twice is a no-op.
    pub fn abort(&self) {
        self.signal.abort();
    }

    /// Returns `true` once [`abort`](Self::abort) has been called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }
}
