//! Links from components to other components and to loaded assets.
//!
//! Both reference kinds share one lifecycle:
//!
//! ```text
//! pending ──resolve──▶ resolved
//!    │                    │
//!    │ release/destroy    ├──release──▶ released
//!    ▼                    └──destroy──▶ destroyed   (component references)
//! aborted
//! ```
//!
//! Terminal states are final. Each transition fires the matching event
//! (`resolve`, `release`, `destroy`) on the reference with the new state as
//! payload. Leaving the active states removes the reference from its global
//! set.

pub mod asset;
pub mod component;
pub mod set;

use std::cell::{Cell, RefCell};
use std::fmt;

use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};
use stage_events::{AbortSignal, TurnQueue, WatchOptions, Watchable};
use tracing::trace;

use crate::entity::ComponentKey;
use crate::error::ReferenceError;
use crate::stage::StageInner;

pub use asset::AssetReference;
pub use component::ComponentReference;

/// Where a reference is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceState {
    Pending,
    Resolved,
    Destroyed,
    Released,
    Aborted,
}

impl ReferenceState {
    /// Returns `true` for states no transition leaves.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed | Self::Released | Self::Aborted)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Destroyed => "destroyed",
            Self::Released => "released",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ReferenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for creating a reference.
#[derive(Debug, Clone, Default)]
pub struct ReferenceOptions {
    /// The component that owns the reference.
    pub referer: Option<ComponentKey>,
    /// Releases the reference when aborted.
    pub signal: Option<AbortSignal>,
}

impl ReferenceOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_referer(mut self, referer: ComponentKey) -> Self {
        self.referer = Some(referer);
        self
    }

    #[must_use]
    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Payload of `reference:add*` / `reference:release*` set events.
#[derive(Debug, Clone)]
pub struct ReferenceEvent<R> {
    pub reference: R,
    /// Size of the bucket the event is scoped to, after the change.
    pub count: usize,
}

/// Either kind of reference, as stored in a component's reference map.
#[derive(Debug, Clone)]
pub enum Reference {
    Component(ComponentReference),
    Asset(AssetReference),
}

impl Reference {
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Component(r) => r.id(),
            Self::Asset(r) => r.id(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ReferenceState {
        match self {
            Self::Component(r) => r.state(),
            Self::Asset(r) => r.state(),
        }
    }

    #[must_use]
    pub fn referer(&self) -> Option<&ComponentKey> {
        match self {
            Self::Component(r) => r.referer(),
            Self::Asset(r) => r.referer(),
        }
    }

    /// Release the reference. Returns `false` if it was already terminal.
    pub fn release(&self) -> bool {
        match self {
            Self::Component(r) => r.release(),
            Self::Asset(r) => r.release(),
        }
    }

    #[must_use]
    pub fn as_component(&self) -> Option<&ComponentReference> {
        match self {
            Self::Component(r) => Some(r),
            Self::Asset(_) => None,
        }
    }

    #[must_use]
    pub fn as_asset(&self) -> Option<&AssetReference> {
        match self {
            Self::Asset(r) => Some(r),
            Self::Component(_) => None,
        }
    }
}

// ── Shared lifecycle ────────────────────────────────────────────────────────

type Waiter<T> = oneshot::Sender<Result<T, ReferenceError>>;

/// State machine, waiters and teardown shared by both reference kinds.
pub(crate) struct Lifecycle<T: Clone> {
    pub(crate) id: u64,
    pub(crate) referer: Option<ComponentKey>,
    state: Cell<ReferenceState>,
    target: RefCell<Option<T>>,
    waiters: RefCell<Vec<Waiter<T>>>,
    pub(crate) events: Watchable<ReferenceState>,
    teardown: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl<T: Clone + 'static> Lifecycle<T> {
    pub(crate) fn new(id: u64, referer: Option<ComponentKey>, queue: &TurnQueue) -> Self {
        Self {
            id,
            referer,
            state: Cell::new(ReferenceState::Pending),
            target: RefCell::new(None),
            waiters: RefCell::new(Vec::new()),
            events: Watchable::new(queue),
            teardown: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn state(&self) -> ReferenceState {
        self.state.get()
    }

    pub(crate) fn target(&self) -> Option<T> {
        self.target.borrow().clone()
    }

    /// Run `f` once when the reference leaves the active states.
    pub(crate) fn on_teardown(&self, f: impl FnOnce() + 'static) {
        self.teardown.borrow_mut().push(Box::new(f));
    }

    /// `pending → resolved`. Returns `false` from any other state.
    pub(crate) fn resolve(&self, target: T) -> bool {
        if self.state.get() != ReferenceState::Pending {
            return false;
        }
        self.state.set(ReferenceState::Resolved);
        *self.target.borrow_mut() = Some(target.clone());
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waiter in waiters {
            let _ = waiter.send(Ok(target.clone()));
        }
        trace!(reference = self.id, "reference resolved");
        self.events.notify("resolve", ReferenceState::Resolved);
        true
    }

    /// Move to `terminal` (or `aborted` if still pending), reject waiters,
    /// run teardown, then fire `event`. Returns `false` if already terminal.
    pub(crate) fn finish(&self, event: &str, terminal: ReferenceState) -> bool {
        let next = match self.state.get() {
            ReferenceState::Pending => ReferenceState::Aborted,
            ReferenceState::Resolved => terminal,
            _ => return false,
        };
        self.state.set(next);
        self.target.borrow_mut().take();
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waiter in waiters {
            let _ = waiter.send(Err(ReferenceError::Aborted));
        }
        let teardown = std::mem::take(&mut *self.teardown.borrow_mut());
        for f in teardown {
            f();
        }
        trace!(reference = self.id, state = %next, "reference finished");
        self.events.notify(event, next);
        true
    }

    /// Resolves with the target once resolved; rejects with
    /// [`ReferenceError::Aborted`] if the reference finishes first.
    pub(crate) fn wait(&self) -> LocalBoxFuture<'static, Result<T, ReferenceError>> {
        match self.state.get() {
            ReferenceState::Resolved => match self.target() {
                Some(target) => future::ready(Ok(target)).boxed_local(),
                None => future::ready(Err(ReferenceError::Aborted)).boxed_local(),
            },
            ReferenceState::Pending => {
                let (tx, rx) = oneshot::channel();
                self.waiters.borrow_mut().push(tx);
                async move { rx.await.unwrap_or(Err(ReferenceError::Aborted)) }.boxed_local()
            }
            state => future::ready(Err(ReferenceError::UnexpectedState(state))).boxed_local(),
        }
    }
}

/// Run `release` when the referer of `life` is deleted. References without
/// a referer are left alone.
pub(crate) fn release_with_referer<T: Clone + 'static>(
    stage: &StageInner,
    life: &Lifecycle<T>,
    release: impl Fn() + 'static,
) {
    let Some(referer) = &life.referer else {
        return;
    };
    let events = stage.components.events.clone();
    let on_delete = events.watch(&format!("component:delete:{referer}"), WatchOptions::new(), move |_| release());
    life.on_teardown(move || {
        events.unwatch(on_delete);
    });
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    fn lifecycle() -> Lifecycle<u32> {
        Lifecycle::new(1, None, &TurnQueue::default())
    }

    #[test]
    fn test_release_while_pending_aborts() {
        let life = lifecycle();
        let torn_down = Rc::new(Cell::new(0));
        let counter = torn_down.clone();
        life.on_teardown(move || counter.set(counter.get() + 1));

        assert!(life.finish("release", ReferenceState::Released));
        assert_eq!(life.state(), ReferenceState::Aborted);
        assert!(!life.finish("release", ReferenceState::Released));
        assert!(!life.resolve(3));
        assert_eq!(torn_down.get(), 1);
    }

    #[test]
    fn test_release_after_resolve() {
        let life = lifecycle();
        assert!(life.resolve(3));
        assert!(!life.resolve(4));
        assert_eq!(life.target(), Some(3));
        assert!(life.finish("destroy", ReferenceState::Destroyed));
        assert_eq!(life.state(), ReferenceState::Destroyed);
        assert_eq!(life.target(), None);
    }

    #[tokio::test]
    async fn test_wait_paths() {
        let life = lifecycle();
        let pending = life.wait();
        life.resolve(5);
        assert_eq!(pending.await.unwrap(), 5);
        assert_eq!(life.wait().await.unwrap(), 5);

        let aborted = lifecycle();
        let wait = aborted.wait();
        aborted.finish("release", ReferenceState::Released);
        assert!(matches!(wait.await, Err(ReferenceError::Aborted)));
        assert!(matches!(
            aborted.wait().await,
            Err(ReferenceError::UnexpectedState(ReferenceState::Aborted))
        ));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ReferenceState::Pending.to_string(), "pending");
        assert!(ReferenceState::Released.is_terminal());
        assert!(!ReferenceState::Resolved.is_terminal());
    }
}
