//! Named-event handler registry.
//!
//! A [`Watchable`] delivers a payload of type `T` to handlers registered for
//! a named event. Delivery comes in two flavours:
//!
//! - **Immediate** handlers run synchronously inside [`Watchable::notify`],
//!   in registration order.
//! - **Deferred** handlers run once per batch when the owning
//!   [`TurnQueue`] is flushed. Notifying the same event several times in one
//!   turn delivers only the latest payload; distinct events keep their own.
//!
//! Wildcard handlers see every event: immediate ones get `(event, payload)`,
//! deferred ones get the whole batch as `(event, latest payload)` pairs in
//! first-notified order.
//!
//! Handler storage is allocated on the first registration and released when
//! the last handler goes away.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture};

use crate::error::Aborted;
use crate::queue::TurnQueue;
use crate::signal::{AbortHook, AbortSignal};

/// Identifies one handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(u64);

/// Options controlling how a handler is registered.
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Deliver at the end of the turn instead of synchronously.
    pub deferred: bool,
    /// Unregister after the first delivery.
    pub once: bool,
    /// Unregister when this signal aborts.
    pub signal: Option<AbortSignal>,
}

impl WatchOptions {
    /// Immediate, persistent, uncancellable registration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver at the end of the turn.
    #[must_use]
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Unregister after the first delivery.
    #[must_use]
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Unregister when `signal` aborts.
    #[must_use]
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

// ── Handler storage ─────────────────────────────────────────────────────────

enum Immediate<T> {
    Event(Rc<dyn Fn(&T)>),
    Any(Rc<dyn Fn(&str, &T)>),
}

impl<T> Clone for Immediate<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Event(f) => Self::Event(f.clone()),
            Self::Any(f) => Self::Any(f.clone()),
        }
    }
}

enum Deferred<T> {
    Event(Rc<dyn Fn(&T)>),
    Batch(Rc<dyn Fn(&[(String, T)])>),
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Event(f) => Self::Event(f.clone()),
            Self::Batch(f) => Self::Batch(f.clone()),
        }
    }
}

struct Entry<C> {
    id: WatchId,
    once: bool,
    callback: C,
    hook: Option<(AbortSignal, AbortHook)>,
}

struct Registry<T> {
    immediate: HashMap<String, Vec<Entry<Immediate<T>>>>,
    deferred: HashMap<String, Vec<Entry<Deferred<T>>>>,
    any: Vec<Entry<Immediate<T>>>,
    any_deferred: Vec<Entry<Deferred<T>>>,
    /// Latest payload per event since the last deferred delivery.
    pending: Vec<(String, T)>,
    scheduled: bool,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            immediate: HashMap::new(),
            deferred: HashMap::new(),
            any: Vec::new(),
            any_deferred: Vec::new(),
            pending: Vec::new(),
            scheduled: false,
        }
    }
}

impl<T> Registry<T> {
    fn is_empty(&self) -> bool {
        self.immediate.is_empty()
            && self.deferred.is_empty()
            && self.any.is_empty()
            && self.any_deferred.is_empty()
    }

    fn contains(&self, id: WatchId) -> bool {
        self.immediate.values().flatten().any(|e| e.id == id)
            || self.deferred.values().flatten().any(|e| e.id == id)
            || self.any.iter().any(|e| e.id == id)
            || self.any_deferred.iter().any(|e| e.id == id)
    }

    /// Remove an entry wherever it lives, returning its abort hook.
    fn remove(&mut self, id: WatchId) -> Option<Option<(AbortSignal, AbortHook)>> {
        fn take<C>(entries: &mut Vec<Entry<C>>, id: WatchId) -> Option<Option<(AbortSignal, AbortHook)>> {
            let pos = entries.iter().position(|e| e.id == id)?;
            Some(entries.remove(pos).hook)
        }

        if let Some(hook) = take(&mut self.any, id).or_else(|| take(&mut self.any_deferred, id)) {
            return Some(hook);
        }
        let mut found = None;
        self.immediate.retain(|_, entries| {
            if found.is_none() {
                found = take(entries, id);
            }
            !entries.is_empty()
        });
        if found.is_none() {
            self.deferred.retain(|_, entries| {
                if found.is_none() {
                    found = take(entries, id);
                }
                !entries.is_empty()
            });
        }
        found
    }

    fn stash(&mut self, event: &str, data: T) {
        match self.pending.iter_mut().find(|(name, _)| name == event) {
            Some(slot) => slot.1 = data,
            None => self.pending.push((event.to_string(), data)),
        }
    }

    fn wants_deferred(&self, event: &str) -> bool {
        !self.any_deferred.is_empty() || self.deferred.contains_key(event)
    }
}

struct Shared<T> {
    registry: RefCell<Option<Registry<T>>>,
    next_id: Cell<u64>,
    queue: TurnQueue,
}

// ── Watchable ───────────────────────────────────────────────────────────────

/// A named-event handler registry.
///
/// Cloning yields another handle to the same registry.
pub struct Watchable<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Clone for Watchable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + 'static> Watchable<T> {
    /// Create a watchable whose deferred deliveries run on `queue`.
    #[must_use]
    pub fn new(queue: &TurnQueue) -> Self {
        Self {
            shared: Rc::new(Shared {
                registry: RefCell::new(None),
                next_id: Cell::new(0),
                queue: queue.clone(),
            }),
        }
    }

    /// Register `handler` for `event`.
    ///
    /// If `options.signal` has already aborted the handler is never
    /// registered; the returned id is then inert.
    pub fn watch(&self, event: &str, options: WatchOptions, handler: impl Fn(&T) + 'static) -> WatchId {
        let handler: Rc<dyn Fn(&T)> = Rc::new(handler);
        if options.deferred {
            self.insert(options, |registry, entry| {
                registry
                    .deferred
                    .entry(event.to_string())
                    .or_default()
                    .push(entry.map(Deferred::Event(handler)));
            })
        } else {
            self.insert(options, |registry, entry| {
                registry
                    .immediate
                    .entry(event.to_string())
                    .or_default()
                    .push(entry.map(Immediate::Event(handler)));
            })
        }
    }

    /// Register an immediate handler for every event.
    ///
    /// `options.deferred` is ignored; use [`watch_batch`](Self::watch_batch)
    /// for deferred wildcard delivery.
    pub fn watch_any(&self, options: WatchOptions, handler: impl Fn(&str, &T) + 'static) -> WatchId {
        let handler: Rc<dyn Fn(&str, &T)> = Rc::new(handler);
        self.insert(options, |registry, entry| {
            registry.any.push(entry.map(Immediate::Any(handler)));
        })
    }

    /// Register a deferred handler for every event.
    ///
    /// Each delivery carries every event notified since the previous one,
    /// paired with its latest payload.
    pub fn watch_batch(&self, options: WatchOptions, handler: impl Fn(&[(String, T)]) + 'static) -> WatchId {
        let handler: Rc<dyn Fn(&[(String, T)])> = Rc::new(handler);
        self.insert(options, |registry, entry| {
            registry.any_deferred.push(entry.map(Deferred::Batch(handler)));
        })
    }

    fn insert(&self, options: WatchOptions, place: impl FnOnce(&mut Registry<T>, PendingEntry)) -> WatchId {
        let id = WatchId(self.shared.next_id.get());
        self.shared.next_id.set(id.0 + 1);

        let hook = match options.signal {
            Some(signal) => {
                let weak = Rc::downgrade(&self.shared);
                let hook = signal.on_abort(move || {
                    if let Some(shared) = weak.upgrade() {
                        Watchable { shared }.unwatch(id);
                    }
                });
                match hook {
                    Some(hook) => Some((signal, hook)),
                    None => return id,
                }
            }
            None => None,
        };

        let mut slot = self.shared.registry.borrow_mut();
        let registry = slot.get_or_insert_with(Registry::default);
        place(
            registry,
            PendingEntry {
                id,
                once: options.once,
                hook,
            },
        );
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unwatch(&self, id: WatchId) -> bool {
        let hook = {
            let mut slot = self.shared.registry.borrow_mut();
            let Some(registry) = slot.as_mut() else {
                return false;
            };
            let Some(hook) = registry.remove(id) else {
                return false;
            };
            if registry.is_empty() {
                *slot = None;
            }
            hook
        };
        if let Some((signal, hook)) = hook {
            signal.forget(hook);
        }
        true
    }

    /// Deliver `data` for `event`.
    ///
    /// Immediate handlers run now; deferred handlers are scheduled for the
    /// end of the turn with the latest payload.
    pub fn notify(&self, event: &str, data: T) {
        let (calls, schedule) = {
            let mut slot = self.shared.registry.borrow_mut();
            let Some(registry) = slot.as_mut() else {
                return;
            };
            let calls: Vec<(WatchId, bool, Immediate<T>)> = registry
                .immediate
                .get(event)
                .into_iter()
                .flatten()
                .chain(registry.any.iter())
                .map(|e| (e.id, e.once, e.callback.clone()))
                .collect();
            let schedule = if registry.wants_deferred(event) {
                registry.stash(event, data.clone());
                !std::mem::replace(&mut registry.scheduled, true)
            } else {
                false
            };
            (calls, schedule)
        };

        if schedule {
            let weak = Rc::downgrade(&self.shared);
            self.shared.queue.defer(move || deliver_deferred(weak));
        }

        for (id, once, callback) in calls {
            if !self.claim(id, once) {
                continue;
            }
            match callback {
                Immediate::Event(f) => f(&data),
                Immediate::Any(f) => f(event, &data),
            }
        }
    }

    /// Resolves with the next payload delivered for `event`.
    ///
    /// Fails with [`Aborted`] if `signal` aborts first (or already has), or
    /// if this watchable is dropped while waiting.
    pub fn wait_for(&self, event: &str, signal: Option<&AbortSignal>) -> LocalBoxFuture<'static, Result<T, Aborted>> {
        let (tx, rx) = oneshot::channel::<Result<T, Aborted>>();
        let tx = Rc::new(RefCell::new(Some(tx)));

        let mut options = WatchOptions::new().once();
        let mut reject_hook = None;
        match signal {
            Some(signal) if signal.is_aborted() => {
                if let Some(tx) = tx.borrow_mut().take() {
                    let _ = tx.send(Err(Aborted));
                }
            }
            Some(signal) => {
                let reject = tx.clone();
                let hook = signal.on_abort(move || {
                    if let Some(tx) = reject.borrow_mut().take() {
                        let _ = tx.send(Err(Aborted));
                    }
                });
                reject_hook = hook.map(|hook| (signal.clone(), hook));
                options = options.signal(signal.clone());
            }
            None => {}
        }

        if tx.borrow().is_some() {
            self.watch(event, options, move |data| {
                if let Some((signal, hook)) = &reject_hook {
                    signal.forget(*hook);
                }
                if let Some(tx) = tx.borrow_mut().take() {
                    let _ = tx.send(Ok(data.clone()));
                }
            });
        }

        async move { rx.await.unwrap_or(Err(Aborted)) }.boxed_local()
    }

    /// Returns `true` if any handler would see `event`.
    #[must_use]
    pub fn is_watched(&self, event: &str) -> bool {
        self.shared.registry.borrow().as_ref().is_some_and(|r| {
            r.immediate.contains_key(event)
                || r.deferred.contains_key(event)
                || !r.any.is_empty()
                || !r.any_deferred.is_empty()
        })
    }

    /// Returns `true` if a deferred delivery for `event` is waiting.
    #[must_use]
    pub fn is_queued(&self, event: &str) -> bool {
        self.shared
            .registry
            .borrow()
            .as_ref()
            .is_some_and(|r| r.pending.iter().any(|(name, _)| name == event))
    }

    /// Returns `true` if no handler is registered at all.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.shared.registry.borrow().is_none()
    }

    /// Decide whether a snapshotted handler still runs.
    ///
    /// One-shot handlers are unregistered before they run; handlers removed
    /// earlier in the same dispatch are skipped.
    fn claim(&self, id: WatchId, once: bool) -> bool {
        if once {
            self.unwatch(id)
        } else {
            self.shared
                .registry
                .borrow()
                .as_ref()
                .is_some_and(|r| r.contains(id))
        }
    }
}

fn deliver_deferred<T: Clone + 'static>(weak: Weak<Shared<T>>) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let watchable = Watchable { shared };

    let (batch, calls) = {
        let mut slot = watchable.shared.registry.borrow_mut();
        let Some(registry) = slot.as_mut() else {
            return;
        };
        registry.scheduled = false;
        let batch = std::mem::take(&mut registry.pending);
        let mut calls: Vec<(WatchId, bool, Deferred<T>, Option<usize>)> = Vec::new();
        for (index, (event, _)) in batch.iter().enumerate() {
            if let Some(entries) = registry.deferred.get(event) {
                calls.extend(entries.iter().map(|e| (e.id, e.once, e.callback.clone(), Some(index))));
            }
        }
        calls.extend(
            registry
                .any_deferred
                .iter()
                .map(|e| (e.id, e.once, e.callback.clone(), None)),
        );
        (batch, calls)
    };

    if batch.is_empty() {
        return;
    }

    for (id, once, callback, index) in calls {
        if !watchable.claim(id, once) {
            continue;
        }
        match (callback, index) {
            (Deferred::Event(f), Some(index)) => f(&batch[index].1),
            (Deferred::Batch(f), _) => f(&batch),
            (Deferred::Event(_), None) => {}
        }
    }
}

struct PendingEntry {
    id: WatchId,
    once: bool,
    hook: Option<(AbortSignal, AbortHook)>,
}

impl PendingEntry {
    fn map<C>(self, callback: C) -> Entry<C> {
        Entry {
            id: self.id,
            once: self.once,
            callback,
            hook: self.hook,
        }
    }
}

impl<T> fmt::Debug for Watchable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.shared.registry.borrow();
        let mut s = f.debug_struct("Watchable");
        match registry.as_ref() {
            Some(r) => s
                .field("events", &(r.immediate.len() + r.deferred.len()))
                .field("wildcards", &(r.any.len() + r.any_deferred.len()))
                .field("pending", &r.pending.len()),
            None => s.field("events", &0usize),
        };
        s.finish()
    }
}

// ── Observable mixin ────────────────────────────────────────────────────────

/// Gives a type the [`Watchable`] surface by pointing at the registry it owns.
pub trait Observable {
    /// The payload carried by this type's events.
    type Payload: Clone + 'static;

    /// The registry backing this type's events.
    fn watchable(&self) -> &Watchable<Self::Payload>;

    /// See [`Watchable::watch`].
    fn watch(&self, event: &str, options: WatchOptions, handler: impl Fn(&Self::Payload) + 'static) -> WatchId {
        self.watchable().watch(event, options, handler)
    }

    /// See [`Watchable::watch_any`].
    fn watch_any(&self, options: WatchOptions, handler: impl Fn(&str, &Self::Payload) + 'static) -> WatchId {
        self.watchable().watch_any(options, handler)
    }

    /// See [`Watchable::watch_batch`].
    fn watch_batch(
        &self,
        options: WatchOptions,
        handler: impl Fn(&[(String, Self::Payload)]) + 'static,
    ) -> WatchId {
        self.watchable().watch_batch(options, handler)
    }

    /// See [`Watchable::unwatch`].
    fn unwatch(&self, id: WatchId) -> bool {
        self.watchable().unwatch(id)
    }

    /// See [`Watchable::wait_for`].
    fn wait_for(&self, event: &str, signal: Option<&AbortSignal>) -> LocalBoxFuture<'static, Result<Self::Payload, Aborted>> {
        self.watchable().wait_for(event, signal)
    }

    /// See [`Watchable::is_watched`].
    fn is_watched(&self, event: &str) -> bool {
        self.watchable().is_watched(event)
    }

    /// See [`Watchable::is_queued`].
    fn is_queued(&self, event: &str) -> bool {
        self.watchable().is_queued(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::AbortController;

    fn log() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_immediate_handlers_run_in_registration_order() {
        let queue = TurnQueue::default();
        let events = Watchable::<i32>::new(&queue);
        let seen = log();
        for name in ["a", "b", "c"] {
            let seen = seen.clone();
            events.watch("tick", WatchOptions::new(), move |n| {
                seen.borrow_mut().push(format!("{name}{n}"));
            });
        }
        events.notify("tick", 1);
        events.notify("other", 2);
        assert_eq!(*seen.borrow(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn test_deferred_delivers_latest_payload_once() {
        let queue = TurnQueue::default();
        let events = Watchable::<i32>::new(&queue);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        events.watch("tick", WatchOptions::new().deferred(), move |n| sink.borrow_mut().push(*n));

        events.notify("tick", 1);
        events.notify("tick", 2);
        events.notify("tick", 3);
        assert!(seen.borrow().is_empty());
        assert!(events.is_queued("tick"));

        queue.flush();
        assert_eq!(*seen.borrow(), vec![3]);
        assert!(!events.is_queued("tick"));
    }

    #[test]
    fn test_deferred_batch_keeps_distinct_events() {
        let queue = TurnQueue::default();
        let events = Watchable::<i32>::new(&queue);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        events.watch_batch(WatchOptions::new(), move |batch| sink.borrow_mut().push(batch.to_vec()));

        events.notify("a", 1);
        events.notify("b", 2);
        events.notify("a", 3);
        queue.flush();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], vec![("a".to_string(), 3), ("b".to_string(), 2)]);
    }

    #[test]
    fn test_wildcard_sees_every_event() {
        let queue = TurnQueue::default();
        let events = Watchable::<i32>::new(&queue);
        let seen = log();
        let sink = seen.clone();
        events.watch_any(WatchOptions::new(), move |name, n| sink.borrow_mut().push(format!("{name}={n}")));
        events.notify("x", 1);
        events.notify("y", 2);
        assert_eq!(*seen.borrow(), vec!["x=1", "y=2"]);
        assert!(events.is_watched("anything"));
    }

    #[test]
    fn test_once_handler_runs_once() {
        let queue = TurnQueue::default();
        let events = Watchable::<i32>::new(&queue);
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        events.watch("tick", WatchOptions::new().once(), move |_| counter.set(counter.get() + 1));
        events.notify("tick", 1);
        events.notify("tick", 2);
        assert_eq!(hits.get(), 1);
        assert!(events.is_idle());
    }

    #[test]
    fn test_signal_unregisters_handler() {
        let queue = TurnQueue::default();
        let events = Watchable::<i32>::new(&queue);
        let controller = AbortController::new();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        events.watch(
            "tick",
            WatchOptions::new().signal(controller.signal()),
            move |_| counter.set(counter.get() + 1),
        );
        events.notify("tick", 1);
        controller.abort();
        controller.abort();
        events.notify("tick", 2);
        assert_eq!(hits.get(), 1);
        assert!(!events.is_watched("tick"));
    }

    #[test]
    fn test_aborted_signal_never_registers() {
        let queue = TurnQueue::default();
        let events = Watchable::<i32>::new(&queue);
        let controller = AbortController::new();
        controller.abort();
        events.watch("tick", WatchOptions::new().signal(controller.signal()), |_| {});
        assert!(events.is_idle());
    }

    #[test]
    fn test_unwatch_releases_storage() {
        let queue = TurnQueue::default();
        let events = Watchable::<i32>::new(&queue);
        let id = events.watch("tick", WatchOptions::new(), |_| {});
        assert!(!events.is_idle());
        assert!(events.unwatch(id));
        assert!(!events.unwatch(id));
        assert!(events.is_idle());
    }

    #[test]
    fn test_handler_removed_mid_dispatch_is_skipped() {
        let queue = TurnQueue::default();
        let events = Watchable::<i32>::new(&queue);
        let hits = Rc::new(Cell::new(0));
        let victim = Rc::new(Cell::new(None));

        let remover_events = events.clone();
        let remover_victim = victim.clone();
        events.watch("tick", WatchOptions::new(), move |_| {
            if let Some(id) = remover_victim.get() {
                remover_events.unwatch(id);
            }
        });
        let counter = hits.clone();
        victim.set(Some(events.watch("tick", WatchOptions::new(), move |_| {
            counter.set(counter.get() + 1)
        })));

        events.notify("tick", 1);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_reentrant_notify_from_deferred_handler_runs_next_batch() {
        let queue = TurnQueue::default();
        let events = Watchable::<i32>::new(&queue);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let again = events.clone();
        events.watch("tick", WatchOptions::new().deferred(), move |n| {
            sink.borrow_mut().push(*n);
            if *n < 2 {
                again.notify("tick", n + 1);
            }
        });
        events.notify("tick", 0);
        queue.flush();
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_wait_for_resolves_with_payload() {
        let queue = TurnQueue::default();
        let events = Watchable::<i32>::new(&queue);
        let wait = events.wait_for("ready", None);
        events.notify("ready", 7);
        assert_eq!(wait.await, Ok(7));
        assert!(events.is_idle());
    }

    #[tokio::test]
    async fn test_wait_for_rejects_on_abort() {
        let queue = TurnQueue::default();
        let events = Watchable::<i32>::new(&queue);
        let controller = AbortController::new();
        let signal = controller.signal();
        let wait = events.wait_for("ready", Some(&signal));
        controller.abort();
        events.notify("ready", 7);
        assert_eq!(wait.await, Err(Aborted));
        assert!(events.is_idle());
    }

    #[tokio::test]
    async fn test_wait_for_drops_abort_hooks_once_resolved() {
        let queue = TurnQueue::default();
        let events = Watchable::<i32>::new(&queue);
        let controller = AbortController::new();
        let signal = controller.signal();
        for n in 0..100 {
            let wait = events.wait_for("ready", Some(&signal));
            events.notify("ready", n);
            assert_eq!(wait.await, Ok(n));
        }
        assert_eq!(signal.hook_count(), 0);
        assert!(events.is_idle());

        let pending = events.wait_for("ready", Some(&signal));
        assert_eq!(signal.hook_count(), 2);
        controller.abort();
        assert_eq!(pending.await, Err(Aborted));
        assert_eq!(signal.hook_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_with_aborted_signal_rejects_immediately() {
        let queue = TurnQueue::default();
        let events = Watchable::<i32>::new(&queue);
        let controller = AbortController::new();
        controller.abort();
        let signal = controller.signal();
        assert_eq!(events.wait_for("ready", Some(&signal)).await, Err(Aborted));
        assert!(events.is_idle());
    }
}
