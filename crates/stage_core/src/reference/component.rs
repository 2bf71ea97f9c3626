//! References to other components.

use std::fmt;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use stage_events::{Observable, WatchOptions, Watchable};

use crate::component::{Component, WeakComponent};
use crate::entity::{ComponentKey, Entity};
use crate::error::ReferenceError;
use crate::reference::{Lifecycle, ReferenceOptions, ReferenceState, release_with_referer};
use crate::stage::StageInner;

struct Inner {
    life: Lifecycle<WeakComponent>,
    target: ComponentKey,
}

/// A link to the component `(entity, type)`.
///
/// Resolves as soon as the target exists (immediately, if it already does)
/// and is destroyed when the target is deleted. The target is held weakly.
#[derive(Clone)]
pub struct ComponentReference {
    inner: Rc<Inner>,
}

impl ComponentReference {
    pub(crate) fn create(
        stage: &Rc<StageInner>,
        entity: Entity,
        kind: &str,
        options: ReferenceOptions,
    ) -> Self {
        let target = ComponentKey::new(entity, kind);
        let reference = Self {
            inner: Rc::new(Inner {
                life: Lifecycle::new(stage.next_reference_id(), options.referer, &stage.queue),
                target: target.clone(),
            }),
        };
        stage.component_refs.insert(reference.clone());

        let id = reference.id();
        let set = Rc::downgrade(stage);
        reference.inner.life.on_teardown(move || {
            if let Some(stage) = set.upgrade() {
                stage.component_refs.remove(id);
            }
        });

        let events = stage.components.events.clone();
        let weak = Rc::downgrade(&reference.inner);
        let on_delete = events.watch(&format!("component:delete:{target}"), WatchOptions::new(), move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.life.finish("destroy", ReferenceState::Destroyed);
            }
        });
        let unwatch = events.clone();
        reference.inner.life.on_teardown(move || {
            unwatch.unwatch(on_delete);
        });

        let weak = Rc::downgrade(&reference.inner);
        release_with_referer(stage, &reference.inner.life, move || {
            if let Some(inner) = weak.upgrade() {
                inner.life.finish("release", ReferenceState::Released);
            }
        });

        match stage.components.get(&target) {
            Some(component) => {
                reference.inner.life.resolve(component.downgrade());
            }
            None => {
                let weak = Rc::downgrade(&reference.inner);
                let on_add = events.watch(
                    &format!("component:add:{target}"),
                    WatchOptions::new().once(),
                    move |component: &Component| {
                        if let Some(inner) = weak.upgrade() {
                            inner.life.resolve(component.downgrade());
                        }
                    },
                );
                reference.inner.life.on_teardown(move || {
                    events.unwatch(on_add);
                });
            }
        }

        if let Some(signal) = options.signal {
            let weak = Rc::downgrade(&reference.inner);
            let hook = signal.on_abort(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.life.finish("release", ReferenceState::Released);
                }
            });
            match hook {
                Some(hook) => reference.inner.life.on_teardown(move || {
                    signal.forget(hook);
                }),
                None => {
                    reference.release();
                }
            }
        }

        reference
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.life.id
    }

    #[must_use]
    pub fn referer(&self) -> Option<&ComponentKey> {
        self.inner.life.referer.as_ref()
    }

    /// The `(entity, type)` this reference points at.
    #[must_use]
    pub fn target_key(&self) -> &ComponentKey {
        &self.inner.target
    }

    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.inner.target.entity
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.inner.target.kind
    }

    #[must_use]
    pub fn state(&self) -> ReferenceState {
        self.inner.life.state()
    }

    /// The target, while resolved and still alive.
    #[must_use]
    pub fn target(&self) -> Option<Component> {
        self.inner.life.target().and_then(|weak| weak.upgrade())
    }

    /// Release the reference. Returns `false` if it was already terminal.
    pub fn release(&self) -> bool {
        self.inner.life.finish("release", ReferenceState::Released)
    }

    /// Wait for the target.
    ///
    /// # Errors
    ///
    /// - [`ReferenceError::Aborted`] if the reference is released or
    ///   destroyed before it resolves.
    /// - [`ReferenceError::UnexpectedState`] if it is already terminal.
    pub fn get(&self) -> LocalBoxFuture<'static, Result<Component, ReferenceError>> {
        let wait = self.inner.life.wait();
        async move {
            let weak = wait.await?;
            weak.upgrade()
                .ok_or(ReferenceError::UnexpectedState(ReferenceState::Destroyed))
        }
        .boxed_local()
    }
}

impl Observable for ComponentReference {
    type Payload = ReferenceState;

    fn watchable(&self) -> &Watchable<ReferenceState> {
        &self.inner.life.events
    }
}

impl PartialEq for ComponentReference {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ComponentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentReference")
            .field("id", &self.id())
            .field("target", &self.inner.target)
            .field("referer", &self.inner.life.referer)
            .field("state", &self.state())
            .finish()
    }
}
