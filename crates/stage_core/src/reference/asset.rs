//! References to externally loaded assets, and the loader registry.
//!
//! An asset is addressed by `(uri, type)`, where `type` selects a loader.
//! The loader is called at most once per address; its future is shared, so
//! every reference to the same address resolves to the same [`Asset`].
//!
//! Under [`FlushPolicy::SpawnLocal`] each new load is driven by a local task
//! that resolves the waiting references when it completes. Under manual
//! flushing loads make progress while some reference's
//! [`get`](AssetReference::get) (or [`Stage::settle`](crate::Stage::settle))
//! is being awaited.
//!
//! Completed loads, failed ones included, stay cached per address until
//! [`Stage::evict_asset`](crate::Stage::evict_asset) or
//! [`Stage::unregister_loader`](crate::Stage::unregister_loader) drops them.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use futures::future::{self, Either, FutureExt, LocalBoxFuture, Shared};
use stage_events::{AbortController, AbortSignal, FlushPolicy, Observable, Watchable};
use tracing::{debug, trace, warn};

use crate::entity::ComponentKey;
use crate::error::{ReferenceError, StageError};
use crate::reference::{Lifecycle, ReferenceOptions, ReferenceState, release_with_referer};
use crate::stage::StageInner;

/// A loaded asset. Downcast with [`Rc::downcast`].
pub type Asset = Rc<dyn Any>;

/// Loads assets of one type.
pub trait AssetLoader {
    /// Start loading `uri`. The returned future should stop early once
    /// `signal` aborts.
    fn load(&self, uri: &str, signal: AbortSignal) -> LocalBoxFuture<'static, anyhow::Result<Asset>>;
}

impl<F> AssetLoader for F
where
    F: Fn(&str, AbortSignal) -> LocalBoxFuture<'static, anyhow::Result<Asset>>,
{
    fn load(&self, uri: &str, signal: AbortSignal) -> LocalBoxFuture<'static, anyhow::Result<Asset>> {
        self(uri, signal)
    }
}

/// Wrap an async function as a shareable [`AssetLoader`].
pub fn asset_loader<F, Fut>(load: F) -> Rc<dyn AssetLoader>
where
    F: Fn(String, AbortSignal) -> Fut + 'static,
    Fut: Future<Output = anyhow::Result<Asset>> + 'static,
{
    Rc::new(move |uri: &str, signal: AbortSignal| -> LocalBoxFuture<'static, anyhow::Result<Asset>> {
        load(uri.to_string(), signal).boxed_local()
    })
}

// ── Loader registry ─────────────────────────────────────────────────────────

type LoadResult = Result<Asset, Rc<anyhow::Error>>;
pub(crate) type SharedLoad = Shared<LocalBoxFuture<'static, LoadResult>>;

struct Load {
    future: SharedLoad,
    controller: AbortController,
}

/// Registered loaders and the in-flight/completed load per `(type, uri)`.
#[derive(Default)]
pub(crate) struct Loaders {
    loaders: RefCell<HashMap<String, Rc<dyn AssetLoader>>>,
    cache: RefCell<HashMap<(String, String), Load>>,
}

impl Loaders {
    pub(crate) fn register(&self, kind: &str, loader: Rc<dyn AssetLoader>) -> Result<(), StageError> {
        let mut loaders = self.loaders.borrow_mut();
        if let Some(existing) = loaders.get(kind) {
            if std::ptr::addr_eq(Rc::as_ptr(existing), Rc::as_ptr(&loader)) {
                return Ok(());
            }
            return Err(StageError::LoaderConflict(kind.to_string()));
        }
        loaders.insert(kind.to_string(), loader);
        debug!(kind, "asset loader registered");
        Ok(())
    }

    /// Remove a loader, aborting and evicting its loads.
    pub(crate) fn unregister(&self, kind: &str) -> bool {
        if self.loaders.borrow_mut().remove(kind).is_none() {
            return false;
        }
        let evicted: Vec<Load> = {
            let mut cache = self.cache.borrow_mut();
            let keys: Vec<(String, String)> = cache.keys().filter(|(k, _)| k == kind).cloned().collect();
            keys.iter().filter_map(|key| cache.remove(key)).collect()
        };
        for load in &evicted {
            load.controller.abort();
        }
        debug!(kind, evicted = evicted.len(), "asset loader unregistered");
        true
    }

    /// Abort and drop the cached load for `(kind, uri)`. The next reference
    /// to that address calls the loader again.
    pub(crate) fn evict(&self, kind: &str, uri: &str) -> bool {
        let evicted = self.cache.borrow_mut().remove(&(kind.to_string(), uri.to_string()));
        match evicted {
            Some(load) => {
                load.controller.abort();
                debug!(kind, uri, "asset evicted");
                true
            }
            None => false,
        }
    }

    pub(crate) fn contains(&self, kind: &str) -> bool {
        self.loaders.borrow().contains_key(kind)
    }

    /// The shared load for `(kind, uri)`, starting it if needed. The flag
    /// is `true` when this call started it.
    fn load(&self, kind: &str, uri: &str) -> Result<(SharedLoad, bool), StageError> {
        let key = (kind.to_string(), uri.to_string());
        if let Some(load) = self.cache.borrow().get(&key) {
            return Ok((load.future.clone(), false));
        }
        let loader = self
            .loaders
            .borrow()
            .get(kind)
            .cloned()
            .ok_or_else(|| StageError::MissingLoader(kind.to_string()))?;

        let controller = AbortController::new();
        let future = loader
            .load(uri, controller.signal())
            .map(|result| result.map_err(Rc::new))
            .boxed_local()
            .shared();
        self.cache.borrow_mut().insert(
            key,
            Load {
                future: future.clone(),
                controller,
            },
        );
        Ok((future, true))
    }

    pub(crate) fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.loaders.borrow().keys().cloned().collect();
        kinds.sort_unstable();
        kinds
    }
}

/// Run `load` on a local task and resolve every pending reference to its
/// address once it succeeds.
fn drive(stage: &Rc<StageInner>, kind: &str, uri: &str, load: SharedLoad) {
    let stage = Rc::downgrade(stage);
    let (kind, uri) = (kind.to_string(), uri.to_string());
    tokio::task::spawn_local(async move {
        match load.await {
            Ok(asset) => {
                trace!(%uri, %kind, "asset loaded");
                if let Some(stage) = stage.upgrade() {
                    stage.asset_refs.resolve_loaded(&kind, &uri, &asset);
                }
            }
            Err(err) => warn!(%uri, %kind, error = %err, "asset load failed"),
        }
    });
}

// ── AssetReference ──────────────────────────────────────────────────────────

struct Inner {
    life: Lifecycle<Asset>,
    uri: String,
    kind: String,
    load: SharedLoad,
    stage: Weak<StageInner>,
}

/// A link to the asset `(uri, type)`.
#[derive(Clone)]
pub struct AssetReference {
    inner: Rc<Inner>,
}

impl AssetReference {
    /// Create a reference, starting (or joining) the load for its address.
    ///
    /// Resolves immediately if the load already completed.
    pub(crate) fn create(
        stage: &Rc<StageInner>,
        uri: &str,
        kind: &str,
        options: ReferenceOptions,
    ) -> Result<Self, StageError> {
        let (load, started) = stage.loaders.load(kind, uri)?;
        let reference = Self {
            inner: Rc::new(Inner {
                life: Lifecycle::new(stage.next_reference_id(), options.referer, &stage.queue),
                uri: uri.to_string(),
                kind: kind.to_string(),
                load,
                stage: Rc::downgrade(stage),
            }),
        };
        stage.asset_refs.insert(reference.clone());

        let id = reference.id();
        let set = Rc::downgrade(stage);
        reference.inner.life.on_teardown(move || {
            if let Some(stage) = set.upgrade() {
                stage.asset_refs.remove(id);
            }
        });

        let weak = Rc::downgrade(&reference.inner);
        release_with_referer(stage, &reference.inner.life, move || {
            if let Some(inner) = weak.upgrade() {
                inner.life.finish("release", ReferenceState::Released);
            }
        });

        if let Some(Ok(asset)) = reference.inner.load.peek() {
            reference.inner.life.resolve(asset.clone());
        } else if started && stage.queue.policy() == FlushPolicy::SpawnLocal {
            drive(stage, kind, uri, reference.inner.load.clone());
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

        Ok(reference)
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.life.id
    }

    #[must_use]
    pub fn referer(&self) -> Option<&ComponentKey> {
        self.inner.life.referer.as_ref()
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    /// The loader key.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    #[must_use]
    pub fn state(&self) -> ReferenceState {
        self.inner.life.state()
    }

    /// The loaded asset, while resolved.
    #[must_use]
    pub fn target(&self) -> Option<Asset> {
        self.inner.life.target()
    }

    /// Release the reference. Returns `false` if it was already terminal.
    pub fn release(&self) -> bool {
        self.inner.life.finish("release", ReferenceState::Released)
    }

    /// Wait for the asset, driving its load.
    ///
    /// A successful load resolves every pending reference to the same
    /// address. A failed load leaves them pending.
    ///
    /// # Errors
    ///
    /// - [`ReferenceError::Load`] if the loader failed.
    /// - [`ReferenceError::Aborted`] if the reference is released first.
    /// - [`ReferenceError::UnexpectedState`] if it is already terminal.
    pub fn get(&self) -> LocalBoxFuture<'static, Result<Asset, ReferenceError>> {
        let wait = self.inner.life.wait();
        if self.state() != ReferenceState::Pending {
            return wait;
        }

        let load = self.inner.load.clone();
        let stage = self.inner.stage.clone();
        let (uri, kind) = (self.inner.uri.clone(), self.inner.kind.clone());
        async move {
            match future::select(wait, load).await {
                Either::Left((result, _)) => result,
                Either::Right((Ok(asset), wait)) => {
                    if let Some(stage) = stage.upgrade() {
                        stage.asset_refs.resolve_loaded(&kind, &uri, &asset);
                    }
                    wait.await
                }
                Either::Right((Err(err), _)) => {
                    warn!(%uri, %kind, error = %err, "asset load failed");
                    Err(ReferenceError::Load(err))
                }
            }
        }
        .boxed_local()
    }

    pub(crate) fn resolve(&self, asset: Asset) -> bool {
        self.inner.life.resolve(asset)
    }
}

impl Observable for AssetReference {
    type Payload = ReferenceState;

    fn watchable(&self) -> &Watchable<ReferenceState> {
        &self.inner.life.events
    }
}

impl PartialEq for AssetReference {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for AssetReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetReference")
            .field("id", &self.id())
            .field("uri", &self.inner.uri)
            .field("type", &self.inner.kind)
            .field("referer", &self.inner.life.referer)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use stage_events::AbortController;

    use super::*;
    use crate::{AssetReferenceQuery, ComponentData, Entity, Stage, StageConfig};

    fn counting_loader(calls: Rc<Cell<usize>>) -> Rc<dyn AssetLoader> {
        asset_loader(move |uri, _signal| {
            calls.set(calls.get() + 1);
            async move { anyhow::Ok(Rc::new(format!("loaded:{uri}")) as Asset) }
        })
    }

    fn text(asset: &Asset) -> String {
        asset.downcast_ref::<String>().cloned().unwrap_or_default()
    }

    #[test]
    fn test_missing_loader_fails_fast() {
        let stage = Stage::new();
        let err = stage
            .references()
            .assets()
            .create("a.txt", "text", ReferenceOptions::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "No asset loader registered for type text");
        assert_eq!(stage.references().assets().len(), 0);
    }

    #[test]
    fn test_loader_registration_rules() {
        let stage = Stage::new();
        let calls = Rc::new(Cell::new(0));
        let loader = counting_loader(calls.clone());
        stage.register_loader("text", loader.clone()).unwrap();
        stage.register_loader("text", loader).unwrap();
        let other = counting_loader(calls);
        assert!(matches!(
            stage.register_loader("text", other),
            Err(StageError::LoaderConflict(_))
        ));
        assert!(stage.unregister_loader("text"));
        assert!(!stage.unregister_loader("text"));
    }

    #[tokio::test]
    async fn test_shared_load_resolves_all_to_same_asset() {
        let stage = Stage::new();
        let calls = Rc::new(Cell::new(0));
        stage.register_loader("text", counting_loader(calls.clone())).unwrap();

        let assets = stage.references().assets();
        let first = assets.create("a.txt", "text", ReferenceOptions::new()).unwrap();
        let second = assets.create("a.txt", "text", ReferenceOptions::new()).unwrap();
        assert_eq!(first.state(), ReferenceState::Pending);

        let loaded = first.get().await.unwrap();
        assert_eq!(text(&loaded), "loaded:a.txt");
        assert_eq!(second.state(), ReferenceState::Resolved);
        let again = second.get().await.unwrap();
        assert!(Rc::ptr_eq(&loaded, &again));

        let late = assets.create("a.txt", "text", ReferenceOptions::new()).unwrap();
        assert_eq!(late.state(), ReferenceState::Resolved);
        assert_eq!(calls.get(), 1);
        assert_eq!(assets.count(&AssetReferenceQuery::new().uri("a.txt").kind("text")), 3);
    }

    #[tokio::test]
    async fn test_failed_load_leaves_reference_pending() {
        let stage = Stage::new();
        stage
            .register_loader(
                "text",
                asset_loader(|uri, _signal| async move { Err::<Asset, _>(anyhow::anyhow!("cannot read {uri}")) }),
            )
            .unwrap();
        let reference = stage
            .references()
            .assets()
            .create("x", "text", ReferenceOptions::new())
            .unwrap();
        let err = reference.get().await.unwrap_err();
        assert!(matches!(err, ReferenceError::Load(_)));
        assert!(err.to_string().contains("cannot read x"));
        assert_eq!(reference.state(), ReferenceState::Pending);
    }

    #[tokio::test]
    async fn test_release_before_load_aborts() {
        let stage = Stage::new();
        stage.register_loader("text", counting_loader(Rc::new(Cell::new(0)))).unwrap();
        let controller = AbortController::new();
        let reference = stage
            .references()
            .assets()
            .create("a", "text", ReferenceOptions::new().with_signal(controller.signal()))
            .unwrap();
        controller.abort();
        assert_eq!(reference.state(), ReferenceState::Aborted);
        assert!(matches!(
            reference.get().await,
            Err(ReferenceError::UnexpectedState(ReferenceState::Aborted))
        ));
        assert_eq!(stage.references().assets().len(), 0);
    }

    #[test]
    fn test_unregister_aborts_inflight_loads() {
        let stage = Stage::new();
        let seen = Rc::new(RefCell::new(None::<AbortSignal>));
        let sink = seen.clone();
        stage
            .register_loader(
                "text",
                asset_loader(move |_uri, signal| {
                    *sink.borrow_mut() = Some(signal.clone());
                    async move {
                        signal.aborted().await;
                        Err::<Asset, _>(anyhow::anyhow!("aborted"))
                    }
                }),
            )
            .unwrap();
        stage
            .references()
            .assets()
            .create("a", "text", ReferenceOptions::new())
            .unwrap();
        stage.unregister_loader("text");
        assert!(seen.borrow().as_ref().is_some_and(AbortSignal::is_aborted));
    }

    #[tokio::test]
    async fn test_spawn_local_resolves_without_get() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let stage = Stage::with_config(StageConfig::new().with_flush(FlushPolicy::SpawnLocal));
                let calls = Rc::new(Cell::new(0));
                stage.register_loader("text", counting_loader(calls.clone())).unwrap();
                let reference = stage
                    .references()
                    .assets()
                    .create("a.txt", "text", ReferenceOptions::new())
                    .unwrap();
                let joined = stage
                    .references()
                    .assets()
                    .create("a.txt", "text", ReferenceOptions::new())
                    .unwrap();
                let fired = Rc::new(Cell::new(0));
                let counter = fired.clone();
                reference.watch("resolve", Default::default(), move |_| counter.set(counter.get() + 1));
                assert_eq!(reference.state(), ReferenceState::Pending);

                for _ in 0..10 {
                    if fired.get() > 0 {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                assert_eq!(fired.get(), 1);
                assert_eq!(reference.state(), ReferenceState::Resolved);
                assert_eq!(joined.state(), ReferenceState::Resolved);
                assert_eq!(reference.target().map(|a| text(&a)), Some("loaded:a.txt".to_string()));
                assert_eq!(calls.get(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_evict_forces_reload() {
        let stage = Stage::new();
        let calls = Rc::new(Cell::new(0));
        stage.register_loader("text", counting_loader(calls.clone())).unwrap();
        let assets = stage.references().assets();

        let first = assets.create("a.txt", "text", ReferenceOptions::new()).unwrap();
        let loaded = first.get().await.unwrap();
        first.release();
        assert!(stage.evict_asset("text", "a.txt"));
        assert!(!stage.evict_asset("text", "a.txt"));

        let second = assets.create("a.txt", "text", ReferenceOptions::new()).unwrap();
        assert_eq!(second.state(), ReferenceState::Pending);
        let reloaded = second.get().await.unwrap();
        assert!(!Rc::ptr_eq(&loaded, &reloaded));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_deleting_referer_releases() {
        let stage = Stage::new();
        stage.register_loader("text", counting_loader(Rc::new(Cell::new(0)))).unwrap();
        let holder = stage.components().add(ComponentData::new("A", "holder")).unwrap();
        let reference = stage
            .references()
            .assets()
            .create("a.txt", "text", ReferenceOptions::new().with_referer(holder.key().clone()))
            .unwrap();
        assert_eq!(stage.references().assets().len(), 1);

        stage.components().delete(&Entity::from("A"), "holder");
        assert_eq!(reference.state(), ReferenceState::Aborted);
        assert_eq!(stage.references().assets().len(), 0);
    }
}
