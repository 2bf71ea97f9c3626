//! The store facade.
//!
//! A [`Stage`] owns the schema registry, the asset loaders, the component
//! set and both reference sets, all sharing one [`TurnQueue`] for deferred
//! notifications. Handles are cheap to clone and single-threaded.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use stage_events::TurnQueue;
use stage_schema::{Schema, SchemaError, SchemaRegistry};
use tracing::{debug, info};

use crate::component::set::{ComponentSet, Components, Registrar};
use crate::component::{Component, ComponentData};
use crate::config::StageConfig;
use crate::error::StageError;
use crate::reference::ReferenceState;
use crate::reference::asset::{AssetLoader, AssetReference, Loaders};
use crate::reference::component::ComponentReference;
use crate::reference::set::{ReferenceSet, References};

pub(crate) struct StageInner {
    pub(crate) config: StageConfig,
    pub(crate) queue: TurnQueue,
    pub(crate) schemas: RefCell<SchemaRegistry>,
    pub(crate) loaders: Loaders,
    pub(crate) components: ComponentSet,
    pub(crate) component_refs: ReferenceSet<ComponentReference>,
    pub(crate) asset_refs: ReferenceSet<AssetReference>,
    pub(crate) registrar: RefCell<Option<Rc<dyn Registrar>>>,
    next_reference: Cell<u64>,
}

impl StageInner {
    pub(crate) fn next_reference_id(&self) -> u64 {
        let id = self.next_reference.get();
        self.next_reference.set(id + 1);
        id
    }
}

/// A reactive component store.
#[derive(Clone)]
pub struct Stage {
    inner: Rc<StageInner>,
}

impl Stage {
    /// A store with the default configuration (manual flushing).
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StageConfig::default())
    }

    #[must_use]
    pub fn with_config(config: StageConfig) -> Self {
        let queue = TurnQueue::new(config.flush);
        Self {
            inner: Rc::new(StageInner {
                components: ComponentSet::new(&queue),
                component_refs: ReferenceSet::new(&queue),
                asset_refs: ReferenceSet::new(&queue),
                schemas: RefCell::new(SchemaRegistry::new()),
                loaders: Loaders::default(),
                registrar: RefCell::new(None),
                next_reference: Cell::new(0),
                config,
                queue,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StageConfig {
        &self.inner.config
    }

    /// The queue deferred notifications are parked on.
    #[must_use]
    pub fn queue(&self) -> &TurnQueue {
        &self.inner.queue
    }

    // ── Schemas ─────────────────────────────────────────────────────────

    /// Register the schema for a component type, returning the one it
    /// replaces. Components already stored keep the schema they were
    /// added with.
    pub fn register_schema(&self, kind: impl Into<String>, schema: Schema) -> Option<Rc<Schema>> {
        let kind = kind.into();
        debug!(%kind, "schema registered");
        self.inner.schemas.borrow_mut().register(kind, schema)
    }

    pub fn unregister_schema(&self, kind: &str) -> Option<Rc<Schema>> {
        self.inner.schemas.borrow_mut().unregister(kind)
    }

    #[must_use]
    pub fn schema(&self, kind: &str) -> Option<Rc<Schema>> {
        self.inner.schemas.borrow().get(kind)
    }

    /// Register every schema in a `{type: descriptor}` document.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the document is not an object or any
    /// descriptor is invalid; nothing is registered in that case.
    pub fn load_schemas(&self, document: Value) -> Result<usize, SchemaError> {
        let count = self.inner.schemas.borrow_mut().load_json(document)?;
        info!(count, "schemas loaded");
        Ok(count)
    }

    // ── Asset loaders ───────────────────────────────────────────────────

    /// Register the loader for an asset type.
    ///
    /// Registering the same loader twice is a no-op.
    ///
    /// # Errors
    ///
    /// [`StageError::LoaderConflict`] if a different loader already holds
    /// `kind`.
    pub fn register_loader(&self, kind: &str, loader: Rc<dyn AssetLoader>) -> Result<(), StageError> {
        self.inner.loaders.register(kind, loader)
    }

    /// Remove a loader, aborting its in-flight loads and dropping its
    /// cached assets. References already created are left as they are.
    pub fn unregister_loader(&self, kind: &str) -> bool {
        self.inner.loaders.unregister(kind)
    }

    /// Drop the cached load for `(kind, uri)`, aborting it if still in
    /// flight.
    ///
    /// Loads, failed ones included, are otherwise kept for the life of
    /// their loader even once no reference holds them. The next reference
    /// to the address calls the loader again; references already created
    /// keep the load they joined.
    pub fn evict_asset(&self, kind: &str, uri: &str) -> bool {
        self.inner.loaders.evict(kind, uri)
    }

    /// Registered loader keys, sorted.
    #[must_use]
    pub fn loader_kinds(&self) -> Vec<String> {
        self.inner.loaders.kinds()
    }

    // ── Views ───────────────────────────────────────────────────────────

    /// Install the hook told about every component add and delete.
    pub fn set_registrar(&self, registrar: Rc<dyn Registrar>) {
        *self.inner.registrar.borrow_mut() = Some(registrar);
    }

    #[must_use]
    pub fn components(&self) -> Components<'_> {
        Components { stage: &self.inner }
    }

    #[must_use]
    pub fn references(&self) -> References<'_> {
        References { stage: &self.inner }
    }

    // ── Turns ───────────────────────────────────────────────────────────

    /// Deliver every deferred notification. Returns the number of
    /// delivery jobs that ran.
    pub fn flush(&self) -> usize {
        self.inner.queue.flush()
    }

    /// Flush, then drive every pending asset load, until neither makes
    /// progress. Under [`FlushPolicy::SpawnLocal`](stage_events::FlushPolicy)
    /// loads are also driven by local tasks, so this only waits for them.
    ///
    /// Failed loads leave their references pending. A loader whose future
    /// never completes keeps this from returning.
    pub async fn settle(&self) {
        loop {
            self.flush();
            let mut resolved = 0;
            for reference in self.inner.asset_refs.pending() {
                if reference.state() != ReferenceState::Pending {
                    continue;
                }
                if reference.get().await.is_ok() {
                    resolved += 1;
                }
            }
            tokio::task::yield_now().await;
            if resolved == 0 && self.inner.queue.is_empty() {
                break;
            }
            debug!(resolved, "settle pass");
        }
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Every component in wire form, in add order, with default values
    /// elided.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ComponentData> {
        self.components().iter().map(|c| c.to_json()).collect()
    }

    /// Add components in order.
    ///
    /// # Errors
    ///
    /// Stops at the first component that fails to add; the ones before it
    /// stay in the store.
    pub fn load(&self, components: impl IntoIterator<Item = ComponentData>) -> Result<Vec<Component>, StageError> {
        let added = components
            .into_iter()
            .map(|data| self.components().add(data))
            .collect::<Result<Vec<_>, _>>()?;
        info!(count = added.len(), "components loaded");
        Ok(added)
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("config", &self.inner.config)
            .field("schemas", &self.inner.schemas.borrow().len())
            .field("components", &self.inner.components.len())
            .field("component_refs", &self.inner.component_refs.len())
            .field("asset_refs", &self.inner.asset_refs.len())
            .field("queue", &self.inner.queue)
            .finish()
    }
}
