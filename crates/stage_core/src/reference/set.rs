//! The global reference sets and their query surface.
//!
//! Every live (pending or resolved) reference is held by its set, indexed
//! by target identity so consumers can count how many references point at
//! a component or an asset. Set events (payload: [`ReferenceEvent`] with
//! the post-operation size of the event's bucket):
//!
//! - component references: `reference:add`, `reference:add:{entity}`,
//!   `reference:add:{entity}:{type}`
//! - asset references: `reference:add`, `reference:add:{type}`,
//!   `reference:add:{type}:{uri}`
//!
//! and the matching `reference:release*` events when a reference leaves
//! the set.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use stage_events::{Observable, TurnQueue, Watchable};

use crate::entity::{ComponentKey, Entity};
use crate::error::StageError;
use crate::index::Buckets;
use crate::reference::asset::{Asset, AssetReference};
use crate::reference::component::ComponentReference;
use crate::reference::{ReferenceEvent, ReferenceOptions, ReferenceState};
use crate::stage::StageInner;

/// A reference kind a [`ReferenceSet`] can index.
pub(crate) trait Tracked: Clone + 'static {
    fn id(&self) -> u64;

    /// One `(bucket key, fires events)` pair per index axis, in a fixed
    /// order.
    fn index_keys(&self) -> Vec<(String, bool)>;
}

impl Tracked for ComponentReference {
    fn id(&self) -> u64 {
        ComponentReference::id(self)
    }

    fn index_keys(&self) -> Vec<(String, bool)> {
        vec![
            (self.entity().to_string(), true),
            (self.target_key().to_string(), true),
        ]
    }
}

const BY_ENTITY: usize = 0;
const BY_TARGET: usize = 1;

impl Tracked for AssetReference {
    fn id(&self) -> u64 {
        AssetReference::id(self)
    }

    fn index_keys(&self) -> Vec<(String, bool)> {
        vec![
            (self.kind().to_string(), true),
            (format!("{}:{}", self.kind(), self.uri()), true),
            (self.uri().to_string(), false),
        ]
    }
}

const BY_TYPE: usize = 0;
const BY_ADDRESS: usize = 1;
const BY_URI: usize = 2;

// ── Storage ─────────────────────────────────────────────────────────────────

struct SetState<R> {
    all: BTreeMap<u64, R>,
    axes: Vec<Buckets>,
}

pub(crate) struct ReferenceSet<R: Tracked> {
    state: RefCell<SetState<R>>,
    pub(crate) events: Watchable<ReferenceEvent<R>>,
}

impl<R: Tracked> ReferenceSet<R> {
    pub(crate) fn new(queue: &TurnQueue) -> Self {
        Self {
            state: RefCell::new(SetState {
                all: BTreeMap::new(),
                axes: Vec::new(),
            }),
            events: Watchable::new(queue),
        }
    }

    pub(crate) fn insert(&self, reference: R) {
        let keys = reference.index_keys();
        let (total, counts) = {
            let mut state = self.state.borrow_mut();
            let id = reference.id();
            state.all.insert(id, reference.clone());
            if state.axes.len() < keys.len() {
                state.axes.resize_with(keys.len(), Buckets::default);
            }
            let counts: Vec<(String, usize)> = keys
                .into_iter()
                .zip(state.axes.iter_mut())
                .filter_map(|((key, events), axis)| {
                    let count = axis.insert(&key, id);
                    events.then_some((key, count))
                })
                .collect();
            (state.all.len(), counts)
        };
        self.emit("reference:add", &reference, total, counts);
    }

    /// Drop the reference with `id`. Returns `false` if it was not held.
    pub(crate) fn remove(&self, id: u64) -> bool {
        let (reference, total, counts) = {
            let mut state = self.state.borrow_mut();
            let Some(reference) = state.all.remove(&id) else {
                return false;
            };
            let counts: Vec<(String, usize)> = reference
                .index_keys()
                .into_iter()
                .zip(state.axes.iter_mut())
                .filter_map(|((key, events), axis)| {
                    let count = axis.remove(&key, id);
                    events.then_some((key, count))
                })
                .collect();
            (reference, state.all.len(), counts)
        };
        self.emit("reference:release", &reference, total, counts);
        true
    }

    fn emit(&self, event: &str, reference: &R, total: usize, counts: Vec<(String, usize)>) {
        self.events.notify(
            event,
            ReferenceEvent {
                reference: reference.clone(),
                count: total,
            },
        );
        for (key, count) in counts {
            self.events.notify(
                &format!("{event}:{key}"),
                ReferenceEvent {
                    reference: reference.clone(),
                    count,
                },
            );
        }
    }

    /// Snapshot of the members of `key` on `axis`, in creation order.
    fn members(&self, axis: usize, key: &str) -> Vec<R> {
        let state = self.state.borrow();
        state
            .axes
            .get(axis)
            .map(|buckets| buckets.members(key))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| state.all.get(&id).cloned())
            .collect()
    }

    fn all(&self) -> Vec<R> {
        self.state.borrow().all.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.borrow().all.len()
    }
}

impl ReferenceSet<AssetReference> {
    /// Resolve every pending reference to `(kind, uri)` with `asset`.
    pub(crate) fn resolve_loaded(&self, kind: &str, uri: &str, asset: &Asset) {
        for reference in self.members(BY_ADDRESS, &format!("{kind}:{uri}")) {
            if reference.state() == ReferenceState::Pending {
                reference.resolve(asset.clone());
            }
        }
    }

    pub(crate) fn pending(&self) -> Vec<AssetReference> {
        self.all()
            .into_iter()
            .filter(|r| r.state() == ReferenceState::Pending)
            .collect()
    }
}

// ── Queries ─────────────────────────────────────────────────────────────────

/// A filter over component references by target. Empty fields match
/// anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentReferenceQuery {
    pub entity: Option<Entity>,
    pub kind: Option<String>,
}

impl ComponentReferenceQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entity(mut self, entity: impl Into<Entity>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    fn select(&self, set: &ReferenceSet<ComponentReference>) -> Vec<ComponentReference> {
        match (&self.entity, &self.kind) {
            (Some(entity), Some(kind)) => {
                set.members(BY_TARGET, &ComponentKey::new(entity.clone(), kind.clone()).to_string())
            }
            (Some(entity), None) => set.members(BY_ENTITY, entity.as_str()),
            (None, Some(kind)) => set.all().into_iter().filter(|r| r.kind() == kind).collect(),
            (None, None) => set.all(),
        }
    }
}

/// A filter over asset references by address. Empty fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetReferenceQuery {
    pub uri: Option<String>,
    pub kind: Option<String>,
}

impl AssetReferenceQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Filter by loader key.
    #[must_use]
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    fn select(&self, set: &ReferenceSet<AssetReference>) -> Vec<AssetReference> {
        match (&self.uri, &self.kind) {
            (Some(uri), Some(kind)) => set.members(BY_ADDRESS, &format!("{kind}:{uri}")),
            (None, Some(kind)) => set.members(BY_TYPE, kind),
            (Some(uri), None) => set.members(BY_URI, uri),
            (None, None) => set.all(),
        }
    }
}

// ── Public views ────────────────────────────────────────────────────────────

/// Both reference sets, borrowed from a [`Stage`](crate::Stage).
pub struct References<'a> {
    pub(crate) stage: &'a Rc<StageInner>,
}

impl<'a> References<'a> {
    #[must_use]
    pub fn components(&self) -> ComponentReferences<'a> {
        ComponentReferences { stage: self.stage }
    }

    #[must_use]
    pub fn assets(&self) -> AssetReferences<'a> {
        AssetReferences { stage: self.stage }
    }
}

/// Every live component reference.
pub struct ComponentReferences<'a> {
    stage: &'a Rc<StageInner>,
}

impl ComponentReferences<'_> {
    /// Create a free-standing reference to `(entity, kind)`.
    pub fn create(&self, entity: impl Into<Entity>, kind: &str, options: ReferenceOptions) -> ComponentReference {
        ComponentReference::create(self.stage, entity.into(), kind, options)
    }

    /// References matching `query`, in creation order.
    pub fn find(&self, query: &ComponentReferenceQuery) -> impl Iterator<Item = ComponentReference> + use<> {
        query.select(&self.stage.component_refs).into_iter()
    }

    pub fn find_where<F>(
        &self,
        query: &ComponentReferenceQuery,
        mut predicate: F,
    ) -> impl Iterator<Item = ComponentReference> + use<F>
    where
        F: FnMut(&ComponentReference) -> bool,
    {
        self.find(query).filter(move |r| predicate(r))
    }

    #[must_use]
    pub fn count(&self, query: &ComponentReferenceQuery) -> usize {
        self.find(query).count()
    }

    pub fn count_where(
        &self,
        query: &ComponentReferenceQuery,
        predicate: impl FnMut(&ComponentReference) -> bool,
    ) -> usize {
        self.find_where(query, predicate).count()
    }

    #[must_use]
    pub fn has(&self, query: &ComponentReferenceQuery) -> bool {
        self.find(query).next().is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = ComponentReference> + use<> {
        self.stage.component_refs.all().into_iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stage.component_refs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Observable for ComponentReferences<'_> {
    type Payload = ReferenceEvent<ComponentReference>;

    fn watchable(&self) -> &Watchable<Self::Payload> {
        &self.stage.component_refs.events
    }
}

/// Every live asset reference.
pub struct AssetReferences<'a> {
    stage: &'a Rc<StageInner>,
}

impl AssetReferences<'_> {
    /// Create a free-standing reference to the asset `(uri, kind)`.
    ///
    /// # Errors
    ///
    /// [`StageError::MissingLoader`] if no loader is registered for `kind`.
    pub fn create(&self, uri: &str, kind: &str, options: ReferenceOptions) -> Result<AssetReference, StageError> {
        AssetReference::create(self.stage, uri, kind, options)
    }

    /// References matching `query`, in creation order.
    pub fn find(&self, query: &AssetReferenceQuery) -> impl Iterator<Item = AssetReference> + use<> {
        query.select(&self.stage.asset_refs).into_iter()
    }

    pub fn find_where<F>(&self, query: &AssetReferenceQuery, mut predicate: F) -> impl Iterator<Item = AssetReference> + use<F>
    where
        F: FnMut(&AssetReference) -> bool,
    {
        self.find(query).filter(move |r| predicate(r))
    }

    #[must_use]
    pub fn count(&self, query: &AssetReferenceQuery) -> usize {
        self.find(query).count()
    }

    pub fn count_where(&self, query: &AssetReferenceQuery, predicate: impl FnMut(&AssetReference) -> bool) -> usize {
        self.find_where(query, predicate).count()
    }

    #[must_use]
    pub fn has(&self, query: &AssetReferenceQuery) -> bool {
        self.find(query).next().is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = AssetReference> + use<> {
        self.stage.asset_refs.all().into_iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stage.asset_refs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Observable for AssetReferences<'_> {
    type Payload = ReferenceEvent<AssetReference>;

    fn watchable(&self) -> &Watchable<Self::Payload> {
        &self.stage.asset_refs.events
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use stage_events::WatchOptions;

    use super::*;
    use crate::{Stage, asset_loader};

    fn counts<R: 'static>(
        watch: impl Fn(&str, Box<dyn Fn(&ReferenceEvent<R>)>),
        events: &[&'static str],
    ) -> Rc<RefCell<Vec<String>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        for &event in events {
            let sink = seen.clone();
            watch(
                event,
                Box::new(move |e: &ReferenceEvent<R>| sink.borrow_mut().push(format!("{event}={}", e.count))),
            );
        }
        seen
    }

    #[test]
    fn test_component_reference_counts() {
        let stage = Stage::new();
        let refs = stage.references().components();
        let seen = counts(
            |event, f| {
                refs.watch(event, WatchOptions::new(), move |e| f(e));
            },
            &["reference:add", "reference:add:b", "reference:add:b:t", "reference:release:b:t"],
        );

        let first = refs.create("b", "t", ReferenceOptions::new());
        let second = refs.create("b", "t", ReferenceOptions::new());
        refs.create("b", "u", ReferenceOptions::new());
        assert_eq!(refs.count(&ComponentReferenceQuery::new().entity("b").kind("t")), 2);
        assert_eq!(refs.count(&ComponentReferenceQuery::new().entity("b")), 3);
        assert_eq!(refs.count(&ComponentReferenceQuery::new().kind("u")), 1);

        first.release();
        second.release();
        assert!(!refs.has(&ComponentReferenceQuery::new().entity("b").kind("t")));
        assert_eq!(
            *seen.borrow(),
            vec![
                "reference:add=1",
                "reference:add:b=1",
                "reference:add:b:t=1",
                "reference:add=2",
                "reference:add:b=2",
                "reference:add:b:t=2",
                "reference:add=3",
                "reference:add:b=3",
                "reference:release:b:t=1",
                "reference:release:b:t=0",
            ]
        );
    }

    #[test]
    fn test_find_preserves_creation_order_and_predicate() {
        let stage = Stage::new();
        let refs = stage.references().components();
        let ids: Vec<u64> = (0..4)
            .map(|i| refs.create("e", &format!("t{i}"), ReferenceOptions::new()).id())
            .collect();
        let found: Vec<u64> = refs.iter().map(|r| r.id()).collect();
        assert_eq!(found, ids);
        let odd = refs.count_where(&ComponentReferenceQuery::new().entity("e"), |r| r.id() % 2 == 1);
        assert_eq!(odd, ids.iter().filter(|id| *id % 2 == 1).count());
    }

    #[test]
    fn test_asset_reference_indices() {
        let stage = Stage::new();
        let loader = asset_loader(|uri, _signal| async move { anyhow::Ok(Rc::new(uri) as Asset) });
        stage.register_loader("text", loader.clone()).unwrap();
        stage.register_loader("bytes", loader).unwrap();

        let assets = stage.references().assets();
        let seen = counts(
            |event, f| {
                assets.watch(event, WatchOptions::new(), move |e| f(e));
            },
            &["reference:add:text", "reference:add:text:a", "reference:release:text"],
        );
        let a = assets.create("a", "text", ReferenceOptions::new()).unwrap();
        assets.create("a", "bytes", ReferenceOptions::new()).unwrap();
        assets.create("b", "text", ReferenceOptions::new()).unwrap();

        assert_eq!(assets.count(&AssetReferenceQuery::new().uri("a")), 2);
        assert_eq!(assets.count(&AssetReferenceQuery::new().kind("text")), 2);
        assert_eq!(assets.count(&AssetReferenceQuery::new().uri("a").kind("text")), 1);
        assert_eq!(assets.len(), 3);

        a.release();
        assert_eq!(
            *seen.borrow(),
            vec![
                "reference:add:text=1",
                "reference:add:text:a=1",
                "reference:add:text=2",
                "reference:release:text=1",
            ]
        );
    }
}
