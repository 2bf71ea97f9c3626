//! The authoritative component collection and its query surface.
//!
//! Components are indexed five ways besides the `(entity, type)` point
//! index: by entity, type, owner, owner+type, and owner+entity. Queries
//! pick the most selective index the filter allows, snapshot its
//! membership, and filter lazily from there.
//!
//! Set events (payload: the component):
//!
//! - `component:add`, `component:add:{entity}`, `component:add:{entity}:{type}`
//! - `component:delete`, `component:delete:{entity}`, `component:delete:{entity}:{type}`
//! - `entity:add`, `entity:add:{entity}` when an entity gains its first component
//! - `entity:delete`, `entity:delete:{entity}` when it loses its last one

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde_json::Value;
use stage_events::{Observable, TurnQueue, Watchable};
use tracing::debug;

use crate::component::{Component, ComponentData};
use crate::entity::{ComponentKey, Entity};
use crate::error::StageError;
use crate::index::Buckets;
use crate::stage::StageInner;
use crate::update;

/// External hook notified as components enter and leave the store.
///
/// `register` runs after the indices are updated and before any
/// `component:add` event fires; `unregister` runs before the component is
/// removed from the indices.
pub trait Registrar {
    fn register(&self, component: &Component);
    fn unregister(&self, component: &Component);
}

/// A filter over `{entity, type, owner}`. Empty fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentQuery {
    pub entity: Option<Entity>,
    pub kind: Option<String>,
    pub owner: Option<Entity>,
}

impl ComponentQuery {
    /// Matches every component.
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

    #[must_use]
    pub fn owner(mut self, owner: impl Into<Entity>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    fn matches(&self, component: &Component) -> bool {
        self.entity.as_ref().is_none_or(|e| e == component.entity())
            && self.kind.as_deref().is_none_or(|k| k == component.kind())
            && self.owner.as_ref().is_none_or(|o| Some(o) == component.owner())
    }
}

// ── Storage ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SetState {
    all: BTreeMap<u64, Component>,
    points: HashMap<ComponentKey, u64>,
    by_entity: Buckets,
    by_type: Buckets,
    by_owner: Buckets,
    by_owner_type: Buckets,
    by_owner_entity: Buckets,
}

impl SetState {
    fn resolve(&self, seqs: Vec<u64>) -> Vec<Component> {
        seqs.into_iter().filter_map(|seq| self.all.get(&seq).cloned()).collect()
    }
}

pub(crate) struct ComponentSet {
    state: RefCell<SetState>,
    next_seq: Cell<u64>,
    pub(crate) events: Watchable<Component>,
}

impl ComponentSet {
    pub(crate) fn new(queue: &TurnQueue) -> Self {
        Self {
            state: RefCell::new(SetState::default()),
            next_seq: Cell::new(0),
            events: Watchable::new(queue),
        }
    }

    fn next_seq(&self) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        seq
    }

    pub(crate) fn get(&self, key: &ComponentKey) -> Option<Component> {
        let state = self.state.borrow();
        state.points.get(key).and_then(|seq| state.all.get(seq)).cloned()
    }

    /// Snapshot of the components matching `query`, in add order.
    fn select(&self, query: &ComponentQuery) -> Vec<Component> {
        let state = self.state.borrow();
        let candidates = match (&query.entity, &query.kind, &query.owner) {
            (Some(entity), Some(kind), _) => state
                .points
                .get(&ComponentKey::new(entity.clone(), kind.clone()))
                .and_then(|seq| state.all.get(seq))
                .cloned()
                .into_iter()
                .collect(),
            (_, Some(kind), Some(owner)) => state.resolve(state.by_owner_type.members(&format!("{owner}:{kind}"))),
            (Some(entity), _, Some(owner)) => {
                state.resolve(state.by_owner_entity.members(&format!("{owner}:{entity}")))
            }
            (Some(entity), None, None) => state.resolve(state.by_entity.members(entity.as_str())),
            (None, Some(kind), None) => state.resolve(state.by_type.members(kind)),
            (None, None, Some(owner)) => state.resolve(state.by_owner.members(owner.as_str())),
            (None, None, None) => state.all.values().cloned().collect(),
        };
        candidates.into_iter().filter(|c| query.matches(c)).collect()
    }

    /// Index `component`. Returns `true` if it is its entity's first.
    fn insert(&self, component: &Component) -> bool {
        let mut state = self.state.borrow_mut();
        let seq = component.inner.seq;
        let entity = component.entity().as_str();
        let kind = component.kind();

        state.all.insert(seq, component.clone());
        state.points.insert(component.key().clone(), seq);
        let first = state.by_entity.insert(entity, seq) == 1;
        state.by_type.insert(kind, seq);
        if let Some(owner) = component.owner() {
            state.by_owner.insert(owner.as_str(), seq);
            state.by_owner_type.insert(&format!("{owner}:{kind}"), seq);
            state.by_owner_entity.insert(&format!("{owner}:{entity}"), seq);
        }
        first
    }

    /// Unindex `component`. Returns `true` if it was its entity's last.
    fn remove(&self, component: &Component) -> bool {
        let mut state = self.state.borrow_mut();
        let seq = component.inner.seq;
        let entity = component.entity().as_str();
        let kind = component.kind();

        state.all.remove(&seq);
        state.points.remove(component.key());
        let last = state.by_entity.remove(entity, seq) == 0;
        state.by_type.remove(kind, seq);
        if let Some(owner) = component.owner() {
            state.by_owner.remove(owner.as_str(), seq);
            state.by_owner_type.remove(&format!("{owner}:{kind}"), seq);
            state.by_owner_entity.remove(&format!("{owner}:{entity}"), seq);
        }
        last
    }

    pub(crate) fn len(&self) -> usize {
        self.state.borrow().all.len()
    }

    fn all(&self) -> Vec<Component> {
        self.state.borrow().all.values().cloned().collect()
    }

    fn entities(&self) -> Vec<Entity> {
        let state = self.state.borrow();
        let mut entities: Vec<Entity> = state.by_entity.keys().map(Entity::from).collect();
        entities.sort_unstable();
        entities
    }
}

// ── Public view ─────────────────────────────────────────────────────────────

/// The store's components, borrowed from a [`Stage`](crate::Stage).
pub struct Components<'a> {
    pub(crate) stage: &'a Rc<StageInner>,
}

impl Components<'_> {
    /// Store a new component.
    ///
    /// The value is run through the type's schema, references in it are
    /// bound, the registrar is told, and the `component:add*` (and, for a
    /// new entity, `entity:add*`) events fire, in that order.
    ///
    /// # Errors
    ///
    /// - [`StageError::DuplicateComponent`] if `(entity, type)` is taken.
    /// - [`StageError::MissingLoader`] if the value references an asset
    ///   type with no registered loader.
    ///
    /// The store is unchanged on error.
    pub fn add(&self, mut data: ComponentData) -> Result<Component, StageError> {
        let stage = self.stage;
        let key = ComponentKey::new(data.entity.clone(), data.kind.clone());
        if stage.components.get(&key).is_some() {
            return Err(StageError::DuplicateComponent {
                entity: key.entity,
                kind: key.kind,
            });
        }

        let schema = stage.schemas.borrow().get(&key.kind);
        let raw = data.value.take().unwrap_or(Value::Null);
        let value = match &schema {
            Some(schema) => stage_schema::deserialize(schema, raw),
            None => raw,
        };
        if let Some(schema) = &schema {
            update::check_loaders(stage, schema, &value)?;
        }

        let component = Component::new(
            stage.components.next_seq(),
            data,
            schema,
            value,
            Rc::downgrade(stage),
            &stage.queue,
        );
        let first = stage.components.insert(&component);
        component.inner.attached.set(true);
        update::bind_references(&component);

        let registrar = stage.registrar.borrow().clone();
        if let Some(registrar) = registrar {
            registrar.register(&component);
        }

        let events = &stage.components.events;
        events.notify("component:add", component.clone());
        events.notify(&format!("component:add:{}", key.entity), component.clone());
        events.notify(&format!("component:add:{key}"), component.clone());
        if first {
            events.notify("entity:add", component.clone());
            events.notify(&format!("entity:add:{}", key.entity), component.clone());
        }

        debug!(entity = %key.entity, kind = %key.kind, new_entity = first, "component added");
        Ok(component)
    }

    /// Remove a component. Returns `false` if it was not stored.
    ///
    /// References bound in its value are released.
    pub fn delete(&self, entity: &Entity, kind: &str) -> bool {
        let stage = self.stage;
        let Some(component) = self.get(entity, kind) else {
            return false;
        };
        if !component.inner.attached.replace(false) {
            return false;
        }

        let registrar = stage.registrar.borrow().clone();
        if let Some(registrar) = registrar {
            registrar.unregister(&component);
        }

        let last = stage.components.remove(&component);
        for reference in component.take_references() {
            reference.release();
        }

        let key = component.key().clone();
        let events = &stage.components.events;
        events.notify("component:delete", component.clone());
        events.notify(&format!("component:delete:{}", key.entity), component.clone());
        events.notify(&format!("component:delete:{key}"), component.clone());
        if last {
            events.notify("entity:delete", component.clone());
            events.notify(&format!("entity:delete:{}", key.entity), component);
        }

        debug!(entity = %key.entity, kind = %key.kind, last_of_entity = last, "component deleted");
        true
    }

    /// Point lookup by `(entity, type)`.
    #[must_use]
    pub fn get(&self, entity: &Entity, kind: &str) -> Option<Component> {
        self.stage.components.get(&ComponentKey::new(entity.clone(), kind))
    }

    /// Components matching `query`, in add order.
    ///
    /// Index membership is captured when this is called; later adds and
    /// deletes do not affect the returned iterator.
    pub fn find(&self, query: &ComponentQuery) -> impl Iterator<Item = Component> + use<> {
        self.stage.components.select(query).into_iter()
    }

    /// Like [`find`](Self::find), then filtered by `predicate`.
    ///
    /// The predicate only narrows the index selected from the other
    /// fields; a predicate with an empty query scans every component.
    pub fn find_where<F>(&self, query: &ComponentQuery, mut predicate: F) -> impl Iterator<Item = Component> + use<F>
    where
        F: FnMut(&Component) -> bool,
    {
        self.find(query).filter(move |c| predicate(c))
    }

    #[must_use]
    pub fn count(&self, query: &ComponentQuery) -> usize {
        self.find(query).count()
    }

    pub fn count_where(&self, query: &ComponentQuery, predicate: impl FnMut(&Component) -> bool) -> usize {
        self.find_where(query, predicate).count()
    }

    #[must_use]
    pub fn has(&self, query: &ComponentQuery) -> bool {
        self.find(query).next().is_some()
    }

    pub fn has_where(&self, query: &ComponentQuery, predicate: impl FnMut(&Component) -> bool) -> bool {
        self.find_where(query, predicate).next().is_some()
    }

    /// Every component, in add order.
    pub fn iter(&self) -> impl Iterator<Item = Component> + use<> {
        self.stage.components.all().into_iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stage.components.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entities that currently have at least one component, sorted.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.stage.components.entities()
    }
}

impl Observable for Components<'_> {
    type Payload = Component;

    fn watchable(&self) -> &Watchable<Component> {
        &self.stage.components.events
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use serde_json::json;
    use stage_events::WatchOptions;

    use super::*;
    use crate::Stage;

    fn log(stage: &Stage, pattern: &'static [&'static str]) -> Rc<RefCell<Vec<String>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        for event in pattern {
            let sink = seen.clone();
            stage.components().watch(event, WatchOptions::new(), move |c: &Component| {
                sink.borrow_mut().push(format!("{event}@{}", c.key()));
            });
        }
        seen
    }

    #[test]
    fn test_add_rejects_duplicates_and_leaves_store_unchanged() {
        let stage = Stage::new();
        stage.components().add(ComponentData::new("e1", "a")).unwrap();
        let err = stage.components().add(ComponentData::new("e1", "a")).unwrap_err();
        assert!(matches!(err, StageError::DuplicateComponent { .. }));
        assert_eq!(stage.components().len(), 1);
    }

    #[test]
    fn test_add_and_delete_event_order() {
        let stage = Stage::new();
        let seen = log(
            &stage,
            &["component:add", "component:add:e1", "component:add:e1:a", "entity:add", "entity:add:e1"],
        );
        stage.components().add(ComponentData::new("e1", "a")).unwrap();
        stage.components().add(ComponentData::new("e1", "b")).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![
                "component:add@e1:a",
                "component:add:e1@e1:a",
                "component:add:e1:a@e1:a",
                "entity:add@e1:a",
                "entity:add:e1@e1:a",
                "component:add@e1:b",
                "component:add:e1@e1:b",
            ]
        );

        let seen = log(&stage, &["component:delete", "entity:delete"]);
        assert!(stage.components().delete(&Entity::from("e1"), "a"));
        assert!(!stage.components().delete(&Entity::from("e1"), "a"));
        assert!(stage.components().delete(&Entity::from("e1"), "b"));
        assert_eq!(
            *seen.borrow(),
            vec!["component:delete@e1:a", "component:delete@e1:b", "entity:delete@e1:b"]
        );
    }

    #[test]
    fn test_indices_agree() {
        let stage = Stage::new();
        let components = stage.components();
        components.add(ComponentData::new("e1", "a").owner("p")).unwrap();
        components.add(ComponentData::new("e1", "b")).unwrap();
        components.add(ComponentData::new("e2", "a").owner("p")).unwrap();
        components.add(ComponentData::new("e3", "b").owner("q")).unwrap();

        for c in components.iter() {
            let point: Vec<Component> = components
                .find(&ComponentQuery::new().entity(c.entity().clone()).kind(c.kind()))
                .collect();
            assert_eq!(point, vec![c.clone()]);
        }
        assert_eq!(components.count(&ComponentQuery::new().entity("e1")), 2);
        assert_eq!(components.count(&ComponentQuery::new().kind("a")), 2);
        assert_eq!(components.count(&ComponentQuery::new().owner("p")), 2);
        assert_eq!(components.count(&ComponentQuery::new().owner("p").kind("a")), 2);
        assert_eq!(components.count(&ComponentQuery::new().owner("p").entity("e2")), 1);
        assert_eq!(components.count(&ComponentQuery::new().owner("q").entity("e1")), 0);
        assert!(!components.has(&ComponentQuery::new().entity("e1").kind("a").owner("q")));
        assert_eq!(components.count(&ComponentQuery::new()), 4);
        assert_eq!(
            components.entities(),
            vec![Entity::from("e1"), Entity::from("e2"), Entity::from("e3")]
        );
    }

    #[test]
    fn test_predicate_applies_after_index() {
        let stage = Stage::new();
        let components = stage.components();
        components.add(ComponentData::new("e1", "n").with_value(json!(1))).unwrap();
        components.add(ComponentData::new("e2", "n").with_value(json!(5))).unwrap();
        components.add(ComponentData::new("e3", "m").with_value(json!(9))).unwrap();

        let big = |c: &Component| c.value().as_i64().is_some_and(|n| n > 2);
        assert_eq!(components.count_where(&ComponentQuery::new().kind("n"), big), 1);
        assert_eq!(components.count_where(&ComponentQuery::new(), big), 2);
        assert!(!components.has_where(&ComponentQuery::new().entity("e1"), big));
    }

    #[test]
    fn test_find_snapshot_survives_reentrant_delete() {
        let stage = Stage::new();
        for e in ["e1", "e2", "e3"] {
            stage.components().add(ComponentData::new(e, "a")).unwrap();
        }
        let mut visited = 0;
        for c in stage.components().find(&ComponentQuery::new().kind("a")) {
            visited += 1;
            stage.components().delete(&Entity::from("e3"), "a");
            assert_eq!(c.kind(), "a");
        }
        assert_eq!(visited, 3);
        assert_eq!(stage.components().len(), 2);
    }

    #[test]
    fn test_delete_from_own_add_handler() {
        let stage = Stage::new();
        let handle = stage.clone();
        stage
            .components()
            .watch("component:add:e1:a", WatchOptions::new(), move |c: &Component| {
                handle.components().delete(c.entity(), c.kind());
            });
        let component = stage.components().add(ComponentData::new("e1", "a")).unwrap();
        assert!(!component.is_attached());
        assert!(stage.components().is_empty());
        assert!(stage.components().entities().is_empty());
    }

    #[test]
    fn test_registrar_sees_consistent_indices() {
        struct Check {
            stage: Stage,
            seen: RefCell<Vec<String>>,
        }
        impl Registrar for Check {
            fn register(&self, component: &Component) {
                let found = self.stage.components().get(component.entity(), component.kind());
                self.seen.borrow_mut().push(format!("register:{}", found.is_some()));
            }
            fn unregister(&self, component: &Component) {
                let found = self.stage.components().get(component.entity(), component.kind());
                self.seen.borrow_mut().push(format!("unregister:{}", found.is_some()));
            }
        }

        let stage = Stage::new();
        let check = Rc::new(Check {
            stage: stage.clone(),
            seen: RefCell::new(Vec::new()),
        });
        stage.set_registrar(check.clone());
        stage.components().add(ComponentData::new("e1", "a")).unwrap();
        stage.components().delete(&Entity::from("e1"), "a");
        assert_eq!(*check.seen.borrow(), vec!["register:true", "unregister:true"]);
    }
}
