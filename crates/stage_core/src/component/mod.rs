//! Stored components.
//!
//! A [`Component`] is a shared handle; cloning it is cheap and every clone
//! sees the same value. Components are created by
//! [`Components::add`](set::Components::add) and stay *attached* until they
//! are deleted. A detached component keeps its last value but no longer
//! binds references.

pub mod set;

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stage_events::{Observable, TurnQueue, Watchable};
use stage_schema::{Pointer, Schema};

use crate::entity::{ComponentKey, Entity};
use crate::error::StageError;
use crate::live::LiveValue;
use crate::reference::Reference;
use crate::stage::StageInner;
use crate::update::{self, Mode};

/// Wire shape of a component: the input to `add` and the output of
/// [`Component::to_json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentData {
    pub entity: Entity,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ComponentData {
    #[must_use]
    pub fn new(entity: impl Into<Entity>, kind: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            kind: kind.into(),
            owner: None,
            value: None,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn owner(mut self, owner: impl Into<Entity>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

pub(crate) struct ComponentInner {
    pub(crate) seq: u64,
    pub(crate) key: ComponentKey,
    pub(crate) owner: Option<Entity>,
    pub(crate) schema: Option<Rc<Schema>>,
    pub(crate) value: RefCell<Value>,
    /// Present only when the schema declares reference-bearing leaves.
    pub(crate) references: RefCell<Option<BTreeMap<Pointer, Reference>>>,
    pub(crate) events: Watchable<Value>,
    pub(crate) stage: Weak<StageInner>,
    pub(crate) attached: Cell<bool>,
}

/// A stored component.
///
/// Events (payload: the previous value):
///
/// - `value:change` when the whole value is replaced;
/// - `value:change:{pointer}` for observed paths, and for `/` on every
///   whole-value replacement.
#[derive(Clone)]
pub struct Component {
    pub(crate) inner: Rc<ComponentInner>,
}

impl Component {
    pub(crate) fn new(
        seq: u64,
        data: ComponentData,
        schema: Option<Rc<Schema>>,
        value: Value,
        stage: Weak<StageInner>,
        queue: &TurnQueue,
    ) -> Self {
        let references = schema
            .as_ref()
            .filter(|s| s.has_links())
            .map(|_| BTreeMap::new());
        Self {
            inner: Rc::new(ComponentInner {
                seq,
                key: ComponentKey::new(data.entity, data.kind),
                owner: data.owner,
                schema,
                value: RefCell::new(value),
                references: RefCell::new(references),
                events: Watchable::new(queue),
                stage,
                attached: Cell::new(false),
            }),
        }
    }

    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.inner.key.entity
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.inner.key.kind
    }

    #[must_use]
    pub fn owner(&self) -> Option<&Entity> {
        self.inner.owner.as_ref()
    }

    #[must_use]
    pub fn key(&self) -> &ComponentKey {
        &self.inner.key
    }

    /// The schema this component was created with.
    #[must_use]
    pub fn schema(&self) -> Option<&Rc<Schema>> {
        self.inner.schema.as_ref()
    }

    /// A copy of the current value.
    #[must_use]
    pub fn value(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    /// Replace the whole value.
    ///
    /// Returns `Ok(false)` without notifying if the new value (after
    /// default injection) equals the current one.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::MissingLoader`] if the new value needs an asset
    /// loader that is not registered.
    pub fn set_value(&self, value: Value) -> Result<bool, StageError> {
        update::write(self, &Pointer::root(), value, Mode::Assign)
    }

    /// A live accessor for the node at `path`.
    #[must_use]
    pub fn at(&self, path: &str) -> LiveValue {
        LiveValue::new(self.clone(), Pointer::parse(path))
    }

    /// A live accessor for the whole value.
    #[must_use]
    pub fn root(&self) -> LiveValue {
        LiveValue::new(self.clone(), Pointer::root())
    }

    /// The reference bound at `path`, if any.
    #[must_use]
    pub fn reference(&self, path: &str) -> Option<Reference> {
        self.reference_at(&Pointer::parse(path))
    }

    pub(crate) fn reference_at(&self, pointer: &Pointer) -> Option<Reference> {
        self.inner
            .references
            .borrow()
            .as_ref()
            .and_then(|refs| refs.get(pointer).cloned())
    }

    /// Every reference bound in this component's value, keyed by path.
    ///
    /// `None` if the schema declares no reference-bearing leaves.
    #[must_use]
    pub fn references(&self) -> Option<BTreeMap<Pointer, Reference>> {
        self.inner.references.borrow().clone()
    }

    /// The component's wire shape, with default-equal subtrees left out.
    #[must_use]
    pub fn to_json(&self) -> ComponentData {
        let value = self.inner.value.borrow();
        let value = match &self.inner.schema {
            Some(schema) => stage_schema::serialize(schema, &value),
            None if value.is_null() => None,
            None => Some(value.clone()),
        };
        ComponentData {
            entity: self.inner.key.entity.clone(),
            kind: self.inner.key.kind.clone(),
            owner: self.inner.owner.clone(),
            value,
        }
    }

    /// Returns `true` while the component is stored.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.attached.get()
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakComponent {
        WeakComponent {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub(crate) fn stage(&self) -> Option<Rc<StageInner>> {
        self.inner.stage.upgrade()
    }

    pub(crate) fn take_reference(&self, pointer: &Pointer) -> Option<Reference> {
        self.inner
            .references
            .borrow_mut()
            .as_mut()
            .and_then(|refs| refs.remove(pointer))
    }

    pub(crate) fn store_reference(&self, pointer: Pointer, reference: Reference) {
        if let Some(refs) = self.inner.references.borrow_mut().as_mut() {
            refs.insert(pointer, reference);
        }
    }

    /// Drop every bound reference, leaving the map empty.
    pub(crate) fn take_references(&self) -> Vec<Reference> {
        self.inner
            .references
            .borrow_mut()
            .as_mut()
            .map(|refs| std::mem::take(refs).into_values().collect())
            .unwrap_or_default()
    }
}

impl Observable for Component {
    type Payload = Value;

    fn watchable(&self) -> &Watchable<Value> {
        &self.inner.events
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Component {}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("entity", &self.inner.key.entity)
            .field("type", &self.inner.key.kind)
            .field("owner", &self.inner.owner)
            .field("attached", &self.inner.attached.get())
            .finish()
    }
}

/// A non-owning handle to a [`Component`].
#[derive(Clone, Default)]
pub struct WeakComponent {
    inner: Weak<ComponentInner>,
}

impl WeakComponent {
    #[must_use]
    pub fn upgrade(&self) -> Option<Component> {
        self.inner.upgrade().map(|inner| Component { inner })
    }
}

impl fmt::Debug for WeakComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(component) => write!(f, "WeakComponent({})", component.key()),
            None => f.write_str("WeakComponent(dropped)"),
        }
    }
}
