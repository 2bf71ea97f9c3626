//! The write path for component values.
//!
//! Every mutation, whether a whole-value replacement or a nested live
//! assignment, goes through [`write`]:
//!
//! 1. the new value is run through the schema node at the target path;
//! 2. nothing happens if it equals the current value;
//! 3. the value is stored;
//! 4. the old and new subtrees are diffed against the schema, collecting
//!    observed paths that changed and reference leaves that need rebinding;
//! 5. references are rebound, then `value:change:{path}` events fire in
//!    pre-order with the previous value at each path.

use serde_json::Value;
use stage_schema::pointer::parse_index;
use stage_schema::{Link, Pointer, Schema, SchemaKind, links};
use tracing::warn;

use crate::component::Component;
use crate::entity::Entity;
use crate::error::StageError;
use crate::reference::asset::AssetReference;
use crate::reference::component::ComponentReference;
use crate::reference::{Reference, ReferenceOptions};
use crate::stage::StageInner;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Fill defaults from the node's schema; the target path is notified
    /// if its parent observes it.
    Assign,
    /// Store as given. The target path itself is not notified, only
    /// observed children whose values changed.
    InPlace,
    /// Remove the node, skipping default injection.
    Remove,
}

#[derive(Default)]
struct Changes {
    /// Observed paths that changed, with their previous values.
    notes: Vec<(Pointer, Value)>,
    /// Reference leaves whose target changed, with their new values.
    rebinds: Vec<(Pointer, Link, Value)>,
}

/// Write `value` at `pointer` inside `component`'s value.
///
/// Returns `Ok(false)` if the stored value did not change.
pub(crate) fn write(component: &Component, pointer: &Pointer, value: Value, mode: Mode) -> Result<bool, StageError> {
    let schema = component.inner.schema.clone();
    let node = schema.as_deref().and_then(|s| s.resolve(pointer));
    let parent = pointer.split_last();

    if let Some((parent_path, key)) = &parent {
        let parent_node = schema.as_deref().and_then(|s| s.resolve(parent_path));
        if parent_node.is_some_and(Schema::has_complex_items) && parse_index(key).is_none() {
            return Err(StageError::IllegalArrayKey {
                key: (*key).to_string(),
                path: parent_path.clone(),
            });
        }
    }

    let new = match (mode, node) {
        (Mode::Assign, Some(node)) => stage_schema::deserialize(node, value),
        (Mode::Assign | Mode::InPlace, _) => value,
        (Mode::Remove, _) => Value::Null,
    };

    let old = {
        let root = component.inner.value.borrow();
        current(&root, pointer)?
    };
    if old == new {
        return Ok(false);
    }

    if component.is_attached() {
        if let (Some(stage), Some(node)) = (component.stage(), node) {
            check_loaders(&stage, node, &new)?;
        }
    }

    {
        let mut root = component.inner.value.borrow_mut();
        match &parent {
            None => *root = new.clone(),
            Some((parent_path, key)) => match parent_path.get_mut(&mut root) {
                Some(Value::Object(map)) => {
                    if new.is_null() {
                        map.remove(*key);
                    } else {
                        map.insert((*key).to_string(), new.clone());
                    }
                }
                Some(Value::Array(items)) => {
                    let index = parse_index(key).ok_or_else(|| StageError::PathNotFound(pointer.clone()))?;
                    match items.get_mut(index) {
                        Some(slot) => *slot = new.clone(),
                        None => items.push(new.clone()),
                    }
                }
                _ => return Err(StageError::PathNotFound(pointer.clone())),
            },
        }
    }

    let observed_here = match (mode, &parent) {
        (Mode::InPlace, _) => false,
        (_, None) => true,
        (_, Some((parent_path, key))) => schema
            .as_deref()
            .and_then(|s| s.resolve(parent_path))
            .is_some_and(|p| p.observes(key)),
    };

    let mut changes = Changes::default();
    reconcile(node, pointer, &old, &new, observed_here, &mut changes);

    for (path, link, value) in changes.rebinds {
        rebind(component, &path, &link, &value);
    }

    let events = &component.inner.events;
    for (path, previous) in changes.notes {
        events.notify(&format!("value:change:{path}"), previous);
    }
    if pointer.is_root() && mode != Mode::InPlace {
        events.notify("value:change", old);
    }
    Ok(true)
}

/// The value currently at `pointer`, or `null` for a writable gap.
///
/// A gap is a missing object key, or the index one past the end of an
/// array. Anything else without a container parent is not writable.
fn current(root: &Value, pointer: &Pointer) -> Result<Value, StageError> {
    let Some((parent, key)) = pointer.split_last() else {
        return Ok(root.clone());
    };
    match parent.get(root) {
        Some(Value::Object(map)) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
        Some(Value::Array(items)) => match parse_index(key) {
            Some(index) if index <= items.len() => Ok(items.get(index).cloned().unwrap_or(Value::Null)),
            _ => Err(StageError::PathNotFound(pointer.clone())),
        },
        _ => Err(StageError::PathNotFound(pointer.clone())),
    }
}

fn reconcile(
    schema: Option<&Schema>,
    pointer: &Pointer,
    old: &Value,
    new: &Value,
    observed_here: bool,
    changes: &mut Changes,
) {
    if old == new {
        return;
    }
    if observed_here {
        changes.notes.push((pointer.clone(), old.clone()));
    }
    let Some(schema) = schema else {
        return;
    };
    if let Some(link) = &schema.link {
        changes.rebinds.push((pointer.clone(), link.clone(), new.clone()));
        return;
    }

    match &schema.kind {
        SchemaKind::Object { properties, observed } => {
            for (key, child) in properties {
                let o = old.get(key.as_str()).unwrap_or(&NULL);
                let n = new.get(key.as_str()).unwrap_or(&NULL);
                reconcile(Some(child), &pointer.join(key), o, n, observed.contains(key), changes);
            }
            for key in observed.iter().filter(|k| !properties.contains_key(*k)) {
                let o = old.get(key.as_str()).unwrap_or(&NULL);
                let n = new.get(key.as_str()).unwrap_or(&NULL);
                reconcile(None, &pointer.join(key), o, n, true, changes);
            }
        }
        SchemaKind::Array { items, observed } => {
            for i in 0..array_len(old).max(array_len(new)) {
                let o = old.get(i).unwrap_or(&NULL);
                let n = new.get(i).unwrap_or(&NULL);
                reconcile(Some(items), &pointer.join(i), o, n, observed.contains(&i.to_string()), changes);
            }
        }
        SchemaKind::Tuple { items, observed } => {
            for i in 0..array_len(old).max(array_len(new)) {
                let o = old.get(i).unwrap_or(&NULL);
                let n = new.get(i).unwrap_or(&NULL);
                reconcile(items.get(i), &pointer.join(i), o, n, observed.contains(&i.to_string()), changes);
            }
        }
        _ => {}
    }
}

fn array_len(value: &Value) -> usize {
    value.as_array().map_or(0, Vec::len)
}

// ── References ──────────────────────────────────────────────────────────────

/// Fail with [`StageError::MissingLoader`] if `value` references an asset
/// type nobody can load.
pub(crate) fn check_loaders(stage: &StageInner, schema: &Schema, value: &Value) -> Result<(), StageError> {
    for (_, link, target) in links(schema, value) {
        if let Link::Asset(key) = link {
            if target.is_string() && !stage.loaders.contains(key) {
                return Err(StageError::MissingLoader(key.clone()));
            }
        }
    }
    Ok(())
}

/// Bind every reference leaf in a freshly attached component.
pub(crate) fn bind_references(component: &Component) {
    let Some(schema) = component.inner.schema.clone() else {
        return;
    };
    if !schema.has_links() {
        return;
    }
    let found: Vec<(Pointer, Link, Value)> = {
        let value = component.inner.value.borrow();
        links(&schema, &value)
            .into_iter()
            .map(|(pointer, link, target)| (pointer, link.clone(), target.clone()))
            .collect()
    };
    for (pointer, link, target) in found {
        bind(component, &pointer, &link, &target);
    }
}

/// Release the reference at `pointer` and bind one for `value`.
fn rebind(component: &Component, pointer: &Pointer, link: &Link, value: &Value) {
    if let Some(previous) = component.take_reference(pointer) {
        previous.release();
    }
    if component.is_attached() {
        bind(component, pointer, link, value);
    }
}

fn bind(component: &Component, pointer: &Pointer, link: &Link, value: &Value) {
    let Some(stage) = component.stage() else {
        return;
    };
    let target = match value {
        Value::String(target) => target,
        Value::Null => return,
        other => {
            warn!(component = %component.key(), path = %pointer, value = %other, "reference leaf does not hold a string");
            return;
        }
    };

    let options = ReferenceOptions::new().with_referer(component.key().clone());
    let reference = match link {
        Link::Component(kind) => Reference::Component(ComponentReference::create(
            &stage,
            Entity::from(target.as_str()),
            kind,
            options,
        )),
        Link::Asset(loader) => match AssetReference::create(&stage, target, loader, options) {
            Ok(reference) => Reference::Asset(reference),
            Err(err) => {
                warn!(component = %component.key(), path = %pointer, %err, "could not bind asset reference");
                return;
            }
        },
    };
    component.store_reference(pointer.clone(), reference);
}
