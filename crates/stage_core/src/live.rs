//! Path-scoped accessors over a component's value.
//!
//! A [`LiveValue`] is a `(component, path)` pair. Reads copy out of the
//! component; writes go through the same schema-aware write path as
//! [`Component::set_value`], so defaults, observed-path notifications and
//! reference rebinding apply at any depth.
//!
//! [`LiveArray`] mirrors the usual array mutators. On arrays whose items are
//! complex (defaults, references, or observed properties anywhere below)
//! the order-changing ones fail with [`StageError::IllegalArrayOperation`]
//! and leave the value untouched.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;
use stage_schema::{Pointer, Schema};

use crate::component::Component;
use crate::error::StageError;
use crate::reference::Reference;
use crate::update::{self, Mode};

/// A live handle to one node of a component's value.
#[derive(Clone)]
pub struct LiveValue {
    component: Component,
    pointer: Pointer,
}

impl LiveValue {
    pub(crate) fn new(component: Component, pointer: Pointer) -> Self {
        Self { component, pointer }
    }

    #[must_use]
    pub fn component(&self) -> &Component {
        &self.component
    }

    #[must_use]
    pub fn pointer(&self) -> &Pointer {
        &self.pointer
    }

    /// A copy of the node, or `None` if nothing is stored there.
    #[must_use]
    pub fn get(&self) -> Option<Value> {
        let root = self.component.inner.value.borrow();
        self.pointer.get(&root).cloned()
    }

    /// Assign the node. `null` resets a defaulted node to its default and
    /// removes an object property without one.
    ///
    /// Assigning `length` on an array resizes it.
    ///
    /// # Errors
    ///
    /// - [`StageError::PathNotFound`] if the parent container is missing.
    /// - [`StageError::IllegalArrayKey`] for a non-index key on a complex array.
    /// - [`StageError::MissingLoader`] if the value needs an unregistered loader.
    pub fn set(&self, value: Value) -> Result<bool, StageError> {
        if let Some((parent, "length")) = self.pointer.split_last() {
            let len = value.as_u64().and_then(|n| usize::try_from(n).ok());
            let array = LiveValue::new(self.component.clone(), parent).as_array();
            if let (Some(array), Some(len)) = (array, len) {
                return array.set_len(len);
            }
        }
        update::write(&self.component, &self.pointer, value, Mode::Assign)
    }

    /// Assign `null`.
    ///
    /// # Errors
    ///
    /// See [`set`](Self::set).
    pub fn reset(&self) -> Result<bool, StageError> {
        update::write(&self.component, &self.pointer, Value::Null, Mode::Assign)
    }

    /// Remove the node without restoring its default.
    ///
    /// # Errors
    ///
    /// See [`set`](Self::set).
    pub fn remove(&self) -> Result<bool, StageError> {
        update::write(&self.component, &self.pointer, Value::Null, Mode::Remove)
    }

    #[must_use]
    pub fn field(&self, key: &str) -> LiveValue {
        LiveValue::new(self.component.clone(), self.pointer.join(key))
    }

    #[must_use]
    pub fn index(&self, index: usize) -> LiveValue {
        LiveValue::new(self.component.clone(), self.pointer.join(index))
    }

    /// An object view, if the node currently holds an object.
    #[must_use]
    pub fn as_object(&self) -> Option<LiveObject> {
        matches!(self.get(), Some(Value::Object(_))).then(|| LiveObject { node: self.clone() })
    }

    /// An array view, if the node currently holds an array.
    #[must_use]
    pub fn as_array(&self) -> Option<LiveArray> {
        matches!(self.get(), Some(Value::Array(_))).then(|| LiveArray { node: self.clone() })
    }

    /// The reference bound at this node, if any.
    #[must_use]
    pub fn reference(&self) -> Option<Reference> {
        self.component.reference_at(&self.pointer)
    }

    fn schema_node<R>(&self, f: impl FnOnce(Option<&Schema>) -> R) -> R {
        let schema = self.component.schema();
        f(schema.and_then(|s| s.resolve(&self.pointer)))
    }
}

impl fmt::Debug for LiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LiveValue({}{})", self.component.key(), self.pointer)
    }
}

// ── Objects ─────────────────────────────────────────────────────────────────

/// A live handle to an object node.
#[derive(Debug, Clone)]
pub struct LiveObject {
    node: LiveValue,
}

impl LiveObject {
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        match self.node.get() {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.node.field(key).get()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// # Errors
    ///
    /// See [`LiveValue::set`].
    pub fn set(&self, key: &str, value: Value) -> Result<bool, StageError> {
        self.node.field(key).set(value)
    }

    /// # Errors
    ///
    /// See [`LiveValue::set`].
    pub fn remove(&self, key: &str) -> Result<bool, StageError> {
        self.node.field(key).remove()
    }

    #[must_use]
    pub fn field(&self, key: &str) -> LiveValue {
        self.node.field(key)
    }
}

// ── Arrays ──────────────────────────────────────────────────────────────────

/// A live handle to an array or tuple node.
#[derive(Debug, Clone)]
pub struct LiveArray {
    node: LiveValue,
}

impl LiveArray {
    #[must_use]
    pub fn len(&self) -> usize {
        match self.node.get() {
            Some(Value::Array(items)) => items.len(),
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.node.index(index).get()
    }

    #[must_use]
    pub fn field(&self, index: usize) -> LiveValue {
        self.node.index(index)
    }

    /// # Errors
    ///
    /// See [`LiveValue::set`].
    pub fn set(&self, index: usize, value: Value) -> Result<bool, StageError> {
        self.node.index(index).set(value)
    }

    /// Append one item, filling its defaults and binding its references.
    /// Returns the new length.
    ///
    /// # Errors
    ///
    /// [`StageError::MissingLoader`] if the item needs an unregistered loader.
    pub fn push(&self, value: Value) -> Result<usize, StageError> {
        let mut items = self.items()?;
        let item = self.item(items.len(), value);
        items.push(item);
        let len = items.len();
        self.commit(items)?;
        Ok(len)
    }

    /// Remove the last item, releasing its references.
    ///
    /// # Errors
    ///
    /// [`StageError::PathNotFound`] if the array is gone.
    pub fn pop(&self) -> Result<Option<Value>, StageError> {
        let mut items = self.items()?;
        let popped = items.pop();
        if popped.is_some() {
            self.commit(items)?;
        }
        Ok(popped)
    }

    /// Truncate (releasing references of removed items) or pad with `null`.
    ///
    /// # Errors
    ///
    /// [`StageError::PathNotFound`] if the array is gone.
    pub fn set_len(&self, len: usize) -> Result<bool, StageError> {
        let mut items = self.items()?;
        items.resize(len, Value::Null);
        self.commit(items)
    }

    /// # Errors
    ///
    /// [`StageError::IllegalArrayOperation`] on complex arrays.
    pub fn shift(&self) -> Result<Option<Value>, StageError> {
        self.guard("shift")?;
        let mut items = self.items()?;
        if items.is_empty() {
            return Ok(None);
        }
        let first = items.remove(0);
        self.commit(items)?;
        Ok(Some(first))
    }

    /// Prepend items. Returns the new length.
    ///
    /// # Errors
    ///
    /// [`StageError::IllegalArrayOperation`] on complex arrays.
    pub fn unshift(&self, values: impl IntoIterator<Item = Value>) -> Result<usize, StageError> {
        self.guard("unshift")?;
        let old = self.items()?;
        let mut items: Vec<Value> = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| self.item(i, v))
            .collect();
        items.extend(old);
        let len = items.len();
        self.commit(items)?;
        Ok(len)
    }

    /// Remove `delete_count` items at `start` and insert `insert` in their
    /// place. Out-of-range bounds are clamped. Returns the removed items.
    ///
    /// # Errors
    ///
    /// [`StageError::IllegalArrayOperation`] on complex arrays.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        insert: impl IntoIterator<Item = Value>,
    ) -> Result<Vec<Value>, StageError> {
        self.guard("splice")?;
        let mut items = self.items()?;
        let start = start.min(items.len());
        let end = start.saturating_add(delete_count).min(items.len());
        let inserted: Vec<Value> = insert
            .into_iter()
            .enumerate()
            .map(|(i, v)| self.item(start + i, v))
            .collect();
        let removed: Vec<Value> = items.splice(start..end, inserted).collect();
        self.commit(items)?;
        Ok(removed)
    }

    /// # Errors
    ///
    /// [`StageError::IllegalArrayOperation`] on complex arrays.
    pub fn sort_by(&self, compare: impl FnMut(&Value, &Value) -> Ordering) -> Result<bool, StageError> {
        self.guard("sort")?;
        let mut items = self.items()?;
        items.sort_by(compare);
        self.commit(items)
    }

    /// # Errors
    ///
    /// [`StageError::IllegalArrayOperation`] on complex arrays.
    pub fn reverse(&self) -> Result<bool, StageError> {
        self.guard("reverse")?;
        let mut items = self.items()?;
        items.reverse();
        self.commit(items)
    }

    /// Copy `start..end` over the items beginning at `target`, clamped to
    /// the current length.
    ///
    /// # Errors
    ///
    /// [`StageError::IllegalArrayOperation`] on complex arrays.
    pub fn copy_within(&self, target: usize, start: usize, end: usize) -> Result<bool, StageError> {
        self.guard("copy_within")?;
        let mut items = self.items()?;
        let len = items.len();
        let end = end.min(len);
        let start = start.min(end);
        let target = target.min(len);
        let count = (end - start).min(len - target);
        let chunk: Vec<Value> = items[start..start + count].to_vec();
        items[target..target + count].clone_from_slice(&chunk);
        self.commit(items)
    }

    fn guard(&self, op: &'static str) -> Result<(), StageError> {
        if self.node.schema_node(|s| s.is_some_and(Schema::has_complex_items)) {
            return Err(StageError::IllegalArrayOperation {
                op,
                path: self.node.pointer.clone(),
            });
        }
        Ok(())
    }

    fn items(&self) -> Result<Vec<Value>, StageError> {
        match self.node.get() {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(StageError::PathNotFound(self.node.pointer.clone())),
        }
    }

    /// Run a raw item through the schema of the position it will occupy.
    fn item(&self, index: usize, raw: Value) -> Value {
        let key = index.to_string();
        self.node.schema_node(|s| match s.and_then(|s| s.child(&key)) {
            Some(child) => stage_schema::deserialize(child, raw),
            None => raw,
        })
    }

    fn commit(&self, items: Vec<Value>) -> Result<bool, StageError> {
        update::write(&self.node.component, &self.node.pointer, Value::Array(items), Mode::InPlace)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;
    use stage_events::{Observable, WatchOptions};

    use super::*;
    use crate::{ComponentData, ComponentQuery, Stage};

    fn plain() -> (Stage, Component) {
        let stage = Stage::new();
        stage.register_schema("list", Schema::object([("xs", Schema::array(Schema::number()))]));
        let c = stage
            .components()
            .add(ComponentData::new("e", "list").with_value(json!({"xs": [3, 1, 2]})))
            .unwrap();
        (stage, c)
    }

    fn linked() -> (Stage, Component) {
        let stage = Stage::new();
        stage.register_schema(
            "links",
            Schema::object([("to", Schema::array(Schema::string().component("t")))]),
        );
        let c = stage
            .components()
            .add(ComponentData::new("e", "links").with_value(json!({"to": ["a", "b"]})))
            .unwrap();
        (stage, c)
    }

    #[test]
    fn test_plain_array_mutators() {
        let (_stage, c) = plain();
        let xs = c.at("/xs").as_array().unwrap();
        xs.sort_by(|a, b| a.as_i64().cmp(&b.as_i64())).unwrap();
        assert_eq!(c.at("/xs").get(), Some(json!([1, 2, 3])));
        xs.reverse().unwrap();
        assert_eq!(xs.shift().unwrap(), Some(json!(3)));
        assert_eq!(xs.unshift([json!(9), json!(8)]).unwrap(), 4);
        assert_eq!(c.at("/xs").get(), Some(json!([9, 8, 2, 1])));
        assert_eq!(xs.splice(1, 2, [json!(0)]).unwrap(), vec![json!(8), json!(2)]);
        assert_eq!(c.at("/xs").get(), Some(json!([9, 0, 1])));
        xs.copy_within(0, 1, 3).unwrap();
        assert_eq!(c.at("/xs").get(), Some(json!([0, 1, 1])));
        assert_eq!(xs.push(json!(7)).unwrap(), 4);
        assert_eq!(xs.pop().unwrap(), Some(json!(7)));
        c.at("/xs/length").set(json!(1)).unwrap();
        assert_eq!(c.at("/xs").get(), Some(json!([0])));
    }

    #[test]
    fn test_complex_array_rejects_reordering() {
        let (_stage, c) = linked();
        let to = c.at("/to").as_array().unwrap();
        let before = c.value();

        let err = to.reverse().unwrap_err();
        assert_eq!(err.to_string(), "reverse not allowed on complex component value array at /to");
        assert!(to.shift().is_err());
        assert!(to.unshift([json!("z")]).is_err());
        assert!(to.splice(0, 1, []).is_err());
        assert!(to.sort_by(|_, _| Ordering::Equal).is_err());
        assert!(to.copy_within(0, 1, 2).is_err());
        assert!(matches!(
            c.at("/to/name").set(json!("x")),
            Err(StageError::IllegalArrayKey { .. })
        ));
        assert_eq!(c.value(), before);
    }

    #[test]
    fn test_push_pop_and_truncate_manage_references() {
        let (stage, c) = linked();
        let refs = stage.references();
        let to = c.at("/to").as_array().unwrap();
        assert_eq!(refs.components().len(), 2);

        to.push(json!("c")).unwrap();
        assert!(c.reference("/to/2").is_some());
        assert_eq!(refs.components().len(), 3);

        assert_eq!(to.pop().unwrap(), Some(json!("c")));
        assert!(c.reference("/to/2").is_none());
        assert_eq!(refs.components().len(), 2);

        c.at("/to/length").set(json!(0)).unwrap();
        assert_eq!(refs.components().len(), 0);
        assert_eq!(c.value(), json!({"to": []}));
        assert_eq!(stage.components().count(&ComponentQuery::new()), 1);
    }

    #[test]
    fn test_in_place_ops_fire_changed_observed_indices_only() {
        let stage = Stage::new();
        stage.register_schema(
            "o",
            Schema::object([("xs", Schema::array(Schema::number()).observe([0, 1]))]).observe(["xs"]),
        );
        let c = stage
            .components()
            .add(ComponentData::new("e", "o").with_value(json!({"xs": [1]})))
            .unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for event in ["value:change:/xs", "value:change:/xs/0", "value:change:/xs/1"] {
            let sink = seen.clone();
            c.watch(event, WatchOptions::new(), move |prev: &Value| {
                sink.borrow_mut().push(format!("{event}={prev}"));
            });
        }

        c.at("/xs").as_array().unwrap().push(json!(2)).unwrap();
        assert_eq!(*seen.borrow(), vec!["value:change:/xs/1=null"]);
    }

    #[test]
    fn test_object_view() {
        let stage = Stage::new();
        let c = stage
            .components()
            .add(ComponentData::new("e", "raw").with_value(json!({"a": 1})))
            .unwrap();
        let obj = c.root().as_object().unwrap();
        obj.set("b", json!(2)).unwrap();
        assert_eq!(obj.keys(), vec!["a".to_string(), "b".to_string()]);
        assert!(obj.contains("a"));
        obj.remove("a").unwrap();
        assert!(!obj.contains("a"));
        assert_eq!(obj.get("b"), Some(json!(2)));
        assert!(c.at("/b").as_array().is_none());
    }
}
