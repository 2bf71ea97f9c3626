//! The schema descriptor tree.
//!
//! A [`Schema`] is a closed tagged union over the value shapes a component
//! can hold. Every node may carry a default and may mark its leaf as a
//! [`Link`] to another component or to an asset. Containers list which of
//! their children are *observed*: assigning an observed child (or replacing
//! its parent) emits a path-scoped change notification.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::Value;

use crate::descriptor::Descriptor;
use crate::error::SchemaError;
use crate::pointer::{Pointer, parse_index};

/// What a reference-bearing leaf points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    /// The leaf holds an entity id; the target is that entity's component
    /// of the given type.
    Component(String),
    /// The leaf holds a URI; the target is loaded by the loader registered
    /// under the given key.
    Asset(String),
}

impl Link {
    /// The component type or loader key this link targets.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Component(kind) | Self::Asset(kind) => kind,
        }
    }
}

/// The shape of one schema node.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    String,
    Number,
    Boolean,
    Object {
        properties: BTreeMap<String, Schema>,
        observed: BTreeSet<String>,
    },
    /// Homogeneous, variable-length array.
    Array {
        items: Box<Schema>,
        observed: BTreeSet<String>,
    },
    /// Fixed-length array with one schema per position.
    Tuple {
        items: Vec<Schema>,
        observed: BTreeSet<String>,
    },
}

/// A schema node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Descriptor")]
pub struct Schema {
    pub kind: SchemaKind,
    pub default: Option<Value>,
    pub link: Option<Link>,
}

impl Schema {
    fn leaf(kind: SchemaKind) -> Self {
        Self {
            kind,
            default: None,
            link: None,
        }
    }

    #[must_use]
    pub fn string() -> Self {
        Self::leaf(SchemaKind::String)
    }

    #[must_use]
    pub fn number() -> Self {
        Self::leaf(SchemaKind::Number)
    }

    #[must_use]
    pub fn boolean() -> Self {
        Self::leaf(SchemaKind::Boolean)
    }

    /// An object node with the given properties and nothing observed.
    #[must_use]
    pub fn object<K: Into<String>>(properties: impl IntoIterator<Item = (K, Schema)>) -> Self {
        Self::leaf(SchemaKind::Object {
            properties: properties.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            observed: BTreeSet::new(),
        })
    }

    /// A homogeneous array node.
    #[must_use]
    pub fn array(items: Schema) -> Self {
        Self::leaf(SchemaKind::Array {
            items: Box::new(items),
            observed: BTreeSet::new(),
        })
    }

    /// A fixed-length tuple node.
    #[must_use]
    pub fn tuple(items: impl IntoIterator<Item = Schema>) -> Self {
        Self::leaf(SchemaKind::Tuple {
            items: items.into_iter().collect(),
            observed: BTreeSet::new(),
        })
    }

    /// Set the node's default value.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Mark children as observed. Ignored on primitive nodes.
    #[must_use]
    pub fn observe<K: ToString>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        if let SchemaKind::Object { observed, .. }
        | SchemaKind::Array { observed, .. }
        | SchemaKind::Tuple { observed, .. } = &mut self.kind
        {
            observed.extend(keys.into_iter().map(|k| k.to_string()));
        }
        self
    }

    /// Mark the node as a reference to a component of type `kind`.
    #[must_use]
    pub fn component(mut self, kind: impl Into<String>) -> Self {
        self.link = Some(Link::Component(kind.into()));
        self
    }

    /// Mark the node as a reference to an asset loaded by `loader`.
    #[must_use]
    pub fn asset(mut self, loader: impl Into<String>) -> Self {
        self.link = Some(Link::Asset(loader.into()));
        self
    }

    /// Decode a schema from its JSON descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the descriptor is malformed.
    pub fn from_json(descriptor: Value) -> Result<Self, SchemaError> {
        Ok(serde_json::from_value(descriptor)?)
    }

    /// The schema of the child at `key`, if the node declares one.
    #[must_use]
    pub fn child(&self, key: &str) -> Option<&Schema> {
        match &self.kind {
            SchemaKind::Object { properties, .. } => properties.get(key),
            SchemaKind::Array { items, .. } => parse_index(key).map(|_| items.as_ref()),
            SchemaKind::Tuple { items, .. } => parse_index(key).and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Returns `true` if assigning the child at `key` emits a change event.
    #[must_use]
    pub fn observes(&self, key: &str) -> bool {
        match &self.kind {
            SchemaKind::Object { observed, .. }
            | SchemaKind::Array { observed, .. }
            | SchemaKind::Tuple { observed, .. } => observed.contains(key),
            _ => false,
        }
    }

    /// Follow `pointer` down the schema tree.
    #[must_use]
    pub fn resolve(&self, pointer: &Pointer) -> Option<&Schema> {
        pointer
            .segments()
            .iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Returns `true` for containers.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(
            self.kind,
            SchemaKind::Object { .. } | SchemaKind::Array { .. } | SchemaKind::Tuple { .. }
        )
    }

    /// Returns `true` if the node, or anything below it, declares a default,
    /// a link, or an observed child.
    ///
    /// Arrays holding complex items refuse order-changing operations, since
    /// path-keyed bookkeeping would no longer match the elements.
    #[must_use]
    pub fn is_complex(&self) -> bool {
        if self.default.is_some() || self.link.is_some() {
            return true;
        }
        match &self.kind {
            SchemaKind::Object { properties, observed } => {
                !observed.is_empty() || properties.values().any(Schema::is_complex)
            }
            SchemaKind::Array { items, observed } => !observed.is_empty() || items.is_complex(),
            SchemaKind::Tuple { items, observed } => {
                !observed.is_empty() || items.iter().any(Schema::is_complex)
            }
            _ => false,
        }
    }

    /// Returns `true` if the array or tuple at this node refuses
    /// order-changing operations.
    #[must_use]
    pub fn has_complex_items(&self) -> bool {
        match &self.kind {
            SchemaKind::Array { items, .. } => items.is_complex(),
            SchemaKind::Tuple { items, .. } => items.iter().any(Schema::is_complex),
            _ => false,
        }
    }

    /// Returns `true` if any node in the tree carries a link.
    #[must_use]
    pub fn has_links(&self) -> bool {
        if self.link.is_some() {
            return true;
        }
        match &self.kind {
            SchemaKind::Object { properties, .. } => properties.values().any(Schema::has_links),
            SchemaKind::Array { items, .. } => items.has_links(),
            SchemaKind::Tuple { items, .. } => items.iter().any(Schema::has_links),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> Schema {
        Schema::object([
            ("name", Schema::string().with_default(json!("unnamed"))),
            ("target", Schema::string().component("transform")),
            ("tags", Schema::array(Schema::string())),
            ("pair", Schema::tuple([Schema::number(), Schema::boolean()])),
        ])
        .observe(["name"])
    }

    #[test]
    fn test_child_and_resolve() {
        let schema = sample();
        assert_eq!(schema.child("name").map(|s| &s.kind), Some(&SchemaKind::String));
        assert!(schema.child("missing").is_none());
        assert_eq!(
            schema.resolve(&Pointer::parse("/tags/3")).map(|s| &s.kind),
            Some(&SchemaKind::String)
        );
        assert_eq!(
            schema.resolve(&Pointer::parse("/pair/1")).map(|s| &s.kind),
            Some(&SchemaKind::Boolean)
        );
        assert!(schema.resolve(&Pointer::parse("/pair/2")).is_none());
        assert!(schema.resolve(&Pointer::parse("/tags/length")).is_none());
    }

    #[test]
    fn test_observes() {
        let schema = sample();
        assert!(schema.observes("name"));
        assert!(!schema.observes("target"));
        assert!(!Schema::string().observe(["x"]).observes("x"));
    }

    #[test]
    fn test_complexity() {
        assert!(!Schema::array(Schema::string()).has_complex_items());
        assert!(Schema::array(Schema::string().component("a")).has_complex_items());
        assert!(Schema::array(Schema::number().with_default(json!(0))).has_complex_items());
        assert!(Schema::array(Schema::object([("x", Schema::number())]).observe(["x"])).has_complex_items());
        assert!(Schema::tuple([Schema::number(), Schema::string().asset("texture")]).has_complex_items());
        assert!(sample().is_complex());
    }

    #[test]
    fn test_has_links() {
        assert!(sample().has_links());
        assert!(!Schema::object([("x", Schema::number())]).has_links());
        assert!(Schema::array(Schema::string().asset("mesh")).has_links());
    }

    #[test]
    fn test_link_key() {
        assert_eq!(Link::Component("a".into()).key(), "a");
        assert_eq!(Link::Asset("gltf".into()).key(), "gltf");
    }
}
