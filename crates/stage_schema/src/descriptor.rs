//! JSON descriptor format.
//!
//! ```json
//! {
//!   "type": "object",
//!   "observed": ["target"],
//!   "properties": {
//!     "target": { "type": "string", "component": "transform" },
//!     "color":  { "type": "array", "items": [{ "type": "number" }, { "type": "number" }, { "type": "number" }] },
//!     "mesh":   { "type": "string", "asset": "gltf" }
//!   }
//! }
//! ```
//!
//! `array` with a single `items` schema is a homogeneous array; with a list
//! of schemas it is a fixed-length tuple. Observed keys of arrays and tuples
//! are indices and may be written as numbers.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::SchemaError;
use crate::schema::{Link, Schema, SchemaKind};

#[derive(Debug, Default, Deserialize)]
pub struct Common {
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    component: Option<String>,
    #[serde(default)]
    asset: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Items {
    Many(Vec<Schema>),
    One(Box<Schema>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ObservedKey {
    Index(u64),
    Name(String),
}

impl ObservedKey {
    fn into_key(self) -> String {
        match self {
            Self::Index(i) => i.to_string(),
            Self::Name(name) => name,
        }
    }
}

/// Wire form of a [`Schema`] node.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Descriptor {
    String(Common),
    Number(Common),
    Boolean(Common),
    Object {
        #[serde(default)]
        properties: BTreeMap<String, Schema>,
        #[serde(default)]
        observed: Vec<ObservedKey>,
        #[serde(default)]
        default: Option<Value>,
        #[serde(default)]
        component: Option<String>,
        #[serde(default)]
        asset: Option<String>,
    },
    Array {
        items: Items,
        #[serde(default)]
        observed: Vec<ObservedKey>,
        #[serde(default)]
        default: Option<Value>,
        #[serde(default)]
        component: Option<String>,
        #[serde(default)]
        asset: Option<String>,
    },
}

impl TryFrom<Descriptor> for Schema {
    type Error = SchemaError;

    fn try_from(descriptor: Descriptor) -> Result<Self, Self::Error> {
        let (kind, common) = match descriptor {
            Descriptor::String(common) => (SchemaKind::String, common),
            Descriptor::Number(common) => (SchemaKind::Number, common),
            Descriptor::Boolean(common) => (SchemaKind::Boolean, common),
            Descriptor::Object {
                properties,
                observed,
                default,
                component,
                asset,
            } => (
                SchemaKind::Object {
                    properties,
                    observed: observed.into_iter().map(ObservedKey::into_key).collect(),
                },
                Common {
                    default,
                    component,
                    asset,
                },
            ),
            Descriptor::Array {
                items,
                observed,
                default,
                component,
                asset,
            } => {
                let observed = observed.into_iter().map(ObservedKey::into_key).collect();
                let kind = match items {
                    Items::One(items) => SchemaKind::Array { items, observed },
                    Items::Many(items) => SchemaKind::Tuple { items, observed },
                };
                (
                    kind,
                    Common {
                        default,
                        component,
                        asset,
                    },
                )
            }
        };

        let link = match (common.component, common.asset) {
            (Some(component), Some(asset)) => {
                return Err(SchemaError::ConflictingLink { component, asset });
            }
            (Some(component), None) => Some(Link::Component(component)),
            (None, Some(asset)) => Some(Link::Asset(asset)),
            (None, None) => None,
        };

        Ok(Schema {
            kind,
            default: common.default,
            link,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_object_descriptor() {
        let schema = Schema::from_json(json!({
            "type": "object",
            "observed": ["a"],
            "properties": {
                "a": { "type": "string", "component": "a" },
                "n": { "type": "number", "default": 3 }
            }
        }))
        .unwrap();

        let expected = Schema::object([
            ("a", Schema::string().component("a")),
            ("n", Schema::number().with_default(json!(3))),
        ])
        .observe(["a"]);
        assert_eq!(schema, expected);
    }

    #[test]
    fn test_array_and_tuple_descriptors() {
        let array = Schema::from_json(json!({
            "type": "array",
            "items": { "type": "string", "asset": "texture" },
            "observed": [0]
        }))
        .unwrap();
        assert_eq!(array, Schema::array(Schema::string().asset("texture")).observe([0]));

        let tuple = Schema::from_json(json!({
            "type": "array",
            "items": [{ "type": "number" }, { "type": "boolean", "default": true }],
            "default": [1, true]
        }))
        .unwrap();
        assert_eq!(
            tuple,
            Schema::tuple([Schema::number(), Schema::boolean().with_default(json!(true))])
                .with_default(json!([1, true]))
        );
    }

    #[test]
    fn test_conflicting_link_is_rejected() {
        let err = Schema::from_json(json!({"type": "string", "component": "a", "asset": "b"})).unwrap_err();
        assert!(err.to_string().contains("both component 'a' and asset 'b'"));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(Schema::from_json(json!({"type": "date"})).is_err());
    }
}
