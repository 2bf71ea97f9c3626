//! Default injection and default elision.
//!
//! `null` plays the role of "undefined" throughout: a `null` (or missing)
//! value on a defaulted node is replaced by a deep copy of the default, and
//! a value equal to its node's default serializes to nothing.

use serde_json::{Map, Value};

use crate::schema::{Schema, SchemaKind};

/// Apply `schema` to a raw value, filling in defaults.
///
/// Object properties that end up `null` are left out. Properties the
/// schema does not declare are kept as they are.
#[must_use]
pub fn deserialize(schema: &Schema, value: Value) -> Value {
    if value.is_null() {
        return match &schema.default {
            Some(default) if !default.is_null() => deserialize(schema, default.clone()),
            _ => Value::Null,
        };
    }

    match (&schema.kind, value) {
        (SchemaKind::Object { properties, .. }, Value::Object(mut map)) => {
            for (key, child) in properties {
                let raw = map.remove(key).unwrap_or(Value::Null);
                let value = deserialize(child, raw);
                if !value.is_null() {
                    map.insert(key.clone(), value);
                }
            }
            Value::Object(map)
        }
        (SchemaKind::Array { items, .. }, Value::Array(values)) => {
            Value::Array(values.into_iter().map(|v| deserialize(items, v)).collect())
        }
        (SchemaKind::Tuple { items, .. }, Value::Array(values)) => Value::Array(
            values
                .into_iter()
                .enumerate()
                .map(|(i, v)| match items.get(i) {
                    Some(child) => deserialize(child, v),
                    None => v,
                })
                .collect(),
        ),
        (_, value) => value,
    }
}

/// The value `schema` produces for an absent input.
#[must_use]
pub fn default_value(schema: &Schema) -> Value {
    deserialize(schema, Value::Null)
}

/// Render `value` for persistence, omitting every subtree equal to its
/// schema default. Returns `None` when nothing needs to be written.
#[must_use]
pub fn serialize(schema: &Schema, value: &Value) -> Option<Value> {
    if value.is_null() {
        return None;
    }
    if let Some(default) = &schema.default {
        if value == default || *value == default_value(schema) {
            return None;
        }
    }

    let out = match (&schema.kind, value) {
        (SchemaKind::Object { properties, .. }, Value::Object(map)) => {
            let mut out = Map::new();
            for (key, child) in map {
                let rendered = match properties.get(key) {
                    Some(schema) => serialize(schema, child),
                    None => Some(child.clone()),
                };
                if let Some(rendered) = rendered {
                    out.insert(key.clone(), rendered);
                }
            }
            Value::Object(out)
        }
        (SchemaKind::Array { items, .. }, Value::Array(values)) => Value::Array(
            values
                .iter()
                .map(|v| serialize(items, v).unwrap_or(Value::Null))
                .collect(),
        ),
        (SchemaKind::Tuple { items, .. }, Value::Array(values)) => Value::Array(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| match items.get(i) {
                    Some(child) => serialize(child, v).unwrap_or(Value::Null),
                    None => v.clone(),
                })
                .collect(),
        ),
        (_, value) => value.clone(),
    };
    Some(out)
}
