//! Depth-first traversal of a value against its schema.

use serde_json::Value;

use crate::pointer::Pointer;
use crate::schema::{Link, Schema, SchemaKind};

/// One schema leaf found in a value.
#[derive(Debug, Clone)]
pub struct Leaf<'a> {
    pub schema: &'a Schema,
    pub pointer: Pointer,
    pub value: &'a Value,
}

/// Visit every schema leaf present in `value`, depth first, in key order.
///
/// Only properties the schema declares are descended into. A node carrying
/// a [`Link`] is reported as a leaf even if its schema is a container.
pub fn walk<'a>(schema: &'a Schema, value: &'a Value, visit: &mut dyn FnMut(Leaf<'a>)) {
    walk_at(schema, value, Pointer::root(), visit);
}

fn walk_at<'a>(schema: &'a Schema, value: &'a Value, pointer: Pointer, visit: &mut dyn FnMut(Leaf<'a>)) {
    if schema.link.is_some() || !schema.is_container() {
        visit(Leaf {
            schema,
            pointer,
            value,
        });
        return;
    }

    match (&schema.kind, value) {
        (SchemaKind::Object { properties, .. }, Value::Object(map)) => {
            for (key, child) in properties {
                if let Some(v) = map.get(key) {
                    walk_at(child, v, pointer.join(key), visit);
                }
            }
        }
        (SchemaKind::Array { items, .. }, Value::Array(values)) => {
            for (i, v) in values.iter().enumerate() {
                walk_at(items, v, pointer.join(i), visit);
            }
        }
        (SchemaKind::Tuple { items, .. }, Value::Array(values)) => {
            for (child, (i, v)) in items.iter().zip(values.iter().enumerate()) {
                walk_at(child, v, pointer.join(i), visit);
            }
        }
        _ => {}
    }
}

/// Every non-null reference-bearing leaf in `value`, with its path.
#[must_use]
pub fn links<'a>(schema: &'a Schema, value: &'a Value) -> Vec<(Pointer, &'a Link, &'a Value)> {
    let mut found = Vec::new();
    walk(schema, value, &mut |leaf| {
        if let Some(link) = &leaf.schema.link {
            if !leaf.value.is_null() {
                found.push((leaf.pointer, link, leaf.value));
            }
        }
    });
    found
}
