//! Schemas keyed by component type.

use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::error::SchemaError;
use crate::schema::Schema;

/// Maps component types to the schema their values follow.
///
/// Schemas are shared with the components built from them, so replacing or
/// removing a registration never changes components that already exist.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Rc<Schema>>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `schema` for `kind`, returning the schema it replaced.
    pub fn register(&mut self, kind: impl Into<String>, schema: Schema) -> Option<Rc<Schema>> {
        self.schemas.insert(kind.into(), Rc::new(schema))
    }

    /// Remove the schema for `kind`.
    pub fn unregister(&mut self, kind: &str) -> Option<Rc<Schema>> {
        self.schemas.remove(kind)
    }

    #[must_use]
    pub fn get(&self, kind: &str) -> Option<Rc<Schema>> {
        self.schemas.get(kind).cloned()
    }

    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.schemas.contains_key(kind)
    }

    /// Registered component types, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Register every schema in a `{type: descriptor}` document.
    ///
    /// Nothing is registered unless every descriptor decodes.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::NotAnObject`] if `document` is not an object,
    /// or the first descriptor error encountered.
    pub fn load_json(&mut self, document: Value) -> Result<usize, SchemaError> {
        let Value::Object(entries) = document else {
            return Err(SchemaError::NotAnObject);
        };
        let parsed = entries
            .into_iter()
            .map(|(kind, descriptor)| Ok((kind, Schema::from_json(descriptor)?)))
            .collect::<Result<Vec<_>, SchemaError>>()?;
        let count = parsed.len();
        for (kind, schema) in parsed {
            self.register(kind, schema);
        }
        Ok(count)
    }
}
