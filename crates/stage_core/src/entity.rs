//! Entity identifiers and component keys.
//!
//! An [`Entity`] has no storage of its own: it exists exactly while at
//! least one component carries its id.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An opaque, UUID-shaped entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(String);

impl Entity {
    /// Mint a fresh random (v4) entity id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for Entity {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for Entity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `(entity, type)` pair identifying one component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentKey {
    pub entity: Entity,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ComponentKey {
    #[must_use]
    pub fn new(entity: impl Into<Entity>, kind: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity, self.kind)
    }
}
