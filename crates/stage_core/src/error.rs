//! Store error types.

use std::rc::Rc;

use stage_schema::Pointer;

use crate::entity::Entity;
use crate::reference::ReferenceState;

/// Errors raised synchronously by store mutations.
///
/// A failed call leaves the store unmodified.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// A component with the same `(entity, type)` already exists.
    #[error("component {entity}:{kind} already exists")]
    DuplicateComponent {
        /// The entity of the rejected component.
        entity: Entity,
        /// The type of the rejected component.
        kind: String,
    },

    /// An asset reference was requested for a type with no loader.
    #[error("No asset loader registered for type {0}")]
    MissingLoader(String),

    /// A different loader is already registered under this key.
    #[error("a different asset loader is already registered for type {0}")]
    LoaderConflict(String),

    /// An order-changing operation was attempted on an array whose items
    /// carry defaults, references, or observed properties.
    #[error("{op} not allowed on complex component value array at {path}")]
    IllegalArrayOperation {
        /// The rejected operation.
        op: &'static str,
        /// Path of the array inside the component value.
        path: Pointer,
    },

    /// A non-index key was assigned on a complex component value array.
    #[error("cannot assign key '{key}' on complex component value array at {path}")]
    IllegalArrayKey {
        /// The rejected key.
        key: String,
        /// Path of the array inside the component value.
        path: Pointer,
    },

    /// A nested write targeted a path whose parent does not exist.
    #[error("no container at {0} to write into")]
    PathNotFound(Pointer),
}

/// Rejections delivered by [`get`](crate::ComponentReference::get).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReferenceError {
    /// The reference was released or destroyed before it resolved.
    #[error("aborted")]
    Aborted,

    /// `get` was called on a reference that already reached a terminal state.
    #[error("unexpected reference state '{0}'")]
    UnexpectedState(ReferenceState),

    /// The asset loader failed.
    #[error("asset load failed: {0}")]
    Load(Rc<anyhow::Error>),
}

impl From<stage_events::Aborted> for ReferenceError {
    fn from(_: stage_events::Aborted) -> Self {
        Self::Aborted
    }
}
