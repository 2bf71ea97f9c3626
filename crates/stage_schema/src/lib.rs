//! # stage_schema
//!
//! Schemas describe the shape of a component type's value: which leaves
//! carry defaults, which properties emit change notifications, and which
//! leaves are references to other components or to loaded assets.
//!
//! This crate provides:
//!
//! - [`Schema`] / [`SchemaKind`] / [`Link`] — the descriptor tree.
//! - [`deserialize`] / [`serialize`] — default injection and default elision.
//! - [`walk`] / [`links`] — depth-first traversal of a value against its schema.
//! - [`Pointer`] — JSON-Pointer-style paths into component values.
//! - [`SchemaRegistry`] — schemas keyed by component type.

pub mod descriptor;
pub mod error;
pub mod pointer;
pub mod registry;
pub mod schema;
pub mod value;
pub mod walk;

pub use error::SchemaError;
pub use pointer::Pointer;
pub use registry::SchemaRegistry;
pub use schema::{Link, Schema, SchemaKind};
pub use value::{default_value, deserialize, serialize};
pub use walk::{Leaf, links, walk};
