//! # stage_core
//!
//! A reactive, schema-driven component store.
//!
//! Components are typed values keyed by `(entity, type)`. When a schema is
//! registered for a type, the component's value is kept in the schema's
//! shape: defaults are filled in, observed paths emit
//! `value:change:{path}` events, and reference-bearing leaves are bound to
//! live [`ComponentReference`]s and [`AssetReference`]s.
//!
//! This crate provides:
//!
//! - [`Stage`] — the store facade (schemas, loaders, components, references).
//! - [`Component`] / [`ComponentData`] — a stored component and its wire shape.
//! - [`LiveValue`] / [`LiveObject`] / [`LiveArray`] — path-scoped mutation.
//! - [`ComponentReference`] / [`AssetReference`] — resolving links.
//! - [`StageError`] / [`ReferenceError`] — error types.

pub mod component;
pub mod config;
pub mod entity;
pub mod error;
pub mod live;
pub mod reference;
pub mod stage;

mod index;
mod update;

pub use component::set::{ComponentQuery, Components, Registrar};
pub use component::{Component, ComponentData, WeakComponent};
pub use config::StageConfig;
pub use entity::{ComponentKey, Entity};
pub use error::{ReferenceError, StageError};
pub use live::{LiveArray, LiveObject, LiveValue};
pub use reference::asset::{Asset, AssetLoader, AssetReference, asset_loader};
pub use reference::component::ComponentReference;
pub use reference::set::{
    AssetReferenceQuery, AssetReferences, ComponentReferenceQuery, ComponentReferences, References,
};
pub use reference::{Reference, ReferenceEvent, ReferenceOptions, ReferenceState};
pub use stage::Stage;

pub use stage_events::{AbortController, AbortSignal, FlushPolicy, Observable, WatchId, WatchOptions};
pub use stage_schema::{Pointer, Schema};
