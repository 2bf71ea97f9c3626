//! Schema error types.

/// Errors raised while building schemas from descriptors.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A node declared both `component` and `asset`.
    #[error("schema node cannot reference both component '{component}' and asset '{asset}'")]
    ConflictingLink {
        /// The declared component type.
        component: String,
        /// The declared asset loader key.
        asset: String,
    },

    /// A descriptor document could not be decoded.
    #[error("invalid schema descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),

    /// A schema document was not a `{type: descriptor}` object.
    #[error("expected an object mapping component types to schema descriptors")]
    NotAnObject,
}
