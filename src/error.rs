//! Centralized error handling for varexport.
//!
//! Every failure in the crate is reported through [`VarExportError`]; library code never
//! panics and never unwraps.
//!
//! ## Error Categories
//!
//! Structural errors describe a value graph that cannot be snapshotted or restored:
//!
//! - **[`VarExportError::NotInstantiable`]**: a type cannot be allocated bare and has no
//!   viable fallback (abstract types, interfaces, handles without a locator, closures).
//! - **[`VarExportError::UnknownType`]**: a type named in a stored program does not exist
//!   in the catalog used for restoring it.
//! - **[`VarExportError::HydrationFieldMismatch`]**: a field named in a stored program is not
//!   declared by its owning type anymore.
//! - **[`VarExportError::MalformedHookResult`]**: a pre-snapshot hook returned something other
//!   than a field map.
//! - **[`VarExportError::NonRecursable`]**: an external handle is reachable from more than one
//!   place in the graph.
//!
//! The remaining variants cover the artifact codec (serialization, compression, format),
//! failing user hooks and I/O.
//!
//! None of these are retried internally: retrying a structurally invalid graph cannot
//! succeed. Callers treat any of them as "this graph is not snapshot-safe".
//!
//! ```rust
//! use varexport::{TypeCatalog, TypeRegistry, Value, VarExportError};
//! use varexport::graph::GraphPreparer;
//! use varexport::value::Handle;
//!
//! let registry = TypeRegistry::new(TypeCatalog::new());
//! let socket = Value::Handle(Handle::new("socket", None));
//!
//! match GraphPreparer::new(&registry).prepare(&socket) {
//!     Err(VarExportError::NotInstantiable { type_name, .. }) => assert_eq!(type_name, "socket"),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// A specialized `Result` type for varexport operations.
pub type Result<T> = std::result::Result<T, VarExportError>;

/// The master error enum covering all failure domains.
///
/// The type is `Clone` so a failed batch can hand the same error to several callers;
/// I/O errors are wrapped in `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum VarExportError {
    /// A type cannot be allocated, neither bare nor through its restore hook.
    #[error("type \"{type_name}\" is not instantiable: {reason}")]
    NotInstantiable {
        /// The offending type (or handle kind).
        type_name: String,
        /// Why every allocation strategy failed.
        reason: String,
    },

    /// A type name could not be resolved through the catalog.
    #[error("type \"{0}\" does not exist")]
    UnknownType(String),

    /// A stored field is absent on the live type.
    #[error("field \"{field}\" is not declared by \"{owner}\" (hydrating \"{type_name}\")")]
    HydrationFieldMismatch {
        /// The concrete type being hydrated.
        type_name: String,
        /// The type that was expected to declare the field.
        owner: String,
        /// The missing field.
        field: String,
    },

    /// A pre-snapshot hook returned a shape other than a field map.
    #[error("{type_name}: pre-snapshot hook must return a field map, got {found}")]
    MalformedHookResult {
        /// The type whose hook misbehaved.
        type_name: String,
        /// A short description of what was returned instead.
        found: String,
    },

    /// An external handle was reached through more than one path.
    #[error("handle \"{kind}\" is referenced more than once and cannot be shared")]
    NonRecursable {
        /// Handle kind.
        kind: String,
    },

    /// A field name does not resolve to a visible slot from the calling scope.
    #[error("{type_name}: field \"{field}\" is undefined or not visible from this scope")]
    UndefinedField {
        /// The concrete type accessed.
        type_name: String,
        /// The requested name.
        field: String,
    },

    /// A readonly field was written or unset after it had been initialized.
    #[error("{type_name}: cannot modify readonly field \"{field}\"")]
    ReadonlyField {
        /// The concrete type accessed.
        type_name: String,
        /// The readonly field.
        field: String,
    },

    /// A user-supplied hook or initializer reported a failure.
    #[error("{type_name}: hook failed: {message}")]
    Hook {
        /// The type whose hook failed.
        type_name: String,
        /// The message reported by the hook.
        message: String,
    },

    /// Encoding or decoding of the program payload failed (bincode).
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Compression or decompression of the artifact failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// The artifact or program is malformed (bad magic, version, dangling token).
    #[error("format error: {0}")]
    Format(String),

    /// Low-level I/O failure.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// Logic error inside the engine. Should not occur; please report it.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VarExportError {
    /// Shorthand for [`VarExportError::NotInstantiable`].
    pub fn not_instantiable(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotInstantiable {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`VarExportError::Hook`].
    pub fn hook(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hook {
            type_name: type_name.into(),
            message: message.into(),
        }
    }
}

impl From<io::Error> for VarExportError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
