//! # varexport
//!
//! Identity-preserving snapshots of in-memory value graphs, and lazily materialized
//! ("ghost") entities.
//!
//! ## Overview
//!
//! A value graph is made of scalars, arrays, shared storage cells, entities with typed
//! fields and external handles. Entities can be reached from several paths and can point
//! back at their ancestors. varexport walks such a graph once and turns it into a flat
//! [`graph::NormalizedProgram`] that can be stored and replayed later, possibly in another
//! process, to rebuild an equivalent graph with the same sharing and the same cycles.
//!
//! ### Key Features
//!
//! *   **Identity preservation:** an entity reached from two paths is captured once and
//!     restored once; both paths point at the same restored instance.
//! *   **Cycles:** back-references resolve to tokens, so self-referencing graphs terminate.
//! *   **Ownership-scoped fields:** a subtype and its ancestor may both declare a private
//!     field with the same name; the two slots are never merged.
//! *   **Type hooks:** pre-snapshot, post-restore, sleep/wakeup and opaque codecs let a
//!     type customize what is captured and what runs after restoring.
//! *   **Default elision:** fields equal to the type's prototype default are left out.
//! *   **Lazy ghosts:** entities created empty and populated on first access, as a whole
//!     or one field at a time.
//!
//! ## Architecture
//!
//! ```text
//! Value graph ─▶ GraphPreparer ─▶ NormalizedProgram ─▶ Emitter ─▶ artifact
//!                     │                   │
//!                TypeRegistry         Restorer ─▶ FieldHydrator ─▶ Value graph
//! ```
//!
//! * [`TypeRegistry`] caches, per type, how to allocate an empty instance, whether a
//!   shallow copy of the prototype is a valid instance, and the prototype itself.
//! * [`graph::GraphPreparer`] produces the program: a pool of entities, a pool of
//!   reference cells for locations reached more than once, and a root.
//! * [`hydrator::FieldHydrator`] writes captured values into ownership-scoped slots and
//!   runs post-restore hooks once a whole batch is wired.
//! * [`emit::Emitter`] is the output contract; [`emit::BinaryEmitter`] writes a compact
//!   bincode artifact, see [`format`].
//! * [`lazy::LazyObjects`] tracks ghosts and intercepts their field accesses.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use varexport::types::{ClassDef, FieldDecl};
//! use varexport::{TypeCatalog, TypeRegistry, Value, VarExporter};
//!
//! let node = ClassDef::builder("Node")
//!     .field(FieldDecl::new("label"))
//!     .field(FieldDecl::new("next"))
//!     .build();
//! let registry = Arc::new(TypeRegistry::new(TypeCatalog::new().with(&node)));
//! let exporter = VarExporter::new(registry.clone());
//!
//! // A node pointing at itself.
//! let a = registry.instantiate("Node")?;
//! a.write_slot(registry.field_key("Node", "label")?, Value::str("a"));
//! a.write_slot(registry.field_key("Node", "next")?, Value::from(a.clone()));
//!
//! let bytes = exporter.export(&Value::from(a))?;
//! let restored = exporter.import(&bytes)?;
//! let Value::Object(copy) = restored else { unreachable!() };
//! let next = copy.read_slot(&registry.field_key("Node", "next")?);
//! assert!(matches!(next, Some(Value::Object(o)) if Arc::ptr_eq(&o, &copy)));
//! # Ok::<(), varexport::VarExportError>(())
//! ```
//!
//! Reference-counted cycles like the one above are not reclaimed when dropped.
//!
//! ### Safety and Error Handling
//!
//! * **No unsafe code.**
//! * **No Panics:** No `unwrap()` or `panic!()` calls in the library (enforced by clippy lints).
//! * **Comprehensive Errors:** All failures correspond to a [`VarExportError`].

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod api;
pub mod compression;
pub mod emit;
pub mod error;
pub mod format;
pub mod graph;
pub mod hydrator;
pub mod inspector;
pub mod lazy;
pub mod object;
pub mod restore;
pub mod types;
pub mod value;

// --- RE-EXPORTS ---

#[cfg(feature = "lz4_flex")]
pub use compression::Lz4Compressor;
pub use compression::{Compressor, NoCompression};

pub use api::{VarExporter, VarExporterBuilder};
pub use error::{Result, VarExportError};
pub use graph::{GraphPreparer, NormalizedProgram};
pub use hydrator::FieldHydrator;
pub use lazy::{Initializer, LazyObjects, LazyStatus, PartialInitializer, ProxyInitializer};
pub use object::{FieldKey, Object, ObjectRef};
pub use restore::Restorer;
pub use types::{TypeCatalog, TypeDescriptor, TypeRegistry};
pub use value::{Key, Value};
