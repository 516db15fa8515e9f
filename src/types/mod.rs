//! Type introspection: descriptors, the name catalog, slot layouts and the registry of
//! per-type allocation facts.

/// Name to descriptor lookup.
pub mod catalog;
/// The `TypeDescriptor` seam and its stock `ClassDef` implementation.
pub mod descriptor;
/// Ownership-scoped slot tables.
pub mod layout;
/// Cached allocation facts and prototypes.
pub mod registry;

pub use catalog::TypeCatalog;
pub use descriptor::{
    ClassBuilder, ClassDef, Construction, FieldDecl, OpaqueCodec, TypeDescriptor, TypeHooks,
    TypeKind, Visibility, ancestry,
};
pub use layout::{ClassLayout, PUBLIC_SCOPE, SlotInfo};
pub use registry::{Prototype, TypeInfo, TypeRegistry};
