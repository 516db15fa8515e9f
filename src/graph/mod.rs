//! Graph normalization: the walk that turns a live value graph into a flat
//! [`NormalizedProgram`] of entities, reference cells and a root token.

/// Pool tokens.
pub mod id;
/// Walk over a live graph.
pub mod preparer;
/// The normalized program handed to emitters.
pub mod program;

pub use id::{EntityId, RefId};
pub use preparer::{GraphPreparer, PrepareOptions};
pub use program::{
    EntityState, NormalizedProgram, PostRestore, Prepared, PreparedEntity, PreparedFields,
    ReferenceCell,
};
