//! Deferred materialization of entities ("ghosts").
//!
//! A ghost is a bare instance of its type whose declared fields start unset. The first
//! access through [`LazyObjects`] populates it, either all at once with a whole-object
//! initializer or one field at a time with a [`PartialInitializer`]:
//!
//! ```text
//! Uninitialized ──(whole initializer)──────────────────────────▶ FullyInitialized
//!       │                                                              ▲
//!       └──(field initializer)──▶ PartiallyInitialized ──(initialize / fallback)
//! ```
//!
//! Status never goes backwards. A failing whole-object initializer leaves the ghost
//! uninitialized, so the next access retries.
//!
//! A proxy is the other kind of lazy object: it never holds state itself. Its initializer
//! returns a separate real instance on first touch, and every later access is forwarded
//! to that instance.

mod accessors;
mod registry;
mod state;

pub use accessors::{ClassAccessors, ClassResetter};
pub use registry::LazyObjects;
pub use state::{
    FallbackInitializer, FieldInitializer, Initializer, LazyStatus, PartialInitializer,
    ProxyInitializer, WholeInitializer,
};
