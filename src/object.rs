//! Entities: identity-bearing instances of a [`TypeDescriptor`].
//!
//! Fields are stored under a [`FieldKey`], the pair of the declaring ("owning") type and
//! the field name. A subtype and an ancestor that both declare a private field `x` own two
//! distinct slots, `(Child, x)` and `(Parent, x)`.
//!
//! The slot accessors on [`Object`] are *raw*: they never consult lazy state and never run
//! hooks. Hook-aware access goes through [`crate::lazy::LazyObjects`].

use crate::types::TypeDescriptor;
use crate::value::Value;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide identity of an [`Object`]. Ids are never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

/// Ownership-scoped field address: `(declaring type, field name)`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey {
    owner: Arc<str>,
    name: Arc<str>,
}

impl FieldKey {
    /// Creates a key for field `name` declared by `owner`.
    pub fn new(owner: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self {
            owner: Arc::from(owner.as_ref()),
            name: Arc::from(name.as_ref()),
        }
    }

    pub(crate) fn from_parts(owner: Arc<str>, name: Arc<str>) -> Self {
        Self { owner, name }
    }

    /// The declaring type.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn owner_arc(&self) -> &Arc<str> {
        &self.owner
    }

    pub(crate) fn name_arc(&self) -> &Arc<str> {
        &self.name
    }
}

impl fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)
    }
}

/// An entity instance.
///
/// A slot missing from the map is *unset* (never written, or explicitly cleared).
pub struct Object {
    id: ObjectId,
    class: Arc<dyn TypeDescriptor>,
    slots: RwLock<IndexMap<FieldKey, Value>>,
}

/// Shared pointer to an [`Object`]. Identity is pointer identity.
pub type ObjectRef = Arc<Object>;

impl Object {
    /// Allocates an instance with the given initial slots, bypassing every hook.
    ///
    /// Only the type registry and the hydrator allocate; everything else goes through
    /// [`crate::TypeRegistry::instantiate`].
    pub(crate) fn allocate(
        class: Arc<dyn TypeDescriptor>,
        slots: IndexMap<FieldKey, Value>,
    ) -> ObjectRef {
        Arc::new(Self {
            id: ObjectId::next(),
            class,
            slots: RwLock::new(slots),
        })
    }

    /// The process-wide identity of this instance.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The concrete type.
    pub fn class(&self) -> &Arc<dyn TypeDescriptor> {
        &self.class
    }

    /// Name of the concrete type.
    pub fn type_name(&self) -> &str {
        self.class.name()
    }

    /// Reads a slot. `None` means unset.
    pub fn read_slot(&self, key: &FieldKey) -> Option<Value> {
        self.slots.read().get(key).cloned()
    }

    /// Writes a slot, creating it if it was unset.
    pub fn write_slot(&self, key: FieldKey, value: Value) {
        self.slots.write().insert(key, value);
    }

    /// True if the slot is set.
    pub fn has_slot(&self, key: &FieldKey) -> bool {
        self.slots.read().contains_key(key)
    }

    /// Unsets a slot, returning its previous value.
    pub fn clear_slot(&self, key: &FieldKey) -> Option<Value> {
        self.slots.write().shift_remove(key)
    }

    /// Snapshot of every set slot, in storage order.
    pub fn slots(&self) -> IndexMap<FieldKey, Value> {
        self.slots.read().clone()
    }

    /// Number of set slots.
    pub fn slot_count(&self) -> usize {
        self.slots.read().len()
    }
}

impl fmt::Debug for Object {
    // Objects may be cyclic; print identity only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class.name(), self.id.0)
    }
}
