use super::id::{EntityId, RefId};
use crate::object::FieldKey;
use crate::value::Key;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A prepared value: a leaf, a copied array, or a token pointing into one of the pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Prepared {
    /// Null leaf.
    Null,
    /// Boolean leaf.
    Bool(bool),
    /// Integer leaf.
    Int(i64),
    /// Float leaf.
    Float(f64),
    /// String leaf.
    Str(String),
    /// Array, recursively prepared.
    Array(Vec<(Key, Prepared)>),
    /// Back-reference token into the entity pool.
    Entity(EntityId),
    /// Token into the reference-cell pool.
    Ref(RefId),
    /// Re-openable external resource.
    Handle {
        /// Resource kind.
        kind: String,
        /// Where to re-open it from.
        locator: String,
    },
}

/// Captured fields grouped by owning type: `owner -> (name -> value)`.
pub type PreparedFields = IndexMap<String, IndexMap<String, Prepared>>;

/// What was captured for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityState {
    /// Ownership-scoped field writes.
    Fields(PreparedFields),
    /// State handed as a whole to the type's restore hook.
    Custom(Vec<(Key, Prepared)>),
    /// Legacy opaque blob, decoded by the type's codec at allocation time.
    Opaque(String),
}

/// Which post-restore hook runs for an entity, and its position in the batch schedule.
///
/// Orders are assigned when an entity's capture *completes*, so entities nested inside
/// another entity's fields run their hooks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostRestore {
    /// No hook.
    None,
    /// Stateless hook, after hydration.
    Wakeup(u32),
    /// Restore hook fed with the `Custom` state.
    Restore(u32),
}

impl PostRestore {
    /// Position in the hook schedule, if a hook runs.
    pub fn order(&self) -> Option<u32> {
        match self {
            Self::None => None,
            Self::Wakeup(order) | Self::Restore(order) => Some(*order),
        }
    }
}

/// One slot of the entity pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedEntity {
    /// Concrete type name.
    pub type_name: String,
    /// Captured state.
    pub state: EntityState,
    /// Post-restore hook.
    pub hook: PostRestore,
    /// Declared slots that the prototype sets but the instance had unset. Restore clears
    /// them again.
    pub unset: Vec<FieldKey>,
}

impl PreparedEntity {
    /// Field program, if the state is field-based.
    pub fn fields(&self) -> Option<&PreparedFields> {
        match &self.state {
            EntityState::Fields(fields) => Some(fields),
            _ => None,
        }
    }

    /// A single captured field.
    pub fn field(&self, owner: &str, name: &str) -> Option<&Prepared> {
        self.fields()?.get(owner)?.get(name)
    }

    /// Number of captured fields (zero for custom and opaque states).
    pub fn field_count(&self) -> usize {
        self.fields()
            .map(|fields| fields.values().map(IndexMap::len).sum())
            .unwrap_or(0)
    }
}

/// A storage location reached from more than one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCell {
    /// Position in the pool.
    pub id: RefId,
    /// Prepared content.
    pub value: Prepared,
    /// Number of additional occurrences beyond the first. Always at least 1 in a finished
    /// program: cells seen once are inlined.
    pub use_count: u32,
}

/// The output of [`super::GraphPreparer::prepare`], the input of every emitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProgram {
    /// Distinct entities in first-visit order.
    pub entities: Vec<PreparedEntity>,
    /// Shared or cyclic storage locations.
    pub references: Vec<ReferenceCell>,
    /// The root value or token.
    pub root: Prepared,
    /// True if the graph holds no entity and no reference cell, so an emitter may treat
    /// it as a constant.
    pub is_static: bool,
}

impl NormalizedProgram {
    /// Looks up an entity.
    pub fn entity(&self, id: EntityId) -> Option<&PreparedEntity> {
        self.entities.get(id.index())
    }

    /// Looks up a reference cell.
    pub fn reference(&self, id: RefId) -> Option<&ReferenceCell> {
        self.references.get(id.index())
    }

    /// Entities whose post-restore hook runs, in execution order.
    pub fn hook_schedule(&self) -> Vec<(EntityId, PostRestore)> {
        let mut schedule: Vec<(EntityId, PostRestore)> = self
            .entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.hook.order().is_some())
            .map(|(i, e)| (EntityId::new(i as u32), e.hook))
            .collect();
        schedule.sort_by_key(|(_, hook)| hook.order());
        schedule
    }
}
