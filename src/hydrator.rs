//! Ownership-scoped field writes and post-restore hook scheduling.
//!
//! Writes go straight into the slot declared by the owning type, bypassing accessors and
//! readonly flags. Hooks never run in the middle of a batch: every entity of the batch has
//! all of its fields written before the first hook fires, so hooks may look at sibling
//! entities.

use crate::error::{Result, VarExportError};
use crate::object::{FieldKey, ObjectRef};
use crate::types::{PUBLIC_SCOPE, TypeRegistry};
use crate::value::{Array, Value};
use indexmap::IndexMap;
use tracing::trace;

/// Field values grouped by owning type: `owner -> (name -> value)`.
///
/// The owner [`PUBLIC_SCOPE`] resolves names as seen from the instance's own type.
pub type FieldsByOwner = IndexMap<String, IndexMap<String, Value>>;

/// Which hook to run for an entity once the batch is hydrated.
#[derive(Debug, Clone, Default)]
pub enum PostRestoreCall {
    /// Nothing.
    #[default]
    None,
    /// The type's wakeup hook.
    Wakeup,
    /// The type's restore hook, fed with this state.
    Restore(Array),
}

/// One entity of a hydration batch.
#[derive(Debug, Clone)]
pub struct HydrationEntry {
    /// The freshly allocated instance.
    pub instance: ObjectRef,
    /// Values to write.
    pub fields: FieldsByOwner,
    /// Slots to leave unset, cleared after the writes.
    pub unset: Vec<FieldKey>,
    /// Hook to run afterwards.
    pub post: PostRestoreCall,
    /// Position of the hook in the batch schedule (ascending).
    pub order: u32,
}

impl HydrationEntry {
    /// An entry with no hook.
    pub fn new(instance: ObjectRef, fields: FieldsByOwner) -> Self {
        Self {
            instance,
            fields,
            unset: Vec::new(),
            post: PostRestoreCall::None,
            order: 0,
        }
    }
}

/// Writes values into correctly scoped slots.
#[derive(Debug, Clone, Copy)]
pub struct FieldHydrator<'r> {
    registry: &'r TypeRegistry,
}

impl<'r> FieldHydrator<'r> {
    /// Creates a hydrator resolving layouts through `registry`.
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self { registry }
    }

    /// Writes `fields` into `instance`, then runs the type's wakeup hook if it has one.
    ///
    /// # Errors
    /// * `UnknownType` if an owner is not a known type.
    /// * `HydrationFieldMismatch` if an owner does not declare a field (or is not part of
    ///   the instance's hierarchy).
    pub fn hydrate(&self, instance: &ObjectRef, fields: &FieldsByOwner) -> Result<()> {
        self.write_fields(instance, fields)?;
        let info = self.registry.info_of(instance.class())?;
        if let Some(wakeup) = &info.hooks().wakeup {
            wakeup(instance)?;
        }
        Ok(())
    }

    /// Hydrates a whole batch: all field writes first, then every hook by ascending order.
    ///
    /// A failing write aborts the batch before any hook ran.
    pub fn hydrate_batch(&self, entries: Vec<HydrationEntry>) -> Result<()> {
        for entry in &entries {
            self.write_fields(&entry.instance, &entry.fields)?;
            self.clear_fields(&entry.instance, &entry.unset)?;
        }

        let mut pending: Vec<HydrationEntry> = entries
            .into_iter()
            .filter(|e| !matches!(e.post, PostRestoreCall::None))
            .collect();
        pending.sort_by_key(|e| e.order);

        for entry in pending {
            let info = self.registry.info_of(entry.instance.class())?;
            let type_name = entry.instance.type_name();
            match entry.post {
                PostRestoreCall::None => {}
                PostRestoreCall::Wakeup => {
                    let wakeup = info.hooks().wakeup.as_ref().ok_or_else(|| {
                        VarExportError::hook(type_name, "program expects a wakeup hook")
                    })?;
                    trace!(type_name, order = entry.order, "wakeup");
                    wakeup(&entry.instance)?;
                }
                PostRestoreCall::Restore(state) => {
                    let restore = info.hooks().restore.as_ref().ok_or_else(|| {
                        VarExportError::hook(type_name, "program expects a restore hook")
                    })?;
                    trace!(type_name, order = entry.order, "restore");
                    restore(&entry.instance, state)?;
                }
            }
        }
        Ok(())
    }

    /// Field writes only, no hooks.
    pub fn write_fields(&self, instance: &ObjectRef, fields: &FieldsByOwner) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let info = self.registry.info_of(instance.class())?;
        let layout = info.layout();

        for (owner, values) in fields {
            if owner != PUBLIC_SCOPE && layout.depth_of(owner).is_none() {
                // Distinguish a vanished type from a type outside the hierarchy.
                self.registry.catalog().get(owner)?;
            }
            for (name, value) in values {
                let key = layout.hydration_key(owner, name).ok_or_else(|| {
                    VarExportError::HydrationFieldMismatch {
                        type_name: instance.type_name().to_owned(),
                        owner: owner.clone(),
                        field: name.clone(),
                    }
                })?;
                instance.write_slot(key, value.clone());
            }
        }
        Ok(())
    }

    /// Unsets ownership-scoped slots, bypassing readonly flags like the writes do.
    ///
    /// # Errors
    /// `HydrationFieldMismatch` if a key is not a slot of the instance's type.
    pub fn clear_fields(&self, instance: &ObjectRef, keys: &[FieldKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let info = self.registry.info_of(instance.class())?;
        let layout = info.layout();
        for key in keys {
            let slot = layout.hydration_key(key.owner(), key.name()).ok_or_else(|| {
                VarExportError::HydrationFieldMismatch {
                    type_name: instance.type_name().to_owned(),
                    owner: key.owner().to_owned(),
                    field: key.name().to_owned(),
                }
            })?;
            instance.clear_slot(&slot);
        }
        Ok(())
    }
}

impl TypeRegistry {
    /// Returns a fresh instance of `type_name` with `fields` hydrated into it.
    pub fn instantiate_with(&self, type_name: &str, fields: &FieldsByOwner) -> Result<ObjectRef> {
        let instance = self.instantiate(type_name)?;
        FieldHydrator::new(self).hydrate(&instance, fields)?;
        Ok(instance)
    }
}
