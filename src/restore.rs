//! In-process replay of a [`NormalizedProgram`].
//!
//! Replay runs in four phases: allocate every entity, materialize every reference cell,
//! hydrate the whole entity batch (hooks last), and finally resolve the root. Because
//! every entity exists before any value is resolved, tokens pointing forward or back to
//! an ancestor resolve the same way.

use crate::error::{Result, VarExportError};
use crate::graph::{EntityId, EntityState, NormalizedProgram, PostRestore, Prepared, RefId};
use crate::hydrator::{FieldHydrator, FieldsByOwner, HydrationEntry, PostRestoreCall};
use crate::object::ObjectRef;
use crate::types::TypeRegistry;
use crate::value::{Array, CellRef, Handle, Key, Value};
use indexmap::IndexMap;
use tracing::debug;

/// Rebuilds live value graphs from normalized programs.
#[derive(Debug, Clone, Copy)]
pub struct Restorer<'r> {
    registry: &'r TypeRegistry,
}

impl<'r> Restorer<'r> {
    /// Creates a restorer resolving types through `registry`.
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self { registry }
    }

    /// Replays `program` and returns the restored root.
    ///
    /// # Errors
    /// * `UnknownType` if an entity's type is not in the catalog anymore.
    /// * `NotInstantiable` if it cannot be allocated.
    /// * `HydrationFieldMismatch` if a captured field does not exist on the live type.
    /// * `Format` if a token points outside its pool.
    pub fn restore(&self, program: &NormalizedProgram) -> Result<Value> {
        let mut objects = Vec::with_capacity(program.entities.len());
        for entity in &program.entities {
            let info = self.registry.info(&entity.type_name)?;
            let object = self.registry.instantiate_from(&info)?;
            if let EntityState::Opaque(blob) = &entity.state {
                let codec = info.hooks().opaque.as_ref().ok_or_else(|| {
                    VarExportError::hook(&entity.type_name, "program expects an opaque codec")
                })?;
                (codec.decode)(&object, blob)?;
            }
            objects.push(object);
        }

        let cells: Vec<CellRef> = program
            .references
            .iter()
            .map(|_| CellRef::new(Value::Null))
            .collect();
        let pools = Pools {
            objects: &objects,
            cells: &cells,
        };
        for (cell, reference) in cells.iter().zip(&program.references) {
            cell.set(pools.resolve(&reference.value)?);
        }

        let mut batch = Vec::with_capacity(objects.len());
        for (object, entity) in objects.iter().zip(&program.entities) {
            let mut entry = HydrationEntry::new(object.clone(), FieldsByOwner::new());
            match &entity.state {
                EntityState::Fields(fields) => {
                    for (owner, values) in fields {
                        let mut resolved = IndexMap::with_capacity(values.len());
                        for (name, value) in values {
                            resolved.insert(name.clone(), pools.resolve(value)?);
                        }
                        entry.fields.insert(owner.clone(), resolved);
                    }
                    entry.unset.clone_from(&entity.unset);
                }
                EntityState::Custom(items) => {
                    entry.post = PostRestoreCall::Restore(pools.array(items)?);
                }
                EntityState::Opaque(_) => {}
            }
            match entity.hook {
                PostRestore::None => {}
                PostRestore::Wakeup(order) => {
                    entry.post = PostRestoreCall::Wakeup;
                    entry.order = order;
                }
                PostRestore::Restore(order) => entry.order = order,
            }
            batch.push(entry);
        }
        FieldHydrator::new(self.registry).hydrate_batch(batch)?;

        let root = pools.resolve(&program.root)?;
        debug!(
            entities = objects.len(),
            references = cells.len(),
            "restored value graph"
        );
        Ok(root)
    }
}

struct Pools<'a> {
    objects: &'a [ObjectRef],
    cells: &'a [CellRef],
}

impl Pools<'_> {
    /// Turns a prepared value into a live one. Nested arrays are walked with an explicit
    /// stack, so nesting depth is not limited by the thread's stack.
    fn resolve(&self, prepared: &Prepared) -> Result<Value> {
        struct Open<'p> {
            rest: std::slice::Iter<'p, (Key, Prepared)>,
            key: Option<Key>,
            done: Array,
        }

        let mut stack: Vec<Open<'_>> = Vec::new();
        let mut current = prepared;
        loop {
            let mut done = match current {
                Prepared::Array(items) => {
                    stack.push(Open {
                        rest: items.iter(),
                        key: None,
                        done: Array::with_capacity(items.len()),
                    });
                    None
                }
                Prepared::Null => Some(Value::Null),
                Prepared::Bool(b) => Some(Value::Bool(*b)),
                Prepared::Int(i) => Some(Value::Int(*i)),
                Prepared::Float(f) => Some(Value::Float(*f)),
                Prepared::Str(s) => Some(Value::str(s)),
                Prepared::Entity(id) => Some(Value::Object(self.object(*id)?)),
                Prepared::Ref(id) => Some(Value::Cell(self.cell(*id)?)),
                Prepared::Handle { kind, locator } => Some(Value::Handle(Handle::new(
                    kind.as_str(),
                    Some(locator.clone()),
                ))),
            };

            loop {
                let Some(top) = stack.last_mut() else {
                    return done.ok_or_else(|| {
                        VarExportError::Internal("resolve finished without a value".into())
                    });
                };
                if let (Some(value), Some(key)) = (done.take(), top.key.take()) {
                    top.done.insert(key, value);
                }
                match top.rest.next() {
                    Some((key, child)) => {
                        top.key = Some(key.clone());
                        current = child;
                        break;
                    }
                    None => done = stack.pop().map(|open| Value::Array(open.done)),
                }
            }
        }
    }

    fn array(&self, items: &[(Key, Prepared)]) -> Result<Array> {
        items
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.resolve(v)?)))
            .collect()
    }

    fn object(&self, id: EntityId) -> Result<ObjectRef> {
        self.objects
            .get(id.index())
            .cloned()
            .ok_or_else(|| VarExportError::Format(format!("dangling entity token {id}")))
    }

    fn cell(&self, id: RefId) -> Result<CellRef> {
        self.cells
            .get(id.index())
            .cloned()
            .ok_or_else(|| VarExportError::Format(format!("dangling reference token {id}")))
    }
}
