use super::id::{EntityId, RefId};
use super::program::{
    EntityState, NormalizedProgram, PostRestore, Prepared, PreparedEntity, PreparedFields,
    ReferenceCell,
};
use crate::error::{Result, VarExportError};
use crate::lazy::LazyObjects;
use crate::object::{FieldKey, ObjectId, ObjectRef};
use crate::types::{ClassLayout, PUBLIC_SCOPE, TypeInfo, TypeRegistry};
use crate::value::{Array, Key, Value};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace, warn};

/// Knobs of a single preparation.
#[derive(Debug, Clone, Copy)]
pub struct PrepareOptions {
    /// Omit fields equal to the type's prototype default.
    pub elide_defaults: bool,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            elide_defaults: true,
        }
    }
}

/// Walks a value graph once and produces a [`NormalizedProgram`].
///
/// Each entity is captured at most once, whatever the number of paths that reach it; cells
/// reached more than once become reference cells. The source graph must not be mutated
/// while `prepare` runs.
///
/// The walk keeps its own stack of open containers and entities, so the depth of the
/// graph is bounded by memory, not by the thread's stack.
#[derive(Debug, Clone, Copy)]
pub struct GraphPreparer<'r> {
    registry: &'r TypeRegistry,
    lazy: Option<&'r LazyObjects>,
    options: PrepareOptions,
}

impl<'r> GraphPreparer<'r> {
    /// Creates a preparer with default options.
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self {
            registry,
            lazy: None,
            options: PrepareOptions::default(),
        }
    }

    /// Overrides the options.
    pub fn with_options(mut self, options: PrepareOptions) -> Self {
        self.options = options;
        self
    }

    /// Fully initializes lazy objects tracked by `lazy` before capturing them. A proxy is
    /// captured as a copy of its real instance.
    pub fn with_lazy(mut self, lazy: &'r LazyObjects) -> Self {
        self.lazy = Some(lazy);
        self
    }

    /// Prepares the graph rooted at `root`.
    ///
    /// # Errors
    /// `NotInstantiable`, `MalformedHookResult`, `NonRecursable`, or any error reported by
    /// a type hook. The whole call is aborted on the first error.
    pub fn prepare(&self, root: &Value) -> Result<NormalizedProgram> {
        let mut walk = Walk {
            registry: self.registry,
            lazy: self.lazy,
            options: self.options,
            entity_slots: HashMap::new(),
            entities: Vec::new(),
            cell_slots: HashMap::new(),
            cells: Vec::new(),
            handles: HashSet::new(),
            completed: 0,
            is_static: true,
        };

        let root = walk.run(root.clone())?;
        let program = walk.finish(root)?;
        debug!(
            entities = program.entities.len(),
            references = program.references.len(),
            is_static = program.is_static,
            "prepared value graph"
        );
        Ok(program)
    }
}

struct PendingCell {
    value: Option<Prepared>,
    use_count: u32,
}

/// Children of an open frame: the ones still to visit, and the prepared ones.
struct Children<K> {
    rest: std::vec::IntoIter<(K, Value)>,
    current: Option<K>,
    done: Vec<(K, Prepared)>,
}

impl<K> Children<K> {
    fn new(items: Vec<(K, Value)>) -> Self {
        Self {
            done: Vec::with_capacity(items.len()),
            rest: items.into_iter(),
            current: None,
        }
    }

    fn next(&mut self) -> Option<Value> {
        let (key, value) = self.rest.next()?;
        self.current = Some(key);
        Some(value)
    }

    fn accept(&mut self, prepared: Prepared) {
        if let Some(key) = self.current.take() {
            self.done.push((key, prepared));
        }
    }
}

/// What an entity frame captures.
enum Capture {
    Opaque(String),
    /// State handed to a restore hook.
    Custom(Children<Key>),
    /// Snapshot hook output written back as public fields.
    Public(Children<Key>),
    /// Raw storage, plus the slots to clear on restore.
    Fields(Children<FieldKey>, Vec<FieldKey>),
}

struct EntityFrame {
    id: EntityId,
    type_name: String,
    wakeup: bool,
    capture: Capture,
}

/// An open container or entity whose children are being prepared.
enum Frame {
    Array(Children<Key>),
    Cell(RefId, Children<()>),
    Entity(EntityFrame),
}

impl Frame {
    fn next_child(&mut self) -> Option<Value> {
        match self {
            Self::Array(children) => children.next(),
            Self::Cell(_, children) => children.next(),
            Self::Entity(entity) => match &mut entity.capture {
                Capture::Opaque(_) => None,
                Capture::Custom(children) | Capture::Public(children) => children.next(),
                Capture::Fields(children, _) => children.next(),
            },
        }
    }

    fn accept(&mut self, prepared: Prepared) {
        match self {
            Self::Array(children) => children.accept(prepared),
            Self::Cell(_, children) => children.accept(prepared),
            Self::Entity(entity) => match &mut entity.capture {
                Capture::Opaque(_) => {}
                Capture::Custom(children) | Capture::Public(children) => {
                    children.accept(prepared)
                }
                Capture::Fields(children, _) => children.accept(prepared),
            },
        }
    }
}

/// State of one `prepare` call.
///
/// "Not visited yet" is the absence of a key in the pools, never a marker value, so no
/// value of the graph can be mistaken for it.
struct Walk<'r> {
    registry: &'r TypeRegistry,
    lazy: Option<&'r LazyObjects>,
    options: PrepareOptions,
    entity_slots: HashMap<ObjectId, EntityId>,
    entities: Vec<Option<PreparedEntity>>,
    cell_slots: HashMap<usize, RefId>,
    cells: Vec<PendingCell>,
    handles: HashSet<usize>,
    completed: u32,
    is_static: bool,
}

impl Walk<'_> {
    /// Depth-first over an explicit stack. A frame completes when its last child has been
    /// prepared, which gives entities their post-order hook position.
    fn run(&mut self, root: Value) -> Result<Prepared> {
        let mut stack: Vec<Frame> = Vec::new();
        let mut done = self.enter(root, &mut stack)?;
        loop {
            let Some(top) = stack.last_mut() else {
                return done.ok_or_else(|| {
                    VarExportError::Internal("walk finished without a root value".into())
                });
            };
            if let Some(prepared) = done.take() {
                top.accept(prepared);
            }
            done = match top.next_child() {
                Some(child) => self.enter(child, &mut stack)?,
                None => match stack.pop() {
                    Some(frame) => Some(self.complete(frame)?),
                    None => None,
                },
            };
        }
    }

    /// Prepares a leaf or a token right away, or opens a frame and returns `None`.
    fn enter(&mut self, value: Value, stack: &mut Vec<Frame>) -> Result<Option<Prepared>> {
        Ok(Some(match value {
            Value::Null => Prepared::Null,
            Value::Bool(b) => Prepared::Bool(b),
            Value::Int(i) => Prepared::Int(i),
            Value::Float(f) => Prepared::Float(f),
            Value::Str(s) => Prepared::Str(s.to_string()),
            Value::Array(items) => {
                stack.push(Frame::Array(Children::new(items.into_iter().collect())));
                return Ok(None);
            }
            Value::Cell(cell) => {
                self.is_static = false;
                if let Some(&id) = self.cell_slots.get(&cell.addr()) {
                    if let Some(pending) = self.cells.get_mut(id.index()) {
                        pending.use_count += 1;
                    }
                    return Ok(Some(Prepared::Ref(id)));
                }
                // Register before descending so a cell containing itself resolves to a token.
                let id = RefId::new(self.cells.len() as u32);
                self.cells.push(PendingCell {
                    value: None,
                    use_count: 0,
                });
                self.cell_slots.insert(cell.addr(), id);
                stack.push(Frame::Cell(id, Children::new(vec![((), cell.get())])));
                return Ok(None);
            }
            Value::Object(object) => {
                self.is_static = false;
                match self.entity_slots.get(&object.id()) {
                    Some(&id) => Prepared::Entity(id),
                    None => {
                        stack.push(Frame::Entity(self.open_entity(&object)?));
                        return Ok(None);
                    }
                }
            }
            Value::Handle(handle) => {
                self.is_static = false;
                let addr = std::sync::Arc::as_ptr(&handle) as usize;
                if !self.handles.insert(addr) {
                    return Err(VarExportError::NonRecursable {
                        kind: handle.kind().to_owned(),
                    });
                }
                let locator = handle.locator().ok_or_else(|| {
                    VarExportError::not_instantiable(handle.kind(), "handle has no locator")
                })?;
                Prepared::Handle {
                    kind: handle.kind().to_owned(),
                    locator: locator.to_owned(),
                }
            }
        }))
    }

    fn open_entity(&mut self, object: &ObjectRef) -> Result<EntityFrame> {
        // Reserve the slot first: cycles back to this entity resolve to the token.
        let id = EntityId::new(self.entities.len() as u32);
        self.entities.push(None);
        self.entity_slots.insert(object.id(), id);
        trace!(type_name = object.type_name(), entity = %id, "slotted entity");

        let source = match self.lazy {
            Some(lazy) => {
                let real = lazy.real_instance(object)?;
                lazy.initialize(&real)?;
                // Reaching the real instance directly later yields the same token.
                self.entity_slots.entry(real.id()).or_insert(id);
                real
            }
            None => object.clone(),
        };
        let info = self.registry.info_of(source.class())?;
        let hooks = info.hooks();

        let capture = if let Some(codec) = &hooks.opaque {
            Capture::Opaque((codec.encode)(&source)?)
        } else if let Some(snapshot) = &hooks.snapshot {
            let captured = match snapshot(&source)? {
                Value::Array(captured) => captured,
                other => {
                    return Err(VarExportError::MalformedHookResult {
                        type_name: source.type_name().to_owned(),
                        found: other.type_label(),
                    });
                }
            };
            if hooks.restore.is_some() {
                Capture::Custom(Children::new(captured.into_iter().collect()))
            } else {
                Capture::Public(Children::new(public_fields(&source, captured)?))
            }
        } else if hooks.restore.is_some() {
            let captured = raw_state(&source, info.layout());
            Capture::Custom(Children::new(captured.into_iter().collect()))
        } else {
            let (fields, unset) = self.raw_fields(&source, &info)?;
            Capture::Fields(Children::new(fields), unset)
        };

        Ok(EntityFrame {
            id,
            type_name: source.type_name().to_owned(),
            wakeup: hooks.wakeup.is_some(),
            capture,
        })
    }

    /// Enumerates the object's storage, root ancestor's slots first, and the declared
    /// slots the instance has unset although the prototype sets them.
    fn raw_fields(
        &self,
        object: &ObjectRef,
        info: &TypeInfo,
    ) -> Result<(Vec<(FieldKey, Value)>, Vec<FieldKey>)> {
        let layout = info.layout();
        let prototype = info.prototype();
        let mut slots = object.slots();
        let mut ordered: Vec<(FieldKey, Value)> = Vec::with_capacity(slots.len());
        let mut unset = Vec::new();
        for slot in layout.slots() {
            match slots.shift_remove(&slot.key) {
                Some(value) => ordered.push((slot.key.clone(), value)),
                None if prototype.get(&slot.key).is_some() => unset.push(slot.key.clone()),
                None => {}
            }
        }
        // Whatever remains is dynamic, kept in insertion order.
        ordered.extend(slots);

        let mut elide = self.options.elide_defaults && !info.descriptor().per_instance_defaults();

        if let Some(sleep) = &info.hooks().sleep {
            elide = false;
            let mut wanted: Vec<String> = sleep(object)?;
            let mut select = |key: &FieldKey| {
                let mangled = layout.mangled_name(key);
                match wanted.iter().position(|w| *w == mangled) {
                    Some(pos) => {
                        wanted.swap_remove(pos);
                        true
                    }
                    None => false,
                }
            };
            ordered.retain(|(key, _)| select(key));
            unset.retain(|key| select(key));
            for missing in wanted {
                warn!(
                    type_name = object.type_name(),
                    field = %missing.replace('\0', "\\0"),
                    "field selected by sleep hook does not exist"
                );
            }
        }

        if elide {
            ordered
                .retain(|(key, value)| !prototype.get(key).is_some_and(|d| d.identical(value)));
        }
        Ok((ordered, unset))
    }

    fn complete(&mut self, frame: Frame) -> Result<Prepared> {
        match frame {
            Frame::Array(children) => Ok(Prepared::Array(children.done)),
            Frame::Cell(id, children) => {
                let value = children.done.into_iter().next().map(|(_, value)| value);
                if let Some(pending) = self.cells.get_mut(id.index()) {
                    pending.value = value;
                }
                Ok(Prepared::Ref(id))
            }
            Frame::Entity(entity) => self.complete_entity(entity).map(Prepared::Entity),
        }
    }

    fn complete_entity(&mut self, frame: EntityFrame) -> Result<EntityId> {
        let EntityFrame {
            id,
            type_name,
            wakeup,
            capture,
        } = frame;

        let mut unset = Vec::new();
        let state = match capture {
            Capture::Opaque(blob) => EntityState::Opaque(blob),
            Capture::Custom(children) => EntityState::Custom(children.done),
            Capture::Public(children) => {
                let mut fields = IndexMap::new();
                for (key, value) in children.done {
                    if let Some(name) = key.as_str() {
                        fields.insert(name.to_owned(), value);
                    }
                }
                let mut by_owner = PreparedFields::new();
                if !fields.is_empty() {
                    by_owner.insert(PUBLIC_SCOPE.to_owned(), fields);
                }
                EntityState::Fields(by_owner)
            }
            Capture::Fields(children, cleared) => {
                unset = cleared;
                let mut by_owner = PreparedFields::new();
                for (key, value) in children.done {
                    by_owner
                        .entry(key.owner().to_owned())
                        .or_default()
                        .insert(key.name().to_owned(), value);
                }
                EntityState::Fields(by_owner)
            }
        };

        self.completed += 1;
        let hook = match &state {
            EntityState::Opaque(_) => PostRestore::None,
            EntityState::Custom(_) => PostRestore::Restore(self.completed),
            EntityState::Fields(_) if wakeup => PostRestore::Wakeup(self.completed),
            EntityState::Fields(_) => PostRestore::None,
        };

        let slot = self
            .entities
            .get_mut(id.index())
            .ok_or_else(|| VarExportError::Internal(format!("entity slot {id} vanished")))?;
        *slot = Some(PreparedEntity {
            type_name,
            state,
            hook,
            unset,
        });
        Ok(id)
    }

    fn finish(mut self, root: Prepared) -> Result<NormalizedProgram> {
        let remap: Vec<Option<RefId>> = {
            let mut next = 0u32;
            self.cells
                .iter()
                .map(|c| {
                    (c.use_count > 0).then(|| {
                        let id = RefId::new(next);
                        next += 1;
                        id
                    })
                })
                .collect()
        };

        let root = collapse(root, &mut self.cells, &remap)?;

        let mut entities = Vec::with_capacity(self.entities.len());
        for (idx, slot) in self.entities.into_iter().enumerate() {
            let mut entity = slot.ok_or_else(|| {
                VarExportError::Internal(format!("entity slot #{idx} was never completed"))
            })?;
            match &mut entity.state {
                EntityState::Fields(fields) => {
                    for value in fields.values_mut().flat_map(|f| f.values_mut()) {
                        let taken = std::mem::replace(value, Prepared::Null);
                        *value = collapse(taken, &mut self.cells, &remap)?;
                    }
                }
                EntityState::Custom(items) => {
                    for (_, value) in items.iter_mut() {
                        let taken = std::mem::replace(value, Prepared::Null);
                        *value = collapse(taken, &mut self.cells, &remap)?;
                    }
                }
                EntityState::Opaque(_) => {}
            }
            entities.push(entity);
        }

        let mut references = Vec::new();
        for (old, new) in remap.iter().enumerate() {
            let Some(new) = new else { continue };
            let (value, use_count) = match self.cells.get_mut(old) {
                Some(cell) => (cell.value.take(), cell.use_count),
                None => (None, 0),
            };
            let value = value.ok_or_else(|| {
                VarExportError::Internal(format!("reference {new} has no value"))
            })?;
            references.push(ReferenceCell {
                id: *new,
                value: collapse(value, &mut self.cells, &remap)?,
                use_count,
            });
        }

        Ok(NormalizedProgram {
            entities,
            references,
            root,
            is_static: self.is_static,
        })
    }
}

/// Snapshot hook output for a type without restore hook: every key must name a field.
fn public_fields(object: &ObjectRef, captured: Array) -> Result<Vec<(Key, Value)>> {
    captured
        .into_iter()
        .map(|(key, value)| match key {
            Key::Str(_) => Ok((key, value)),
            Key::Int(_) => Err(VarExportError::MalformedHookResult {
                type_name: object.type_name().to_owned(),
                found: format!("integer key {key}"),
            }),
        })
        .collect()
}

/// Inlines cells that were seen once and renumbers the others.
///
/// Iterative like the walk: nested arrays and chains of inlined cells can be as deep as
/// the source graph.
fn collapse(
    prepared: Prepared,
    cells: &mut [PendingCell],
    remap: &[Option<RefId>],
) -> Result<Prepared> {
    struct Open {
        rest: std::vec::IntoIter<(Key, Prepared)>,
        key: Option<Key>,
        done: Vec<(Key, Prepared)>,
    }

    let mut stack: Vec<Open> = Vec::new();
    let mut current = prepared;
    loop {
        let mut done = match current {
            Prepared::Array(items) => {
                stack.push(Open {
                    done: Vec::with_capacity(items.len()),
                    rest: items.into_iter(),
                    key: None,
                });
                None
            }
            Prepared::Ref(id) => match remap.get(id.index()).copied().flatten() {
                Some(new) => Some(Prepared::Ref(new)),
                None => {
                    current = cells
                        .get_mut(id.index())
                        .and_then(|c| c.value.take())
                        .ok_or_else(|| {
                            VarExportError::Internal(format!(
                                "unshared reference {id} inlined twice"
                            ))
                        })?;
                    continue;
                }
            },
            leaf => Some(leaf),
        };

        loop {
            let Some(top) = stack.last_mut() else {
                return done.ok_or_else(|| {
                    VarExportError::Internal("collapse finished without a value".into())
                });
            };
            if let (Some(value), Some(key)) = (done.take(), top.key.take()) {
                top.done.push((key, value));
            }
            match top.rest.next() {
                Some((key, child)) => {
                    top.key = Some(key);
                    current = child;
                    break;
                }
                None => done = stack.pop().map(|open| Prepared::Array(open.done)),
            }
        }
    }
}

/// Flat capture handed to a restore hook when the type has no snapshot hook.
fn raw_state(object: &ObjectRef, layout: &ClassLayout) -> Array {
    object
        .slots()
        .into_iter()
        .map(|(key, value)| (Key::from(layout.mangled_name(&key)), value))
        .collect()
}
