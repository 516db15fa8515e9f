use super::catalog::TypeCatalog;
use super::descriptor::{Construction, TypeDescriptor, TypeHooks, TypeKind, ancestry};
use super::layout::ClassLayout;
use crate::error::{Result, VarExportError};
use crate::object::{FieldKey, Object, ObjectRef};
use crate::value::{Array, Value};
use indexmap::IndexMap;
use parking_lot::{ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Immutable empty instance of a type.
///
/// Used as the reference for default elision and as the template that duplicable types
/// are copied from.
#[derive(Debug)]
pub struct Prototype {
    type_name: Arc<str>,
    slots: IndexMap<FieldKey, Value>,
}

impl Prototype {
    /// Type this prototype belongs to.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Value of a slot in the empty instance. `None` means the slot starts unset.
    pub fn get(&self, key: &FieldKey) -> Option<&Value> {
        self.slots.get(key)
    }

    /// Every slot set in the empty instance.
    pub fn slots(&self) -> &IndexMap<FieldKey, Value> {
        &self.slots
    }

    /// Manufactures a new instance by shallow copy.
    fn duplicate(&self, class: &Arc<dyn TypeDescriptor>) -> ObjectRef {
        Object::allocate(class.clone(), self.slots.clone())
    }
}

/// Everything the engine caches about one concrete type.
#[derive(Debug)]
pub struct TypeInfo {
    descriptor: Arc<dyn TypeDescriptor>,
    layout: Arc<ClassLayout>,
    hooks: TypeHooks,
    bare_allocation: bool,
    fallback_used: bool,
    duplicable: bool,
    prototype: Arc<Prototype>,
}

impl TypeInfo {
    /// The descriptor the info was built from.
    pub fn descriptor(&self) -> &Arc<dyn TypeDescriptor> {
        &self.descriptor
    }

    /// Slot table.
    pub fn layout(&self) -> &Arc<ClassLayout> {
        &self.layout
    }

    /// Hooks with inheritance resolved.
    pub fn hooks(&self) -> &TypeHooks {
        &self.hooks
    }

    /// True if instances can be allocated without running any user logic.
    pub fn bare_allocation(&self) -> bool {
        self.bare_allocation
    }

    /// True if the empty instance had to be synthesized through the restore hook.
    pub fn fallback_used(&self) -> bool {
        self.fallback_used
    }

    /// True if shallow copies of the prototype are valid instances.
    pub fn duplicable(&self) -> bool {
        self.duplicable
    }

    /// The cached empty instance.
    pub fn prototype(&self) -> &Arc<Prototype> {
        &self.prototype
    }
}

/// Process-wide (or caller-scoped) cache of per-type allocation facts and prototypes.
///
/// Lookups take a read lock only. Building the entry of a new type is serialized behind a
/// reentrant lock and published once, so two threads never publish divergent prototypes.
/// The lock is reentrant because building may run a restore hook that itself asks the
/// registry about other types.
#[derive(Debug)]
pub struct TypeRegistry {
    catalog: TypeCatalog,
    infos: RwLock<HashMap<String, Arc<TypeInfo>>>,
    build_lock: ReentrantMutex<()>,
}

impl TypeRegistry {
    /// Creates a registry over `catalog`.
    pub fn new(catalog: TypeCatalog) -> Self {
        Self {
            catalog,
            infos: RwLock::new(HashMap::new()),
            build_lock: ReentrantMutex::new(()),
        }
    }

    /// The catalog used to resolve names.
    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    /// True if an empty instance of `type_name` can be constructed without running user
    /// logic. False means the restore-hook fallback is in use.
    ///
    /// # Errors
    /// `UnknownType` or `NotInstantiable` as for [`TypeRegistry::info`].
    pub fn can_allocate_bare(&self, type_name: &str) -> Result<bool> {
        Ok(self.info(type_name)?.bare_allocation)
    }

    /// True if a shallow copy of the prototype is a valid way to make more instances.
    pub fn is_duplicable(&self, type_name: &str) -> Result<bool> {
        Ok(self.info(type_name)?.duplicable)
    }

    /// Returns the cached empty prototype, building it on first use.
    pub fn prototype(&self, type_name: &str) -> Result<Arc<Prototype>> {
        Ok(self.info(type_name)?.prototype.clone())
    }

    /// Returns the cached info of a named type.
    ///
    /// # Errors
    /// * `UnknownType` if the catalog does not know the name.
    /// * `NotInstantiable` if the type is abstract, an interface, or every allocation
    ///   strategy failed.
    pub fn info(&self, type_name: &str) -> Result<Arc<TypeInfo>> {
        if let Some(info) = self.infos.read().get(type_name) {
            return Ok(info.clone());
        }
        let descriptor = self.catalog.get(type_name)?;
        self.publish(&descriptor)
    }

    /// Returns the cached info of the type described by `descriptor`, registering the type
    /// in the catalog if it was not known yet.
    pub fn info_of(&self, descriptor: &Arc<dyn TypeDescriptor>) -> Result<Arc<TypeInfo>> {
        if let Some(info) = self.infos.read().get(descriptor.name()) {
            return Ok(info.clone());
        }
        if !self.catalog.contains(descriptor.name()) {
            self.catalog.register(descriptor);
        }
        self.publish(descriptor)
    }

    /// Returns a fresh empty instance of `type_name`.
    ///
    /// Duplicable types are copied from the prototype; the others are allocated again with
    /// the same strategy that built the prototype.
    pub fn instantiate(&self, type_name: &str) -> Result<ObjectRef> {
        let info = self.info(type_name)?;
        self.instantiate_from(&info)
    }

    /// [`TypeRegistry::instantiate`] for an already resolved type.
    pub fn instantiate_from(&self, info: &TypeInfo) -> Result<ObjectRef> {
        if info.duplicable {
            return Ok(info.prototype.duplicate(&info.descriptor));
        }
        let (object, _) = allocate(&info.descriptor, &info.layout, &info.hooks)?;
        Ok(object)
    }

    /// Resolves `name` as seen from the type itself (its own private fields first).
    pub fn field_key(&self, type_name: &str, name: &str) -> Result<FieldKey> {
        let info = self.info(type_name)?;
        info.layout
            .resolve_for_write(Some(type_name), name)
            .ok_or_else(|| VarExportError::HydrationFieldMismatch {
                type_name: type_name.to_owned(),
                owner: type_name.to_owned(),
                field: name.to_owned(),
            })
    }

    /// Number of types with a published entry.
    pub fn cached_types(&self) -> usize {
        self.infos.read().len()
    }

    fn publish(&self, descriptor: &Arc<dyn TypeDescriptor>) -> Result<Arc<TypeInfo>> {
        let _guard = self.build_lock.lock();
        if let Some(info) = self.infos.read().get(descriptor.name()) {
            return Ok(info.clone());
        }
        let info = Arc::new(build_info(descriptor)?);
        debug!(
            type_name = descriptor.name(),
            bare = info.bare_allocation,
            duplicable = info.duplicable,
            "published type info"
        );
        self.infos
            .write()
            .insert(descriptor.name().to_owned(), info.clone());
        Ok(info)
    }
}

fn build_info(descriptor: &Arc<dyn TypeDescriptor>) -> Result<TypeInfo> {
    match descriptor.kind() {
        TypeKind::Concrete => {}
        TypeKind::Abstract => {
            return Err(VarExportError::not_instantiable(
                descriptor.name(),
                "type is abstract",
            ));
        }
        TypeKind::Interface => {
            return Err(VarExportError::not_instantiable(
                descriptor.name(),
                "type is an interface",
            ));
        }
    }

    let hooks = ancestry(descriptor)
        .iter()
        .fold(TypeHooks::default(), |inherited, level| {
            level.hooks().inherit(&inherited)
        });
    let layout = Arc::new(ClassLayout::build(descriptor));
    let (empty, fallback_used) = allocate(descriptor, &layout, &hooks)?;
    let prototype = Arc::new(Prototype {
        type_name: Arc::from(descriptor.name()),
        slots: empty.slots(),
    });

    Ok(TypeInfo {
        descriptor: descriptor.clone(),
        bare_allocation: !fallback_used,
        fallback_used,
        duplicable: !hooks.copy_side_effects,
        layout,
        hooks,
        prototype,
    })
}

/// Allocates an empty instance. The flag is true when the restore-hook fallback was used.
fn allocate(
    descriptor: &Arc<dyn TypeDescriptor>,
    layout: &ClassLayout,
    hooks: &TypeHooks,
) -> Result<(ObjectRef, bool)> {
    match descriptor.construction() {
        Construction::Bare => Ok((Object::allocate(descriptor.clone(), layout.defaults()), false)),
        Construction::ViaRestoreHook => {
            let restore = hooks.restore.as_ref().ok_or_else(|| {
                VarExportError::not_instantiable(
                    descriptor.name(),
                    "bare allocation is refused and the type has no restore hook",
                )
            })?;
            let object = Object::allocate(descriptor.clone(), layout.defaults());
            restore(&object, Array::new()).map_err(|e| {
                VarExportError::not_instantiable(
                    descriptor.name(),
                    format!("restoring from an empty state failed: {e}"),
                )
            })?;
            trace!(type_name = descriptor.name(), "allocated through restore hook");
            Ok((object, true))
        }
        Construction::Impossible => Err(VarExportError::not_instantiable(
            descriptor.name(),
            "no allocation strategy exists",
        )),
    }
}
