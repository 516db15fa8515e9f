use super::accessors::{ClassAccessors, ClassResetter};
use super::state::{
    FallbackInitializer, FieldInitializer, Initializer, LazyState, LazyStatus, WholeInitializer,
};
use crate::error::{Result, VarExportError};
use crate::hydrator::{FieldHydrator, FieldsByOwner};
use crate::object::{FieldKey, Object, ObjectId, ObjectRef};
use crate::types::{TypeInfo, TypeRegistry};
use crate::value::Value;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

struct LazyEntry {
    owner: Weak<Object>,
    state: Arc<Mutex<LazyState>>,
}

/// What a touch has to do, decided under the state lock and carried out without it.
enum Step {
    PassThrough,
    Whole {
        init: WholeInitializer,
        skipped: HashSet<FieldKey>,
    },
    Field {
        init: FieldInitializer,
        key: FieldKey,
    },
    Fallback(FallbackInitializer),
    /// A partial ghost with nothing left to run for this access.
    MarkReal(FieldKey),
}

/// Clears `in_progress` when an initializer returns, fails or unwinds.
struct Running<'a>(&'a Mutex<LazyState>);

impl<'a> Running<'a> {
    fn enter(state: &'a Mutex<LazyState>) -> Self {
        state.lock().in_progress = true;
        Self(state)
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.lock().in_progress = false;
    }
}

/// Registry of deferred instances: ghosts and proxies.
///
/// States are keyed by object identity and hold the instance weakly: a lazy object that
/// is dropped takes nothing with it, and its entry is purged on the next creation. Ghost
/// entries are dropped once fully initialized; proxy entries stay, since they hold the
/// real instance. Accessor tables and resetters are built once per type and cached.
///
/// A ghost is not locked for the duration of its initializer. Touching the same ghost for
/// the first time from several threads at once must be prevented by the caller.
pub struct LazyObjects {
    registry: Arc<TypeRegistry>,
    states: Mutex<HashMap<ObjectId, LazyEntry>>,
    accessors: RwLock<HashMap<(String, Option<String>), Arc<ClassAccessors>>>,
    resetters: RwLock<HashMap<String, Arc<ClassResetter>>>,
}

impl std::fmt::Debug for LazyObjects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyObjects")
            .field("tracked", &self.states.lock().len())
            .field("accessor_tables", &self.accessors.read().len())
            .finish()
    }
}

impl LazyObjects {
    /// Creates an empty registry allocating through `registry`.
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            states: Mutex::new(HashMap::new()),
            accessors: RwLock::new(HashMap::new()),
            resetters: RwLock::new(HashMap::new()),
        }
    }

    /// The type registry ghosts are allocated from.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Creates a ghost (or a proxy, for [`Initializer::Proxy`]) of `type_name`.
    ///
    /// Every declared field starts unset, except the `skipped` ones which are written
    /// right away and never reset or initialized later.
    ///
    /// # Errors
    /// * `UnknownType`, or `NotInstantiable` for abstract and interface types.
    /// * `NotInstantiable` for a proxy with skipped fields: a proxy holds no state.
    /// * `HydrationFieldMismatch` if a skipped key is not a slot of the type.
    pub fn create_deferred(
        &self,
        type_name: &str,
        initializer: Initializer,
        skipped: impl IntoIterator<Item = (FieldKey, Value)>,
    ) -> Result<ObjectRef> {
        let info = self.registry.info(type_name)?;
        let resetter = self.resetter(&info);
        let object = self.registry.instantiate_from(&info)?;

        let seeds: IndexMap<FieldKey, Value> = skipped.into_iter().collect();
        if matches!(initializer, Initializer::Proxy(_)) && !seeds.is_empty() {
            return Err(VarExportError::not_instantiable(
                type_name,
                "a proxy forwards every field and cannot be seeded",
            ));
        }
        let skipped: HashSet<FieldKey> = seeds.keys().cloned().collect();
        resetter.unset_all(&object, &skipped);
        FieldHydrator::new(&self.registry).write_fields(&object, &by_owner(seeds))?;

        let pending: HashSet<FieldKey> = resetter
            .keys()
            .filter(|key| !skipped.contains(*key))
            .cloned()
            .collect();
        let state = LazyState::new(initializer, pending, skipped);

        let mut states = self.states.lock();
        states.retain(|_, entry| entry.owner.strong_count() > 0);
        states.insert(
            object.id(),
            LazyEntry {
                owner: Arc::downgrade(&object),
                state: Arc::new(Mutex::new(state)),
            },
        );
        debug!(type_name, object = ?object, tracked = states.len(), "created ghost");
        Ok(object)
    }

    /// True if `object` is a ghost that is not fully initialized, or a proxy that has
    /// not created its real instance yet.
    pub fn is_lazy(&self, object: &ObjectRef) -> bool {
        self.status(object) != LazyStatus::FullyInitialized
    }

    /// Current status. Objects that are not tracked are real.
    pub fn status(&self, object: &ObjectRef) -> LazyStatus {
        self.state_of(object)
            .map_or(LazyStatus::FullyInitialized, |state| state.lock().status)
    }

    /// True if the object is fully initialized, or partially initialized when `partial`
    /// is set.
    pub fn is_initialized(&self, object: &ObjectRef, partial: bool) -> bool {
        match self.status(object) {
            LazyStatus::FullyInitialized => true,
            LazyStatus::PartiallyInitialized => partial,
            LazyStatus::Uninitialized => false,
        }
    }

    /// Reads `name` as seen from `scope`, materializing it first if needed.
    pub fn get(
        &self,
        object: &ObjectRef,
        scope: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>> {
        let object = &self.real_instance(object)?;
        let accessors = self.accessors(object, scope)?;
        let key = accessors.resolve(name).ok();
        self.touch(object, key.as_ref(), true)?;
        accessors.get(object, name)
    }

    /// Writes `name` as seen from `scope`.
    ///
    /// On a partial ghost the write itself makes the field real; its initializer is not
    /// run.
    pub fn set(
        &self,
        object: &ObjectRef,
        scope: Option<&str>,
        name: &str,
        value: Value,
    ) -> Result<()> {
        let object = &self.real_instance(object)?;
        let accessors = self.accessors(object, scope)?;
        let key = accessors.resolve(name).ok();
        self.touch(object, key.as_ref(), false)?;
        accessors.set(object, name, value)
    }

    /// Tests `name` as seen from `scope`, materializing it first if needed.
    pub fn isset(&self, object: &ObjectRef, scope: Option<&str>, name: &str) -> Result<bool> {
        let object = &self.real_instance(object)?;
        let accessors = self.accessors(object, scope)?;
        let key = accessors.resolve(name).ok();
        self.touch(object, key.as_ref(), true)?;
        Ok(accessors.isset(object, name))
    }

    /// Unsets `name` as seen from `scope`. Like [`LazyObjects::set`], this does not run a
    /// per-field initializer.
    pub fn unset(&self, object: &ObjectRef, scope: Option<&str>, name: &str) -> Result<()> {
        let object = &self.real_instance(object)?;
        let accessors = self.accessors(object, scope)?;
        let key = accessors.resolve(name).ok();
        self.touch(object, key.as_ref(), false)?;
        accessors.unset(object, name)
    }

    /// Makes the object fully initialized.
    ///
    /// A whole-object ghost runs its initializer. A partial ghost runs the initializers of
    /// its remaining fields, then the fallback for whatever no initializer covers, and is
    /// promoted. A proxy creates its real instance. Real objects are left alone.
    pub fn initialize(&self, object: &ObjectRef) -> Result<()> {
        let Some(state) = self.state_of(object) else {
            return Ok(());
        };
        if matches!(state.lock().initializer, Initializer::Proxy(_)) {
            return self.forward(object, &state).map(drop);
        }
        let whole = matches!(state.lock().initializer, Initializer::Whole(_));
        if whole {
            return self.touch(object, None, true);
        }

        let info = self.registry.info_of(object.class())?;
        let resetter = self.resetter(&info);
        let (pending, partial) = {
            let guard = state.lock();
            if guard.in_progress {
                return Ok(());
            }
            let Initializer::Partial(partial) = &guard.initializer else {
                return Ok(());
            };
            // Declaration order, root ancestor first.
            let pending: Vec<FieldKey> = resetter
                .keys()
                .filter(|key| guard.pending.contains(*key))
                .cloned()
                .collect();
            (pending, partial.clone())
        };

        for key in pending {
            if let Some(init) = partial.for_field(&key) {
                self.run(object, &state, Step::Field { init, key })?;
            }
        }
        if let Some(init) = partial.fallback_init() {
            self.run(object, &state, Step::Fallback(init))?;
        }
        self.promote(object);
        Ok(())
    }

    /// The object accesses to `object` land on: the real instance behind a proxy, created
    /// if needed and followed through proxies of proxies, else `object` itself.
    ///
    /// # Errors
    /// Whatever a proxy initializer reports, or `Hook` if it returned an instance of an
    /// unrelated type, or if proxies forward to each other.
    pub fn real_instance(&self, object: &ObjectRef) -> Result<ObjectRef> {
        let mut current = object.clone();
        let mut seen = HashSet::new();
        while let Some(state) = self.state_of(&current) {
            if !seen.insert(current.id()) {
                return Err(VarExportError::hook(
                    object.type_name(),
                    "proxies forward to each other",
                ));
            }
            match self.forward(&current, &state)? {
                Some(real) => current = real,
                None => break,
            }
        }
        Ok(current)
    }

    /// Detaches the lazy state; the object keeps whatever it holds now.
    /// Returns false if the object was not a ghost.
    pub fn forget(&self, object: &ObjectRef) -> bool {
        self.states.lock().remove(&object.id()).is_some()
    }

    /// Number of live ghosts.
    pub fn tracked(&self) -> usize {
        self.states
            .lock()
            .values()
            .filter(|entry| entry.owner.strong_count() > 0)
            .count()
    }

    /// Cached accessor table of the object's type as seen from `scope`.
    pub fn accessors(
        &self,
        object: &ObjectRef,
        scope: Option<&str>,
    ) -> Result<Arc<ClassAccessors>> {
        let cache_key = (object.type_name().to_owned(), scope.map(str::to_owned));
        if let Some(table) = self.accessors.read().get(&cache_key) {
            return Ok(table.clone());
        }
        let info = self.registry.info_of(object.class())?;
        let table = Arc::new(ClassAccessors::build(info.layout(), scope));
        Ok(self
            .accessors
            .write()
            .entry(cache_key)
            .or_insert(table)
            .clone())
    }

    fn resetter(&self, info: &TypeInfo) -> Arc<ClassResetter> {
        let type_name = info.descriptor().name();
        if let Some(resetter) = self.resetters.read().get(type_name) {
            return resetter.clone();
        }
        let resetter = Arc::new(ClassResetter::build(info.layout()));
        self.resetters
            .write()
            .entry(type_name.to_owned())
            .or_insert(resetter)
            .clone()
    }

    fn state_of(&self, object: &ObjectRef) -> Option<Arc<Mutex<LazyState>>> {
        let states = self.states.lock();
        let entry = states.get(&object.id())?;
        entry
            .owner
            .upgrade()
            .is_some_and(|owner| Arc::ptr_eq(&owner, object))
            .then(|| entry.state.clone())
    }

    /// First-touch trigger for the field `key` (`None` for a name with no declared slot).
    /// `reads` is false for writes and unsets, which never need the field's real value.
    fn touch(&self, object: &ObjectRef, key: Option<&FieldKey>, reads: bool) -> Result<()> {
        let Some(state) = self.state_of(object) else {
            return Ok(());
        };
        let step = {
            let guard = state.lock();
            decide(&guard, key, reads)
        };
        self.run(object, &state, step)?;
        if matches!(state.lock().status, LazyStatus::FullyInitialized) {
            self.promote(object);
        }
        Ok(())
    }

    fn run(&self, object: &ObjectRef, state: &Arc<Mutex<LazyState>>, step: Step) -> Result<()> {
        let hydrator = FieldHydrator::new(&self.registry);
        match step {
            Step::PassThrough => Ok(()),
            Step::MarkReal(key) => {
                let mut guard = state.lock();
                guard.pending.remove(&key);
                guard.status = LazyStatus::PartiallyInitialized;
                Ok(())
            }
            Step::Whole { init, skipped } => {
                let info = self.registry.info_of(object.class())?;
                let resetter = self.resetter(&info);
                let outcome = {
                    let _running = Running::enter(state);
                    resetter.restore_defaults(object, &skipped);
                    trace!(object = ?object, "running whole-object initializer");
                    init(object)
                };

                let mut guard = state.lock();
                match outcome {
                    Ok(()) => {
                        guard.pending.clear();
                        guard.status = LazyStatus::FullyInitialized;
                        Ok(())
                    }
                    Err(err) => {
                        // Back to a clean ghost so the next touch retries.
                        resetter.unset_all(object, &skipped);
                        Err(err)
                    }
                }
            }
            Step::Field { init, key } => {
                let info = self.registry.info_of(object.class())?;
                let resetter = self.resetter(&info);
                let value = {
                    let _running = Running::enter(state);
                    trace!(object = ?object, field = %key, "running field initializer");
                    init(object, &key, resetter.default_of(&key))?
                };

                let mut single = IndexMap::new();
                single.insert(key.clone(), value);
                hydrator.write_fields(object, &by_owner(single))?;
                let mut guard = state.lock();
                guard.pending.remove(&key);
                guard.status = LazyStatus::PartiallyInitialized;
                Ok(())
            }
            Step::Fallback(init) => {
                let mut values = {
                    let _running = Running::enter(state);
                    trace!(object = ?object, "running fallback initializer");
                    init(object)?
                };

                let mut guard = state.lock();
                values.retain(|key, _| guard.pending.contains(key));
                hydrator.write_fields(object, &by_owner(values))?;
                guard.pending.clear();
                guard.status = LazyStatus::FullyInitialized;
                Ok(())
            }
        }
    }

    /// The real instance of a proxy, running its initializer on first use. `None` for a
    /// ghost, and for a proxy whose initializer is running.
    fn forward(
        &self,
        object: &ObjectRef,
        state: &Arc<Mutex<LazyState>>,
    ) -> Result<Option<ObjectRef>> {
        let init = {
            let guard = state.lock();
            let Initializer::Proxy(init) = &guard.initializer else {
                return Ok(None);
            };
            if let Some(real) = &guard.real {
                return Ok(Some(real.clone()));
            }
            if guard.in_progress {
                return Ok(None);
            }
            init.clone()
        };

        let real = {
            let _running = Running::enter(state);
            trace!(object = ?object, "running proxy initializer");
            init(object)?
        };
        if Arc::ptr_eq(&real, object) {
            return Err(VarExportError::hook(
                object.type_name(),
                "proxy initializer returned the proxy itself",
            ));
        }
        let info = self.registry.info_of(real.class())?;
        if info.layout().depth_of(object.type_name()).is_none() {
            return Err(VarExportError::hook(
                object.type_name(),
                format!("proxy initializer returned a {}", real.type_name()),
            ));
        }

        let mut guard = state.lock();
        guard.pending.clear();
        guard.status = LazyStatus::FullyInitialized;
        debug!(object = ?object, real = ?real, "proxy initialized");
        Ok(Some(guard.real.get_or_insert(real).clone()))
    }

    fn promote(&self, object: &ObjectRef) {
        if self.states.lock().remove(&object.id()).is_some() {
            debug!(object = ?object, "ghost fully initialized");
        }
    }
}

fn decide(state: &LazyState, key: Option<&FieldKey>, reads: bool) -> Step {
    if state.in_progress || state.status == LazyStatus::FullyInitialized {
        return Step::PassThrough;
    }
    if key.is_some_and(|k| state.skipped.contains(k)) {
        return Step::PassThrough;
    }
    match &state.initializer {
        // Proxies are forwarded before they get here; this is their own initializer
        // touching them.
        Initializer::Proxy(_) => Step::PassThrough,
        Initializer::Whole(init) => Step::Whole {
            init: init.clone(),
            skipped: state.skipped.clone(),
        },
        Initializer::Partial(partial) => {
            let Some(key) = key else {
                return partial
                    .fallback_init()
                    .map_or(Step::PassThrough, Step::Fallback);
            };
            if !state.pending.contains(key) {
                return Step::PassThrough;
            }
            if !reads {
                return Step::MarkReal(key.clone());
            }
            match (partial.for_field(key), partial.fallback_init()) {
                (Some(init), _) => Step::Field {
                    init,
                    key: key.clone(),
                },
                (None, Some(init)) => Step::Fallback(init),
                (None, None) => Step::MarkReal(key.clone()),
            }
        }
    }
}

fn by_owner(values: IndexMap<FieldKey, Value>) -> FieldsByOwner {
    let mut fields = FieldsByOwner::new();
    for (key, value) in values {
        fields
            .entry(key.owner().to_owned())
            .or_default()
            .insert(key.name().to_owned(), value);
    }
    fields
}
