use crate::error::Result;
use crate::object::{FieldKey, ObjectRef};
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Materialization progress of a deferred instance. Transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LazyStatus {
    /// No field has been materialized yet.
    Uninitialized,
    /// Some fields were materialized by per-field initializers.
    PartiallyInitialized,
    /// The instance is real.
    FullyInitialized,
}

/// Populates a whole ghost at once. Runs at most once successfully.
pub type WholeInitializer = Arc<dyn Fn(&ObjectRef) -> Result<()> + Send + Sync>;

/// Produces the real value of one field, given the field's declared default.
pub type FieldInitializer =
    Arc<dyn Fn(&ObjectRef, &FieldKey, Option<&Value>) -> Result<Value> + Send + Sync>;

/// Produces the real instance a proxy forwards to. Runs at most once successfully.
pub type ProxyInitializer = Arc<dyn Fn(&ObjectRef) -> Result<ObjectRef> + Send + Sync>;

/// Produces the values of every remaining field at once.
pub type FallbackInitializer =
    Arc<dyn Fn(&ObjectRef) -> Result<IndexMap<FieldKey, Value>> + Send + Sync>;

/// Per-field population strategy.
///
/// A field is materialized by its own initializer if it has one, else by the catch-all.
/// Fields that neither covers trigger the whole-object fallback, which promotes the ghost.
#[derive(Clone, Default)]
pub struct PartialInitializer {
    fields: HashMap<FieldKey, FieldInitializer>,
    any_field: Option<FieldInitializer>,
    fallback: Option<FallbackInitializer>,
}

impl PartialInitializer {
    /// An initializer with nothing registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializer for one specific field.
    pub fn field<F>(mut self, key: FieldKey, init: F) -> Self
    where
        F: Fn(&ObjectRef, &FieldKey, Option<&Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.fields.insert(key, Arc::new(init));
        self
    }

    /// Initializer for every field without a specific one.
    pub fn any_field<F>(mut self, init: F) -> Self
    where
        F: Fn(&ObjectRef, &FieldKey, Option<&Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.any_field = Some(Arc::new(init));
        self
    }

    /// Whole-object fallback.
    pub fn fallback<F>(mut self, init: F) -> Self
    where
        F: Fn(&ObjectRef) -> Result<IndexMap<FieldKey, Value>> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(init));
        self
    }

    pub(crate) fn for_field(&self, key: &FieldKey) -> Option<FieldInitializer> {
        self.fields.get(key).or(self.any_field.as_ref()).cloned()
    }

    pub(crate) fn fallback_init(&self) -> Option<FallbackInitializer> {
        self.fallback.clone()
    }
}

impl fmt::Debug for PartialInitializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialInitializer")
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("any_field", &self.any_field.is_some())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// How a ghost gets its real contents.
#[derive(Clone)]
pub enum Initializer {
    /// One callback fills the instance on first touch.
    Whole(WholeInitializer),
    /// Fields are filled one at a time as they are touched.
    Partial(PartialInitializer),
    /// The object stays empty and forwards every access to a separate real instance,
    /// created on first touch.
    Proxy(ProxyInitializer),
}

impl Initializer {
    /// Wraps a whole-object callback.
    pub fn whole<F>(init: F) -> Self
    where
        F: Fn(&ObjectRef) -> Result<()> + Send + Sync + 'static,
    {
        Self::Whole(Arc::new(init))
    }

    /// Wraps a factory of the real instance behind a proxy.
    pub fn proxy<F>(init: F) -> Self
    where
        F: Fn(&ObjectRef) -> Result<ObjectRef> + Send + Sync + 'static,
    {
        Self::Proxy(Arc::new(init))
    }
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole(_) => f.write_str("Initializer::Whole"),
            Self::Partial(p) => f.debug_tuple("Initializer::Partial").field(p).finish(),
            Self::Proxy(_) => f.write_str("Initializer::Proxy"),
        }
    }
}

/// Bookkeeping of one ghost.
#[derive(Debug)]
pub(crate) struct LazyState {
    pub(crate) initializer: Initializer,
    pub(crate) status: LazyStatus,
    /// Declared fields that are not real yet.
    pub(crate) pending: HashSet<FieldKey>,
    /// Fields pre-seeded at creation; never reset, never trigger initialization.
    pub(crate) skipped: HashSet<FieldKey>,
    /// Set while an initializer runs; accesses made by the initializer pass through.
    pub(crate) in_progress: bool,
    /// The instance a proxy forwards to, once created.
    pub(crate) real: Option<ObjectRef>,
}

impl LazyState {
    pub(crate) fn new(
        initializer: Initializer,
        pending: HashSet<FieldKey>,
        skipped: HashSet<FieldKey>,
    ) -> Self {
        Self {
            initializer,
            status: LazyStatus::Uninitialized,
            pending,
            skipped,
            in_progress: false,
            real: None,
        }
    }
}
