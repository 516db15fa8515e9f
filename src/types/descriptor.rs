use crate::error::Result;
use crate::object::ObjectRef;
use crate::value::{Array, Value};
use std::fmt;
use std::sync::Arc;

/// Whether a type can have instances at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// A regular, instantiable type.
    Concrete,
    /// Declares fields but cannot be instantiated directly.
    Abstract,
    /// Declares no storage and cannot be instantiated.
    Interface,
}

/// Field visibility. Only `Private` creates a slot that a subtype cannot share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Visible everywhere.
    Public,
    /// Visible to the declaring type and its subtypes.
    Protected,
    /// Visible to the declaring type only; redeclaring it in a subtype creates a new slot.
    Private,
}

/// How an empty instance of a type may be manufactured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Construction {
    /// Direct allocation without running any user logic.
    Bare,
    /// Bare allocation is refused; an empty instance is synthesized by feeding an empty
    /// state to the type's restore hook.
    ViaRestoreHook,
    /// No allocation strategy exists (e.g. closures, native resources).
    Impossible,
}

/// A field declared by one level of a type hierarchy.
#[derive(Debug, Clone)]
pub struct FieldDecl {
    name: Arc<str>,
    visibility: Visibility,
    default: Option<Value>,
    readonly: bool,
}

impl FieldDecl {
    /// A public field without a default: the slot starts unset.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            visibility: Visibility::Public,
            default: None,
            readonly: false,
        }
    }

    /// Marks the field private.
    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    /// Marks the field protected.
    pub fn protected(mut self) -> Self {
        self.visibility = Visibility::Protected;
        self
    }

    /// Gives the field a default value.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Marks the field readonly. Hydration still writes it.
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    /// Declared visibility.
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Declared default, if any.
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// True if the field is readonly.
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }
}

/// Pre-snapshot hook: returns the state to capture. Must be an [`Array`] value.
pub type SnapshotHook = Arc<dyn Fn(&ObjectRef) -> Result<Value> + Send + Sync>;
/// Post-restore hook receiving the state captured by the snapshot hook.
pub type RestoreHook = Arc<dyn Fn(&ObjectRef, Array) -> Result<()> + Send + Sync>;
/// Legacy field selection: names (or `"\0Owner\0name"` for an ancestor's private field) to keep.
pub type SleepHook = Arc<dyn Fn(&ObjectRef) -> Result<Vec<String>> + Send + Sync>;
/// Post-restore hook without state; runs after the fields were hydrated.
pub type WakeupHook = Arc<dyn Fn(&ObjectRef) -> Result<()> + Send + Sync>;

/// Encodes an instance to an opaque string.
pub type OpaqueEncode = Arc<dyn Fn(&ObjectRef) -> Result<String> + Send + Sync>;
/// Fills a freshly allocated instance from an opaque string.
pub type OpaqueDecode = Arc<dyn Fn(&ObjectRef, &str) -> Result<()> + Send + Sync>;

/// A legacy externally-serializable codec. Entities of such types bypass field-level
/// capture entirely.
#[derive(Clone)]
pub struct OpaqueCodec {
    /// Instance to blob.
    pub encode: OpaqueEncode,
    /// Blob into a bare instance.
    pub decode: OpaqueDecode,
}

/// Type-supplied callbacks. Each is inherited by subtypes unless they override it.
#[derive(Clone, Default)]
pub struct TypeHooks {
    /// Customizes what is captured.
    pub snapshot: Option<SnapshotHook>,
    /// Consumes the captured state after the batch is allocated.
    pub restore: Option<RestoreHook>,
    /// Selects the fields to capture.
    pub sleep: Option<SleepHook>,
    /// Runs after the batch is hydrated.
    pub wakeup: Option<WakeupHook>,
    /// The type runs side effects when an instance is copied, so new instances must be
    /// allocated rather than copied from the prototype.
    pub copy_side_effects: bool,
    /// Opaque blob codec.
    pub opaque: Option<OpaqueCodec>,
}

impl TypeHooks {
    /// Fills every hook that is missing here from `parent`.
    pub(crate) fn inherit(&self, parent: &TypeHooks) -> TypeHooks {
        TypeHooks {
            snapshot: self.snapshot.clone().or_else(|| parent.snapshot.clone()),
            restore: self.restore.clone().or_else(|| parent.restore.clone()),
            sleep: self.sleep.clone().or_else(|| parent.sleep.clone()),
            wakeup: self.wakeup.clone().or_else(|| parent.wakeup.clone()),
            copy_side_effects: self.copy_side_effects || parent.copy_side_effects,
            opaque: self.opaque.clone().or_else(|| parent.opaque.clone()),
        }
    }
}

impl fmt::Debug for TypeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHooks")
            .field("snapshot", &self.snapshot.is_some())
            .field("restore", &self.restore.is_some())
            .field("sleep", &self.sleep.is_some())
            .field("wakeup", &self.wakeup.is_some())
            .field("copy_side_effects", &self.copy_side_effects)
            .field("opaque", &self.opaque.is_some())
            .finish()
    }
}

/// The introspection seam: everything the engine needs to know about a type.
///
/// [`ClassDef`] is the stock implementation; hosts with their own metadata can implement
/// this directly.
pub trait TypeDescriptor: Send + Sync + fmt::Debug {
    /// Unique type name.
    fn name(&self) -> &str;

    /// Direct ancestor.
    fn parent(&self) -> Option<&Arc<dyn TypeDescriptor>>;

    /// Concrete, abstract or interface.
    fn kind(&self) -> TypeKind {
        TypeKind::Concrete
    }

    /// Fields declared at this level of the hierarchy only.
    fn fields(&self) -> &[FieldDecl];

    /// Allocation strategy.
    fn construction(&self) -> Construction {
        Construction::Bare
    }

    /// True if instances may carry undeclared fields.
    fn allows_dynamic_fields(&self) -> bool {
        false
    }

    /// True if field defaults vary from one instance to another, which disables
    /// default elision for the type.
    fn per_instance_defaults(&self) -> bool {
        false
    }

    /// Hooks declared at this level (inheritance is resolved by the registry).
    fn hooks(&self) -> &TypeHooks;
}

/// Returns the ancestry of `ty`, root ancestor first and `ty` last.
pub fn ancestry(ty: &Arc<dyn TypeDescriptor>) -> Vec<Arc<dyn TypeDescriptor>> {
    let mut chain = vec![ty.clone()];
    let mut current = ty.parent().cloned();
    while let Some(parent) = current {
        current = parent.parent().cloned();
        chain.push(parent);
    }
    chain.reverse();
    chain
}

/// The stock [`TypeDescriptor`], built with [`ClassDef::builder`].
#[derive(Debug)]
pub struct ClassDef {
    name: String,
    parent: Option<Arc<dyn TypeDescriptor>>,
    kind: TypeKind,
    fields: Vec<FieldDecl>,
    construction: Construction,
    dynamic_fields: bool,
    per_instance_defaults: bool,
    hooks: TypeHooks,
}

impl ClassDef {
    /// Starts describing a concrete type.
    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder {
            def: ClassDef {
                name: name.into(),
                parent: None,
                kind: TypeKind::Concrete,
                fields: Vec::new(),
                construction: Construction::Bare,
                dynamic_fields: false,
                per_instance_defaults: false,
                hooks: TypeHooks::default(),
            },
        }
    }
}

impl TypeDescriptor for ClassDef {
    fn name(&self) -> &str {
        &self.name
    }

    fn parent(&self) -> Option<&Arc<dyn TypeDescriptor>> {
        self.parent.as_ref()
    }

    fn kind(&self) -> TypeKind {
        self.kind
    }

    fn fields(&self) -> &[FieldDecl] {
        &self.fields
    }

    fn construction(&self) -> Construction {
        self.construction
    }

    fn allows_dynamic_fields(&self) -> bool {
        self.dynamic_fields
    }

    fn per_instance_defaults(&self) -> bool {
        self.per_instance_defaults
    }

    fn hooks(&self) -> &TypeHooks {
        &self.hooks
    }
}

/// Builder for [`ClassDef`].
#[derive(Debug)]
pub struct ClassBuilder {
    def: ClassDef,
}

impl ClassBuilder {
    /// Sets the direct ancestor.
    pub fn extends(mut self, parent: &Arc<dyn TypeDescriptor>) -> Self {
        self.def.parent = Some(parent.clone());
        self
    }

    /// Declares a field.
    pub fn field(mut self, field: FieldDecl) -> Self {
        self.def.fields.push(field);
        self
    }

    /// Makes the type abstract.
    pub fn abstract_type(mut self) -> Self {
        self.def.kind = TypeKind::Abstract;
        self
    }

    /// Makes the type an interface.
    pub fn interface(mut self) -> Self {
        self.def.kind = TypeKind::Interface;
        self
    }

    /// Overrides the allocation strategy.
    pub fn construction(mut self, construction: Construction) -> Self {
        self.def.construction = construction;
        self
    }

    /// Allows undeclared fields.
    pub fn dynamic_fields(mut self) -> Self {
        self.def.dynamic_fields = true;
        self
    }

    /// Disables default elision for this type.
    pub fn per_instance_defaults(mut self) -> Self {
        self.def.per_instance_defaults = true;
        self
    }

    /// Installs a pre-snapshot hook.
    pub fn on_snapshot<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ObjectRef) -> Result<Value> + Send + Sync + 'static,
    {
        self.def.hooks.snapshot = Some(Arc::new(hook));
        self
    }

    /// Installs a post-restore hook receiving the captured state.
    pub fn on_restore<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ObjectRef, Array) -> Result<()> + Send + Sync + 'static,
    {
        self.def.hooks.restore = Some(Arc::new(hook));
        self
    }

    /// Installs a legacy field-selection hook.
    pub fn on_sleep<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ObjectRef) -> Result<Vec<String>> + Send + Sync + 'static,
    {
        self.def.hooks.sleep = Some(Arc::new(hook));
        self
    }

    /// Installs a stateless post-restore hook.
    pub fn on_wakeup<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ObjectRef) -> Result<()> + Send + Sync + 'static,
    {
        self.def.hooks.wakeup = Some(Arc::new(hook));
        self
    }

    /// Marks copies of the type as having side effects: instances are never manufactured
    /// by copying the prototype.
    pub fn non_duplicable(mut self) -> Self {
        self.def.hooks.copy_side_effects = true;
        self
    }

    /// Declares the type as an opaque blob.
    pub fn opaque<E, D>(mut self, encode: E, decode: D) -> Self
    where
        E: Fn(&ObjectRef) -> Result<String> + Send + Sync + 'static,
        D: Fn(&ObjectRef, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.def.hooks.opaque = Some(OpaqueCodec {
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        });
        self
    }

    /// Finishes the description.
    pub fn build(self) -> Arc<dyn TypeDescriptor> {
        Arc::new(self.def)
    }
}
