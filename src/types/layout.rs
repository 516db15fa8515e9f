use super::descriptor::{TypeDescriptor, Visibility, ancestry};
use crate::object::FieldKey;
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Owner wildcard: resolve the field name as seen from the concrete type itself.
pub const PUBLIC_SCOPE: &str = "*";

/// One storage slot of a concrete type.
#[derive(Debug, Clone)]
pub struct SlotInfo {
    /// Ownership-scoped address.
    pub key: FieldKey,
    /// Visibility of the most-derived declaration.
    pub visibility: Visibility,
    /// True if any declaration marks it readonly.
    pub readonly: bool,
    /// Default of the most-derived declaration.
    pub default: Option<Value>,
    /// Depth of the owning type, 0 being the root ancestor.
    pub depth: usize,
}

/// The slot table ("property scopes") of a concrete type.
///
/// Slots are ordered by declaring-type depth, root ancestor first and most-derived last.
/// Public and protected redeclarations share the ancestor's slot; private ones get a slot of
/// their own.
#[derive(Debug)]
pub struct ClassLayout {
    type_name: Arc<str>,
    ancestry: Vec<Arc<str>>,
    slots: Vec<SlotInfo>,
    by_key: HashMap<FieldKey, usize>,
    shared: HashMap<Arc<str>, usize>,
    dynamic: bool,
}

impl ClassLayout {
    /// Computes the layout of `ty` from its ancestry.
    pub fn build(ty: &Arc<dyn TypeDescriptor>) -> Self {
        let chain = ancestry(ty);
        let mut slots: Vec<SlotInfo> = Vec::new();
        let mut by_key = HashMap::new();
        let mut shared: HashMap<Arc<str>, usize> = HashMap::new();

        for (depth, level) in chain.iter().enumerate() {
            let owner: Arc<str> = Arc::from(level.name());
            for decl in level.fields() {
                if decl.visibility() != Visibility::Private
                    && let Some(&idx) = shared.get(decl.name_arc())
                    && let Some(slot) = slots.get_mut(idx)
                {
                    slot.visibility = decl.visibility();
                    slot.readonly |= decl.is_readonly();
                    slot.default = decl.default().cloned();
                    continue;
                }

                let key = FieldKey::from_parts(owner.clone(), decl.name_arc().clone());
                let idx = slots.len();
                by_key.insert(key.clone(), idx);
                if decl.visibility() != Visibility::Private {
                    shared.insert(decl.name_arc().clone(), idx);
                }
                slots.push(SlotInfo {
                    key,
                    visibility: decl.visibility(),
                    readonly: decl.is_readonly(),
                    default: decl.default().cloned(),
                    depth,
                });
            }
        }

        Self {
            type_name: Arc::from(ty.name()),
            ancestry: chain.iter().map(|t| Arc::from(t.name())).collect(),
            slots,
            by_key,
            shared,
            dynamic: ty.allows_dynamic_fields(),
        }
    }

    /// The concrete type this layout belongs to.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Declared slots, root ancestor first.
    pub fn slots(&self) -> &[SlotInfo] {
        &self.slots
    }

    /// True if the concrete type accepts undeclared fields.
    pub fn allows_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Depth of `owner` in the hierarchy, if it belongs to it.
    pub fn depth_of(&self, owner: &str) -> Option<usize> {
        self.ancestry.iter().position(|t| &**t == owner)
    }

    /// Looks up a declared slot by its exact key.
    pub fn slot(&self, key: &FieldKey) -> Option<&SlotInfo> {
        self.by_key.get(key).and_then(|&idx| self.slots.get(idx))
    }

    /// True if `key` is a declared slot.
    pub fn is_declared(&self, key: &FieldKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Resolves `name` as seen from code running in `scope`.
    ///
    /// A private field declared by `scope` wins over a shared field of the same name.
    pub fn resolve(&self, scope: Option<&str>, name: &str) -> Option<FieldKey> {
        if let Some(scope) = scope {
            let private = FieldKey::new(scope, name);
            if let Some(slot) = self.slot(&private)
                && slot.visibility == Visibility::Private
            {
                return Some(private);
            }
        }
        self.shared
            .get(name)
            .and_then(|&idx| self.slots.get(idx))
            .map(|slot| slot.key.clone())
    }

    /// Like [`ClassLayout::resolve`], falling back to a dynamic slot when allowed.
    pub fn resolve_for_write(&self, scope: Option<&str>, name: &str) -> Option<FieldKey> {
        self.resolve(scope, name).or_else(|| self.dynamic_key(name))
    }

    /// The slot a hydration entry `(owner, name)` targets.
    ///
    /// `owner` must be the declaring type of the slot, or a subtype of the declaring type
    /// for shared slots, or [`PUBLIC_SCOPE`].
    pub fn hydration_key(&self, owner: &str, name: &str) -> Option<FieldKey> {
        if owner == PUBLIC_SCOPE {
            return self.resolve_for_write(Some(&self.type_name), name);
        }
        let exact = FieldKey::new(owner, name);
        if self.by_key.contains_key(&exact) {
            return Some(exact);
        }
        let depth = self.depth_of(owner)?;
        if let Some(slot) = self.shared.get(name).and_then(|&idx| self.slots.get(idx))
            && depth >= slot.depth
        {
            return Some(slot.key.clone());
        }
        if owner == &*self.type_name {
            return self.dynamic_key(name);
        }
        None
    }

    /// Key of an undeclared field, if the type allows them.
    pub fn dynamic_key(&self, name: &str) -> Option<FieldKey> {
        self.dynamic
            .then(|| FieldKey::from_parts(self.type_name.clone(), Arc::from(name)))
    }

    /// Defaults of every slot that has one, in slot order.
    pub fn defaults(&self) -> IndexMap<FieldKey, Value> {
        self.slots
            .iter()
            .filter_map(|slot| slot.default.clone().map(|v| (slot.key.clone(), v)))
            .collect()
    }

    /// Flat name of a slot: the bare name, or `"\0Owner\0name"` for an ancestor's private.
    pub fn mangled_name(&self, key: &FieldKey) -> String {
        match self.slot(key) {
            Some(slot)
                if slot.visibility == Visibility::Private && key.owner() != &*self.type_name =>
            {
                format!("\0{}\0{}", key.owner(), key.name())
            }
            _ => key.name().to_owned(),
        }
    }

    /// Inverse of [`ClassLayout::mangled_name`].
    pub fn unmangle(&self, flat: &str) -> Option<FieldKey> {
        if let Some(rest) = flat.strip_prefix('\0') {
            let (owner, name) = rest.split_once('\0')?;
            let key = FieldKey::new(owner, name);
            return self.is_declared(&key).then_some(key);
        }
        self.resolve_for_write(Some(&self.type_name), flat)
    }
}
