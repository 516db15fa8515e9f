use crate::error::{Result, VarExportError};
use crate::object::{FieldKey, ObjectRef};
use crate::types::{ClassLayout, Visibility};
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Access {
    key: FieldKey,
    readonly: bool,
}

/// Field access of one type as seen from one calling scope.
///
/// Built once per `(type, scope)` pair and cached: names are resolved to ownership-scoped
/// slots up front, so an access is a table lookup followed by a raw slot operation.
/// `scope` is the type whose code performs the access, `None` for outside code.
#[derive(Debug)]
pub struct ClassAccessors {
    type_name: Arc<str>,
    table: HashMap<Arc<str>, Access>,
    hidden: HashSet<Arc<str>>,
    dynamic: bool,
}

impl ClassAccessors {
    /// Resolves every name of `layout` visible from `scope`.
    pub fn build(layout: &ClassLayout, scope: Option<&str>) -> Self {
        let related = scope.is_some_and(|s| layout.depth_of(s).is_some());
        let mut table = HashMap::new();
        let mut hidden = HashSet::new();

        for slot in layout.slots() {
            let name = slot.key.name_arc().clone();
            let access = Access {
                key: slot.key.clone(),
                readonly: slot.readonly,
            };
            match slot.visibility {
                Visibility::Public => {
                    table.entry(name).or_insert(access);
                }
                Visibility::Protected if related => {
                    table.entry(name).or_insert(access);
                }
                Visibility::Private if scope == Some(slot.key.owner()) => {
                    // A private of the calling scope shadows any shared slot.
                    table.insert(name, access);
                }
                _ => {
                    hidden.insert(name);
                }
            }
        }
        hidden.retain(|name| !table.contains_key(name));

        Self {
            type_name: Arc::from(layout.type_name()),
            table,
            hidden,
            dynamic: layout.allows_dynamic(),
        }
    }

    /// The slot `name` designates.
    ///
    /// # Errors
    /// `UndefinedField` if the name is not visible and the type refuses dynamic fields, or
    /// if it names a slot hidden from this scope.
    pub fn resolve(&self, name: &str) -> Result<FieldKey> {
        self.lookup(name).map(|access| access.key)
    }

    fn lookup(&self, name: &str) -> Result<Access> {
        if let Some(access) = self.table.get(name) {
            return Ok(access.clone());
        }
        if self.dynamic && !self.hidden.contains(name) {
            return Ok(Access {
                key: FieldKey::from_parts(self.type_name.clone(), Arc::from(name)),
                readonly: false,
            });
        }
        Err(VarExportError::UndefinedField {
            type_name: self.type_name.to_string(),
            field: name.to_owned(),
        })
    }

    /// Reads a field. `None` means unset.
    pub fn get(&self, object: &ObjectRef, name: &str) -> Result<Option<Value>> {
        let access = self.lookup(name)?;
        Ok(object.read_slot(&access.key))
    }

    /// Writes a field. A readonly field can only be written while unset.
    pub fn set(&self, object: &ObjectRef, name: &str, value: Value) -> Result<()> {
        let access = self.lookup(name)?;
        if access.readonly && object.has_slot(&access.key) {
            return Err(self.readonly(name));
        }
        object.write_slot(access.key, value);
        Ok(())
    }

    /// True if the field is set to something other than null.
    pub fn isset(&self, object: &ObjectRef, name: &str) -> bool {
        self.lookup(name)
            .ok()
            .and_then(|access| object.read_slot(&access.key))
            .is_some_and(|v| !v.is_null())
    }

    /// Unsets a field.
    pub fn unset(&self, object: &ObjectRef, name: &str) -> Result<()> {
        let access = self.lookup(name)?;
        if access.readonly && object.has_slot(&access.key) {
            return Err(self.readonly(name));
        }
        object.clear_slot(&access.key);
        Ok(())
    }

    fn readonly(&self, name: &str) -> VarExportError {
        VarExportError::ReadonlyField {
            type_name: self.type_name.to_string(),
            field: name.to_owned(),
        }
    }
}

/// Resets the declared fields of one type.
#[derive(Debug)]
pub struct ClassResetter {
    fields: Vec<(FieldKey, Option<Value>)>,
}

impl ClassResetter {
    /// Collects the declared slots of `layout` and their defaults.
    pub fn build(layout: &ClassLayout) -> Self {
        Self {
            fields: layout
                .slots()
                .iter()
                .map(|slot| (slot.key.clone(), slot.default.clone()))
                .collect(),
        }
    }

    /// Every declared slot.
    pub fn keys(&self) -> impl Iterator<Item = &FieldKey> {
        self.fields.iter().map(|(key, _)| key)
    }

    /// Declared default of a slot.
    pub fn default_of(&self, key: &FieldKey) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, default)| default.as_ref())
    }

    /// Unsets every declared slot not in `keep`.
    pub fn unset_all(&self, object: &ObjectRef, keep: &HashSet<FieldKey>) {
        for (key, _) in &self.fields {
            if !keep.contains(key) {
                object.clear_slot(key);
            }
        }
    }

    /// Puts every declared slot not in `keep` back to its default; slots without one are
    /// left unset.
    pub fn restore_defaults(&self, object: &ObjectRef, keep: &HashSet<FieldKey>) {
        for (key, default) in &self.fields {
            if keep.contains(key) {
                continue;
            }
            match default {
                Some(value) => object.write_slot(key.clone(), value.clone()),
                None => {
                    object.clear_slot(key);
                }
            }
        }
    }
}
