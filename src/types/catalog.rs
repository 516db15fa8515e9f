use super::descriptor::{TypeDescriptor, ancestry};
use crate::error::{Result, VarExportError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Name-to-descriptor lookup, the "does this type exist" oracle used at restore time.
#[derive(Debug, Default)]
pub struct TypeCatalog {
    types: RwLock<HashMap<String, Arc<dyn TypeDescriptor>>>,
}

impl TypeCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `ty` and all of its ancestors. An already registered name keeps its
    /// first descriptor.
    pub fn register(&self, ty: &Arc<dyn TypeDescriptor>) {
        let mut types = self.types.write();
        for level in ancestry(ty) {
            types.entry(level.name().to_owned()).or_insert(level);
        }
    }

    /// Builder-style [`TypeCatalog::register`].
    pub fn with(self, ty: &Arc<dyn TypeDescriptor>) -> Self {
        self.register(ty);
        self
    }

    /// Resolves a type name.
    ///
    /// # Errors
    /// [`VarExportError::UnknownType`] if the name was never registered.
    pub fn get(&self, name: &str) -> Result<Arc<dyn TypeDescriptor>> {
        self.types
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| VarExportError::UnknownType(name.to_owned()))
    }

    /// True if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.types.read().contains_key(name)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}
