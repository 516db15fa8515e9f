//! High-level entry point.
//!
//! [`VarExporter`] wires the preparer, the restorer and the binary emitter together around
//! one shared [`TypeRegistry`].

use crate::compression::{Compressor, CompressorRegistry, NoCompression};
use crate::emit::{BinaryEmitter, Emitter, load_artifact};
use crate::error::Result;
use crate::graph::{GraphPreparer, NormalizedProgram, PrepareOptions};
use crate::inspector::{ProgramInspector, ProgramReport};
use crate::lazy::LazyObjects;
use crate::restore::Restorer;
use crate::types::TypeRegistry;
use crate::value::Value;
use std::sync::Arc;

/// Snapshots value graphs into artifacts and back.
///
/// ```rust
/// use std::sync::Arc;
/// use varexport::{TypeCatalog, TypeRegistry, Value, VarExporter};
///
/// let exporter = VarExporter::builder()
///     .compression(false)
///     .build(Arc::new(TypeRegistry::new(TypeCatalog::new())));
///
/// let shared = Value::cell(Value::Int(42));
/// let root = Value::list([shared.clone(), shared]);
///
/// let bytes = exporter.export(&root)?;
/// let restored = exporter.import(&bytes)?;
/// let items = restored.as_array().map(|a| a.len());
/// assert_eq!(items, Some(2));
/// # Ok::<(), varexport::VarExportError>(())
/// ```
#[derive(Debug)]
pub struct VarExporter {
    registry: Arc<TypeRegistry>,
    lazy: Option<Arc<LazyObjects>>,
    options: PrepareOptions,
    compress: bool,
    compressors: CompressorRegistry,
}

impl VarExporter {
    /// Starts a builder with default settings.
    pub fn builder() -> VarExporterBuilder {
        VarExporterBuilder::default()
    }

    /// An exporter with default settings.
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::builder().build(registry)
    }

    /// The registry shared by every operation.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Normalizes `root` without emitting it.
    pub fn prepare(&self, root: &Value) -> Result<NormalizedProgram> {
        let preparer = GraphPreparer::new(&self.registry).with_options(self.options);
        match &self.lazy {
            Some(lazy) => preparer.with_lazy(lazy).prepare(root),
            None => preparer.prepare(root),
        }
    }

    /// Prepares `root` and emits it as a binary artifact.
    pub fn export(&self, root: &Value) -> Result<Vec<u8>> {
        let program = self.prepare(root)?;
        self.emitter()?.emit(&program)
    }

    /// Restores the value graph stored in an artifact.
    pub fn import(&self, bytes: &[u8]) -> Result<Value> {
        let program = load_artifact(bytes, &self.compressors)?;
        Restorer::new(&self.registry).restore(&program)
    }

    /// Copies a graph in-process: shared entities stay shared and cycles stay cycles, but
    /// nothing is shared with the source.
    pub fn deep_clone(&self, root: &Value) -> Result<Value> {
        let program = self.prepare(root)?;
        Restorer::new(&self.registry).restore(&program)
    }

    /// Reports on the program stored in an artifact.
    pub fn inspect(&self, bytes: &[u8]) -> Result<ProgramReport> {
        ProgramInspector::inspect(bytes, &self.compressors)
    }

    /// Registers an extra compressor for reading artifacts.
    pub fn register_compressor(&mut self, compressor: Box<dyn Compressor>) -> Result<()> {
        self.compressors.register(compressor)
    }

    fn emitter(&self) -> Result<BinaryEmitter<'_>> {
        if !self.compress {
            return Ok(BinaryEmitter::new(&NoCompression));
        }
        #[cfg(feature = "lz4_flex")]
        let id = 1;
        #[cfg(not(feature = "lz4_flex"))]
        let id = 0;
        Ok(BinaryEmitter::new(self.compressors.get(id)?))
    }
}

/// Configures a [`VarExporter`].
#[derive(Debug, Clone)]
pub struct VarExporterBuilder {
    compress: bool,
    options: PrepareOptions,
    lazy: Option<Arc<LazyObjects>>,
}

impl Default for VarExporterBuilder {
    fn default() -> Self {
        Self {
            compress: cfg!(feature = "lz4_flex"),
            options: PrepareOptions::default(),
            lazy: None,
        }
    }
}

impl VarExporterBuilder {
    /// Compresses artifact payloads with LZ4 (when the `lz4_flex` feature is on).
    pub fn compression(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    /// Omits fields equal to their type's default.
    pub fn elide_defaults(mut self, enabled: bool) -> Self {
        self.options.elide_defaults = enabled;
        self
    }

    /// Initializes ghosts tracked by `lazy` before snapshotting them.
    pub fn lazy_objects(mut self, lazy: Arc<LazyObjects>) -> Self {
        self.lazy = Some(lazy);
        self
    }

    /// Builds the exporter.
    pub fn build(self, registry: Arc<TypeRegistry>) -> VarExporter {
        VarExporter {
            registry,
            lazy: self.lazy,
            options: self.options,
            compress: self.compress,
            compressors: CompressorRegistry::new(),
        }
    }
}
