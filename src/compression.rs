//! Codecs for the single payload of an artifact.
//!
//! An artifact holds exactly one payload: the whole encoded program. The emitter runs it
//! through one [`Compressor`] and writes that compressor's id into the meta byte, so
//! `import` can pick the codec back out of a [`CompressorRegistry`] without any
//! configuration.

use crate::error::{Result, VarExportError};
use std::borrow::Cow;

/// Number of ids the meta byte can address.
const MAX_ALGORITHMS: usize = 8;

/// Turns an encoded program into the stored payload and back.
pub trait Compressor: Send + Sync + std::fmt::Debug {
    /// Id stored in the meta byte (0..=7). 0 is reserved for [`NoCompression`].
    fn id(&self) -> u8;

    /// Encodes the program bytes into a payload. May borrow the input when it is stored
    /// as is.
    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;

    /// Recovers the program bytes from a payload written by [`Compressor::compress`].
    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;
}

/// Stores the program bytes as is, id 0. Used for `compression(false)` exporters.
#[derive(Debug, Clone, Copy)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn id(&self) -> u8 {
        0
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(data))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(data))
    }
}

/// LZ4 block with the raw length prepended, id 1. The default for exports.
#[cfg(feature = "lz4_flex")]
#[derive(Debug, Clone, Copy)]
pub struct Lz4Compressor;

#[cfg(feature = "lz4_flex")]
impl Compressor for Lz4Compressor {
    fn id(&self) -> u8 {
        1
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Owned(lz4_flex::compress_prepend_size(data)))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        lz4_flex::decompress_size_prepended(data)
            .map(Cow::Owned)
            .map_err(|e| VarExportError::Compression(e.to_string()))
    }
}

/// The codecs `import` and `inspect` accept, by meta byte id.
#[derive(Debug)]
pub struct CompressorRegistry {
    algorithms: Vec<Option<Box<dyn Compressor>>>,
}

impl CompressorRegistry {
    /// Accepts stored payloads and, with the `lz4_flex` feature, LZ4 payloads.
    pub fn new() -> Self {
        let mut registry = Self {
            algorithms: (0..MAX_ALGORITHMS).map(|_| None).collect(),
        };
        // Infallible: both ids are below MAX_ALGORITHMS.
        let _ = registry.register(Box::new(NoCompression));
        #[cfg(feature = "lz4_flex")]
        let _ = registry.register(Box::new(Lz4Compressor));
        registry
    }

    /// Makes artifacts written with `algorithm` loadable. A codec already registered
    /// under the same id is replaced.
    ///
    /// # Errors
    /// `Compression` if the id does not fit in the meta byte.
    pub fn register(&mut self, algorithm: Box<dyn Compressor>) -> Result<()> {
        let id = algorithm.id();
        let slot = self.algorithms.get_mut(usize::from(id)).ok_or_else(|| {
            VarExportError::Compression(format!("compressor id {id} exceeds 3 bits"))
        })?;
        *slot = Some(algorithm);
        Ok(())
    }

    /// The codec an artifact's meta byte names.
    ///
    /// # Errors
    /// `Compression` if nothing is registered under `id`.
    pub fn get(&self, id: u8) -> Result<&dyn Compressor> {
        self.algorithms
            .get(usize::from(id))
            .and_then(Option::as_deref)
            .ok_or_else(|| {
                VarExportError::Compression(format!("algorithm id {id} is not available"))
            })
    }
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
