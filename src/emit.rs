//! Emitters turn a [`NormalizedProgram`] into a re-loadable artifact.
//!
//! The engine only defines the contract; [`BinaryEmitter`] is the stock implementation,
//! a bincode payload wrapped in the layout described in [`crate::format`].

use crate::compression::{Compressor, CompressorRegistry, NoCompression};
use crate::error::{Result, VarExportError};
use crate::format::{ArtifactHeader, HEADER_SIZE, MetaByte};
use crate::graph::NormalizedProgram;
use tracing::debug;

/// Consumer of a prepared program.
pub trait Emitter {
    /// What the emitter produces.
    type Output;

    /// Renders `program`. Must be deterministic for a given program.
    fn emit(&self, program: &NormalizedProgram) -> Result<Self::Output>;
}

/// Emits the binary artifact format.
#[derive(Debug)]
pub struct BinaryEmitter<'c> {
    compressor: &'c dyn Compressor,
}

impl<'c> BinaryEmitter<'c> {
    /// An emitter compressing with `compressor`.
    pub fn new(compressor: &'c dyn Compressor) -> Self {
        Self { compressor }
    }

    /// An emitter that stores the payload as is.
    pub fn uncompressed() -> BinaryEmitter<'static> {
        BinaryEmitter {
            compressor: &NoCompression,
        }
    }
}

impl Emitter for BinaryEmitter<'_> {
    type Output = Vec<u8>;

    fn emit(&self, program: &NormalizedProgram) -> Result<Vec<u8>> {
        let encoded = bincode::serde::encode_to_vec(program, bincode::config::standard())
            .map_err(|e| VarExportError::Serialization(e.to_string()))?;
        let payload = self.compressor.compress(&encoded)?;

        let mut out = Vec::with_capacity(payload.len() + 1 + HEADER_SIZE);
        out.extend_from_slice(&payload);
        out.push(MetaByte::new(program.is_static, self.compressor.id()).as_u8());
        out.extend_from_slice(&ArtifactHeader::new(payload.len() as u64).to_bytes());

        debug!(
            raw = encoded.len(),
            payload = payload.len(),
            compression = self.compressor.id(),
            "emitted artifact"
        );
        Ok(out)
    }
}

/// Splits an artifact into its meta byte and its decompressed payload.
pub(crate) fn read_artifact(
    bytes: &[u8],
    compressors: &CompressorRegistry,
) -> Result<(MetaByte, Vec<u8>)> {
    let header_at = bytes
        .len()
        .checked_sub(HEADER_SIZE)
        .ok_or_else(|| VarExportError::Format("artifact is shorter than its header".into()))?;
    let (body, tail) = bytes.split_at(header_at);
    let header = ArtifactHeader::from_bytes(tail)?;

    let (&meta, payload) = body
        .split_last()
        .ok_or_else(|| VarExportError::Format("artifact has no meta byte".into()))?;
    if payload.len() as u64 != header.payload_len {
        return Err(VarExportError::Format(format!(
            "payload is {} bytes, header says {}",
            payload.len(),
            header.payload_len
        )));
    }

    let meta = MetaByte::from_byte(meta);
    let raw = compressors
        .get(meta.compression_method())?
        .decompress(payload)?;
    Ok((meta, raw.into_owned()))
}

/// Decodes an artifact produced by [`BinaryEmitter`].
///
/// # Errors
/// `Format` for a damaged container, `Compression` for an unknown or failing codec and
/// `Serialization` for an undecodable payload.
pub fn load_artifact(bytes: &[u8], compressors: &CompressorRegistry) -> Result<NormalizedProgram> {
    let (meta, raw) = read_artifact(bytes, compressors)?;
    let (program, _): (NormalizedProgram, usize) =
        bincode::serde::decode_from_slice(&raw, bincode::config::standard())
            .map_err(|e| VarExportError::Serialization(e.to_string()))?;
    if program.is_static != meta.is_static() {
        return Err(VarExportError::Format(
            "meta byte disagrees with the payload's static flag".into(),
        ));
    }
    Ok(program)
}
