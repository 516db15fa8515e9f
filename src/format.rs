//! Physical layout of an exported artifact.
//!
//! `[ payload ] [ MetaByte ] [ ArtifactHeader ]`
//!
//! The header sits at the very end so a reader can locate the payload from the tail. The
//! payload is the bincode encoding of a [`crate::graph::NormalizedProgram`], possibly
//! compressed; the meta byte says how.

use crate::error::{Result, VarExportError};

/// Magic bytes identifying an artifact: "VEX1".
pub const MAGIC_BYTES: [u8; 4] = *b"VEX1";

/// Current artifact version.
pub const FORMAT_VERSION: u16 = 1;

/// Magic(4) + Version(2) + PayloadLength(8).
pub const HEADER_SIZE: usize = 14;

/// Per-artifact flags, stored right before the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaByte(u8);

impl MetaByte {
    const STATIC_MASK: u8 = 0b0000_0001; // Bit 0
    const COMPRESSION_MASK: u8 = 0b0000_1110; // Bits 1-3

    /// Packs the flags.
    pub fn new(is_static: bool, compression_id: u8) -> Self {
        let mut byte = (compression_id & 0x07) << 1;
        if is_static {
            byte |= Self::STATIC_MASK;
        }
        Self(byte)
    }

    /// Wraps a raw byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// True if the program holds no entity and no reference cell.
    pub fn is_static(&self) -> bool {
        self.0 & Self::STATIC_MASK != 0
    }

    /// Compression algorithm id (0-7).
    pub fn compression_method(&self) -> u8 {
        (self.0 & Self::COMPRESSION_MASK) >> 1
    }

    /// Raw byte.
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

/// Trailer locating the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactHeader {
    /// Always [`MAGIC_BYTES`].
    pub magic: [u8; 4],
    /// Format version.
    pub version: u16,
    /// Length of the (possibly compressed) payload.
    pub payload_len: u64,
}

impl ArtifactHeader {
    /// Header for a payload of `payload_len` bytes.
    pub fn new(payload_len: u64) -> Self {
        Self {
            magic: MAGIC_BYTES,
            version: FORMAT_VERSION,
            payload_len,
        }
    }

    /// Little-endian encoding.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..14].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    /// Decodes and validates a header.
    ///
    /// # Errors
    /// `Format` on a short buffer, wrong magic or unsupported version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (magic, rest) = bytes
            .split_first_chunk::<4>()
            .ok_or_else(|| VarExportError::Format("artifact header is truncated".into()))?;
        if *magic != MAGIC_BYTES {
            return Err(VarExportError::Format(format!(
                "bad magic bytes {magic:02x?}, expected {MAGIC_BYTES:02x?}"
            )));
        }
        let (version, rest) = rest
            .split_first_chunk::<2>()
            .ok_or_else(|| VarExportError::Format("artifact header is truncated".into()))?;
        let version = u16::from_le_bytes(*version);
        if version != FORMAT_VERSION {
            return Err(VarExportError::Format(format!(
                "unsupported artifact version {version}"
            )));
        }
        let (payload_len, _) = rest
            .split_first_chunk::<8>()
            .ok_or_else(|| VarExportError::Format("artifact header is truncated".into()))?;
        Ok(Self {
            magic: *magic,
            version,
            payload_len: u64::from_le_bytes(*payload_len),
        })
    }
}
