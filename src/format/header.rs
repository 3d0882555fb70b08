//! Container header parsing and writing.
//!
//! Fixed fields, then a chunk directory. All multi-byte fields are
//! little-endian:
//!
//! ```text
//! magic        [u8; 4] = "VSPL"
//! version      u16
//! encoding     u8        (see SplatEncoding)
//! sh_level     u8        (0..=3)
//! page_size    u32       (splats per chunk / cache page)
//! num_splats   u64
//! chunk_count  u32
//! reserved     u32
//! directory    chunk_count x ChunkEntry
//! ```

use crate::errors::{EngineError, Result};
use crate::splats::encoding::SplatEncoding;

/// Magic bytes at the start of every container.
pub const MAGIC: [u8; 4] = *b"VSPL";

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Byte size of the fixed header fields before the chunk directory.
pub const HEADER_FIXED_SIZE: usize = 28;

/// Byte size of one chunk directory entry.
pub const CHUNK_DIR_ENTRY_SIZE: usize = 20;

/// One chunk's location and node coverage. Every node is a renderable
/// splat, so the node count is also the chunk's payload record count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEntry {
    /// Absolute byte offset of the chunk in the container.
    pub offset: u64,
    /// Encoded byte length of the chunk.
    pub byte_len: u32,
    /// First tree node covered by the chunk.
    pub node_base: u32,
    /// Number of tree nodes in the chunk.
    pub node_count: u32,
}

/// Parsed container header.
#[derive(Debug, Clone)]
pub struct ContainerHeader {
    /// Format version the container was written with.
    pub version: u16,
    /// Record encoding of every chunk payload.
    pub encoding: SplatEncoding,
    /// SH level stored per splat (0 = none).
    pub sh_level: u8,
    /// Splats per chunk; must match the engine's page size to be pageable.
    pub page_size: u32,
    /// Total splats across all chunks.
    pub num_splats: u64,
    /// Chunk directory, indexed by chunk id.
    pub chunks: Vec<ChunkEntry>,
}

impl ContainerHeader {
    /// Total byte size of this header when serialized.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        HEADER_FIXED_SIZE + self.chunks.len() * CHUNK_DIR_ENTRY_SIZE
    }

    /// Parses a header from the front of `bytes`. Fails with
    /// [`EngineError::Format`] when `bytes` is too short for the directory,
    /// which callers treat as "probe again with a larger range".
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_FIXED_SIZE {
            return Err(EngineError::Format("header shorter than fixed fields".into()));
        }
        if bytes[0..4] != MAGIC {
            return Err(EngineError::Format("bad container magic".into()));
        }
        let version = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(EngineError::Format(format!(
                "unsupported container version {version}"
            )));
        }
        let encoding = SplatEncoding::from_tag(bytes[6])?;
        let sh_level = bytes[7];
        if sh_level > 3 {
            return Err(EngineError::Format(format!("bad SH level {sh_level}")));
        }
        let page_size = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let num_splats = u64::from_le_bytes(bytes[12..20].try_into().unwrap());
        let chunk_count = u32::from_le_bytes(bytes[20..24].try_into().unwrap()) as usize;

        let directory_end = HEADER_FIXED_SIZE + chunk_count * CHUNK_DIR_ENTRY_SIZE;
        if bytes.len() < directory_end {
            return Err(EngineError::Format(format!(
                "header truncated: need {directory_end} bytes for {chunk_count} chunks"
            )));
        }

        let mut chunks = Vec::with_capacity(chunk_count);
        for i in 0..chunk_count {
            let base = HEADER_FIXED_SIZE + i * CHUNK_DIR_ENTRY_SIZE;
            let entry = &bytes[base..base + CHUNK_DIR_ENTRY_SIZE];
            chunks.push(ChunkEntry {
                offset: u64::from_le_bytes(entry[0..8].try_into().unwrap()),
                byte_len: u32::from_le_bytes(entry[8..12].try_into().unwrap()),
                node_base: u32::from_le_bytes(entry[12..16].try_into().unwrap()),
                node_count: u32::from_le_bytes(entry[16..20].try_into().unwrap()),
            });
        }

        Ok(Self {
            version,
            encoding,
            sh_level,
            page_size,
            num_splats,
            chunks,
        })
    }

    /// Serializes the header.
    #[must_use]
    pub fn write(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_size());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.push(self.encoding.to_tag());
        out.push(self.sh_level);
        out.extend_from_slice(&self.page_size.to_le_bytes());
        out.extend_from_slice(&self.num_splats.to_le_bytes());
        out.extend_from_slice(&(self.chunks.len() as u32).to_le_bytes());
        out.extend_from_slice(&0_u32.to_le_bytes());
        for entry in &self.chunks {
            out.extend_from_slice(&entry.offset.to_le_bytes());
            out.extend_from_slice(&entry.byte_len.to_le_bytes());
            out.extend_from_slice(&entry.node_base.to_le_bytes());
            out.extend_from_slice(&entry.node_count.to_le_bytes());
        }
        out
    }
}
