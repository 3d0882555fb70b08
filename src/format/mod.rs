//! Streamable splat container format.
//!
//! A container is a plain little-endian header followed by a sequence of
//! chunks. The header is self-describing — once parsed, a client knows
//! every chunk's byte range and can fetch chunks independently with Range
//! requests. Chunk 0 is the root: it carries the LoD skeleton a tree needs
//! before anything else renders.
//!
//! Header byte size is not known in advance, so clients probe with
//! escalating reads (see [`HEADER_PROBE_SIZES`]).

pub mod chunk;
pub mod header;
pub mod source;

pub use chunk::{DecodedChunk, NODE_RECORD_SIZE, decode_chunk, encode_chunk};
pub use header::{CHUNK_DIR_ENTRY_SIZE, ChunkEntry, ContainerHeader, HEADER_FIXED_SIZE};
pub use source::ChunkSource;

/// Escalating read sizes used to probe for a complete header.
pub const HEADER_PROBE_SIZES: [usize; 3] = [64 * 1024, 256 * 1024, 1024 * 1024];

use crate::errors::Result;

/// Reads and parses a container header from `source`, probing with
/// escalating ranges until the directory is complete.
pub fn read_header(source: &ChunkSource) -> Result<ContainerHeader> {
    let mut last_err = None;
    for probe in HEADER_PROBE_SIZES {
        let bytes = source.read_range(0, probe)?;
        match ContainerHeader::parse(&bytes) {
            Ok(parsed) => return Ok(parsed),
            Err(err) => last_err = Some(err),
        }
        if bytes.len() < probe {
            // Whole file read; a larger probe cannot help.
            break;
        }
    }
    Err(last_err.expect("at least one probe attempted"))
}
