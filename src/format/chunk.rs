//! Chunk encoding and decoding.
//!
//! A chunk is the atomic unit of fetch and cache residency: one sub-tree's
//! nodes plus its encoded splat payload, guarded by an xxh3 checksum.
//!
//! ```text
//! chunk_id     u32
//! node_count   u32
//! payload_len  u32      (encoded splat bytes)
//! reserved     u32
//! checksum     u64      (xxh3 of node records + payload)
//! nodes        node_count x 28-byte record
//! payload      payload_len bytes
//! ```
//!
//! Node record: center `f32x3`, radius `f32`, parent `u32`, first-child
//! `u32`, child-count `u16`, level `u8`, flags `u8`.

use glam::Vec3;
use xxhash_rust::xxh3::xxh3_64;

use crate::errors::{EngineError, Result};
use crate::lod::tree::LodNode;

/// Byte size of the fixed chunk header.
pub const CHUNK_HEADER_SIZE: usize = 24;

/// Byte size of one serialized node record.
pub const NODE_RECORD_SIZE: usize = 28;

/// A decoded, checksum-verified chunk.
#[derive(Debug, Clone)]
pub struct DecodedChunk {
    /// The chunk's id within its container.
    pub chunk_id: u32,
    /// Tree nodes carried by the chunk.
    pub nodes: Vec<LodNode>,
    /// Encoded splat records for those nodes.
    pub payload: Vec<u8>,
}

/// Serializes one chunk.
#[must_use]
pub fn encode_chunk(chunk_id: u32, nodes: &[LodNode], payload: &[u8]) -> Vec<u8> {
    let body_len = nodes.len() * NODE_RECORD_SIZE + payload.len();
    let mut body = Vec::with_capacity(body_len);
    for node in nodes {
        body.extend_from_slice(&node.center.x.to_le_bytes());
        body.extend_from_slice(&node.center.y.to_le_bytes());
        body.extend_from_slice(&node.center.z.to_le_bytes());
        body.extend_from_slice(&node.radius.to_le_bytes());
        body.extend_from_slice(&node.parent.to_le_bytes());
        body.extend_from_slice(&node.first_child.to_le_bytes());
        body.extend_from_slice(&node.child_count.to_le_bytes());
        body.push(node.level);
        body.push(node.flags);
    }
    body.extend_from_slice(payload);

    let mut out = Vec::with_capacity(CHUNK_HEADER_SIZE + body_len);
    out.extend_from_slice(&chunk_id.to_le_bytes());
    out.extend_from_slice(&(nodes.len() as u32).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&0_u32.to_le_bytes());
    out.extend_from_slice(&xxh3_64(&body).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Parses and verifies one chunk.
pub fn decode_chunk(bytes: &[u8]) -> Result<DecodedChunk> {
    if bytes.len() < CHUNK_HEADER_SIZE {
        return Err(EngineError::Format("chunk shorter than header".into()));
    }
    let chunk_id = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let node_count = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let payload_len = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    let checksum = u64::from_le_bytes(bytes[16..24].try_into().unwrap());

    let body_len = node_count * NODE_RECORD_SIZE + payload_len;
    let body = bytes
        .get(CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + body_len)
        .ok_or_else(|| {
            EngineError::ChunkDecodeFailed {
                chunk: chunk_id,
                reason: format!("truncated body: need {body_len} bytes"),
            }
        })?;
    if xxh3_64(body) != checksum {
        return Err(EngineError::ChunkDecodeFailed {
            chunk: chunk_id,
            reason: "checksum mismatch".into(),
        });
    }

    let mut nodes = Vec::with_capacity(node_count);
    for i in 0..node_count {
        let record = &body[i * NODE_RECORD_SIZE..(i + 1) * NODE_RECORD_SIZE];
        nodes.push(LodNode {
            center: Vec3::new(
                f32::from_le_bytes(record[0..4].try_into().unwrap()),
                f32::from_le_bytes(record[4..8].try_into().unwrap()),
                f32::from_le_bytes(record[8..12].try_into().unwrap()),
            ),
            radius: f32::from_le_bytes(record[12..16].try_into().unwrap()),
            parent: u32::from_le_bytes(record[16..20].try_into().unwrap()),
            first_child: u32::from_le_bytes(record[20..24].try_into().unwrap()),
            child_count: u16::from_le_bytes(record[24..26].try_into().unwrap()),
            level: record[26],
            flags: record[27],
        });
    }

    Ok(DecodedChunk {
        chunk_id,
        nodes,
        payload: body[node_count * NODE_RECORD_SIZE..].to_vec(),
    })
}
