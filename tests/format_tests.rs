//! Container Format Tests
//!
//! Tests for:
//! - Header serialization round trips
//! - Escalating-range header probing
//! - Chunk checksum verification and corruption detection
//! - Chunk source ranged reads
//! - Built containers ingesting end to end

use glam::{Quat, Vec3};

use veil::format::{
    self, ChunkEntry, ChunkSource, ContainerHeader, decode_chunk, encode_chunk,
};
use veil::lod::{LodNode, NO_NODE, build_lod_tree, write_container};
use veil::splats::Splat;
use veil::splats::encoding::SplatEncoding;

fn leaf_node(center: Vec3, radius: f32) -> LodNode {
    LodNode {
        center,
        radius,
        parent: NO_NODE,
        first_child: NO_NODE,
        child_count: 0,
        level: 0,
        flags: 0,
    }
}

fn test_header(chunk_count: u32) -> ContainerHeader {
    ContainerHeader {
        version: format::header::FORMAT_VERSION,
        encoding: SplatEncoding::Compact,
        sh_level: 0,
        page_size: 65_536,
        num_splats: u64::from(chunk_count) * 10,
        chunks: (0..chunk_count)
            .map(|i| ChunkEntry {
                offset: 1000 + u64::from(i) * 500,
                byte_len: 500,
                node_base: i * 10,
                node_count: 10,
            })
            .collect(),
    }
}

// ============================================================================
// Header Round Trips
// ============================================================================

#[test]
fn header_round_trip() {
    let header = test_header(7);
    let bytes = header.write();
    assert_eq!(bytes.len(), header.byte_size());

    let parsed = ContainerHeader::parse(&bytes).unwrap();
    assert_eq!(parsed.encoding, SplatEncoding::Compact);
    assert_eq!(parsed.num_splats, 70);
    assert_eq!(parsed.chunks.len(), 7);
    assert_eq!(parsed.chunks[3], header.chunks[3]);
}

#[test]
fn header_rejects_bad_magic() {
    let mut bytes = test_header(1).write();
    bytes[0] = b'X';
    assert!(ContainerHeader::parse(&bytes).is_err());
}

#[test]
fn header_truncated_directory_fails() {
    let bytes = test_header(4).write();
    assert!(ContainerHeader::parse(&bytes[..bytes.len() - 8]).is_err());
}

#[test]
fn read_header_probes_past_first_range() {
    // A directory large enough that the first 64 KiB probe cannot hold it.
    let big = test_header(4000);
    assert!(big.byte_size() > format::HEADER_PROBE_SIZES[0]);

    let mut bytes = big.write();
    bytes.resize(bytes.len() + 1024, 0);
    let source = ChunkSource::from_bytes(bytes);

    let parsed = format::read_header(&source).unwrap();
    assert_eq!(parsed.chunks.len(), 4000);
}

// ============================================================================
// Chunks
// ============================================================================

#[test]
fn chunk_round_trip() {
    let nodes = vec![
        leaf_node(Vec3::new(1.0, 2.0, 3.0), 0.5),
        leaf_node(Vec3::new(-1.0, 0.0, 4.0), 0.25),
    ];
    let payload = vec![0xAB_u8; 32];
    let bytes = encode_chunk(9, &nodes, &payload);

    let decoded = decode_chunk(&bytes).unwrap();
    assert_eq!(decoded.chunk_id, 9);
    assert_eq!(decoded.nodes, nodes);
    assert_eq!(decoded.payload, payload);
}

#[test]
fn chunk_corruption_fails_checksum() {
    let nodes = vec![leaf_node(Vec3::ZERO, 1.0)];
    let mut bytes = encode_chunk(0, &nodes, &[1, 2, 3, 4]);
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    let err = decode_chunk(&bytes).unwrap_err();
    assert!(err.to_string().contains("checksum"), "got: {err}");
}

#[test]
fn chunk_truncation_detected() {
    let nodes = vec![leaf_node(Vec3::ZERO, 1.0)];
    let bytes = encode_chunk(0, &nodes, &[1, 2, 3, 4]);
    assert!(decode_chunk(&bytes[..bytes.len() - 2]).is_err());
}

// ============================================================================
// Sources
// ============================================================================

#[test]
fn memory_source_clamps_reads_to_length() {
    let source = ChunkSource::from_bytes((0..100_u8).collect());
    assert_eq!(source.read_range(90, 50).unwrap(), (90..100).collect::<Vec<u8>>());
    assert!(source.read_range(200, 10).unwrap().is_empty());
}

#[test]
fn file_source_reads_ranges() {
    let dir = std::env::temp_dir().join("veil_format_tests");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("ranged.bin");
    std::fs::write(&path, (0..64_u8).collect::<Vec<_>>()).unwrap();

    let source = ChunkSource::open(&path).unwrap();
    assert_eq!(source.read_range(16, 4).unwrap(), vec![16, 17, 18, 19]);
    assert_eq!(source.read_range(0, 2).unwrap(), vec![0, 1]);
}

// ============================================================================
// Built Containers
// ============================================================================

fn scattered_splats(count: usize) -> Vec<Splat> {
    (0..count)
        .map(|i| Splat {
            center: Vec3::new((i % 17) as f32, (i % 5) as f32, (i / 17) as f32) * 2.0,
            log_scales: Vec3::splat(-2.0),
            rotation: Quat::IDENTITY,
            color: [0.5, 0.5, 0.5],
            opacity: 0.8,
        })
        .collect()
}

#[test]
fn built_container_parses_and_decodes() {
    let tree = build_lod_tree(&scattered_splats(200), 2.0);
    assert!(!tree.nodes.is_empty());

    let blob = write_container(&tree, SplatEncoding::Compact);
    let header = ContainerHeader::parse(&blob).unwrap();
    assert_eq!(header.num_splats as usize, tree.nodes.len());

    for entry in &header.chunks {
        let chunk_bytes = &blob[entry.offset as usize..(entry.offset + u64::from(entry.byte_len)) as usize];
        let decoded = decode_chunk(chunk_bytes).unwrap();
        assert_eq!(decoded.nodes.len() as u32, entry.node_count);
    }
}
