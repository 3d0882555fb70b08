//! Tree Registry Tests
//!
//! Tests for:
//! - In-memory tree registration and ranged updates
//! - Level queries
//! - Shared handle reference counting and dispose ordering
//! - Atomic batch validation of range updates
//! - Container ingest via init_tree

use std::time::{Duration, Instant};

use glam::{Quat, Vec3};

use veil::errors::EngineError;
use veil::lod::{
    LodNode, NO_NODE, TreeRegistry, TreeUpdate, build_lod_tree, write_container,
};
use veil::splats::Splat;
use veil::splats::encoding::SplatEncoding;

fn node(center: Vec3, radius: f32, parent: u32, first_child: u32, children: u16, level: u8) -> LodNode {
    LodNode {
        center,
        radius,
        parent,
        first_child,
        child_count: children,
        level,
        flags: 0,
    }
}

/// Root with two children, each with two leaves: 7 nodes, 3 levels.
fn small_tree_nodes() -> Vec<LodNode> {
    vec![
        node(Vec3::ZERO, 4.0, NO_NODE, 1, 2, 0),
        node(Vec3::new(-1.0, 0.0, 0.0), 2.0, 0, 3, 2, 1),
        node(Vec3::new(1.0, 0.0, 0.0), 2.0, 0, 5, 2, 1),
        node(Vec3::new(-1.5, 0.0, 0.0), 1.0, 1, NO_NODE, 0, 2),
        node(Vec3::new(-0.5, 0.0, 0.0), 1.0, 1, NO_NODE, 0, 2),
        node(Vec3::new(0.5, 0.0, 0.0), 1.0, 2, NO_NODE, 0, 2),
        node(Vec3::new(1.5, 0.0, 0.0), 1.0, 2, NO_NODE, 0, 2),
    ]
}

fn populated_registry() -> (TreeRegistry, veil::TreeId) {
    let mut registry = TreeRegistry::new();
    let id = registry.new_tree(7);
    registry
        .update_trees(&[TreeUpdate {
            tree: id,
            page_base: 0,
            chunk_base: 0,
            count: 1,
            nodes: Some(small_tree_nodes()),
        }])
        .unwrap();
    (registry, id)
}

// ============================================================================
// Registration and Updates
// ============================================================================

#[test]
fn populated_tree_has_root_and_levels() {
    let (registry, id) = populated_registry();
    let tree = registry.tree(id).unwrap();
    assert!(tree.root().is_some());
    assert_eq!(tree.levels(), 3);
}

#[test]
fn get_level_returns_each_tier() {
    let (registry, id) = populated_registry();
    assert_eq!(registry.get_level(id, 0).unwrap(), vec![0]);
    assert_eq!(registry.get_level(id, 1).unwrap(), vec![1, 2]);
    assert_eq!(registry.get_level(id, 2).unwrap(), vec![3, 4, 5, 6]);
    assert!(registry.get_level(id, 3).unwrap().is_empty());
}

#[test]
fn update_past_capacity_is_rejected_atomically() {
    let (mut registry, id) = populated_registry();
    let bad_batch = [
        TreeUpdate {
            tree: id,
            page_base: 1,
            chunk_base: 0,
            count: 1,
            nodes: None,
        },
        TreeUpdate {
            tree: id,
            page_base: 0,
            chunk_base: 5,
            count: 1,
            nodes: None,
        },
    ];
    let err = registry.update_trees(&bad_batch).unwrap_err();
    assert!(matches!(err, EngineError::OutOfRange { .. }));

    // The valid first range must not have been applied.
    assert!(registry.tree(id).unwrap().root().is_some());
}

#[test]
fn blobless_update_collapses_residency() {
    let (mut registry, id) = populated_registry();
    registry
        .update_trees(&[TreeUpdate {
            tree: id,
            page_base: 0,
            chunk_base: 0,
            count: 1,
            nodes: None,
        }])
        .unwrap();
    assert!(registry.tree(id).unwrap().root().is_none());
}

#[test]
fn unknown_tree_errors() {
    let (mut registry, id) = populated_registry();
    registry.dispose(id).unwrap();
    assert!(matches!(registry.tree(id), Err(EngineError::UnknownTree)));
    assert!(matches!(
        registry.get_level(id, 0),
        Err(EngineError::UnknownTree)
    ));
    assert!(matches!(registry.dispose(id), Err(EngineError::UnknownTree)));
}

// ============================================================================
// Shared Handles
// ============================================================================

#[test]
fn shared_handle_reads_primary_payload() {
    let (mut registry, primary) = populated_registry();
    let shared = registry.new_shared_tree(primary).unwrap();
    assert_eq!(registry.get_level(shared, 1).unwrap(), vec![1, 2]);
}

#[test]
fn retired_primary_survives_until_last_share() {
    let (mut registry, primary) = populated_registry();
    let shared = registry.new_shared_tree(primary).unwrap();

    // Disposing the primary first retires it: the handle dies, the
    // payload stays reachable through the share.
    registry.dispose(primary).unwrap();
    assert!(matches!(registry.tree(primary), Err(EngineError::UnknownTree)));
    assert!(registry.tree(shared).is_ok());

    registry.dispose(shared).unwrap();
    assert!(registry.is_empty());
}

#[test]
fn share_of_share_attaches_to_primary() {
    let (mut registry, primary) = populated_registry();
    let first = registry.new_shared_tree(primary).unwrap();
    let second = registry.new_shared_tree(first).unwrap();

    registry.dispose(first).unwrap();
    assert!(registry.tree(second).is_ok(), "share outlives sibling share");
    registry.dispose(second).unwrap();
    registry.dispose(primary).unwrap();
    assert!(registry.is_empty());
}

// ============================================================================
// Idle Tracking
// ============================================================================

#[test]
fn oldest_idle_respects_touches() {
    let (mut registry, first) = populated_registry();
    let second = registry.new_tree(7);

    let later = Instant::now() + Duration::from_secs(10);
    registry.touch(second, later);

    let idle = registry.oldest_idle(later, Duration::from_secs(3));
    assert_eq!(idle, Some(first), "untouched tree should evict first");

    registry.touch(first, later);
    assert_eq!(registry.oldest_idle(later, Duration::from_secs(3)), None);
}

// ============================================================================
// Container Ingest
// ============================================================================

#[test]
fn init_tree_ingests_built_container() {
    let splats: Vec<Splat> = (0..300)
        .map(|i| Splat {
            center: Vec3::new((i % 20) as f32, (i / 20) as f32, 0.0),
            log_scales: Vec3::splat(-2.5),
            rotation: Quat::IDENTITY,
            color: [0.3, 0.6, 0.9],
            opacity: 1.0,
        })
        .collect();
    let built = build_lod_tree(&splats, 2.0);
    let blob = write_container(&built, SplatEncoding::Compact);

    let mut registry = TreeRegistry::new();
    let (id, chunk_to_page) = registry
        .init_tree(built.nodes.len() as u64, &blob)
        .unwrap();

    let tree = registry.tree(id).unwrap();
    assert!(tree.root().is_some());
    assert_eq!(chunk_to_page.len() as u32, tree.chunk_count());
    assert_eq!(registry.get_level(id, 0).unwrap().len(), 1, "single root");

    // Leaves of the built tree survive ingestion.
    let leaves = built.leaf_count();
    assert_eq!(leaves, 300, "one leaf per retained source splat");
}

#[test]
fn init_tree_checks_declared_count() {
    let built = build_lod_tree(
        &[Splat {
            center: Vec3::ZERO,
            log_scales: Vec3::splat(-1.0),
            rotation: Quat::IDENTITY,
            color: [1.0; 3],
            opacity: 1.0,
        }],
        2.0,
    );
    let blob = write_container(&built, SplatEncoding::Compact);

    let mut registry = TreeRegistry::new();
    assert!(registry.init_tree(9999, &blob).is_err());
}
