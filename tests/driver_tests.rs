//! Render Driver Tests
//!
//! Tests for:
//! - Accumulator rotation and mapping-version bookkeeping
//! - Compose -> sort -> swap flow for a first object
//! - Immediate swap when the mapping matches the displayed set
//! - Auto-mode gating of idle frames
//! - Idle tree eviction after the dispose timeout
//! - Paged objects streaming in through the cache
//! - Shared handles for objects over one container

use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::{Mat4, Quat, Vec3};

use veil::driver::{AccumulatorSet, ComposedInstance, FrameActions, FrameInputs};
use veil::errors::EngineError;
use veil::format::{ChunkSource, ContainerHeader};
use veil::lod::{build_lod_tree, write_container};
use veil::settings::ORDERING_ALIGN;
use veil::splats::Splat;
use veil::splats::encoding::SplatEncoding;
use veil::{EngineSettings, ObjectBacking, RenderDriver, SceneObject, ViewState};

fn test_settings() -> EngineSettings {
    EngineSettings {
        max_paged_splats: 4 * veil::PAGE_SIZE,
        lod_splat_count: Some(1_000),
        dispose_timeout_ms: 3_000,
        ..EngineSettings::default()
    }
}

fn test_view() -> ViewState {
    ViewState {
        position: Vec3::ZERO,
        direction: Vec3::NEG_Z,
        fov_y: 1.0,
        render_height: 1_000,
    }
}

fn container_blob(splat_count: usize) -> Arc<Vec<u8>> {
    let splats: Vec<Splat> = (0..splat_count)
        .map(|i| Splat {
            center: Vec3::new((i % 10) as f32, (i / 10) as f32, 0.0),
            log_scales: Vec3::splat(-1.5),
            rotation: Quat::IDENTITY,
            color: [0.7, 0.7, 0.7],
            opacity: 1.0,
        })
        .collect();
    let tree = build_lod_tree(&splats, 2.0);
    Arc::new(write_container(&tree, SplatEncoding::Compact))
}

fn scene_object(id: u64, backing: ObjectBacking) -> SceneObject {
    SceneObject {
        id,
        view_to_object: Mat4::from_translation(Vec3::new(0.0, 0.0, 20.0)),
        lod_scale: 1.0,
        foveation: None,
        backing,
    }
}

fn run_frame(
    driver: &mut RenderDriver,
    objects: &[SceneObject],
    depth_readback: Option<(u64, Vec<u32>)>,
) -> FrameActions {
    run_frame_at(driver, objects, depth_readback, Instant::now(), false)
}

fn run_frame_at(
    driver: &mut RenderDriver,
    objects: &[SceneObject],
    depth_readback: Option<(u64, Vec<u32>)>,
    now: Instant,
    auto: bool,
) -> FrameActions {
    driver
        .frame(&FrameInputs {
            now,
            view: test_view(),
            objects,
            depth_readback,
            auto,
        })
        .unwrap()
}

/// Runs frames until the driver swaps a display set in, feeding it a fresh
/// readback for whatever composition is pending.
fn run_until_displayed(driver: &mut RenderDriver, objects: &[SceneObject]) -> FrameActions {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let readback = driver.accumulators().current().map(|current| {
            (
                current.mapping_version,
                (1..=current.active_count).collect::<Vec<u32>>(),
            )
        });
        let actions = run_frame(driver, objects, readback);
        if actions.swapped {
            return actions;
        }
        assert!(Instant::now() < deadline, "display swap never happened");
        std::thread::sleep(Duration::from_millis(1));
    }
}

// ============================================================================
// Accumulator Set
// ============================================================================

fn composed(tree: veil::TreeId, indices: Vec<u32>) -> Vec<ComposedInstance> {
    vec![ComposedInstance {
        tree,
        base: 0,
        indices,
    }]
}

#[test]
fn accumulators_rotate_and_track_mapping() {
    let mut registry = veil::TreeRegistry::new();
    let tree = registry.new_tree(8);

    let mut set = AccumulatorSet::new();
    let slot_a = set.pop_free().unwrap();
    assert!(set.compose(slot_a, composed(tree, vec![1, 2])), "first mapping");
    set.set_current(slot_a);

    // Until slot_a's sort is kicked, nothing may take its place.
    assert!(!set.can_replace_current());
    set.mark_current_sort_begun();
    assert!(set.can_replace_current());
    set.swap_displayed(slot_a);
    assert_eq!(set.displayed().unwrap().active_count, 2);

    // A different composition advances the mapping and becomes the new
    // sort-pending set.
    let slot_b = set.pop_free().unwrap();
    assert!(set.compose(slot_b, composed(tree, vec![1, 2, 3])));
    set.set_current(slot_b);
    assert!(!set.can_replace_current(), "slot_b's sort has not begun");

    // Reverting to the displayed composition inherits its version: the
    // existing ordering is still valid, so it bypasses the queue and
    // swaps without disturbing the pending slot_b.
    let slot_c = set.pop_free().unwrap();
    assert!(!set.compose(slot_c, composed(tree, vec![1, 2])));
    assert_eq!(
        set.get(slot_c).mapping_version,
        set.displayed().unwrap().mapping_version
    );
    set.swap_displayed(slot_c);
    assert_eq!(set.displayed().unwrap().active_count, 2);
    assert_eq!(set.current_slot(), Some(slot_b), "pending set untouched");
    assert!(!set.can_replace_current());

    // The previously displayed slot went back to the free list.
    assert!(set.pop_free().is_some());
}

#[test]
fn would_change_mapping_matches_compose() {
    let mut registry = veil::TreeRegistry::new();
    let tree = registry.new_tree(8);

    let mut set = AccumulatorSet::new();
    let slot = set.pop_free().unwrap();
    set.compose(slot, composed(tree, vec![4, 5]));
    set.swap_displayed(slot);

    assert!(!set.would_change_mapping(&composed(tree, vec![4, 5])));
    assert!(set.would_change_mapping(&composed(tree, vec![4, 6])));
}

// ============================================================================
// Compose / Sort / Swap Flow
// ============================================================================

#[test]
fn first_object_composes_sorts_and_displays() {
    let mut driver = RenderDriver::new(test_settings()).unwrap();
    let objects = [scene_object(1, ObjectBacking::Container(container_blob(50)))];

    // Frame 1 registers the tree and runs the first traversal; nothing is
    // composed yet.
    let actions = run_frame(&mut driver, &objects, None);
    assert!(actions.composed_slot.is_none());
    assert!(driver.tree_of(1).is_some());

    // Frame 2 composes the traversal's selection and goes sort-pending.
    let actions = run_frame(&mut driver, &objects, None);
    assert!(actions.composed_slot.is_some());
    assert!(!actions.swapped, "new mapping must wait for its sort");
    let current = driver.accumulators().current().expect("sort-pending set");
    assert!(current.active_count > 0);

    // Feeding readbacks drives the sort through to the display swap.
    let actions = run_until_displayed(&mut driver, &objects);
    let ordering = actions.ordering.expect("ordering uploaded on swap");
    assert!(ordering.ordering.len().is_multiple_of(ORDERING_ALIGN));
    assert_eq!(ordering.visible as u32, actions.active_count);
    assert!(driver.accumulators().displayed().is_some());
}

#[test]
fn unsorted_current_is_not_superseded() {
    let mut driver = RenderDriver::new(test_settings()).unwrap();
    let first = [scene_object(1, ObjectBacking::Container(container_blob(20)))];
    let both = [
        first[0].clone(),
        scene_object(2, ObjectBacking::Container(container_blob(10))),
    ];

    // Frames 1-2: register object 1, compose its selection; the set goes
    // sort-pending with no readback in sight.
    run_frame(&mut driver, &first, None);
    run_frame(&mut driver, &first, None);
    let pending_version = driver.accumulators().current().unwrap().mapping_version;
    let pending_count = driver.accumulators().current().unwrap().active_count;

    // Frame 3 registers object 2; frame 4's composition would differ, but
    // the pending set's sort has not begun, so the new composition queues
    // instead of superseding it.
    run_frame(&mut driver, &both, None);
    let actions = run_frame(&mut driver, &both, None);
    assert!(actions.composed_slot.is_none(), "new composition must queue");
    let current = driver.accumulators().current().unwrap();
    assert_eq!(current.mapping_version, pending_version);
    assert_eq!(current.active_count, pending_count);

    // Once a readback kicks the pending sort, the queued composition may
    // take the slot on the next frame.
    let readback = (pending_version, (1..=pending_count).collect());
    run_frame(&mut driver, &both, Some(readback));
    let actions = run_frame(&mut driver, &both, None);
    assert!(
        actions.composed_slot.is_some(),
        "queued composition lands after the sort begins"
    );
    assert_ne!(
        driver.accumulators().current().unwrap().mapping_version,
        pending_version
    );
}

#[test]
fn stale_readback_does_not_start_sort() {
    let mut driver = RenderDriver::new(test_settings()).unwrap();
    let objects = [scene_object(1, ObjectBacking::Container(container_blob(20)))];

    run_frame(&mut driver, &objects, None);
    run_frame(&mut driver, &objects, None);
    let version = driver.accumulators().current().unwrap().mapping_version;

    // A readback for a version that never existed is ignored.
    run_frame(&mut driver, &objects, Some((version + 77, vec![1, 2, 3])));
    std::thread::sleep(Duration::from_millis(10));
    let actions = run_frame(&mut driver, &objects, None);
    assert!(!actions.swapped, "stale readback must not complete the flow");
}

// ============================================================================
// Gating
// ============================================================================

#[test]
fn idle_auto_frames_are_gated() {
    let mut driver = RenderDriver::new(test_settings()).unwrap();
    let objects = [scene_object(1, ObjectBacking::Container(container_blob(30)))];

    run_frame(&mut driver, &objects, None);
    run_until_displayed(&mut driver, &objects);

    // Scene, view, and composition are now stable: auto frames no-op.
    let now = Instant::now();
    let actions = run_frame_at(&mut driver, &objects, None, now, true);
    assert!(actions.composed_slot.is_none());
    assert!(!actions.swapped);
    assert!(actions.page_uploads.is_empty());
    assert!(actions.ordering.is_none());
}

// ============================================================================
// Idle Eviction
// ============================================================================

#[test]
fn invisible_tree_is_disposed_after_timeout() {
    let mut driver = RenderDriver::new(test_settings()).unwrap();
    let objects = [scene_object(1, ObjectBacking::Container(container_blob(20)))];

    run_frame(&mut driver, &objects, None);
    let tree = driver.tree_of(1).unwrap();
    assert!(driver.registry().contains(tree));

    // The object disappears; four seconds later its tree is evicted.
    let later = Instant::now() + Duration::from_secs(4);
    run_frame_at(&mut driver, &[], None, later, false);

    assert!(driver.tree_of(1).is_none());
    assert!(!driver.registry().contains(tree));
}

#[test]
fn visible_tree_survives_timeout() {
    let mut driver = RenderDriver::new(test_settings()).unwrap();
    let objects = [scene_object(1, ObjectBacking::Container(container_blob(20)))];

    run_frame(&mut driver, &objects, None);
    let later = Instant::now() + Duration::from_secs(4);
    run_frame_at(&mut driver, &objects, None, later, false);

    assert!(driver.tree_of(1).is_some(), "touched trees never idle out");
}

// ============================================================================
// Paged Objects
// ============================================================================

fn paged_backing(blob: &Arc<Vec<u8>>) -> ObjectBacking {
    let header = ContainerHeader::parse(blob).unwrap();
    ObjectBacking::Paged {
        source: Arc::new(ChunkSource::from_bytes((**blob).clone())),
        header: Arc::new(header),
    }
}

#[test]
fn paged_object_streams_in_and_displays() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut driver = RenderDriver::new(test_settings()).unwrap();
    let blob = container_blob(40);
    let objects = [scene_object(1, paged_backing(&blob))];

    // The first frames only bootstrap: the traversal wants chunk 0, the
    // cache fetches and promotes it, a tree update lands, and only then
    // does the object contribute splats.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut saw_upload = false;
    loop {
        let actions = run_frame(&mut driver, &objects, None);
        saw_upload |= !actions.page_uploads.is_empty();
        let tree = driver.tree_of(1).unwrap();
        if driver.registry().tree(tree).unwrap().root().is_some() {
            break;
        }
        assert!(Instant::now() < deadline, "root chunk never became resident");
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(saw_upload, "promotion must produce a page upload");

    let actions = run_until_displayed(&mut driver, &objects);
    assert!(actions.active_count > 0);
    assert!(driver.cache().table().check_consistency());
}

#[test]
fn objects_sharing_a_container_share_its_payload() {
    let mut driver = RenderDriver::new(test_settings()).unwrap();
    let blob = container_blob(30);
    let backing = paged_backing(&blob);
    let objects = [
        scene_object(1, backing.clone()),
        scene_object(2, backing.clone()),
    ];

    run_frame(&mut driver, &objects, None);
    let first = driver.tree_of(1).unwrap();
    let second = driver.tree_of(2).unwrap();
    assert_ne!(first, second, "each instance gets its own handle");
    assert_eq!(driver.registry().len(), 2);

    // Both handles resolve to the same payload once chunk 0 lands.
    let deadline = Instant::now() + Duration::from_secs(5);
    while driver.registry().tree(first).unwrap().root().is_none() {
        run_frame(&mut driver, &objects, None);
        assert!(Instant::now() < deadline, "shared root never resident");
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(
        driver.registry().get_level(first, 0).unwrap(),
        driver.registry().get_level(second, 0).unwrap(),
    );
}

// ============================================================================
// Engine Facade
// ============================================================================

#[test]
fn headless_engine_runs_frames() {
    let mut engine = veil::SplatEngine::new(test_settings()).unwrap();
    let objects = [scene_object(1, ObjectBacking::Container(container_blob(25)))];

    let actions = engine
        .frame(&FrameInputs {
            now: Instant::now(),
            view: test_view(),
            objects: &objects,
            depth_readback: None,
            auto: false,
        })
        .unwrap();
    assert!(actions.ordering.is_none(), "nothing to sort on frame one");
    assert!(engine.driver().tree_of(1).is_some());
    assert_eq!(engine.timer().frame_count, 1);

    engine.dispose();
    assert!(
        engine
            .frame(&FrameInputs {
                now: Instant::now(),
                view: test_view(),
                objects: &[],
                depth_readback: None,
                auto: false,
            })
            .is_err()
    );
}

#[test]
fn engine_override_is_lexically_scoped() {
    let first = veil::SplatEngine::new(test_settings()).unwrap();
    let second = veil::SplatEngine::new(test_settings()).unwrap();
    assert_ne!(first.id(), second.id());

    assert_eq!(veil::SplatEngine::current_override(), None);
    {
        let _outer = first.bind_override();
        assert_eq!(veil::SplatEngine::current_override(), Some(first.id()));
        {
            let _inner = second.bind_override();
            assert_eq!(veil::SplatEngine::current_override(), Some(second.id()));
        }
        assert_eq!(
            veil::SplatEngine::current_override(),
            Some(first.id()),
            "inner guard restores the outer binding"
        );
    }
    assert_eq!(veil::SplatEngine::current_override(), None);
}

// ============================================================================
// Disposal
// ============================================================================

#[test]
fn disposed_driver_rejects_frames() {
    let mut driver = RenderDriver::new(test_settings()).unwrap();
    driver.dispose();
    let result = driver.frame(&FrameInputs {
        now: Instant::now(),
        view: test_view(),
        objects: &[],
        depth_readback: None,
        auto: false,
    });
    assert!(matches!(result, Err(EngineError::Disposed(_))));
}
