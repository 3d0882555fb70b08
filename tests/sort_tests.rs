//! Depth Sort Tests
//!
//! Tests for:
//! - Back-to-front ordering with stable index tie-breaks
//! - Zero-depth (culled) splat exclusion
//! - Capacity validation (alignment and size)
//! - The 16-bit legacy variant
//! - Worker coalescing: concurrent requests collapse to the newest
//! - Disposal

use std::time::Duration;

use rand::Rng;
use rand::RngExt;

use veil::errors::EngineError;
use veil::settings::ORDERING_ALIGN;
use veil::sorting::{
    SortRequest, SortWorker, ordering_capacity, sort_depth_readback, sort_depth_readback_u16,
};

// ============================================================================
// Radix Sort
// ============================================================================

#[test]
fn orders_back_to_front() {
    let depth = vec![5_u32, 900, 12, 44, 900, 1];
    let mut ordering = vec![0_u32; ORDERING_ALIGN];

    let visible = sort_depth_readback(depth.len(), &depth, &mut ordering).unwrap();
    assert_eq!(visible, 6);
    for pair in ordering[..visible].windows(2) {
        assert!(
            depth[pair[0] as usize] >= depth[pair[1] as usize],
            "greater depth must sort first"
        );
    }
}

#[test]
fn ties_break_by_index_ascending() {
    let depth = vec![7_u32, 7, 7, 7];
    let mut ordering = vec![0_u32; ORDERING_ALIGN];

    let visible = sort_depth_readback(4, &depth, &mut ordering).unwrap();
    assert_eq!(&ordering[..visible], &[0, 1, 2, 3]);
}

#[test]
fn zero_depth_splats_are_culled() {
    let depth = vec![10_u32, 0, 30, 0, 20];
    let mut ordering = vec![0_u32; ORDERING_ALIGN];

    let visible = sort_depth_readback(5, &depth, &mut ordering).unwrap();
    assert_eq!(visible, 3);
    assert_eq!(&ordering[..3], &[2, 4, 0]);
}

#[test]
fn sorts_only_active_prefix() {
    let depth = vec![1_u32, 2, 3, 4, 5, 6];
    let mut ordering = vec![0_u32; ORDERING_ALIGN];

    let visible = sort_depth_readback(3, &depth, &mut ordering).unwrap();
    assert_eq!(visible, 3);
    assert_eq!(&ordering[..3], &[2, 1, 0]);
}

#[test]
fn random_inputs_sort_correctly() {
    let mut rng = rand::rng();
    for _ in 0..10 {
        let n = rng.random_range(1..5000);
        let depth: Vec<u32> = (0..n).map(|_| rng.random_range(0..u32::MAX)).collect();
        let mut ordering = vec![0_u32; ordering_capacity(n)];

        let visible = sort_depth_readback(n, &depth, &mut ordering).unwrap();
        assert_eq!(visible, depth.iter().filter(|&&d| d != 0).count());
        for pair in ordering[..visible].windows(2) {
            let (a, b) = (depth[pair[0] as usize], depth[pair[1] as usize]);
            assert!(a > b || (a == b && pair[0] < pair[1]));
        }
    }
}

#[test]
fn capacity_must_be_aligned_and_sufficient() {
    let depth = vec![1_u32; 100];

    let mut unaligned = vec![0_u32; 100];
    assert!(matches!(
        sort_depth_readback(100, &depth, &mut unaligned),
        Err(EngineError::InvalidBuffer { .. })
    ));

    let mut too_small = vec![0_u32; ORDERING_ALIGN];
    assert!(matches!(
        sort_depth_readback(ORDERING_ALIGN + 1, &vec![1; ORDERING_ALIGN + 1], &mut too_small),
        Err(EngineError::InvalidBuffer { .. })
    ));
}

#[test]
fn ordering_capacity_is_aligned() {
    assert_eq!(ordering_capacity(0), ORDERING_ALIGN);
    assert_eq!(ordering_capacity(1), ORDERING_ALIGN);
    assert_eq!(ordering_capacity(ORDERING_ALIGN), ORDERING_ALIGN);
    assert_eq!(ordering_capacity(ORDERING_ALIGN + 1), 2 * ORDERING_ALIGN);
}

#[test]
fn legacy_u16_variant_sorts() {
    let depth = vec![300_u16, 0, 65535, 300, 7];
    let mut ordering = vec![0_u32; ORDERING_ALIGN];

    let visible = sort_depth_readback_u16(5, &depth, &mut ordering).unwrap();
    assert_eq!(visible, 4);
    assert_eq!(&ordering[..4], &[2, 0, 3, 4]);
}

// ============================================================================
// Worker
// ============================================================================

fn request(version: u64, depth: Vec<u32>) -> SortRequest {
    SortRequest {
        active: depth.len(),
        depth,
        version,
    }
}

#[test]
fn worker_sorts_and_reports_version() {
    let worker = SortWorker::new(Duration::ZERO);
    worker.request(request(42, vec![3, 1, 2])).unwrap();

    let result = wait_result(&worker);
    assert_eq!(result.version, 42);
    assert_eq!(result.visible, 3);
    assert_eq!(&result.ordering[..3], &[0, 2, 1]);
    assert!(result.ordering.len().is_multiple_of(ORDERING_ALIGN));
}

#[test]
fn concurrent_requests_coalesce_to_newest() {
    // A long min interval keeps the worker parked after the first sort,
    // so the second and third requests pile into the pending slot.
    let mut worker = SortWorker::new(Duration::from_millis(250));
    worker.request(request(1, vec![1, 2])).unwrap();

    let first = wait_result(&worker);
    assert_eq!(first.version, 1);

    worker.request(request(2, vec![2, 1])).unwrap();
    worker.request(request(3, vec![9, 8, 7])).unwrap();

    // Exactly one further sort runs, and it uses the newest request.
    let second = wait_result(&worker);
    assert_eq!(second.version, 3);
    assert_eq!(second.visible, 3);
    std::thread::sleep(Duration::from_millis(50));
    assert!(worker.try_result().is_none(), "request 2 was superseded");

    worker.dispose();
}

#[test]
fn request_after_dispose_fails() {
    let mut worker = SortWorker::new(Duration::ZERO);
    worker.dispose();
    assert!(matches!(
        worker.request(request(1, vec![1])),
        Err(EngineError::Disposed(_))
    ));
}

fn wait_result(worker: &SortWorker) -> veil::sorting::SortResult {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(result) = worker.try_result() {
            return result;
        }
        assert!(std::time::Instant::now() < deadline, "sort never completed");
        std::thread::sleep(Duration::from_millis(1));
    }
}
