//! Asynchronous depth-sort service.
//!
//! Produces the back-to-front permutation the rasterizer consumes. The
//! sort itself is a stable LSD radix argsort over per-splat `u32` depth
//! encodings (a `u16` variant covers legacy readbacks): greater depth
//! first, ties by splat index ascending, zero keys culled (splats that
//! failed the alpha/bounds test during readback encode depth 0).
//!
//! One exclusive worker thread runs sorts off the render thread. Requests
//! issued while a sort is busy coalesce into a single pending slot — a
//! newer request replaces an older queued one, never queues behind it —
//! and a configurable minimum interval defers back-to-back sorts.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::errors::{EngineError, Result};
use crate::settings::ORDERING_ALIGN;

/// Rounds a splat count up to a valid ordering-buffer capacity (a
/// positive multiple of [`ORDERING_ALIGN`]).
#[must_use]
pub fn ordering_capacity(n: usize) -> usize {
    n.max(1).div_ceil(ORDERING_ALIGN) * ORDERING_ALIGN
}

// ============================================================================
// Radix argsort
// ============================================================================

/// Sorts the first `n` splats of `depth` back-to-front into `ordering`.
///
/// Returns the number of visible splats written to `ordering[0..visible]`;
/// the remaining slots are unspecified. `ordering` must hold at least `n`
/// entries and its length must be a multiple of [`ORDERING_ALIGN`].
pub fn sort_depth_readback(n: usize, depth: &[u32], ordering: &mut [u32]) -> Result<usize> {
    check_capacity(n, depth.len(), ordering.len())?;

    // Invert keys so an ascending stable radix yields descending depth
    // with ascending-index ties.
    let mut keys: Vec<(u32, u32)> = depth[..n]
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d != 0)
        .map(|(i, &d)| (!d, i as u32))
        .collect();
    let visible = keys.len();

    let mut scratch = vec![(0_u32, 0_u32); visible];
    for pass in 0..4 {
        counting_pass(&keys, &mut scratch, pass * 8);
        std::mem::swap(&mut keys, &mut scratch);
    }

    for (slot, (_, index)) in ordering.iter_mut().zip(keys) {
        *slot = index;
    }
    Ok(visible)
}

/// 16-bit variant of [`sort_depth_readback`] for legacy depth encodings.
pub fn sort_depth_readback_u16(n: usize, depth: &[u16], ordering: &mut [u32]) -> Result<usize> {
    check_capacity(n, depth.len(), ordering.len())?;

    let mut keys: Vec<(u32, u32)> = depth[..n]
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d != 0)
        .map(|(i, &d)| (u32::from(!d), i as u32))
        .collect();
    let visible = keys.len();

    let mut scratch = vec![(0_u32, 0_u32); visible];
    for pass in 0..2 {
        counting_pass(&keys, &mut scratch, pass * 8);
        std::mem::swap(&mut keys, &mut scratch);
    }

    for (slot, (_, index)) in ordering.iter_mut().zip(keys) {
        *slot = index;
    }
    Ok(visible)
}

fn check_capacity(n: usize, depth_len: usize, capacity: usize) -> Result<()> {
    if n > depth_len || capacity < n || !capacity.is_multiple_of(ORDERING_ALIGN) {
        return Err(EngineError::InvalidBuffer {
            needed: n,
            capacity,
        });
    }
    Ok(())
}

fn counting_pass(keys: &[(u32, u32)], out: &mut [(u32, u32)], shift: u32) {
    let mut counts = [0_usize; 256];
    for (key, _) in keys {
        counts[(key >> shift & 0xFF) as usize] += 1;
    }
    let mut offsets = [0_usize; 256];
    let mut running = 0;
    for (offset, count) in offsets.iter_mut().zip(counts) {
        *offset = running;
        running += count;
    }
    for &entry in keys {
        let bucket = (entry.0 >> shift & 0xFF) as usize;
        out[offsets[bucket]] = entry;
        offsets[bucket] += 1;
    }
}

// ============================================================================
// Worker
// ============================================================================

/// A depth-sort request. `version` tags which composition the readback
/// belongs to so stale results can be recognized on arrival.
pub struct SortRequest {
    /// Active splat count.
    pub active: usize,
    /// Per-splat depth encoding, at least `active` entries.
    pub depth: Vec<u32>,
    /// Mapping version of the composition the readback was taken from.
    pub version: u64,
}

/// A completed sort.
pub struct SortResult {
    /// Back-to-front permutation, valid in `ordering[0..visible]`; the
    /// buffer length is a multiple of [`ORDERING_ALIGN`].
    pub ordering: Vec<u32>,
    /// Number of visible splats.
    pub visible: usize,
    /// The request's mapping version, echoed back.
    pub version: u64,
}

#[derive(Default)]
struct WorkerState {
    pending: Option<SortRequest>,
    sorting: bool,
    disposed: bool,
    next_allowed: Option<Instant>,
}

struct Shared {
    state: Mutex<WorkerState>,
    wake: Condvar,
}

/// The exclusive sort worker.
pub struct SortWorker {
    shared: Arc<Shared>,
    results: flume::Receiver<SortResult>,
    thread: Option<JoinHandle<()>>,
}

impl SortWorker {
    /// Spawns the worker. `min_interval` is the lower bound between the
    /// start of consecutive sorts.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState::default()),
            wake: Condvar::new(),
        });
        let (result_tx, result_rx) = flume::unbounded();

        let worker_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("veil-sort".into())
            .spawn(move || worker_loop(&worker_shared, &result_tx, min_interval))
            .expect("spawn sort worker");

        Self {
            shared,
            results: result_rx,
            thread: Some(thread),
        }
    }

    /// Submits a sort. If the worker is busy the request parks in the
    /// single pending slot, replacing any request already parked there.
    pub fn request(&self, request: SortRequest) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.disposed {
            return Err(EngineError::Disposed("sort worker"));
        }
        if state.pending.replace(request).is_some() {
            log::trace!("superseding queued sort request");
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Whether a sort is currently running.
    #[must_use]
    pub fn is_sorting(&self) -> bool {
        self.shared.state.lock().sorting
    }

    /// Whether a finished sort is waiting to be collected.
    #[must_use]
    pub fn has_result(&self) -> bool {
        !self.results.is_empty()
    }

    /// Non-blocking poll for a finished sort.
    #[must_use]
    pub fn try_result(&self) -> Option<SortResult> {
        self.results.try_recv().ok()
    }

    /// Tears the worker down. A sort in progress completes first; its
    /// result is discarded along with anything still pending.
    pub fn dispose(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.disposed = true;
            state.pending = None;
            self.shared.wake.notify_one();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SortWorker {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn worker_loop(shared: &Shared, results: &flume::Sender<SortResult>, min_interval: Duration) {
    loop {
        let request = {
            let mut state = shared.state.lock();
            loop {
                if state.disposed {
                    return;
                }
                if state.pending.is_some() {
                    // Defer the busy transition until the minimum interval
                    // from the previous sort start has elapsed.
                    if let Some(at) = state.next_allowed {
                        let now = Instant::now();
                        if now < at {
                            let _ = shared.wake.wait_for(&mut state, at - now);
                            continue;
                        }
                    }
                    break;
                }
                shared.wake.wait(&mut state);
            }
            state.sorting = true;
            state.next_allowed = Some(Instant::now() + min_interval);
            state.pending.take().expect("checked above")
        };

        let mut ordering = vec![0_u32; ordering_capacity(request.active)];
        let outcome = sort_depth_readback(request.active, &request.depth, &mut ordering);

        {
            let mut state = shared.state.lock();
            state.sorting = false;
        }

        match outcome {
            Ok(visible) => {
                let _ = results.send(SortResult {
                    ordering,
                    visible,
                    version: request.version,
                });
            }
            Err(err) => log::warn!("depth sort failed: {err}"),
        }
    }
}
