//! Splat page cache.
//!
//! A fixed-capacity, page-aligned working set of splat data, demand-loaded
//! from streamable containers by a bounded fetcher pool. The cache owns
//! only bookkeeping: page residency lives in [`PageTable`], fetches run in
//! [`FetcherPool`], and actual GPU writes are described by [`PageUpload`]
//! records the render driver applies.
//!
//! Per frame, driven by the render driver:
//! 1. [`frame_touch`](SplatPageCache::frame_touch) — refresh LRU state
//!    from the traversal's referenced and priority lists.
//! 2. [`dispatch_fetches`](SplatPageCache::dispatch_fetches) — start
//!    fetches for missing chunks, bounded by the fetcher count.
//! 3. [`pump`](SplatPageCache::pump) — collect finished fetches.
//! 4. [`promote`](SplatPageCache::promote) — move fetched chunks into
//!    pages (FIFO), emitting eviction tree-updates strictly before the
//!    corresponding residency updates.

pub mod fetcher;
pub mod page_table;

pub use fetcher::{FetchJob, FetchOutcome, FetchedChunk, FetcherPool};
pub use page_table::PageTable;

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::format::{ChunkSource, ContainerHeader};
use crate::lod::{TreeId, TreeUpdate};
use crate::settings::EngineSettings;

/// One pending GPU write: a fetched chunk's encoded splat records destined
/// for a pool page.
pub struct PageUpload {
    /// Destination page.
    pub page: u32,
    /// Object the payload belongs to.
    pub tree: TreeId,
    /// Chunk id within the object's container.
    pub chunk: u32,
    /// Encoded splat records.
    pub payload: Vec<u8>,
}

struct PagedObject {
    source: Arc<ChunkSource>,
    header: ContainerHeader,
}

/// Demand-paged splat cache over a bounded fetcher pool.
pub struct SplatPageCache {
    table: PageTable,
    fetchers: FetcherPool,
    objects: FxHashMap<TreeId, PagedObject>,
    in_flight: FxHashSet<(TreeId, u32)>,
    /// Fetched but not yet promoted into a page.
    queued: FxHashSet<(TreeId, u32)>,
    fetched: VecDeque<FetchedChunk>,
    pending_updates: Vec<TreeUpdate>,
    warned_over_capacity: bool,
}

impl SplatPageCache {
    /// Creates the cache and spawns its fetcher pool.
    #[must_use]
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            table: PageTable::new(settings.page_count()),
            fetchers: FetcherPool::new(settings.num_fetchers),
            objects: FxHashMap::default(),
            in_flight: FxHashSet::default(),
            queued: FxHashSet::default(),
            fetched: VecDeque::new(),
            pending_updates: Vec::new(),
            warned_over_capacity: false,
        }
    }

    /// Registers a paged object backed by `source`. Exceeding the pool's
    /// page count is allowed but thrashes; warned once.
    pub fn register_object(
        &mut self,
        tree: TreeId,
        source: Arc<ChunkSource>,
        header: ContainerHeader,
    ) {
        if self.objects.len() + 1 > self.table.page_count() && !self.warned_over_capacity {
            self.warned_over_capacity = true;
            log::warn!(
                "page cache over capacity: {} paged objects for {} pages; \
                 residency will thrash",
                self.objects.len() + 1,
                self.table.page_count()
            );
        }
        self.table
            .register_object(tree, header.chunks.len() as u32);
        self.objects.insert(tree, PagedObject { source, header });
    }

    /// Whether `tree` is a registered paged object.
    #[must_use]
    pub fn is_registered(&self, tree: TreeId) -> bool {
        self.objects.contains_key(&tree)
    }

    /// The parsed container header of a registered object.
    #[must_use]
    pub fn header(&self, tree: TreeId) -> Option<&ContainerHeader> {
        self.objects.get(&tree).map(|o| &o.header)
    }

    /// Unregisters an object and frees all its pages in the same call, so
    /// a dispose never leaves dangling references. Returns the freed
    /// pages.
    pub fn remove_object(&mut self, tree: TreeId) -> Vec<u32> {
        self.objects.remove(&tree);
        self.queued.retain(|(object, _)| *object != tree);
        self.fetched.retain(|chunk| chunk.tree != tree);
        self.pending_updates.retain(|update| update.tree != tree);
        self.table.remove_object(tree)
    }

    /// Refreshes LRU state from this frame's traversal: `referenced` are
    /// the chunks backing selected nodes (needed), `priority` the ranked
    /// wants (overflow). The previous frame's lists are discarded.
    pub fn frame_touch(&mut self, referenced: &[(TreeId, u32)], priority: &[(TreeId, u32)]) {
        self.table.begin_frame();
        self.table.touch_frame(referenced, priority);
    }

    /// Walks the priority list most-important first and dispatches fetches
    /// for entries that are neither resident, in flight, nor queued for
    /// upload, while fetcher slots remain.
    pub fn dispatch_fetches(&mut self, priority: &[(TreeId, u32)]) {
        for &(tree, chunk) in priority {
            if self.in_flight.len() >= self.fetchers.capacity() {
                break;
            }
            let Some(object) = self.objects.get(&tree) else {
                continue;
            };
            let key = (tree, chunk);
            if self.table.lookup(tree, chunk).is_some()
                || self.in_flight.contains(&key)
                || self.queued.contains(&key)
            {
                continue;
            }
            let Some(entry) = object.header.chunks.get(chunk as usize) else {
                log::warn!("priority list references chunk {chunk} past container directory");
                continue;
            };
            if self.fetchers.dispatch(FetchJob {
                tree,
                chunk,
                source: Arc::clone(&object.source),
                entry: *entry,
            }) {
                self.in_flight.insert(key);
            }
        }
    }

    /// Collects finished fetches into the promotion queue. Chunks whose
    /// object was disposed while the fetch was in flight are dropped.
    pub fn pump(&mut self) {
        for outcome in self.fetchers.drain_completed() {
            match outcome {
                FetchOutcome::Fetched(chunk) => {
                    self.in_flight.remove(&(chunk.tree, chunk.chunk));
                    if self.objects.contains_key(&chunk.tree) {
                        self.queued.insert((chunk.tree, chunk.chunk));
                        self.fetched.push_back(chunk);
                    } else {
                        log::debug!(
                            "dropping fetched chunk {} for disposed object",
                            chunk.chunk
                        );
                    }
                }
                FetchOutcome::Failed { tree, chunk } => {
                    self.in_flight.remove(&(tree, chunk));
                }
            }
        }
    }

    /// Promotes fetched chunks into pages in FIFO order. For each
    /// reclaimed page the eviction tree-update is emitted before the new
    /// residency update, so the registry never sees two chunks share a
    /// page.
    pub fn promote(&mut self) -> Vec<PageUpload> {
        let mut uploads = Vec::new();
        while let Some(chunk) = self.fetched.pop_front() {
            let Some((page, evicted)) = self.table.allocate(chunk.tree, chunk.chunk) else {
                self.fetched.push_front(chunk);
                break;
            };
            self.queued.remove(&(chunk.tree, chunk.chunk));

            if let Some((old_tree, old_chunk)) = evicted {
                self.pending_updates.push(TreeUpdate {
                    tree: old_tree,
                    page_base: 0,
                    chunk_base: old_chunk,
                    count: 1,
                    nodes: None,
                });
            }
            self.pending_updates.push(TreeUpdate {
                tree: chunk.tree,
                page_base: page,
                chunk_base: chunk.chunk,
                count: 1,
                nodes: Some(chunk.nodes),
            });
            uploads.push(PageUpload {
                page,
                tree: chunk.tree,
                chunk: chunk.chunk,
                payload: chunk.payload,
            });
        }
        uploads
    }

    /// Drains the tree updates accumulated by promotion; the render driver
    /// feeds them to the registry as one atomic batch.
    pub fn take_tree_updates(&mut self) -> Vec<TreeUpdate> {
        std::mem::take(&mut self.pending_updates)
    }

    /// Number of fetches currently in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether fetched chunks or tree updates are waiting to be consumed.
    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        !self.fetched.is_empty() || !self.pending_updates.is_empty()
    }

    /// Read access to the page table, for diagnostics and tests.
    #[must_use]
    pub fn table(&self) -> &PageTable {
        &self.table
    }

    /// Stops the fetcher pool. In-flight fetches complete and are
    /// discarded.
    pub fn dispose(&mut self) {
        self.fetchers.dispose();
    }
}
