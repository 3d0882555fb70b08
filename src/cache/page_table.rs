//! Page pool bookkeeping.
//!
//! A pure logical structure that does not hold GPU resources; it only
//! manages page indices, residency maps and LRU state. The pool is a fixed
//! set of equally-sized pages; each resident page maps to exactly one
//! `(object, chunk)` and the forward (object → chunk → page) and reverse
//! (page → object, chunk) tables mirror each other at all times.
//!
//! Eviction order: pages not marked needed by the latest traversal are
//! candidates, least-recently-touched first.

use rustc_hash::FxHashMap;

use crate::lod::TreeId;

/// One page's reverse-map entry.
#[derive(Debug, Clone, Copy)]
struct PageSlot {
    /// The `(object, chunk)` resident in this page, if any.
    resident: Option<(TreeId, u32)>,
    /// Monotone LRU tick of the last touch.
    last_touch: u64,
    /// Needed by the most recent traversal; exempt from eviction.
    needed: bool,
}

/// Fixed-capacity page pool state.
pub struct PageTable {
    slots: Vec<PageSlot>,
    free: Vec<u32>,
    /// Forward map: object → chunk → page.
    forward: FxHashMap<TreeId, Vec<Option<u32>>>,
    /// Eviction candidates in LRU order (oldest first), recomputed each
    /// frame after touches.
    freeable: Vec<u32>,
    clock: u64,
}

impl PageTable {
    /// Creates a pool of `page_count` empty pages.
    #[must_use]
    pub fn new(page_count: usize) -> Self {
        Self {
            slots: vec![
                PageSlot {
                    resident: None,
                    last_touch: 0,
                    needed: false,
                };
                page_count
            ],
            // Pop from the back, so lower page indices allocate first.
            free: (0..page_count as u32).rev().collect(),
            forward: FxHashMap::default(),
            freeable: Vec::new(),
            clock: 0,
        }
    }

    /// Total page count `P`.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.slots.len()
    }

    /// Pages currently unmapped.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Pages currently mapped.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.slots.iter().filter(|s| s.resident.is_some()).count()
    }

    /// Number of registered paged objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.forward.len()
    }

    /// Registers a paged object with `chunk_count` chunks.
    pub fn register_object(&mut self, object: TreeId, chunk_count: u32) {
        self.forward
            .entry(object)
            .or_insert_with(|| vec![None; chunk_count as usize]);
    }

    /// Removes an object, returning every page it occupied to the free
    /// list. Returns the freed pages.
    pub fn remove_object(&mut self, object: TreeId) -> Vec<u32> {
        let Some(chunks) = self.forward.remove(&object) else {
            return Vec::new();
        };
        let mut freed = Vec::new();
        for page in chunks.into_iter().flatten() {
            let slot = &mut self.slots[page as usize];
            debug_assert!(matches!(slot.resident, Some((o, _)) if o == object));
            slot.resident = None;
            slot.needed = false;
            self.free.push(page);
            freed.push(page);
        }
        self.freeable.retain(|page| !freed.contains(page));
        freed
    }

    /// The page holding `(object, chunk)`, if resident.
    #[must_use]
    pub fn lookup(&self, object: TreeId, chunk: u32) -> Option<u32> {
        self.forward
            .get(&object)
            .and_then(|chunks| chunks.get(chunk as usize))
            .copied()
            .flatten()
    }

    /// The `(object, chunk)` resident in `page`, if any.
    #[must_use]
    pub fn reverse_lookup(&self, page: u32) -> Option<(TreeId, u32)> {
        self.slots.get(page as usize).and_then(|s| s.resident)
    }

    /// Starts a frame: clears needed marks from the previous traversal.
    pub fn begin_frame(&mut self) {
        for slot in &mut self.slots {
            slot.needed = false;
        }
        self.freeable.clear();
    }

    /// Applies a traversal's page use: `needed` are the chunks backing
    /// selected nodes, `overflow` the chunks referenced beyond the budget.
    /// Both are touched in reverse priority order so the most important
    /// entry carries the freshest timestamp, then the eviction queue is
    /// recomputed over everything left untouched.
    pub fn touch_frame(&mut self, needed: &[(TreeId, u32)], overflow: &[(TreeId, u32)]) {
        for &(object, chunk) in overflow.iter().rev() {
            if let Some(page) = self.lookup(object, chunk) {
                self.clock += 1;
                self.slots[page as usize].last_touch = self.clock;
            }
        }
        for &(object, chunk) in needed.iter().rev() {
            if let Some(page) = self.lookup(object, chunk) {
                self.clock += 1;
                let slot = &mut self.slots[page as usize];
                slot.last_touch = self.clock;
                slot.needed = true;
            }
        }

        self.freeable = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.resident.is_some() && !slot.needed)
            .map(|(page, _)| page as u32)
            .collect();
        self.freeable
            .sort_by_key(|&page| self.slots[page as usize].last_touch);
    }

    /// Allocates a page for `(object, chunk)`: free list first, then the
    /// least-recently-used evictable page. In the over-capacity regime
    /// (no free page and everything needed) the globally
    /// least-recently-touched page is reclaimed anyway — this is what
    /// thrashes, and since needed pages are touched in reverse priority
    /// order the victim is always the least important resident.
    ///
    /// Returns the page and, when one was reclaimed, the evicted mapping.
    /// `None` only for an empty pool.
    pub fn allocate(&mut self, object: TreeId, chunk: u32) -> Option<(u32, Option<(TreeId, u32)>)> {
        debug_assert!(self.lookup(object, chunk).is_none(), "chunk already resident");

        let page = if let Some(page) = self.free.pop() {
            page
        } else if self.freeable.is_empty() {
            self.slots
                .iter()
                .enumerate()
                .min_by_key(|(_, slot)| slot.last_touch)
                .map(|(page, _)| page as u32)?
        } else {
            self.freeable.remove(0)
        };

        let evicted = self.slots[page as usize].resident;
        if let Some((old_object, old_chunk)) = evicted
            && let Some(chunks) = self.forward.get_mut(&old_object)
        {
            chunks[old_chunk as usize] = None;
        }

        self.clock += 1;
        self.slots[page as usize] = PageSlot {
            resident: Some((object, chunk)),
            last_touch: self.clock,
            needed: true,
        };
        let chunks = self
            .forward
            .get_mut(&object)
            .expect("allocate target object is registered");
        chunks[chunk as usize] = Some(page);
        Some((page, evicted))
    }

    /// Verifies the pool invariants; used by tests and debug assertions.
    #[must_use]
    pub fn check_consistency(&self) -> bool {
        if self.free_count() + self.resident_count() != self.page_count() {
            return false;
        }
        for page in &self.free {
            if self.slots[*page as usize].resident.is_some() {
                return false;
            }
        }
        for (page, slot) in self.slots.iter().enumerate() {
            if let Some((object, chunk)) = slot.resident
                && self.lookup(object, chunk) != Some(page as u32)
            {
                return false;
            }
        }
        for (object, chunks) in &self.forward {
            for (chunk, page) in chunks.iter().enumerate() {
                if let Some(page) = page
                    && self.reverse_lookup(*page) != Some((*object, chunk as u32))
                {
                    return false;
                }
            }
        }
        true
    }
}
