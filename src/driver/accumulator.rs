//! Splat accumulators.
//!
//! An accumulator is one composed frame's worth of state: which splats
//! from which objects feed the rasterizer, at which slots. Three rotate so
//! composition, depth sorting, and display are decoupled — exactly one is
//! *displayed*, at most one is *current* (composed, awaiting its sort),
//! and the rest are free.
//!
//! The *mapping version* counts changes to the composed index mapping;
//! two accumulators with equal mapping versions render the same splats in
//! the same slots, so a sort ordering computed for one is valid for the
//! other. The *composition version* counts every compose, equal mapping
//! or not.

use crate::lod::TreeId;

/// Number of rotating accumulators.
pub const ACCUMULATOR_COUNT: usize = 3;

/// One instance's slice of the composed splat set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedInstance {
    /// The instance's tree handle.
    pub tree: TreeId,
    /// Offset of this instance's splats within the composed set.
    pub base: u32,
    /// Render indices (pool slots) of the selected splats.
    pub indices: Vec<u32>,
}

/// One composed splat set.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    /// Mapping version; equality across accumulators means the sort
    /// ordering transfers.
    pub mapping_version: u64,
    /// Monotone compose counter.
    pub composition_version: u64,
    /// Total composed splat count.
    pub active_count: u32,
    /// Per-instance index tables, in compose order.
    pub instances: Vec<ComposedInstance>,
}

impl Accumulator {
    fn same_mapping(&self, instances: &[ComposedInstance]) -> bool {
        self.instances == instances
    }
}

/// Rotation state over the three accumulators.
pub struct AccumulatorSet {
    accumulators: [Accumulator; ACCUMULATOR_COUNT],
    displayed: Option<usize>,
    current: Option<usize>,
    /// Whether a sort has been dispatched for the current accumulator. A
    /// later composition may only take the current slot once this is set;
    /// until then it queues behind the pending one.
    current_sort_begun: bool,
    free: Vec<usize>,
    next_mapping: u64,
    next_composition: u64,
}

impl Default for AccumulatorSet {
    fn default() -> Self {
        Self::new()
    }
}

impl AccumulatorSet {
    /// Creates the set with all three accumulators free.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accumulators: Default::default(),
            displayed: None,
            current: None,
            current_sort_begun: false,
            free: (0..ACCUMULATOR_COUNT).rev().collect(),
            next_mapping: 0,
            next_composition: 0,
        }
    }

    /// Pops a free accumulator slot, if one is available.
    pub fn pop_free(&mut self) -> Option<usize> {
        self.free.pop()
    }

    /// Returns a popped slot unused.
    pub fn release(&mut self, slot: usize) {
        debug_assert!(Some(slot) != self.displayed && Some(slot) != self.current);
        self.free.push(slot);
    }

    /// Composes `instances` into `slot`. The mapping version is inherited
    /// from the displayed accumulator when the mapping is unchanged, and
    /// advanced otherwise. Returns whether the mapping changed.
    pub fn compose(&mut self, slot: usize, instances: Vec<ComposedInstance>) -> bool {
        self.next_composition += 1;
        let mapping_changed = !self
            .displayed
            .is_some_and(|d| self.accumulators[d].same_mapping(&instances));
        let mapping_version = if mapping_changed {
            self.next_mapping += 1;
            self.next_mapping
        } else {
            self.accumulators[self.displayed.expect("unchanged implies displayed")].mapping_version
        };

        let active_count = instances.iter().map(|i| i.indices.len() as u32).sum();
        self.accumulators[slot] = Accumulator {
            mapping_version,
            composition_version: self.next_composition,
            active_count,
            instances,
        };
        mapping_changed
    }

    /// Whether composing `instances` would change the displayed mapping.
    #[must_use]
    pub fn would_change_mapping(&self, instances: &[ComposedInstance]) -> bool {
        !self
            .displayed
            .is_some_and(|d| self.accumulators[d].same_mapping(instances))
    }

    /// Whether a new sort-needing composition may take the current slot:
    /// either no accumulator is sort-pending, or the pending one's sort
    /// has already begun (its late result is recognized as stale by
    /// version). While neither holds, later compositions queue.
    #[must_use]
    pub fn can_replace_current(&self) -> bool {
        self.current.is_none() || self.current_sort_begun
    }

    /// Records that a sort was dispatched for the current accumulator.
    pub fn mark_current_sort_begun(&mut self) {
        if self.current.is_some() {
            self.current_sort_begun = true;
        }
    }

    /// Marks `slot` as the current (composed, sort-pending) accumulator.
    /// Callers must check [`can_replace_current`](Self::can_replace_current)
    /// first; a previous current — whose sort has begun by that contract —
    /// goes back to the free list, and its result is discarded as stale
    /// when it lands.
    pub fn set_current(&mut self, slot: usize) {
        debug_assert!(self.can_replace_current() || self.current == Some(slot));
        if let Some(previous) = self.current.replace(slot)
            && previous != slot
        {
            self.free.push(previous);
        }
        self.current_sort_begun = false;
    }

    /// Swaps the displayed accumulator to `slot`, freeing the old one.
    pub fn swap_displayed(&mut self, slot: usize) {
        if self.current == Some(slot) {
            self.current = None;
            self.current_sort_begun = false;
        }
        if let Some(old) = self.displayed.replace(slot)
            && old != slot
        {
            self.free.push(old);
        }
    }

    /// The displayed accumulator, if any.
    #[must_use]
    pub fn displayed(&self) -> Option<&Accumulator> {
        self.displayed.map(|d| &self.accumulators[d])
    }

    /// Index of the displayed accumulator.
    #[must_use]
    pub fn displayed_slot(&self) -> Option<usize> {
        self.displayed
    }

    /// The current (sort-pending) accumulator, if any.
    #[must_use]
    pub fn current(&self) -> Option<&Accumulator> {
        self.current.map(|c| &self.accumulators[c])
    }

    /// Index of the current accumulator.
    #[must_use]
    pub fn current_slot(&self) -> Option<usize> {
        self.current
    }

    /// Accumulator state at `slot`.
    #[must_use]
    pub fn get(&self, slot: usize) -> &Accumulator {
        &self.accumulators[slot]
    }
}
