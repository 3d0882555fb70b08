//! Render driver.
//!
//! The single orchestrator of the engine: owns the tree registry, the page
//! cache, the sort worker, and the rotating accumulators, and is the only
//! mutator of any of them. Workers (fetchers, the sorter) only append to
//! completion queues that the driver drains here, on its thread.
//!
//! The driver is a pure state machine: each [`frame`](RenderDriver::frame)
//! consumes scene inputs and returns a [`FrameActions`] report describing
//! the GPU work to apply (page uploads, index table rewrites, ordering
//! upload, display swap). The `gpu` module consumes that report.
//!
//! Display guarantees:
//! - the displayed accumulator never changes mid-frame; swaps happen only
//!   inside `frame`;
//! - a composed set with a new mapping is displayed only after a sort for
//!   that exact mapping version lands;
//! - a composed set whose mapping matches the displayed one swaps
//!   immediately and reuses the existing ordering.

pub mod accumulator;

pub use accumulator::{ACCUMULATOR_COUNT, Accumulator, AccumulatorSet, ComposedInstance};

use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::{Mat4, Vec3};
use rustc_hash::FxHashMap;

use crate::cache::{PageUpload, SplatPageCache};
use crate::errors::{EngineError, Result};
use crate::format::{ChunkSource, ContainerHeader};
use crate::lod::{
    Foveation, TraversalInstance, TraversalParams, TreeId, TreeRegistry, traverse,
};
use crate::settings::EngineSettings;
use crate::sorting::{SortRequest, SortResult, SortWorker};

/// Camera movement below this does not retrigger composition.
const EPS_POS: f32 = 1e-4;
/// Camera rotation tolerance: recompose when `dot(new, old) < 1 - EPS_DIR`.
const EPS_DIR: f32 = 1e-5;

/// Per-frame camera state.
#[derive(Debug, Clone, Copy)]
pub struct ViewState {
    /// Camera position in world space.
    pub position: Vec3,
    /// Unit view direction.
    pub direction: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    /// Render target height in pixels.
    pub render_height: u32,
}

impl ViewState {
    /// Normalized pixel scale of this view:
    /// `2 * tan(fov_y / 2) / render_height`.
    #[must_use]
    pub fn pixel_scale(&self) -> f32 {
        2.0 * (self.fov_y * 0.5).tan() / (self.render_height.max(1) as f32)
    }
}

/// How a scene object's splat data is backed.
#[derive(Clone)]
pub enum ObjectBacking {
    /// A self-contained container blob, ingested whole on first sight.
    Container(Arc<Vec<u8>>),
    /// A streamed container, paged through the cache on demand.
    Paged {
        /// Byte source for ranged chunk fetches.
        source: Arc<ChunkSource>,
        /// The container's parsed header.
        header: Arc<ContainerHeader>,
    },
}

/// One visible splat object for this frame.
#[derive(Clone)]
pub struct SceneObject {
    /// Stable caller-chosen object id.
    pub id: u64,
    /// Column-major transform from view space to object space.
    pub view_to_object: Mat4,
    /// Per-instance LoD bias.
    pub lod_scale: f32,
    /// Per-instance foveation override; engine settings apply when `None`.
    pub foveation: Option<Foveation>,
    /// Backing data, used the first time the object is seen.
    pub backing: ObjectBacking,
}

/// Inputs to one driver frame.
pub struct FrameInputs<'a> {
    /// Frame timestamp, used for touch tracking and idle eviction.
    pub now: Instant,
    /// Camera state.
    pub view: ViewState,
    /// Visible objects, in draw order.
    pub objects: &'a [SceneObject],
    /// A completed asynchronous depth readback tagged with the mapping
    /// version of the accumulator it was read from.
    pub depth_readback: Option<(u64, Vec<u32>)>,
    /// Auto-driven mode: frames with no view or composition change (and no
    /// streaming or sorting in progress) return without work.
    pub auto: bool,
}

/// GPU work produced by one driver frame.
#[derive(Default)]
pub struct FrameActions {
    /// Fetched chunk payloads to write into pool pages.
    pub page_uploads: Vec<PageUpload>,
    /// Accumulator slot whose per-instance index tables were recomposed
    /// and need re-upload.
    pub composed_slot: Option<usize>,
    /// A finished sort to upload into the ordering texture.
    pub ordering: Option<SortResult>,
    /// Whether the displayed accumulator changed this frame.
    pub swapped: bool,
    /// The accumulator slot now displayed.
    pub displayed_slot: Option<usize>,
    /// Active splat count of the displayed set.
    pub active_count: u32,
}

/// The per-frame orchestrator. See the module docs.
pub struct RenderDriver {
    settings: EngineSettings,
    registry: TreeRegistry,
    cache: SplatPageCache,
    sorter: SortWorker,
    accumulators: AccumulatorSet,
    /// Object id → tree handle for every object the driver has seen.
    lod_ids: FxHashMap<u64, TreeId>,
    /// Container identity (source pointer) → primary tree, so several
    /// objects over one paged container share a payload.
    container_primaries: FxHashMap<usize, TreeId>,
    /// Last traversal's render indices per object (last-known-good).
    last_selection: FxHashMap<u64, Vec<u32>>,
    last_view: Option<(Vec3, Vec3)>,
    last_pixel_limit: f32,
    sort_dirty: bool,
    disposed: bool,
}

impl RenderDriver {
    /// Creates the driver and starts its workers. Fails on invalid
    /// configuration.
    pub fn new(settings: EngineSettings) -> Result<Self> {
        settings.validate()?;
        let cache = SplatPageCache::new(&settings);
        let sorter = SortWorker::new(Duration::from_millis(settings.min_sort_interval_ms));
        Ok(Self {
            settings,
            registry: TreeRegistry::new(),
            cache,
            sorter,
            accumulators: AccumulatorSet::new(),
            lod_ids: FxHashMap::default(),
            container_primaries: FxHashMap::default(),
            last_selection: FxHashMap::default(),
            last_view: None,
            last_pixel_limit: 0.0,
            sort_dirty: false,
            disposed: false,
        })
    }

    /// Runs one frame. See the module docs for the step order.
    pub fn frame(&mut self, inputs: &FrameInputs<'_>) -> Result<FrameActions> {
        if self.disposed {
            return Err(EngineError::Disposed("render driver"));
        }

        let mut actions = FrameActions {
            displayed_slot: self.accumulators.displayed_slot(),
            active_count: self.accumulators.displayed().map_or(0, |a| a.active_count),
            ..FrameActions::default()
        };

        // 1-3. Accumulator rotation, gating, composition. The composition
        // is compared against the most recent one (the sort-pending
        // current if there is one, else the displayed set) so a stable
        // scene does not mint new mapping versions every frame.
        let composed = self.compose_instances(inputs.objects);
        let view_changed = self.view_changed(&inputs.view);
        let latest = self.accumulators.current().or(self.accumulators.displayed());
        let composition_changed = match latest {
            Some(accumulator) => accumulator.instances != composed,
            None => !composed.is_empty(),
        };
        let streaming = self.cache.in_flight_count() > 0 || self.cache.has_pending_work();
        let sorting = self.sort_dirty || self.sorter.is_sorting() || self.sorter.has_result();

        if inputs.auto && !view_changed && !composition_changed && !streaming && !sorting {
            return Ok(actions);
        }
        self.last_view = Some((inputs.view.position, inputs.view.direction));

        // A composition that needs a new sort queues behind a current
        // accumulator whose sort has not begun yet; it never supersedes
        // it. Compositions that match the displayed mapping bypass the
        // queue — they reuse the existing ordering and swap immediately.
        let may_compose = self.accumulators.can_replace_current()
            || !self.accumulators.would_change_mapping(&composed);
        if composition_changed
            && may_compose
            && let Some(slot) = self.accumulators.pop_free()
        {
            let mapping_changed = self.accumulators.compose(slot, composed);
            actions.composed_slot = Some(slot);
            if mapping_changed {
                self.accumulators.set_current(slot);
                self.sort_dirty = true;
            } else {
                // Same mapping as displayed: the existing ordering remains
                // valid, swap right away.
                self.accumulators.swap_displayed(slot);
                actions.swapped = true;
            }
        }

        // 4. LoD drive.
        if self.settings.enable_drive_lod {
            self.sync_objects(inputs.objects, inputs.now);
            self.apply_pending_tree_updates();
            if self.settings.enable_lod {
                self.run_traversal(inputs);
            } else {
                self.select_everything(inputs.objects);
            }
            self.cache.pump();
            actions.page_uploads = self.cache.promote();
        }

        // 5. Sort drive.
        if let Some((version, depth)) = &inputs.depth_readback
            && self.sort_dirty
            && !self.sorter.is_sorting()
            && let Some(current) = self.accumulators.current()
            && current.mapping_version == *version
        {
            let request = SortRequest {
                active: current.active_count as usize,
                depth: depth.clone(),
                version: *version,
            };
            if self.sorter.request(request).is_ok() {
                self.sort_dirty = false;
                self.accumulators.mark_current_sort_begun();
            }
        }
        while let Some(result) = self.sorter.try_result() {
            let Some(slot) = self.accumulators.current_slot() else {
                continue;
            };
            if self.accumulators.get(slot).mapping_version == result.version {
                self.accumulators.swap_displayed(slot);
                actions.ordering = Some(result);
                actions.swapped = true;
            } else {
                log::trace!("discarding stale sort result v{}", result.version);
            }
        }

        // 6. Idle eviction, one tree per frame.
        let timeout = Duration::from_millis(self.settings.dispose_timeout_ms);
        if let Some(stale) = self.registry.oldest_idle(inputs.now, timeout) {
            log::debug!("disposing idle LoD tree");
            self.dispose_tree(stale);
        }

        actions.displayed_slot = self.accumulators.displayed_slot();
        actions.active_count = self.accumulators.displayed().map_or(0, |a| a.active_count);
        Ok(actions)
    }

    /// Disposes a tree handle: cache pages return to the free list and the
    /// registry entry is released in the same call.
    pub fn dispose_tree(&mut self, id: TreeId) {
        let freed = self.cache.remove_object(id);
        if !freed.is_empty() {
            log::debug!("freed {} cache pages on tree dispose", freed.len());
        }
        if self.registry.dispose(id).is_err() {
            log::debug!("disposed an already-dead tree handle");
        }
        self.lod_ids.retain(|_, tree| *tree != id);
        self.container_primaries.retain(|_, tree| *tree != id);
    }

    /// Tears down workers. Further frames fail with `Disposed`.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.sorter.dispose();
        self.cache.dispose();
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The engine settings this driver was built with.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Read access to the tree registry.
    #[must_use]
    pub fn registry(&self) -> &TreeRegistry {
        &self.registry
    }

    /// Read access to the page cache.
    #[must_use]
    pub fn cache(&self) -> &SplatPageCache {
        &self.cache
    }

    /// Accumulator rotation state.
    #[must_use]
    pub fn accumulators(&self) -> &AccumulatorSet {
        &self.accumulators
    }

    /// The tree handle assigned to a scene object id, if any.
    #[must_use]
    pub fn tree_of(&self, object: u64) -> Option<TreeId> {
        self.lod_ids.get(&object).copied()
    }

    /// Last converged traversal threshold.
    #[must_use]
    pub fn last_pixel_limit(&self) -> f32 {
        self.last_pixel_limit
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn view_changed(&self, view: &ViewState) -> bool {
        let Some((pos, dir)) = self.last_view else {
            return true;
        };
        view.position.distance(pos) > EPS_POS || view.direction.dot(dir) < 1.0 - EPS_DIR
    }

    /// Builds this frame's composition from the previous traversal's
    /// selection (objects with no selection yet contribute nothing).
    fn compose_instances(&self, objects: &[SceneObject]) -> Vec<ComposedInstance> {
        let mut instances = Vec::new();
        let mut base = 0_u32;
        for object in objects {
            let Some(tree) = self.lod_ids.get(&object.id) else {
                continue;
            };
            let Some(indices) = self.last_selection.get(&object.id) else {
                continue;
            };
            if indices.is_empty() {
                continue;
            }
            instances.push(ComposedInstance {
                tree: *tree,
                base,
                indices: indices.clone(),
            });
            base += indices.len() as u32;
        }
        instances
    }

    /// Registers any object not seen before and touches every visible
    /// object's tree.
    fn sync_objects(&mut self, objects: &[SceneObject], now: Instant) {
        for object in objects {
            if !self.lod_ids.contains_key(&object.id) {
                match self.register_object(object) {
                    Ok(tree) => {
                        self.lod_ids.insert(object.id, tree);
                    }
                    Err(err) => {
                        log::warn!("failed to register splat object {}: {err}", object.id);
                        continue;
                    }
                }
            }
            if let Some(tree) = self.lod_ids.get(&object.id) {
                self.registry.touch(*tree, now);
            }
        }
    }

    fn register_object(&mut self, object: &SceneObject) -> Result<TreeId> {
        match &object.backing {
            ObjectBacking::Container(blob) => {
                let header = ContainerHeader::parse(blob)?;
                let (tree, _pages) = self.registry.init_tree(header.num_splats, blob)?;
                Ok(tree)
            }
            ObjectBacking::Paged { source, header } => {
                let key = Arc::as_ptr(source) as usize;
                if let Some(primary) = self.container_primaries.get(&key) {
                    self.registry.new_shared_tree(*primary)
                } else {
                    let tree = self.registry.new_paged_tree(header);
                    self.cache
                        .register_object(tree, Arc::clone(source), (**header).clone());
                    self.container_primaries.insert(key, tree);
                    Ok(tree)
                }
            }
        }
    }

    fn apply_pending_tree_updates(&mut self) {
        let mut updates = self.cache.take_tree_updates();
        // A chunk can land for a tree disposed while its fetch was in
        // flight; those ranges are dropped.
        updates.retain(|update| self.registry.contains(update.tree));
        if updates.is_empty() {
            return;
        }
        if let Err(err) = self.registry.update_trees(&updates) {
            log::warn!("dropping tree update batch: {err}");
        }
    }

    /// With LoD selection off, every object renders every resident splat.
    fn select_everything(&mut self, objects: &[SceneObject]) {
        for object in objects {
            let Some(tree) = self.lod_ids.get(&object.id) else {
                continue;
            };
            let Ok(tree) = self.registry.tree(*tree) else {
                continue;
            };
            let mut indices = Vec::new();
            for chunk in 0..tree.chunk_count() {
                if let (Some(page), Some(range)) = (tree.chunk_page(chunk), tree.chunk_range(chunk))
                {
                    let base = page * crate::settings::PAGE_SIZE;
                    indices.extend(base..base + (range.end - range.start).min(tree.chunk_filled(chunk)));
                }
            }
            self.last_selection.insert(object.id, indices);
        }
    }

    fn run_traversal(&mut self, inputs: &FrameInputs<'_>) {
        let default_foveation = Foveation::new(
            self.settings.cone_fov0_deg,
            self.settings.cone_fov_deg,
            self.settings.cone_foveate,
            self.settings.behind_foveate,
        );

        let mut ids = Vec::new();
        let mut instances = Vec::new();
        for object in inputs.objects {
            let Some(tree) = self.lod_ids.get(&object.id) else {
                continue;
            };
            ids.push(object.id);
            instances.push(TraversalInstance {
                tree: *tree,
                view_to_object: object.view_to_object,
                lod_scale: object.lod_scale,
                foveation: object.foveation.unwrap_or(default_foveation),
            });
        }

        let params = TraversalParams {
            max_splats: self.settings.splat_budget(),
            pixel_scale: inputs.view.pixel_scale() * self.settings.lod_render_scale,
            pixel_scale_limit: 0.0,
            last_pixel_limit: self.last_pixel_limit,
        };

        match traverse(&self.registry, &params, &instances) {
            Ok(output) => {
                self.last_pixel_limit = output.pixel_limit;
                for (object, selection) in ids.iter().zip(&output.instances) {
                    let tree = self.registry.tree(selection.tree);
                    let indices = match tree {
                        Ok(tree) => selection
                            .indices
                            .iter()
                            .filter_map(|&node| tree.render_index(node))
                            .collect(),
                        Err(_) => Vec::new(),
                    };
                    self.last_selection.insert(*object, indices);
                }
                self.cache.frame_touch(&output.referenced, &output.priority);
                self.cache.dispatch_fetches(&output.priority);
            }
            Err(err) => {
                // Recover locally: the previous selection keeps rendering.
                log::warn!("traversal failed, keeping last selection: {err}");
            }
        }
    }
}

impl Drop for RenderDriver {
    fn drop(&mut self) {
        self.dispose();
    }
}
