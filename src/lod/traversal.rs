//! Multi-tree traversal.
//!
//! Given a global splat budget and per-instance view transforms, selects a
//! cut through the forest of registered LoD trees: the set of nodes whose
//! parent projects larger than a single global threshold `tau` while they
//! themselves stop expansion (too small, a leaf, or gated on a chunk that
//! is not resident). Using one `tau` across every tree normalizes detail
//! between objects — the budget flows to whatever projects largest on
//! screen, foveation included.
//!
//! `tau` is found by bisection over the monotone node count, warm-started
//! from the previous frame's threshold. Gated expansions are recorded as a
//! ranked priority list of `(tree, chunk)` wants, which the page cache
//! uses to decide what to fetch next.

use glam::{Mat4, Vec3};
use rustc_hash::FxHashMap;

use super::foveation::Foveation;
use super::registry::{TreeId, TreeRegistry};
use super::tree::LodTree;
use crate::errors::{EngineError, Result};

/// Hard cap on bisection iterations.
pub const BISECTION_MAX_ITERS: usize = 32;

/// The bisection accepts any cut within `[BUDGET_TOLERANCE * B, B]`.
pub const BUDGET_TOLERANCE: f32 = 0.95;

/// Minimum forward distance used in the projection denominator.
const DEPTH_EPS: f32 = 1e-6;

/// Priority scale for missing root chunks; divided by viewer distance so
/// closer objects bootstrap first, and large enough to outrank any
/// ordinary gated expansion.
const ROOT_PRIORITY: f32 = 1e30;

/// Global traversal inputs for one frame.
#[derive(Debug, Clone, Copy)]
pub struct TraversalParams {
    /// Global splat budget across all instances.
    pub max_splats: u32,
    /// World of normalized pixel units: `2 * tan(fov_y / 2) / render_height`,
    /// already multiplied by any render-scale option.
    pub pixel_scale: f32,
    /// Smallest acceptable projected splat radius in normalized pixel
    /// units; zero disables the floor.
    pub pixel_scale_limit: f32,
    /// Previous frame's threshold, used to warm-start the bisection.
    pub last_pixel_limit: f32,
}

/// One rendered instance of a tree.
#[derive(Debug, Clone, Copy)]
pub struct TraversalInstance {
    /// The instance's LoD tree (primary or shared handle).
    pub tree: TreeId,
    /// Column-major transform from view space to object space.
    pub view_to_object: Mat4,
    /// Extra LoD bias for this instance; larger keeps more detail.
    pub lod_scale: f32,
    /// Foveation shape for this instance's view.
    pub foveation: Foveation,
}

/// Node selection for one instance.
#[derive(Debug, Clone)]
pub struct InstanceSelection {
    /// The instance's tree handle, as passed in.
    pub tree: TreeId,
    /// Selected node indices, in traversal order.
    pub indices: Vec<u32>,
}

impl InstanceSelection {
    /// Number of splats this instance renders.
    #[must_use]
    pub fn n_splats(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// Everything a traversal produces.
#[derive(Debug, Clone)]
pub struct TraversalOutput {
    /// Per-instance selections, in input order.
    pub instances: Vec<InstanceSelection>,
    /// Chunks backing the selected nodes, most important first.
    pub referenced: Vec<(TreeId, u32)>,
    /// Chunks that would raise detail if fetched, most important first.
    pub priority: Vec<(TreeId, u32)>,
    /// The converged threshold, for warm-starting the next frame.
    pub pixel_limit: f32,
}

struct PreparedInstance<'a> {
    tree_id: TreeId,
    tree: &'a LodTree,
    cam_pos: Vec3,
    view_dir: Vec3,
    lod_scale: f32,
    foveation: Foveation,
    /// Viewer distance to the object origin, for root bootstrap ordering.
    distance: f32,
}

impl PreparedInstance<'_> {
    fn r_scaled(&self, center: Vec3, radius: f32, pixel_scale: f32) -> f32 {
        let to_node = center - self.cam_pos;
        let depth = to_node.dot(self.view_dir).max(DEPTH_EPS);
        let dir = to_node.normalize_or(self.view_dir);
        let fov = self.foveation.factor(dir, self.view_dir);
        radius * self.lod_scale / depth * fov / pixel_scale
    }
}

/// Runs the multi-tree traversal. See the module docs for the selection
/// policy; fails with [`EngineError::UnknownTree`] for a dead handle and
/// [`EngineError::DegenerateProjection`] for a non-finite transform.
pub fn traverse(
    registry: &TreeRegistry,
    params: &TraversalParams,
    instances: &[TraversalInstance],
) -> Result<TraversalOutput> {
    let pixel_scale = params.pixel_scale.max(1e-12);

    let mut prepared = Vec::with_capacity(instances.len());
    for instance in instances {
        let m = instance.view_to_object;
        if !m.is_finite() {
            return Err(EngineError::DegenerateProjection);
        }
        let cam_pos = m.transform_point3(Vec3::ZERO);
        let view_dir = m.transform_vector3(Vec3::NEG_Z);
        let view_dir = if view_dir.length_squared() > 1e-12 {
            view_dir.normalize()
        } else {
            return Err(EngineError::DegenerateProjection);
        };
        prepared.push(PreparedInstance {
            tree_id: instance.tree,
            tree: registry.tree(instance.tree)?,
            cam_pos,
            view_dir,
            lod_scale: instance.lod_scale,
            foveation: instance.foveation,
            distance: cam_pos.length(),
        });
    }

    let budget = params.max_splats as usize;
    let floor = params.pixel_scale_limit.max(0.0);
    let lo_target = ((budget as f32) * BUDGET_TOLERANCE).ceil() as usize;

    // Bisection over the monotone count(tau), warm-started from the
    // previous frame. `lo` brackets from below (count over budget), `hi`
    // from above (count within budget).
    let mut tau = if params.last_pixel_limit > 0.0 {
        params.last_pixel_limit
    } else {
        1.0
    };
    let mut lo: Option<f32> = None;
    let mut hi: Option<f32> = None;
    let mut best: Option<(f32, usize)> = None;

    for _ in 0..BISECTION_MAX_ITERS {
        let count: usize = prepared
            .iter()
            .map(|inst| walk_instance(inst, tau, floor, pixel_scale, &mut |_| {}, &mut |_, _| {}))
            .sum();

        if count <= budget {
            if best.is_none_or(|(_, c)| count > c) {
                best = Some((tau, count));
            }
            if count >= lo_target {
                break;
            }
            hi = Some(tau);
            tau = match lo {
                Some(l) => 0.5 * (l + tau),
                None => tau * 0.5,
            };
        } else {
            lo = Some(tau);
            tau = match hi {
                Some(h) => 0.5 * (tau + h),
                None => tau * 2.0,
            };
        }
        if !(1e-12..=1e12).contains(&tau) {
            break;
        }
    }
    let tau = best.map_or(tau, |(t, _)| t);

    // Final pass with the converged threshold: collect selections, the
    // chunks they reference, and the gated wants.
    let mut selections = Vec::with_capacity(prepared.len());
    let mut referenced: FxHashMap<(TreeId, u32), f32> = FxHashMap::default();
    let mut wants: FxHashMap<(TreeId, u32), f32> = FxHashMap::default();

    for inst in &prepared {
        let mut indices = Vec::new();
        walk_instance(
            inst,
            tau,
            floor,
            pixel_scale,
            &mut |(index, score)| {
                indices.push(index);
                let chunk = inst.tree.chunk_of_node(index);
                let entry = referenced.entry((inst.tree_id, chunk)).or_insert(0.0);
                *entry = entry.max(score);
            },
            &mut |chunk, score| {
                let entry = wants.entry((inst.tree_id, chunk)).or_insert(0.0);
                *entry = entry.max(score);
            },
        );
        selections.push(InstanceSelection {
            tree: inst.tree_id,
            indices,
        });
    }

    // A cut can exceed the budget when even the coarsest one does (more
    // visible roots than budget); trim the tail so the bound always holds.
    let mut total: usize = selections.iter().map(|s| s.indices.len()).sum();
    if total > budget {
        log::debug!("trimming traversal cut: {total} selected for budget {budget}");
        for selection in selections.iter_mut().rev() {
            if total <= budget {
                break;
            }
            let excess = (total - budget).min(selection.indices.len());
            selection.indices.truncate(selection.indices.len() - excess);
            total -= excess;
        }
    }

    Ok(TraversalOutput {
        instances: selections,
        referenced: ranked(referenced),
        priority: ranked(wants),
        pixel_limit: tau,
    })
}

/// Sorts a score map into a most-important-first list. The sort is stable
/// on the (tree, chunk) key so equal scores order deterministically.
fn ranked(map: FxHashMap<(TreeId, u32), f32>) -> Vec<(TreeId, u32)> {
    let mut entries: Vec<_> = map.into_iter().collect();
    entries.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    entries.into_iter().map(|(key, _)| key).collect()
}

/// Walks one instance's tree at threshold `tau`, invoking `on_select` for
/// every cut node (with its projected size) and `on_gate` for every
/// missing chunk blocking an expansion. Returns the number of selected
/// nodes.
fn walk_instance(
    inst: &PreparedInstance<'_>,
    tau: f32,
    floor: f32,
    pixel_scale: f32,
    on_select: &mut dyn FnMut((u32, f32)),
    on_gate: &mut dyn FnMut(u32, f32),
) -> usize {
    let tree = inst.tree;
    if tree.root().is_none() {
        // Until the root chunk is resident the object contributes nothing;
        // ask for chunk 0, nearer objects first.
        if tree.capacity() > 0 {
            on_gate(0, ROOT_PRIORITY / inst.distance.max(1e-3));
        }
        return 0;
    }

    let mut count = 0;
    let mut stack = vec![0_u32];
    while let Some(index) = stack.pop() {
        let Some(node) = tree.node(index) else {
            continue;
        };
        let score = inst.r_scaled(node.center, node.radius, pixel_scale);

        if !node.is_leaf() && score >= tau {
            let first = node.first_child;
            let last = first + u32::from(node.child_count) - 1;
            let mut resident = true;
            for chunk in tree.chunk_of_node(first)..=tree.chunk_of_node(last) {
                if !tree.is_chunk_resident(chunk) {
                    resident = false;
                    on_gate(chunk, score);
                }
            }
            if resident {
                // Reverse push keeps depth-first, index-ascending order.
                for child in (first..=last).rev() {
                    stack.push(child);
                }
                continue;
            }
            // Expansion gated on a fetch: render this node meanwhile.
        }

        if score >= floor {
            count += 1;
            on_select((index, score));
        }
    }
    count
}
