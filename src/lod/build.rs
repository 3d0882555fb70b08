//! LoD tree construction.
//!
//! Builds a downsampling hierarchy over a flat splat array by repeated
//! grid clustering: splats are ordered by feature size, and at each level
//! every grid cell of side `lod_base^level` merges its occupants into one
//! aggregate parent splat. Clustering continues until a single root
//! remains. The output node array is in breadth-first, root-first order
//! with each node's children contiguous.

use glam::{IVec3, Quat, Vec3};
use smallvec::SmallVec;

use super::tree::{LodNode, NO_NODE};
use crate::format::{ChunkEntry, ContainerHeader, encode_chunk};
use crate::format::header::FORMAT_VERSION;
use crate::settings::PAGE_SIZE;
use crate::splats::{Splat, encoding::SplatEncoding};

/// A built LoD hierarchy: nodes and their aggregate splats, parallel
/// arrays in root-first order.
#[derive(Debug, Clone)]
pub struct BuiltTree {
    /// Tree nodes, root at index 0.
    pub nodes: Vec<LodNode>,
    /// The splat rendered for each node (leaves are source splats).
    pub splats: Vec<Splat>,
}

impl BuiltTree {
    /// Number of source splats represented by the tree.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }
}

struct WorkNode {
    splat: Splat,
    radius: f32,
    children: SmallVec<[u32; 8]>,
}

/// Builds an LoD tree over `splats`. `lod_base` is the per-level cell
/// growth factor (2.0 is a good default); splats with zero opacity or
/// zero extent are dropped.
#[must_use]
pub fn build_lod_tree(splats: &[Splat], lod_base: f32) -> BuiltTree {
    let mut arena: Vec<WorkNode> = splats
        .iter()
        .filter(|s| s.opacity > 0.0 && s.max_scale() > 0.0)
        .map(|s| WorkNode {
            splat: *s,
            radius: s.max_scale(),
            children: SmallVec::new(),
        })
        .collect();

    if arena.is_empty() {
        return BuiltTree {
            nodes: Vec::new(),
            splats: Vec::new(),
        };
    }
    log::debug!("building LoD tree over {} splats", arena.len());

    // Process splats smallest-feature first so each level's frontier only
    // contains splats at or below that level's cell size.
    let mut order: Vec<u32> = (0..arena.len() as u32).collect();
    order.sort_unstable_by(|&a, &b| {
        arena[a as usize]
            .radius
            .total_cmp(&arena[b as usize].radius)
    });

    let initial = order.len();
    let mut level = arena[order[0] as usize].radius.log(lod_base).ceil() as i32;
    let mut frontier = 0;
    let mut active: Vec<u32> = Vec::new();
    let mut make_root = false;

    loop {
        let step = lod_base.powi(level);

        while frontier < initial {
            let index = order[frontier];
            if arena[index as usize].radius > step {
                break;
            }
            active.push(index);
            frontier += 1;
        }

        // Group members of the same grid cell together.
        let cell_of = |node: &WorkNode| -> IVec3 {
            (node.splat.center / step).floor().as_ivec3()
        };
        active.sort_by_key(|&i| {
            let cell = cell_of(&arena[i as usize]);
            (cell.x, cell.y, cell.z)
        });

        let mut next_active = Vec::new();
        let mut cell_count = 0;
        let mut grid_min = IVec3::MAX;
        let mut grid_max = IVec3::MIN;

        let mut start = 0;
        while start < active.len() {
            let cell = cell_of(&arena[active[start] as usize]);
            grid_min = grid_min.min(cell);
            grid_max = grid_max.max(cell);

            let mut end = start + 1;
            while end < active.len() {
                if !make_root && cell_of(&arena[active[end] as usize]) != cell {
                    break;
                }
                end += 1;
            }
            cell_count += 1;

            if end - start > 1 {
                let children: SmallVec<[u32; 8]> = active[start..end].iter().copied().collect();
                let merged = merge_children(&arena, &children);
                arena.push(merged);
                next_active.push(arena.len() as u32 - 1);
            } else {
                next_active.push(active[start]);
            }
            start = end;
        }

        active = next_active;
        level += 1;

        if frontier < initial {
            continue;
        }
        if cell_count == 1 {
            break;
        }
        // Once everything shares one neighborhood, force a single root on
        // the next pass instead of shrinking cells forever.
        if (grid_max - grid_min).max_element() <= 1 {
            make_root = true;
        }
    }

    debug_assert_eq!(active.len(), 1);
    flatten(&arena, active[0])
}

fn merge_children(arena: &[WorkNode], children: &[u32]) -> WorkNode {
    let mut weight_sum = 0.0_f32;
    let mut center = Vec3::ZERO;
    let mut color = [0.0_f32; 3];
    let mut opacity = 0.0_f32;

    for &child in children {
        let splat = &arena[child as usize].splat;
        let w = splat.opacity.max(1e-4);
        weight_sum += w;
        center += splat.center * w;
        for (acc, c) in color.iter_mut().zip(splat.color) {
            *acc += c * w;
        }
        opacity += splat.opacity;
    }
    center /= weight_sum;
    for c in &mut color {
        *c /= weight_sum;
    }
    opacity = (opacity / children.len() as f32).min(1.0);

    let radius = children
        .iter()
        .map(|&child| {
            let node = &arena[child as usize];
            node.splat.center.distance(center) + node.radius
        })
        .fold(0.0_f32, f32::max);

    WorkNode {
        splat: Splat {
            center,
            log_scales: Vec3::splat(radius.max(1e-12).ln()),
            rotation: Quat::IDENTITY,
            color,
            opacity,
        },
        radius,
        children: children.iter().copied().collect(),
    }
}

/// Lays the arena out breadth-first from the root so children are
/// contiguous and levels increase away from index 0.
fn flatten(arena: &[WorkNode], root: u32) -> BuiltTree {
    let mut nodes = Vec::with_capacity(arena.len());
    let mut splats = Vec::with_capacity(arena.len());

    // (arena index, parent final index, level)
    let mut queue = std::collections::VecDeque::new();
    queue.push_back((root, NO_NODE, 0_u8));

    while let Some((arena_index, parent, level)) = queue.pop_front() {
        let work = &arena[arena_index as usize];
        let final_index = nodes.len() as u32;
        nodes.push(LodNode {
            center: work.splat.center,
            radius: work.radius,
            parent,
            first_child: NO_NODE,
            child_count: 0,
            level,
            flags: 0,
        });
        splats.push(work.splat);

        if parent != NO_NODE {
            let entry = &mut nodes[parent as usize];
            if entry.first_child == NO_NODE {
                entry.first_child = final_index;
            }
            entry.child_count += 1;
        }
        for &child in &work.children {
            queue.push_back((child, final_index, level + 1));
        }
    }

    // Each node enqueues its children consecutively, so final child
    // indices are contiguous per parent.
    #[cfg(debug_assertions)]
    for node in &nodes {
        if node.first_child != NO_NODE {
            for offset in 0..u32::from(node.child_count) {
                debug_assert_eq!(
                    nodes[(node.first_child + offset) as usize].parent,
                    nodes[node.first_child as usize].parent,
                );
            }
        }
    }

    BuiltTree { nodes, splats }
}

/// Serializes a built tree into a streamable container: nodes are split
/// into page-sized chunks in index order, each chunk carrying its encoded
/// splat payload.
#[must_use]
pub fn write_container(tree: &BuiltTree, encoding: SplatEncoding) -> Vec<u8> {
    let mut entries = Vec::new();
    let mut chunks = Vec::new();

    let mut base = 0_usize;
    let mut chunk_id = 0_u32;
    while base < tree.nodes.len() {
        let end = (base + PAGE_SIZE as usize).min(tree.nodes.len());
        let nodes = &tree.nodes[base..end];

        let record_size = encoding.bytes_per_splat();
        let mut payload = vec![0_u8; nodes.len() * record_size];
        for (i, splat) in tree.splats[base..end].iter().enumerate() {
            encoding.encode_into(splat, &mut payload[i * record_size..(i + 1) * record_size]);
        }

        chunks.push(encode_chunk(chunk_id, nodes, &payload));
        entries.push(ChunkEntry {
            offset: 0, // fixed up below once the header size is known
            byte_len: chunks.last().unwrap().len() as u32,
            node_base: base as u32,
            node_count: nodes.len() as u32,
        });

        base = end;
        chunk_id += 1;
    }

    let mut header = ContainerHeader {
        version: FORMAT_VERSION,
        encoding,
        sh_level: 0,
        page_size: PAGE_SIZE,
        num_splats: tree.nodes.len() as u64,
        chunks: entries,
    };
    let mut offset = header.byte_size() as u64;
    for entry in &mut header.chunks {
        entry.offset = offset;
        offset += u64::from(entry.byte_len);
    }

    let mut out = header.write();
    for chunk in chunks {
        out.extend_from_slice(&chunk);
    }
    out
}
