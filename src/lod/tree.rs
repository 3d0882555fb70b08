//! LoD tree storage.
//!
//! A tree is a hierarchical downsampling of one object's splats: leaves are
//! source splats, interior nodes are aggregate splats standing in for their
//! subtree. Nodes live in a flat array in root-first order; a node's
//! children occupy a contiguous index range.
//!
//! Node storage is chunked: each chunk covers a contiguous node range and
//! is the atomic unit of streaming residency. In-memory trees use a single
//! implicit chunk per page-sized block and are always fully resident;
//! paged trees populate chunks as the cache fetches them.

use std::ops::Range;

use glam::Vec3;

use crate::errors::{EngineError, Result};
use crate::settings::PAGE_SIZE;

/// Sentinel for "no node" in parent/child links.
pub const NO_NODE: u32 = u32::MAX;

/// One LoD tree node. Interior nodes are aggregate splats; leaves map
/// one-to-one onto source splats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodNode {
    /// Splat center in object space.
    pub center: Vec3,
    /// Intrinsic radius (largest standard deviation of the represented
    /// splat set).
    pub radius: f32,
    /// Parent node index, or [`NO_NODE`] for the root.
    pub parent: u32,
    /// First child node index, or [`NO_NODE`] for leaves.
    pub first_child: u32,
    /// Number of contiguous children starting at `first_child`.
    pub child_count: u16,
    /// Depth from the root (root is 0).
    pub level: u8,
    /// Reserved per-node flags.
    pub flags: u8,
}

impl LodNode {
    /// Whether this node is a leaf (a source splat).
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.first_child == NO_NODE || self.child_count == 0
    }
}

impl Default for LodNode {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            radius: 0.0,
            parent: NO_NODE,
            first_child: NO_NODE,
            child_count: 0,
            level: 0,
            flags: 0,
        }
    }
}

/// Chunked node storage for one LoD tree.
#[derive(Debug, Clone)]
pub struct LodTree {
    nodes: Vec<LodNode>,
    /// Node index range covered by each chunk.
    chunk_nodes: Vec<Range<u32>>,
    /// Page currently backing each chunk; `None` while not resident.
    chunk_pages: Vec<Option<u32>>,
    /// Number of nodes actually written into each chunk.
    chunk_filled: Vec<u32>,
    /// Number of levels (0 for an empty tree; root-only is 1).
    levels: u8,
}

impl LodTree {
    /// Creates an in-memory tree with room for `capacity` nodes, divided
    /// into implicit page-sized chunks. All chunks start non-resident;
    /// ranged updates populate them.
    #[must_use]
    pub fn with_capacity(capacity: u32) -> Self {
        let mut chunk_nodes = Vec::new();
        let mut base = 0;
        while base < capacity {
            let end = (base + PAGE_SIZE).min(capacity);
            chunk_nodes.push(base..end);
            base = end;
        }
        let chunk_count = chunk_nodes.len();
        Self {
            nodes: vec![LodNode::default(); capacity as usize],
            chunk_nodes,
            chunk_pages: vec![None; chunk_count],
            chunk_filled: vec![0; chunk_count],
            levels: 0,
        }
    }

    /// Creates a paged tree from an explicit chunk directory. Total node
    /// capacity is the end of the last chunk's range.
    #[must_use]
    pub fn with_chunks(chunk_nodes: Vec<Range<u32>>) -> Self {
        let capacity = chunk_nodes.last().map_or(0, |r| r.end);
        let chunk_count = chunk_nodes.len();
        Self {
            nodes: vec![LodNode::default(); capacity as usize],
            chunk_nodes,
            chunk_pages: vec![None; chunk_count],
            chunk_filled: vec![0; chunk_count],
            levels: 0,
        }
    }

    /// Total node capacity.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Number of chunks in the directory.
    #[must_use]
    pub fn chunk_count(&self) -> u32 {
        self.chunk_nodes.len() as u32
    }

    /// The node index range covered by `chunk`.
    #[must_use]
    pub fn chunk_range(&self, chunk: u32) -> Option<Range<u32>> {
        self.chunk_nodes.get(chunk as usize).cloned()
    }

    /// The chunk covering node `index`. Chunks are contiguous and sorted,
    /// so this is a binary search.
    #[must_use]
    pub fn chunk_of_node(&self, index: u32) -> u32 {
        self.chunk_nodes
            .partition_point(|range| range.end <= index)
            .min(self.chunk_nodes.len().saturating_sub(1)) as u32
    }

    /// The page backing `chunk`, if resident.
    #[must_use]
    pub fn chunk_page(&self, chunk: u32) -> Option<u32> {
        self.chunk_pages.get(chunk as usize).copied().flatten()
    }

    /// Whether `chunk` is populated and resident.
    #[must_use]
    pub fn is_chunk_resident(&self, chunk: u32) -> bool {
        self.chunk_page(chunk).is_some()
    }

    /// The root node, present iff the tree has splats and its root chunk
    /// is resident.
    #[must_use]
    pub fn root(&self) -> Option<&LodNode> {
        (self.is_chunk_resident(0) && !self.nodes.is_empty()).then(|| &self.nodes[0])
    }

    /// Node accessor; `None` for out-of-capacity indices.
    #[must_use]
    pub fn node(&self, index: u32) -> Option<&LodNode> {
        self.nodes.get(index as usize)
    }

    /// Number of levels in the populated tree.
    #[must_use]
    pub fn levels(&self) -> u8 {
        self.levels
    }

    /// Writes `nodes` into `chunk` and records its backing page. The blob
    /// must match the chunk's node range exactly.
    pub fn populate_chunk(&mut self, chunk: u32, page: u32, nodes: &[LodNode]) -> Result<()> {
        let range = self
            .chunk_range(chunk)
            .ok_or(EngineError::OutOfRange {
                context: "populate chunk",
                chunk,
                count: 1,
            })?;
        let len = (range.end - range.start) as usize;
        if nodes.len() > len {
            return Err(EngineError::OutOfRange {
                context: "chunk node blob larger than chunk",
                chunk,
                count: 1,
            });
        }
        let base = range.start as usize;
        self.nodes[base..base + nodes.len()].copy_from_slice(nodes);
        self.chunk_pages[chunk as usize] = Some(page);
        self.chunk_filled[chunk as usize] = nodes.len() as u32;
        for node in nodes {
            self.levels = self.levels.max(node.level + 1);
        }
        Ok(())
    }

    /// Marks `chunk` non-resident. Its nodes keep their last payload but
    /// no longer contribute to traversal; parents whose children live in
    /// the chunk gate at the boundary.
    pub fn collapse_chunk(&mut self, chunk: u32) -> Result<()> {
        if chunk as usize >= self.chunk_pages.len() {
            return Err(EngineError::OutOfRange {
                context: "collapse chunk",
                chunk,
                count: 1,
            });
        }
        self.chunk_pages[chunk as usize] = None;
        Ok(())
    }

    /// Render index of node `index`: the splat slot the rasterizer samples,
    /// derived from the backing page of the node's chunk.
    #[must_use]
    pub fn render_index(&self, index: u32) -> Option<u32> {
        let chunk = self.chunk_of_node(index);
        let range = self.chunk_range(chunk)?;
        let page = self.chunk_page(chunk)?;
        Some(page * PAGE_SIZE + (index - range.start))
    }

    /// Number of nodes written into `chunk`.
    #[must_use]
    pub fn chunk_filled(&self, chunk: u32) -> u32 {
        self.chunk_filled.get(chunk as usize).copied().unwrap_or(0)
    }

    /// Indices of every populated node at tree level `level` (root is
    /// level 0), in index order.
    #[must_use]
    pub fn level_nodes(&self, level: u8) -> Vec<u32> {
        let mut out = Vec::new();
        for (chunk, range) in self.chunk_nodes.iter().enumerate() {
            if self.chunk_pages[chunk].is_none() {
                continue;
            }
            let filled = range.start + self.chunk_filled[chunk];
            for index in range.start..filled {
                if self.nodes[index as usize].level == level {
                    out.push(index);
                }
            }
        }
        out
    }
}
