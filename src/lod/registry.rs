//! LoD tree registry.
//!
//! Trees are owned here and addressed by opaque [`TreeId`] handles. A
//! handle is either *primary* (owns node storage) or *shared* (aliases a
//! primary, used when several scene instances render one paged container).
//! Shared handles hold an explicit reference count on their primary so
//! disposal is deterministic: a retired primary's payload survives until
//! its last shared handle is gone.

use std::time::Instant;

use slotmap::{SlotMap, new_key_type};

use super::tree::{LodNode, LodTree};
use crate::errors::{EngineError, Result};
use crate::format::{ContainerHeader, decode_chunk};

new_key_type! {
    /// Opaque handle to a registered LoD tree.
    pub struct TreeId;
}

/// One batched ranged write against a tree, covering the chunk range
/// `[chunk_base, chunk_base + count)`.
///
/// With `nodes` present, the chunks are populated and their residency set
/// to consecutive pages starting at `page_base`. Without `nodes`, the
/// range is an eviction: the chunks collapse to their parents.
#[derive(Debug, Clone)]
pub struct TreeUpdate {
    /// Target tree.
    pub tree: TreeId,
    /// First backing page for the range (ignored for evictions).
    pub page_base: u32,
    /// First chunk in the range.
    pub chunk_base: u32,
    /// Number of chunks in the range.
    pub count: u32,
    /// Node payload, concatenated per chunk in range order; `None` evicts.
    pub nodes: Option<Vec<LodNode>>,
}

enum TreeKind {
    Primary {
        tree: LodTree,
        /// Live shared handles aliasing this tree.
        refs: u32,
        /// Disposed while shares were outstanding; payload retained.
        retired: bool,
    },
    Shared {
        primary: TreeId,
    },
}

struct TreeEntry {
    kind: TreeKind,
    last_touch: Instant,
}

/// Storage and lifecycle for every registered LoD tree.
pub struct TreeRegistry {
    trees: SlotMap<TreeId, TreeEntry>,
}

impl Default for TreeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trees: SlotMap::with_key(),
        }
    }

    /// Number of live handles (primary and shared).
    #[must_use]
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    /// Whether no handles are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Whether `id` is a live handle.
    #[must_use]
    pub fn contains(&self, id: TreeId) -> bool {
        self.trees
            .get(id)
            .is_some_and(|entry| !matches!(entry.kind, TreeKind::Primary { retired: true, .. }))
    }

    /// Registers an empty in-memory tree with room for `capacity` nodes.
    pub fn new_tree(&mut self, capacity: u32) -> TreeId {
        self.trees.insert(TreeEntry {
            kind: TreeKind::Primary {
                tree: LodTree::with_capacity(capacity),
                refs: 0,
                retired: false,
            },
            last_touch: Instant::now(),
        })
    }

    /// Registers a paged tree shell from a parsed container header. Chunks
    /// are populated later by ranged updates as the cache fetches them.
    pub fn new_paged_tree(&mut self, header: &ContainerHeader) -> TreeId {
        let chunk_nodes = header
            .chunks
            .iter()
            .map(|c| c.node_base..c.node_base + c.node_count)
            .collect();
        self.trees.insert(TreeEntry {
            kind: TreeKind::Primary {
                tree: LodTree::with_chunks(chunk_nodes),
                refs: 0,
                retired: false,
            },
            last_touch: Instant::now(),
        })
    }

    /// Creates a shared handle aliasing `primary`'s payload.
    pub fn new_shared_tree(&mut self, primary: TreeId) -> Result<TreeId> {
        let root = self.primary_of(primary)?;
        match &mut self.trees[root].kind {
            TreeKind::Primary { refs, .. } => *refs += 1,
            TreeKind::Shared { .. } => unreachable!("primary_of returns primaries"),
        }
        Ok(self.trees.insert(TreeEntry {
            kind: TreeKind::Shared { primary: root },
            last_touch: Instant::now(),
        }))
    }

    /// Ingests a self-contained container blob: parses the header, builds
    /// the tree, populates every chunk present in the blob, and returns
    /// the handle plus the chunk-to-page assignment (identity for
    /// self-contained trees).
    pub fn init_tree(&mut self, n_splats: u64, blob: &[u8]) -> Result<(TreeId, Vec<u32>)> {
        let header = ContainerHeader::parse(blob)?;
        if header.num_splats != n_splats {
            return Err(EngineError::Format(format!(
                "container declares {} splats, caller expected {n_splats}",
                header.num_splats
            )));
        }

        let id = self.new_paged_tree(&header);
        let mut chunk_to_page = Vec::with_capacity(header.chunks.len());
        for (chunk_id, entry) in header.chunks.iter().enumerate() {
            let start = entry.offset as usize;
            let end = start + entry.byte_len as usize;
            let bytes = blob.get(start..end).ok_or_else(|| {
                EngineError::Format(format!("chunk {chunk_id} extends past blob"))
            })?;
            let decoded = decode_chunk(bytes)?;
            let page = chunk_id as u32;
            self.tree_mut(id)?
                .populate_chunk(decoded.chunk_id, page, &decoded.nodes)?;
            chunk_to_page.push(page);
        }
        Ok((id, chunk_to_page))
    }

    /// Releases `id`. Disposing a primary with outstanding shared handles
    /// retires it: the handle dies now, the payload when the last share
    /// does.
    pub fn dispose(&mut self, id: TreeId) -> Result<()> {
        enum Action {
            RemovePrimary,
            Retire,
            RemoveShared(TreeId),
        }

        let action = match &self.trees.get(id).ok_or(EngineError::UnknownTree)?.kind {
            TreeKind::Primary { retired: true, .. } => return Err(EngineError::UnknownTree),
            TreeKind::Primary { refs: 0, .. } => Action::RemovePrimary,
            TreeKind::Primary { .. } => Action::Retire,
            TreeKind::Shared { primary } => Action::RemoveShared(*primary),
        };

        match action {
            Action::RemovePrimary => {
                self.trees.remove(id);
            }
            Action::Retire => {
                if let TreeKind::Primary { retired, .. } = &mut self.trees[id].kind {
                    *retired = true;
                }
            }
            Action::RemoveShared(primary) => {
                self.trees.remove(id);
                if let Some(parent) = self.trees.get_mut(primary)
                    && let TreeKind::Primary { refs, retired, .. } = &mut parent.kind
                {
                    *refs -= 1;
                    if *refs == 0 && *retired {
                        self.trees.remove(primary);
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies a batch of ranged updates. The whole batch is validated
    /// before any range is applied, so a caller never observes a
    /// partially-applied batch.
    pub fn update_trees(&mut self, ranges: &[TreeUpdate]) -> Result<()> {
        for range in ranges {
            let tree = self.tree(range.tree)?;
            let end = range.chunk_base.checked_add(range.count).ok_or(
                EngineError::OutOfRange {
                    context: "range update",
                    chunk: range.chunk_base,
                    count: range.count,
                },
            )?;
            if end > tree.chunk_count() {
                return Err(EngineError::OutOfRange {
                    context: "range update past tree capacity",
                    chunk: range.chunk_base,
                    count: range.count,
                });
            }
            if let Some(nodes) = &range.nodes {
                let expected: u32 = (range.chunk_base..end)
                    .map(|c| {
                        let r = tree.chunk_range(c).expect("validated above");
                        r.end - r.start
                    })
                    .sum();
                if nodes.len() as u32 > expected {
                    return Err(EngineError::OutOfRange {
                        context: "node blob larger than chunk range",
                        chunk: range.chunk_base,
                        count: range.count,
                    });
                }
            }
        }

        for range in ranges {
            let tree = self.tree_mut(range.tree)?;
            match &range.nodes {
                Some(nodes) => {
                    let mut consumed = 0_usize;
                    for (i, chunk) in (range.chunk_base..range.chunk_base + range.count).enumerate()
                    {
                        let chunk_len = tree
                            .chunk_range(chunk)
                            .map(|r| (r.end - r.start) as usize)
                            .expect("validated above");
                        let take = chunk_len.min(nodes.len() - consumed);
                        tree.populate_chunk(
                            chunk,
                            range.page_base + i as u32,
                            &nodes[consumed..consumed + take],
                        )?;
                        consumed += take;
                    }
                }
                None => {
                    for chunk in range.chunk_base..range.chunk_base + range.count {
                        tree.collapse_chunk(chunk)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Node indices of every populated node at `level` (root is level 0).
    pub fn get_level(&self, id: TreeId, level: u8) -> Result<Vec<u32>> {
        Ok(self.tree(id)?.level_nodes(level))
    }

    /// Resolves a handle (following shared aliases) to its tree.
    pub fn tree(&self, id: TreeId) -> Result<&LodTree> {
        let root = self.primary_of(id)?;
        match &self.trees[root].kind {
            TreeKind::Primary { tree, .. } => Ok(tree),
            TreeKind::Shared { .. } => unreachable!("primary_of returns primaries"),
        }
    }

    /// Mutable variant of [`tree`](Self::tree).
    pub fn tree_mut(&mut self, id: TreeId) -> Result<&mut LodTree> {
        let root = self.primary_of(id)?;
        match &mut self.trees[root].kind {
            TreeKind::Primary { tree, .. } => Ok(tree),
            TreeKind::Shared { .. } => unreachable!("primary_of returns primaries"),
        }
    }

    /// Marks `id` as used now, deferring idle eviction.
    pub fn touch(&mut self, id: TreeId, now: Instant) {
        if let Some(entry) = self.trees.get_mut(id) {
            entry.last_touch = now;
        }
    }

    /// The least-recently-touched live handle idle for at least `timeout`.
    #[must_use]
    pub fn oldest_idle(&self, now: Instant, timeout: std::time::Duration) -> Option<TreeId> {
        self.trees
            .iter()
            .filter(|(_, entry)| {
                !matches!(entry.kind, TreeKind::Primary { retired: true, .. })
                    && now.saturating_duration_since(entry.last_touch) >= timeout
            })
            .min_by_key(|(_, entry)| entry.last_touch)
            .map(|(id, _)| id)
    }

    /// Live handles in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<TreeId> {
        self.trees
            .iter()
            .filter(|(_, entry)| !matches!(entry.kind, TreeKind::Primary { retired: true, .. }))
            .map(|(id, _)| id)
            .collect()
    }

    fn primary_of(&self, id: TreeId) -> Result<TreeId> {
        match &self.trees.get(id).ok_or(EngineError::UnknownTree)?.kind {
            TreeKind::Primary { retired, .. } => {
                if *retired {
                    Err(EngineError::UnknownTree)
                } else {
                    Ok(id)
                }
            }
            TreeKind::Shared { primary } => match self.trees.get(*primary) {
                Some(entry) if matches!(entry.kind, TreeKind::Primary { .. }) => Ok(*primary),
                _ => Err(EngineError::UnknownTree),
            },
        }
    }
}
