//! Level-of-detail trees: storage, construction, registry, and the
//! multi-tree traversal that picks each frame's working set.

pub mod build;
pub mod foveation;
pub mod registry;
pub mod traversal;
pub mod tree;

pub use build::{BuiltTree, build_lod_tree, write_container};
pub use foveation::Foveation;
pub use registry::{TreeId, TreeRegistry, TreeUpdate};
pub use traversal::{
    InstanceSelection, TraversalInstance, TraversalOutput, TraversalParams, traverse,
};
pub use tree::{LodNode, LodTree, NO_NODE};
