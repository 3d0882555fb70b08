//! GPU boundary.
//!
//! Everything `wgpu` lives here: the splat record/SH pools, one index
//! table per accumulator, the ordering table, and the depth readback
//! plumbing. The render driver stays a pure state machine; this module
//! applies its per-frame [`FrameActions`] report to the device.

pub mod index_texture;
pub mod ordering;
pub mod pools;
pub mod readback;

pub use index_texture::IndexTexture;
pub use ordering::OrderingTexture;
pub use pools::SplatPools;
pub use readback::DepthReadback;

use crate::driver::{ACCUMULATOR_COUNT, AccumulatorSet, FrameActions};
use crate::splats::encoding::SplatEncoding;

/// GPU-side state for one engine.
pub struct EngineGpu {
    /// Paged splat record (and SH) pools.
    pub pools: SplatPools,
    /// One composed index table per accumulator slot.
    pub index_tables: [IndexTexture; ACCUMULATOR_COUNT],
    /// The back-to-front ordering table.
    pub ordering: OrderingTexture,
    /// Depth readback staging for the sort worker.
    pub readback: DepthReadback,
}

impl EngineGpu {
    /// Allocates GPU state: `page_count` pool pages of `encoding` records
    /// with SH retained up to `sh_level`.
    #[must_use]
    pub fn new(
        device: &wgpu::Device,
        page_count: u32,
        encoding: SplatEncoding,
        sh_level: u8,
    ) -> Self {
        Self {
            pools: SplatPools::new(device, page_count, encoding, sh_level),
            index_tables: std::array::from_fn(|i| {
                IndexTexture::new(device, &format!("SplatIndices{i}"), 0)
            }),
            ordering: OrderingTexture::new(device),
            readback: DepthReadback::new(device, 0),
        }
    }

    /// Applies one frame's report: page uploads first, then the recomposed
    /// index table, then the ordering — the same order the driver
    /// guarantees consistency for.
    pub fn apply_frame(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        actions: &FrameActions,
        accumulators: &AccumulatorSet,
    ) {
        for upload in &actions.page_uploads {
            self.pools.upload_page(queue, upload);
        }

        if let Some(slot) = actions.composed_slot {
            let accumulator = accumulators.get(slot);
            let mut indices = vec![0_u32; accumulator.active_count as usize];
            for instance in &accumulator.instances {
                let base = instance.base as usize;
                indices[base..base + instance.indices.len()].copy_from_slice(&instance.indices);
            }
            self.index_tables[slot].upload(device, queue, &indices);
        }

        if let Some(result) = &actions.ordering {
            self.ordering.upload(device, queue, result);
        }
    }
}
