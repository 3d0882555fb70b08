//! Back-to-front ordering table.
//!
//! The sorted permutation the rasterizer samples to draw splats in depth
//! order. Capacity only grows, in multiples of the ordering alignment;
//! growth recreates the texture, otherwise updates are in place. A version
//! counter ties the table's content to the mapping version it was sorted
//! for.

use crate::settings::ORDERING_ALIGN;
use crate::sorting::SortResult;

/// Texels per ordering row.
const ORDERING_ROW_TEXELS: u32 = 4096;

/// GPU ordering table plus its content version.
pub struct OrderingTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    capacity: u32,
    /// Mapping version the current content was sorted for.
    pub version: u64,
}

impl OrderingTexture {
    /// Creates a table with one alignment unit of capacity.
    #[must_use]
    pub fn new(device: &wgpu::Device) -> Self {
        let capacity = ORDERING_ALIGN as u32;
        let (texture, view) = Self::create(device, capacity);
        Self {
            texture,
            view,
            capacity,
            version: 0,
        }
    }

    /// Bind view of the table.
    #[must_use]
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Current capacity in indices; always a multiple of the alignment.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Uploads a finished sort. The buffer produced by the sort worker is
    /// already alignment-padded.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, result: &SortResult) {
        let needed = result.ordering.len() as u32;
        if needed > self.capacity {
            log::info!("expanding ordering table: {} -> {needed}", self.capacity);
            let (texture, view) = Self::create(device, needed);
            self.texture = texture;
            self.view = view;
            self.capacity = needed;
        }

        let rows = needed / ORDERING_ROW_TEXELS;
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&result.ordering),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(ORDERING_ROW_TEXELS * 4),
                rows_per_image: Some(rows),
            },
            wgpu::Extent3d {
                width: ORDERING_ROW_TEXELS,
                height: rows,
                depth_or_array_layers: 1,
            },
        );
        self.version = result.version;
    }

    fn create(device: &wgpu::Device, capacity: u32) -> (wgpu::Texture, wgpu::TextureView) {
        debug_assert!(capacity.is_multiple_of(ORDERING_ALIGN as u32));
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("SplatOrdering"),
            size: wgpu::Extent3d {
                width: ORDERING_ROW_TEXELS,
                height: capacity / ORDERING_ROW_TEXELS,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Uint,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }
}
