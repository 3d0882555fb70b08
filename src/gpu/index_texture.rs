//! Per-accumulator index tables.
//!
//! Each accumulator owns one `R32Uint` texture holding the composed render
//! indices of every instance, concatenated at the instances' base offsets.
//! The table is rewritten whole on each composition; capacity growth
//! recreates the texture (doubling), like the engine's other dynamic GPU
//! buffers.

/// Texels per index-table row.
const INDEX_ROW_TEXELS: u32 = 4096;

/// One accumulator's composed index table.
pub struct IndexTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    capacity: u32,
    label: String,
}

impl IndexTexture {
    /// Creates a table with room for at least `capacity` indices.
    #[must_use]
    pub fn new(device: &wgpu::Device, label: &str, capacity: u32) -> Self {
        let capacity = capacity.max(INDEX_ROW_TEXELS);
        let (texture, view) = Self::create(device, label, capacity);
        Self {
            texture,
            view,
            capacity: rounded_capacity(capacity),
            label: label.to_string(),
        }
    }

    /// Bind view of the table.
    #[must_use]
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Current capacity in indices.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Rewrites the whole table, growing it first when `indices` exceeds
    /// the capacity.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, indices: &[u32]) {
        let needed = indices.len() as u32;
        if needed > self.capacity {
            let new_capacity = (self.capacity * 2).max(rounded_capacity(needed));
            log::info!(
                "expanding index table '{}': {} -> {new_capacity}",
                self.label,
                self.capacity
            );
            let (texture, view) = Self::create(device, &self.label, new_capacity);
            self.texture = texture;
            self.view = view;
            self.capacity = new_capacity;
        }
        if indices.is_empty() {
            return;
        }

        let rows = needed.div_ceil(INDEX_ROW_TEXELS);
        let mut data = bytemuck::cast_slice::<u32, u8>(indices).to_vec();
        data.resize((rows * INDEX_ROW_TEXELS * 4) as usize, 0);

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(INDEX_ROW_TEXELS * 4),
                rows_per_image: Some(rows),
            },
            wgpu::Extent3d {
                width: INDEX_ROW_TEXELS,
                height: rows,
                depth_or_array_layers: 1,
            },
        );
    }

    fn create(device: &wgpu::Device, label: &str, capacity: u32) -> (wgpu::Texture, wgpu::TextureView) {
        let capacity = rounded_capacity(capacity);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: INDEX_ROW_TEXELS,
                height: capacity / INDEX_ROW_TEXELS,
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

fn rounded_capacity(capacity: u32) -> u32 {
    capacity.div_ceil(INDEX_ROW_TEXELS) * INDEX_ROW_TEXELS
}
