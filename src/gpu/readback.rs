//! Asynchronous depth readback.
//!
//! Copies the current accumulator's depth target into a mappable buffer
//! and delivers the per-splat depth encodings to the driver once the map
//! completes. Between the copy and the worker's return the buffer is
//! exclusive to the readback; a new request while one is pending is
//! refused (the driver retries next frame).

use crate::settings::ORDERING_ALIGN;

/// Depth readback staging buffer plus completion plumbing.
pub struct DepthReadback {
    buffer: wgpu::Buffer,
    capacity: usize,
    pending: Option<u64>,
    completed: flume::Receiver<(u64, Vec<u32>)>,
    sender: flume::Sender<(u64, Vec<u32>)>,
}

impl DepthReadback {
    /// Creates a readback buffer for at least `capacity` splats.
    #[must_use]
    pub fn new(device: &wgpu::Device, capacity: usize) -> Self {
        let capacity = capacity.max(ORDERING_ALIGN);
        let (sender, completed) = flume::unbounded();
        Self {
            buffer: Self::create(device, capacity),
            capacity,
            pending: None,
            completed,
            sender,
        }
    }

    /// Whether a readback is in flight.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Encodes a copy of `depth` (an `R32Uint` texture of per-splat depth
    /// encodings) into the staging buffer. Returns `false` while an
    /// earlier readback is still in flight.
    pub fn request(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        depth: &wgpu::Texture,
        active: usize,
        mapping_version: u64,
    ) -> bool {
        if self.pending.is_some() {
            return false;
        }
        if active > self.capacity {
            let new_capacity = active.div_ceil(ORDERING_ALIGN) * ORDERING_ALIGN;
            log::info!(
                "expanding depth readback buffer: {} -> {new_capacity}",
                self.capacity
            );
            self.buffer = Self::create(device, new_capacity);
            self.capacity = new_capacity;
        }

        let size = depth.size();
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: depth,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(size.width * 4),
                    rows_per_image: Some(size.height),
                },
            },
            size,
        );
        self.pending = Some(mapping_version);
        true
    }

    /// Starts the asynchronous map. Call after submitting the encoder that
    /// carried the copy.
    pub fn begin_map(&mut self, active: usize) {
        let Some(version) = self.pending else {
            return;
        };
        let sender = self.sender.clone();
        let slice = self.buffer.slice(..(active.max(1) * 4) as u64);
        let buffer = self.buffer.clone();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            if result.is_err() {
                log::warn!("depth readback map failed");
                return;
            }
            let data = {
                let view = buffer.slice(..(active.max(1) * 4) as u64).get_mapped_range();
                bytemuck::cast_slice::<u8, u32>(&view).to_vec()
            };
            buffer.unmap();
            let _ = sender.send((version, data));
        });
    }

    /// Takes a completed readback, if one has landed.
    pub fn try_take(&mut self) -> Option<(u64, Vec<u32>)> {
        let completed = self.completed.try_recv().ok()?;
        self.pending = None;
        Some(completed)
    }

    fn create(device: &wgpu::Device, capacity: usize) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("DepthReadback"),
            size: (capacity * 4) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        })
    }
}
