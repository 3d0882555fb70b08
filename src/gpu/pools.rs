//! GPU splat pool.
//!
//! The pool is an array texture with one layer per cache page; a fetched
//! chunk's encoded records are written into its page's layer. Compact
//! records occupy one `Rgba32Uint` texel each, extended records two, so a
//! 65 536-splat page is a 256x256 (or 512x256) layer. The spherical-
//! harmonics pool is a second array texture holding each page's packed SH
//! words at a fixed per-splat stride.

use crate::cache::PageUpload;
use crate::settings::PAGE_SIZE;
use crate::splats::encoding::SplatEncoding;
use crate::splats::sh;

/// Texels per pool row.
const POOL_ROW_TEXELS: u32 = 256;

/// GPU-resident splat record and SH pools.
pub struct SplatPools {
    records: wgpu::Texture,
    record_view: wgpu::TextureView,
    sh: Option<(wgpu::Texture, wgpu::TextureView)>,
    encoding: SplatEncoding,
    sh_level: u8,
    layer_bytes: usize,
    page_count: u32,
}

impl SplatPools {
    /// Allocates pools for `page_count` pages of the given encoding.
    #[must_use]
    pub fn new(
        device: &wgpu::Device,
        page_count: u32,
        encoding: SplatEncoding,
        sh_level: u8,
    ) -> Self {
        let texels_per_splat = (encoding.bytes_per_splat() / 16) as u32;
        let width = POOL_ROW_TEXELS * texels_per_splat;
        let height = PAGE_SIZE / POOL_ROW_TEXELS;

        let records = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("SplatPool"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: page_count,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Uint,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let record_view = records.create_view(&wgpu::TextureViewDescriptor::default());

        let sh = (sh_level > 0).then(|| {
            let stride = sh::words_per_splat(sh_level) as u32;
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("SplatShPool"),
                size: wgpu::Extent3d {
                    width: POOL_ROW_TEXELS * stride,
                    height,
                    depth_or_array_layers: page_count,
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
        });

        Self {
            records,
            record_view,
            sh,
            encoding,
            sh_level,
            layer_bytes: PAGE_SIZE as usize * encoding.bytes_per_splat(),
            page_count,
        }
    }

    /// The record encoding the pool stores.
    #[must_use]
    pub fn encoding(&self) -> SplatEncoding {
        self.encoding
    }

    /// SH level retained in the pool.
    #[must_use]
    pub fn sh_level(&self) -> u8 {
        self.sh_level
    }

    /// Number of page layers.
    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Bind view of the record pool.
    #[must_use]
    pub fn record_view(&self) -> &wgpu::TextureView {
        &self.record_view
    }

    /// Bind view of the SH pool, when SH data is retained.
    #[must_use]
    pub fn sh_view(&self) -> Option<&wgpu::TextureView> {
        self.sh.as_ref().map(|(_, view)| view)
    }

    /// Writes one fetched chunk's records into its page layer. Short
    /// payloads (a partial final chunk) are zero-padded to the layer.
    pub fn upload_page(&self, queue: &wgpu::Queue, upload: &PageUpload) {
        debug_assert!(upload.page < self.page_count);

        let mut data = upload.payload.clone();
        data.resize(self.layer_bytes, 0);

        let size = self.records.size();
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.records,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: upload.page,
                },
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(size.width * 16),
                rows_per_image: Some(size.height),
            },
            wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Writes one page's packed SH words.
    pub fn upload_page_sh(&self, queue: &wgpu::Queue, page: u32, words: &[u32]) {
        let Some((texture, _)) = &self.sh else {
            return;
        };
        let size = texture.size();
        let mut data = bytemuck::cast_slice::<u32, u8>(words).to_vec();
        data.resize((size.width * size.height * 4) as usize, 0);

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: page },
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(size.width * 4),
                rows_per_image: Some(size.height),
            },
            wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );
    }
}
