//! Engine Settings Configuration
//!
//! This module defines the single configuration object consumed at engine
//! construction time.
//!
//! # Example
//!
//! ```rust,ignore
//! use veil::settings::EngineSettings;
//!
//! let settings = EngineSettings {
//!     max_paged_splats: 4 * 1024 * 1024,
//!     num_fetchers: 3,
//!     lod_splat_scale: 1.5,
//!     ..Default::default()
//! };
//!
//! let engine = SplatEngine::new(settings)?;
//! ```

use crate::errors::{EngineError, Result};

/// Splats per cache page. Fixed; the container format, the GPU pool layout
/// and the page table all assume this granularity.
pub const PAGE_SIZE: u32 = 65_536;

/// Ordering-table capacities are rounded up to a multiple of this.
pub const ORDERING_ALIGN: usize = 16_384;

/// Rough device classes used to pick a default splat budget when
/// [`EngineSettings::lod_splat_count`] is not set explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceClass {
    /// Standalone / low-end head-mounted displays.
    MobileHmd,
    /// Phones and tablets.
    Mobile,
    /// Desktop and laptop GPUs.
    #[default]
    Desktop,
}

impl DeviceClass {
    /// Default global splat budget for this device class, before
    /// [`EngineSettings::lod_splat_scale`] is applied.
    #[must_use]
    pub fn default_splat_count(self) -> u32 {
        match self {
            Self::MobileHmd => 500_000,
            Self::Mobile => 1_000_000,
            Self::Desktop => 2_500_000,
        }
    }
}

/// Configuration options for the LoD engine.
///
/// # Fields
///
/// | Field | Description | Default |
/// |-------|-------------|---------|
/// | `max_paged_splats` | Page pool size in splats (multiple of [`PAGE_SIZE`]) | 4 Mi |
/// | `num_fetchers` | Parallel chunk fetch/decode workers | `3` |
/// | `max_sh` | Max spherical-harmonics level to retain (0..=3) | `3` |
/// | `device_class` | Device class for the default splat budget | `Desktop` |
/// | `lod_splat_count` | Explicit global target splat count | `None` (device default) |
/// | `lod_splat_scale` | Multiplier on the target splat count | `1.0` |
/// | `lod_render_scale` | Multiplier on the pixel scale (raises the acceptable minimum splat size) | `1.0` |
/// | `behind_foveate` | Foveation factor directly behind the viewer | `0.2` |
/// | `cone_fov0_deg` | Full-resolution cone angle (degrees) | `60.0` |
/// | `cone_fov_deg` | Outer foveation cone angle (degrees) | `110.0` |
/// | `cone_foveate` | Foveation factor at the outer cone | `0.6` |
/// | `min_sort_interval_ms` | Lower bound between depth-sort kicks | `0` |
/// | `dispose_timeout_ms` | Idle LoD tree eviction delay | `3000` |
/// | `enable_lod` | Master switch for LoD selection | `true` |
/// | `enable_drive_lod` | Whether this engine updates trees and cache (or merely consumes) | `true` |
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Page pool size in splats. Must be a positive multiple of
    /// [`PAGE_SIZE`]; the pool holds `max_paged_splats / PAGE_SIZE` pages.
    pub max_paged_splats: u32,

    /// Number of parallel fetch/decode workers feeding the page cache.
    pub num_fetchers: usize,

    /// Maximum spherical-harmonics level retained when paging splat data
    /// (0 disables directional color entirely).
    pub max_sh: u8,

    /// Device class used to derive the default splat budget.
    pub device_class: DeviceClass,

    /// Explicit global target splat count. When `None`, the device-class
    /// default is used.
    pub lod_splat_count: Option<u32>,

    /// Multiplier applied to the target splat count.
    pub lod_splat_scale: f32,

    /// Multiplier applied to the pixel scale; values above 1 raise the
    /// smallest splat size the traverser will select.
    pub lod_render_scale: f32,

    /// Foveation factor for directions behind the viewer.
    pub behind_foveate: f32,

    /// Cone angle (degrees) inside which detail is kept at full resolution.
    pub cone_fov0_deg: f32,

    /// Outer cone angle (degrees); between `cone_fov0_deg` and this the
    /// foveation factor falls from 1 to `cone_foveate`.
    pub cone_fov_deg: f32,

    /// Foveation factor at the edge of the outer cone.
    pub cone_foveate: f32,

    /// Lower bound between depth-sort kicks, in milliseconds.
    pub min_sort_interval_ms: u64,

    /// LoD trees untouched for this long are disposed.
    pub dispose_timeout_ms: u64,

    /// Master switch; when `false` no LoD selection runs and every object
    /// renders its full splat set.
    pub enable_lod: bool,

    /// Whether this engine drives tree/cache updates. A consumer-only
    /// engine (e.g. a secondary view) reads the registry but never mutates.
    pub enable_drive_lod: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_paged_splats: 64 * PAGE_SIZE,
            num_fetchers: 3,
            max_sh: 3,
            device_class: DeviceClass::Desktop,
            lod_splat_count: None,
            lod_splat_scale: 1.0,
            lod_render_scale: 1.0,
            behind_foveate: 0.2,
            cone_fov0_deg: 60.0,
            cone_fov_deg: 110.0,
            cone_foveate: 0.6,
            min_sort_interval_ms: 0,
            dispose_timeout_ms: 3_000,
            enable_lod: true,
            enable_drive_lod: true,
        }
    }
}

impl EngineSettings {
    /// Validates the configuration, returning a description of the first
    /// problem found.
    pub fn validate(&self) -> Result<()> {
        if self.max_paged_splats == 0 || !self.max_paged_splats.is_multiple_of(PAGE_SIZE) {
            return Err(EngineError::InvalidConfig(format!(
                "max_paged_splats must be a positive multiple of {PAGE_SIZE}, got {}",
                self.max_paged_splats
            )));
        }
        if self.num_fetchers == 0 {
            return Err(EngineError::InvalidConfig(
                "num_fetchers must be at least 1".to_string(),
            ));
        }
        if self.max_sh > 3 {
            return Err(EngineError::InvalidConfig(format!(
                "max_sh must be in 0..=3, got {}",
                self.max_sh
            )));
        }
        if !(self.cone_fov0_deg >= 0.0
            && self.cone_fov0_deg <= self.cone_fov_deg
            && self.cone_fov_deg <= 360.0)
        {
            return Err(EngineError::InvalidConfig(format!(
                "foveation cones must satisfy 0 <= cone_fov0 <= cone_fov <= 360, got {} / {}",
                self.cone_fov0_deg, self.cone_fov_deg
            )));
        }
        if self.behind_foveate <= 0.0 || self.cone_foveate <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "foveation factors must be positive".to_string(),
            ));
        }
        if self.lod_splat_scale <= 0.0 || self.lod_render_scale <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "lod_splat_scale and lod_render_scale must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The number of pages in the splat pool.
    #[must_use]
    pub fn page_count(&self) -> usize {
        (self.max_paged_splats / PAGE_SIZE) as usize
    }

    /// The effective global splat budget: the explicit count (or device
    /// default) scaled by `lod_splat_scale`.
    #[must_use]
    pub fn splat_budget(&self) -> u32 {
        let base = self
            .lod_splat_count
            .unwrap_or_else(|| self.device_class.default_splat_count());
        ((base as f32) * self.lod_splat_scale).max(1.0) as u32
    }
}
