//! Splat Model and Packed Encodings
//!
//! A splat is one 3D Gaussian primitive: center, covariance expressed as
//! log-scales plus a rotation, color, opacity, and optional
//! spherical-harmonic coefficients for view-dependent color.
//!
//! Two packed wire encodings coexist (see [`encoding`]): a 16-byte compact
//! record used by paged containers and the GPU pool, and a 32-byte extended
//! record with full-precision centers. Spherical-harmonic coefficients are
//! packed separately at 4 bytes per coefficient (see [`sh`]).

pub mod container;
pub mod encoding;
pub mod sh;

pub use container::SplatContainer;
pub use encoding::{COMPACT_SPLAT_SIZE, EXTENDED_SPLAT_SIZE, SplatEncoding};

use glam::{Quat, Vec3};

/// One decoded Gaussian splat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Splat {
    /// Gaussian center in object space.
    pub center: Vec3,
    /// Natural log of the per-axis standard deviations.
    pub log_scales: Vec3,
    /// Orientation of the scale axes.
    pub rotation: Quat,
    /// Base (view-independent) linear RGB color.
    pub color: [f32; 3],
    /// Opacity in `[0, 1]`.
    pub opacity: f32,
}

impl Splat {
    /// The largest per-axis standard deviation, used as the splat's
    /// intrinsic radius for LoD decisions.
    #[must_use]
    pub fn max_scale(&self) -> f32 {
        self.log_scales.max_element().exp()
    }
}

impl Default for Splat {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            log_scales: Vec3::splat(-f32::INFINITY),
            rotation: Quat::IDENTITY,
            color: [0.0; 3],
            opacity: 0.0,
        }
    }
}
