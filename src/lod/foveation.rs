//! Foveation weighting.
//!
//! Detail is concentrated along the view axis: directions inside the inner
//! cone keep full resolution, directions between the inner and outer cone
//! fall off toward `cone_foveate`, and directions beyond the outer cone
//! fall off further toward `behind_foveate` directly behind the viewer.
//!
//! # Falloff shape
//!
//! Both falloff segments use the cubic Hermite smoothstep
//! `t * t * (3 - 2 * t)`: continuous, flat at both segment ends, and cheap
//! enough to evaluate per tree node during traversal.

use glam::Vec3;

/// Per-instance foveation shape, angles stored as half-angles in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Foveation {
    half_fov0: f32,
    half_fov: f32,
    cone_foveate: f32,
    behind_foveate: f32,
}

impl Foveation {
    /// Builds a foveation shape from cone angles in degrees.
    #[must_use]
    pub fn new(cone_fov0_deg: f32, cone_fov_deg: f32, cone_foveate: f32, behind_foveate: f32) -> Self {
        Self {
            half_fov0: (cone_fov0_deg.to_radians() * 0.5).clamp(0.0, std::f32::consts::PI),
            half_fov: (cone_fov_deg.to_radians() * 0.5).clamp(0.0, std::f32::consts::PI),
            cone_foveate,
            behind_foveate,
        }
    }

    /// A shape that weighs every direction at 1 (foveation disabled).
    #[must_use]
    pub fn uniform() -> Self {
        Self {
            half_fov0: std::f32::consts::PI,
            half_fov: std::f32::consts::PI,
            cone_foveate: 1.0,
            behind_foveate: 1.0,
        }
    }

    /// Weighting factor for a direction at `angle` radians off the view
    /// axis. Always positive.
    #[must_use]
    pub fn factor_at_angle(&self, angle: f32) -> f32 {
        if angle <= self.half_fov0 {
            1.0
        } else if angle <= self.half_fov {
            let t = (angle - self.half_fov0) / (self.half_fov - self.half_fov0).max(1e-6);
            lerp(1.0, self.cone_foveate, smoothstep(t))
        } else {
            let t = (angle - self.half_fov)
                / (std::f32::consts::PI - self.half_fov).max(1e-6);
            lerp(self.cone_foveate, self.behind_foveate, smoothstep(t.min(1.0)))
        }
    }

    /// Weighting factor for the unit direction `dir` given the unit view
    /// axis `view_dir`.
    #[must_use]
    pub fn factor(&self, dir: Vec3, view_dir: Vec3) -> f32 {
        let angle = dir.dot(view_dir).clamp(-1.0, 1.0).acos();
        self.factor_at_angle(angle)
    }
}

fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
