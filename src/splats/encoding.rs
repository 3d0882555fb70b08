//! Packed splat encodings.
//!
//! Two fixed-size little-endian record layouts:
//!
//! * **Compact** (16 bytes): `rgba8` color+opacity, center as three
//!   half-floats, log-scales bias-encoded to 8 bits per axis, rotation as
//!   octahedral axis + angle in the remaining 24 bits.
//! * **Extended** (32 bytes): center as three `f32`, opacity and color and
//!   log-scales as half-floats, rotation as a full 32-bit octahedral+angle
//!   word (10/10/12 bits).
//!
//! Decoding reproduces centers to within 0.1% relative error over the
//! half-float range and color channels to within 1/255; log-scales are
//! quantized to [`LOG_SCALE_STEP`].

use glam::{Quat, Vec3};
use half::f16;

use super::Splat;
use crate::errors::{EngineError, Result};

/// Byte size of one compact splat record.
pub const COMPACT_SPLAT_SIZE: usize = 16;
/// Byte size of one extended splat record.
pub const EXTENDED_SPLAT_SIZE: usize = 32;

/// Smallest representable log-scale; encodes to byte 0.
pub const LOG_SCALE_MIN: f32 = -12.0;
/// Largest representable log-scale; encodes to byte 255.
pub const LOG_SCALE_MAX: f32 = 4.0;
/// Quantization step of the 8-bit biased log-scale encoding.
pub const LOG_SCALE_STEP: f32 = (LOG_SCALE_MAX - LOG_SCALE_MIN) / 255.0;

/// Which packed record layout a container stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplatEncoding {
    /// 16 bytes per splat.
    Compact,
    /// 32 bytes per splat.
    Extended,
}

impl SplatEncoding {
    /// Bytes per encoded splat record.
    #[must_use]
    pub fn bytes_per_splat(self) -> usize {
        match self {
            Self::Compact => COMPACT_SPLAT_SIZE,
            Self::Extended => EXTENDED_SPLAT_SIZE,
        }
    }

    /// Encodes `splat` into `out`, which must be exactly
    /// [`bytes_per_splat`](Self::bytes_per_splat) long.
    pub fn encode_into(self, splat: &Splat, out: &mut [u8]) {
        match self {
            Self::Compact => encode_compact(splat, out.try_into().expect("compact record size")),
            Self::Extended => encode_extended(splat, out.try_into().expect("extended record size")),
        }
    }

    /// Decodes one splat record.
    pub fn decode(self, bytes: &[u8]) -> Result<Splat> {
        match self {
            Self::Compact => {
                let record: &[u8; COMPACT_SPLAT_SIZE] = bytes
                    .try_into()
                    .map_err(|_| EngineError::Format("short compact splat record".into()))?;
                Ok(decode_compact(record))
            }
            Self::Extended => {
                let record: &[u8; EXTENDED_SPLAT_SIZE] = bytes
                    .try_into()
                    .map_err(|_| EngineError::Format("short extended splat record".into()))?;
                Ok(decode_extended(record))
            }
        }
    }

    /// Wire tag used in container headers.
    #[must_use]
    pub fn to_tag(self) -> u8 {
        match self {
            Self::Compact => 0,
            Self::Extended => 1,
        }
    }

    /// Parses a container header tag.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::Compact),
            1 => Ok(Self::Extended),
            other => Err(EngineError::Format(format!(
                "unknown splat encoding tag {other}"
            ))),
        }
    }
}

// ============================================================================
// Compact (16-byte) records
// ============================================================================

/// Encodes a splat into the 16-byte compact layout.
///
/// Word layout (little-endian u32s):
/// - `w0`: `r | g << 8 | b << 16 | opacity << 24`
/// - `w1`: `center.x f16 | center.y f16 << 16`
/// - `w2`: `center.z f16 | scale.x << 16 | scale.y << 24`
/// - `w3`: `scale.z | rotation (oct8 axis + 8-bit angle) << 8`
pub fn encode_compact(splat: &Splat, out: &mut [u8; COMPACT_SPLAT_SIZE]) {
    let w0 = u32::from(quantize_unorm8(splat.color[0]))
        | u32::from(quantize_unorm8(splat.color[1])) << 8
        | u32::from(quantize_unorm8(splat.color[2])) << 16
        | u32::from(quantize_unorm8(splat.opacity)) << 24;
    let w1 = u32::from(f16::from_f32(splat.center.x).to_bits())
        | u32::from(f16::from_f32(splat.center.y).to_bits()) << 16;
    let w2 = u32::from(f16::from_f32(splat.center.z).to_bits())
        | u32::from(encode_log_scale(splat.log_scales.x)) << 16
        | u32::from(encode_log_scale(splat.log_scales.y)) << 24;
    let w3 = u32::from(encode_log_scale(splat.log_scales.z))
        | pack_quat_oct24(splat.rotation) << 8;

    out[0..4].copy_from_slice(&w0.to_le_bytes());
    out[4..8].copy_from_slice(&w1.to_le_bytes());
    out[8..12].copy_from_slice(&w2.to_le_bytes());
    out[12..16].copy_from_slice(&w3.to_le_bytes());
}

/// Decodes a 16-byte compact record.
#[must_use]
pub fn decode_compact(bytes: &[u8; COMPACT_SPLAT_SIZE]) -> Splat {
    let w0 = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let w1 = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let w2 = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let w3 = u32::from_le_bytes(bytes[12..16].try_into().unwrap());

    Splat {
        center: Vec3::new(
            f16::from_bits((w1 & 0xFFFF) as u16).to_f32(),
            f16::from_bits((w1 >> 16) as u16).to_f32(),
            f16::from_bits((w2 & 0xFFFF) as u16).to_f32(),
        ),
        log_scales: Vec3::new(
            decode_log_scale((w2 >> 16 & 0xFF) as u8),
            decode_log_scale((w2 >> 24) as u8),
            decode_log_scale((w3 & 0xFF) as u8),
        ),
        rotation: unpack_quat_oct24(w3 >> 8),
        color: [
            (w0 & 0xFF) as f32 / 255.0,
            (w0 >> 8 & 0xFF) as f32 / 255.0,
            (w0 >> 16 & 0xFF) as f32 / 255.0,
        ],
        opacity: (w0 >> 24) as f32 / 255.0,
    }
}

// ============================================================================
// Extended (32-byte) records
// ============================================================================

/// Encodes a splat into the 32-byte extended layout: center `f32x3`,
/// opacity `f16`, color `f16x3`, log-scales `f16x3`, rotation packed
/// octahedral+angle at 10/10/12 bits, two reserved bytes.
pub fn encode_extended(splat: &Splat, out: &mut [u8; EXTENDED_SPLAT_SIZE]) {
    out[0..4].copy_from_slice(&splat.center.x.to_le_bytes());
    out[4..8].copy_from_slice(&splat.center.y.to_le_bytes());
    out[8..12].copy_from_slice(&splat.center.z.to_le_bytes());
    out[12..14].copy_from_slice(&f16::from_f32(splat.opacity).to_le_bytes());
    for (i, c) in splat.color.iter().enumerate() {
        out[14 + i * 2..16 + i * 2].copy_from_slice(&f16::from_f32(*c).to_le_bytes());
    }
    for (i, s) in splat.log_scales.to_array().iter().enumerate() {
        out[20 + i * 2..22 + i * 2].copy_from_slice(&f16::from_f32(*s).to_le_bytes());
    }
    out[26..30].copy_from_slice(&pack_quat_oct32(splat.rotation).to_le_bytes());
    out[30..32].copy_from_slice(&[0, 0]);
}

/// Decodes a 32-byte extended record.
#[must_use]
pub fn decode_extended(bytes: &[u8; EXTENDED_SPLAT_SIZE]) -> Splat {
    let read_f16 = |offset: usize| {
        f16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap()).to_f32()
    };
    Splat {
        center: Vec3::new(
            f32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            f32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            f32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        ),
        opacity: read_f16(12),
        color: [read_f16(14), read_f16(16), read_f16(18)],
        log_scales: Vec3::new(read_f16(20), read_f16(22), read_f16(24)),
        rotation: unpack_quat_oct32(u32::from_le_bytes(bytes[26..30].try_into().unwrap())),
    }
}

// ============================================================================
// Field codecs
// ============================================================================

fn quantize_unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

/// Bias-encodes a natural-log scale into 8 bits over
/// `[LOG_SCALE_MIN, LOG_SCALE_MAX]`.
#[must_use]
pub fn encode_log_scale(log_scale: f32) -> u8 {
    if !log_scale.is_finite() && log_scale < 0.0 {
        return 0;
    }
    let t = (log_scale.clamp(LOG_SCALE_MIN, LOG_SCALE_MAX) - LOG_SCALE_MIN) / LOG_SCALE_STEP;
    (t + 0.5) as u8
}

/// Decodes an 8-bit biased log-scale.
#[must_use]
pub fn decode_log_scale(encoded: u8) -> f32 {
    LOG_SCALE_MIN + f32::from(encoded) * LOG_SCALE_STEP
}

/// Maps a unit vector onto the octahedral square `[0, 1]^2`.
fn oct_encode(n: Vec3) -> (f32, f32) {
    let inv = 1.0 / (n.x.abs() + n.y.abs() + n.z.abs()).max(1e-12);
    let (mut u, mut v) = (n.x * inv, n.y * inv);
    if n.z < 0.0 {
        let (pu, pv) = (u, v);
        u = (1.0 - pv.abs()) * sign_not_zero(pu);
        v = (1.0 - pu.abs()) * sign_not_zero(pv);
    }
    (u * 0.5 + 0.5, v * 0.5 + 0.5)
}

/// Inverse of [`oct_encode`].
fn oct_decode(u: f32, v: f32) -> Vec3 {
    let (u, v) = (u * 2.0 - 1.0, v * 2.0 - 1.0);
    let mut n = Vec3::new(u, v, 1.0 - u.abs() - v.abs());
    if n.z < 0.0 {
        let (px, py) = (n.x, n.y);
        n.x = (1.0 - py.abs()) * sign_not_zero(px);
        n.y = (1.0 - px.abs()) * sign_not_zero(py);
    }
    n.normalize()
}

fn sign_not_zero(x: f32) -> f32 {
    if x >= 0.0 { 1.0 } else { -1.0 }
}

/// Splits a unit quaternion into a rotation axis and an angle in `[0, PI]`,
/// normalizing the sign so the scalar part is non-negative.
fn quat_to_axis_angle(q: Quat) -> (Vec3, f32) {
    let q = if q.w < 0.0 { -q } else { q };
    let half = q.w.clamp(-1.0, 1.0).acos();
    let sin_half = (1.0 - q.w * q.w).max(0.0).sqrt();
    if sin_half < 1e-6 {
        (Vec3::Z, 0.0)
    } else {
        (Vec3::new(q.x, q.y, q.z) / sin_half, 2.0 * half)
    }
}

fn axis_angle_to_quat(axis: Vec3, angle: f32) -> Quat {
    let (s, c) = (angle * 0.5).sin_cos();
    Quat::from_xyzw(axis.x * s, axis.y * s, axis.z * s, c).normalize()
}

/// Packs a rotation into 24 bits: octahedral axis at 8/8 bits plus an
/// 8-bit angle over `[0, PI]`. Used by the compact record.
#[must_use]
pub fn pack_quat_oct24(q: Quat) -> u32 {
    let (axis, angle) = quat_to_axis_angle(q);
    let (u, v) = oct_encode(axis);
    let qu = (u * 255.0 + 0.5) as u32;
    let qv = (v * 255.0 + 0.5) as u32;
    let qa = (angle / std::f32::consts::PI * 255.0 + 0.5) as u32;
    qu | qv << 8 | qa.min(255) << 16
}

/// Unpacks a 24-bit rotation packed by [`pack_quat_oct24`].
#[must_use]
pub fn unpack_quat_oct24(packed: u32) -> Quat {
    let u = (packed & 0xFF) as f32 / 255.0;
    let v = (packed >> 8 & 0xFF) as f32 / 255.0;
    let angle = (packed >> 16 & 0xFF) as f32 / 255.0 * std::f32::consts::PI;
    axis_angle_to_quat(oct_decode(u, v), angle)
}

/// Packs a rotation into a full word: octahedral axis at 10/10 bits plus a
/// 12-bit angle over `[0, PI]`. Used by the extended record.
#[must_use]
pub fn pack_quat_oct32(q: Quat) -> u32 {
    let (axis, angle) = quat_to_axis_angle(q);
    let (u, v) = oct_encode(axis);
    let qu = (u * 1023.0 + 0.5) as u32;
    let qv = (v * 1023.0 + 0.5) as u32;
    let qa = (angle / std::f32::consts::PI * 4095.0 + 0.5) as u32;
    qu | qv << 10 | qa.min(4095) << 20
}

/// Unpacks a rotation packed by [`pack_quat_oct32`].
#[must_use]
pub fn unpack_quat_oct32(packed: u32) -> Quat {
    let u = (packed & 0x3FF) as f32 / 1023.0;
    let v = (packed >> 10 & 0x3FF) as f32 / 1023.0;
    let angle = (packed >> 20 & 0xFFF) as f32 / 4095.0 * std::f32::consts::PI;
    axis_angle_to_quat(oct_decode(u, v), angle)
}
