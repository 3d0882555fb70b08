//! Spherical-harmonic coefficient packing and evaluation.
//!
//! Each SH coefficient is one RGB triplet packed into a 4-byte word: a
//! shared 5-bit exponent, an 8-bit magnitude per channel, and 3 sign bits.
//! Directional color contribution is evaluated with the standard real SH
//! basis for bands 1..=3.
//!
//! Storage strides are padded to 4-word groups so the GPU pool can address
//! SH data with a fixed per-level stride: levels 1/2/3 occupy 4/8/16 words
//! per splat (3/8/15 live coefficients).

use glam::Vec3;

/// Exponent bias of the shared 5-bit exponent (stored range -16..=15).
const SH_EXP_BIAS: i32 = 16;

/// Number of live SH coefficients for a given level.
#[must_use]
pub fn coeff_count(level: u8) -> usize {
    match level {
        0 => 0,
        1 => 3,
        2 => 8,
        _ => 15,
    }
}

/// Padded per-splat word stride for a given SH level.
#[must_use]
pub fn words_per_splat(level: u8) -> usize {
    match level {
        0 => 0,
        1 => 4,
        2 => 8,
        _ => 16,
    }
}

/// Packs one RGB coefficient into a shared-exponent word.
///
/// Bit layout: `r_mag | g_mag << 8 | b_mag << 16 | exp << 24 | signs << 29`.
#[must_use]
pub fn pack_coeff(rgb: [f32; 3]) -> u32 {
    let max = rgb.iter().fold(0.0_f32, |m, v| m.max(v.abs()));
    if max == 0.0 {
        return 0;
    }
    // Choose e so that max / 2^e lands in [0.5, 1).
    let e = (max.log2().floor() as i32 + 1).clamp(-SH_EXP_BIAS, SH_EXP_BIAS - 1);
    let scale = (-e as f32).exp2() * 256.0;

    let mut word = ((e + SH_EXP_BIAS) as u32) << 24;
    for (i, v) in rgb.iter().enumerate() {
        let mag = ((v.abs() * scale) as u32).min(255);
        word |= mag << (i * 8);
        if *v < 0.0 {
            word |= 1 << (29 + i);
        }
    }
    word
}

/// Unpacks a coefficient packed by [`pack_coeff`].
#[must_use]
pub fn unpack_coeff(word: u32) -> [f32; 3] {
    if word == 0 {
        return [0.0; 3];
    }
    let e = (word >> 24 & 0x1F) as i32 - SH_EXP_BIAS;
    let scale = (e as f32).exp2() / 256.0;
    let mut rgb = [0.0_f32; 3];
    for (i, channel) in rgb.iter_mut().enumerate() {
        let mag = (word >> (i * 8) & 0xFF) as f32 * scale;
        *channel = if word >> (29 + i) & 1 == 1 { -mag } else { mag };
    }
    rgb
}

// ============================================================================
// Real SH basis, bands 1..=3 (band 0 is the splat's base color)
// ============================================================================

const SH_C1: f32 = 0.488_602_5;

const SH_C2: [f32; 5] = [1.092_548_4, -1.092_548_4, 0.315_391_6, -1.092_548_4, 0.546_274_2];

const SH_C3: [f32; 7] = [
    -0.590_043_6,
    2.890_611_4,
    -0.457_045_8,
    0.373_176_3,
    -0.457_045_8,
    1.445_305_7,
    -0.590_043_6,
];

/// Evaluates the directional color contribution of `coeffs` (ordered by
/// band, as produced by [`coeff_count`]) in unit direction `dir`.
#[must_use]
pub fn eval(level: u8, coeffs: &[[f32; 3]], dir: Vec3) -> [f32; 3] {
    let mut rgb = [0.0_f32; 3];
    if level == 0 || coeffs.is_empty() {
        return rgb;
    }
    let (x, y, z) = (dir.x, dir.y, dir.z);

    let mut basis = [0.0_f32; 15];
    basis[0] = -SH_C1 * y;
    basis[1] = SH_C1 * z;
    basis[2] = -SH_C1 * x;

    if level >= 2 {
        let (xx, yy, zz) = (x * x, y * y, z * z);
        basis[3] = SH_C2[0] * x * y;
        basis[4] = SH_C2[1] * y * z;
        basis[5] = SH_C2[2] * (2.0 * zz - xx - yy);
        basis[6] = SH_C2[3] * x * z;
        basis[7] = SH_C2[4] * (xx - yy);

        if level >= 3 {
            basis[8] = SH_C3[0] * y * (3.0 * xx - yy);
            basis[9] = SH_C3[1] * x * y * z;
            basis[10] = SH_C3[2] * y * (4.0 * zz - xx - yy);
            basis[11] = SH_C3[3] * z * (2.0 * zz - 3.0 * xx - 3.0 * yy);
            basis[12] = SH_C3[4] * x * (4.0 * zz - xx - yy);
            basis[13] = SH_C3[5] * z * (xx - yy);
            basis[14] = SH_C3[6] * x * (xx - 3.0 * yy);
        }
    }

    for (coeff, b) in coeffs.iter().zip(basis.iter()) {
        for (channel, c) in rgb.iter_mut().zip(coeff.iter()) {
            *channel += b * c;
        }
    }
    rgb
}
