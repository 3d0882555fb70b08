//! Splat Encoding Tests
//!
//! Tests for:
//! - Compact (16-byte) record round trips
//! - Extended (32-byte) record round trips
//! - Biased log-scale quantization
//! - Octahedral+angle rotation packing
//! - Shared-exponent SH coefficient packing and evaluation
//! - The container capability surface (compact / extended / paged)

use glam::{Quat, Vec3};

use veil::splats::container::{PagedSplats, SplatArray};
use veil::splats::encoding::{
    self, COMPACT_SPLAT_SIZE, EXTENDED_SPLAT_SIZE, LOG_SCALE_STEP, SplatEncoding,
};
use veil::splats::sh;
use veil::splats::{Splat, SplatContainer};

fn sample_splat() -> Splat {
    Splat {
        center: Vec3::new(1.25, -3.5, 0.75),
        log_scales: Vec3::new(-2.0, -1.5, -3.0),
        rotation: Quat::from_axis_angle(Vec3::new(0.3, 0.8, 0.52).normalize(), 1.1),
        color: [0.8, 0.4, 0.1],
        opacity: 0.9,
    }
}

fn rotations_close(a: Quat, b: Quat, tol: f32) -> bool {
    // Compare by how they rotate a basis, so q and -q agree.
    let v = Vec3::new(0.36, 0.48, 0.8);
    (a * v).distance(b * v) < tol
}

// ============================================================================
// Compact Records
// ============================================================================

#[test]
fn compact_round_trip_center_within_relative_tolerance() {
    let splat = sample_splat();
    let mut record = [0_u8; COMPACT_SPLAT_SIZE];
    encoding::encode_compact(&splat, &mut record);
    let decoded = encoding::decode_compact(&record);

    for (orig, got) in splat.center.to_array().iter().zip(decoded.center.to_array()) {
        let tolerance = orig.abs() * 1e-3;
        assert!(
            (orig - got).abs() <= tolerance,
            "center component {orig} decoded as {got}"
        );
    }
}

#[test]
fn compact_round_trip_color_within_one_step() {
    let splat = sample_splat();
    let mut record = [0_u8; COMPACT_SPLAT_SIZE];
    encoding::encode_compact(&splat, &mut record);
    let decoded = encoding::decode_compact(&record);

    for (orig, got) in splat.color.iter().zip(decoded.color) {
        assert!(
            (orig - got).abs() <= 1.0 / 255.0,
            "color channel {orig} decoded as {got}"
        );
    }
    assert!((splat.opacity - decoded.opacity).abs() <= 1.0 / 255.0);
}

#[test]
fn compact_round_trip_scales_within_quantization_step() {
    let splat = sample_splat();
    let mut record = [0_u8; COMPACT_SPLAT_SIZE];
    encoding::encode_compact(&splat, &mut record);
    let decoded = encoding::decode_compact(&record);

    for (orig, got) in splat
        .log_scales
        .to_array()
        .iter()
        .zip(decoded.log_scales.to_array())
    {
        assert!(
            (orig - got).abs() <= LOG_SCALE_STEP,
            "log scale {orig} decoded as {got}"
        );
    }
}

#[test]
fn compact_round_trip_rotation() {
    let splat = sample_splat();
    let mut record = [0_u8; COMPACT_SPLAT_SIZE];
    encoding::encode_compact(&splat, &mut record);
    let decoded = encoding::decode_compact(&record);

    assert!(
        rotations_close(splat.rotation, decoded.rotation, 0.05),
        "rotation drifted: {:?} vs {:?}",
        splat.rotation,
        decoded.rotation
    );
}

// ============================================================================
// Extended Records
// ============================================================================

#[test]
fn extended_round_trip_center_exact() {
    let splat = sample_splat();
    let mut record = [0_u8; EXTENDED_SPLAT_SIZE];
    encoding::encode_extended(&splat, &mut record);
    let decoded = encoding::decode_extended(&record);

    assert_eq!(splat.center, decoded.center, "extended centers are f32");
}

#[test]
fn extended_round_trip_rotation_tighter_than_compact() {
    let splat = sample_splat();
    let mut record = [0_u8; EXTENDED_SPLAT_SIZE];
    encoding::encode_extended(&splat, &mut record);
    let decoded = encoding::decode_extended(&record);

    assert!(rotations_close(splat.rotation, decoded.rotation, 0.01));
}

#[test]
fn extended_fields_half_precision() {
    let splat = sample_splat();
    let mut record = [0_u8; EXTENDED_SPLAT_SIZE];
    encoding::encode_extended(&splat, &mut record);
    let decoded = encoding::decode_extended(&record);

    assert!((splat.opacity - decoded.opacity).abs() < 1e-3);
    for (orig, got) in splat.color.iter().zip(decoded.color) {
        assert!((orig - got).abs() < 1e-2);
    }
    for (orig, got) in splat
        .log_scales
        .to_array()
        .iter()
        .zip(decoded.log_scales.to_array())
    {
        assert!((orig - got).abs() < 1e-2);
    }
}

#[test]
fn encoding_dispatch_matches_direct_codecs() {
    let splat = sample_splat();
    for encoding in [SplatEncoding::Compact, SplatEncoding::Extended] {
        let mut record = vec![0_u8; encoding.bytes_per_splat()];
        encoding.encode_into(&splat, &mut record);
        let decoded = encoding.decode(&record).unwrap();
        assert!((decoded.center - splat.center).length() < 0.01);
    }
}

#[test]
fn rotation_packing_covers_many_orientations() {
    for i in 0..64 {
        let angle = i as f32 * 0.097;
        let axis = Vec3::new(
            (i as f32 * 0.71).sin(),
            (i as f32 * 1.13).cos(),
            (i as f32 * 0.39).sin() + 0.2,
        )
        .normalize();
        let q = Quat::from_axis_angle(axis, angle);

        let wide = encoding::unpack_quat_oct32(encoding::pack_quat_oct32(q));
        assert!(rotations_close(q, wide, 0.01), "oct32 failed at sample {i}");

        let narrow = encoding::unpack_quat_oct24(encoding::pack_quat_oct24(q));
        assert!(rotations_close(q, narrow, 0.06), "oct24 failed at sample {i}");
    }
}

// ============================================================================
// Spherical Harmonics
// ============================================================================

#[test]
fn sh_coeff_round_trip() {
    let samples = [
        [0.5, -0.25, 0.125],
        [0.0, 0.0, 0.0],
        [-1.5, 2.0, -0.75],
        [0.001, -0.002, 0.0015],
    ];
    for rgb in samples {
        let decoded = sh::unpack_coeff(sh::pack_coeff(rgb));
        let max = rgb.iter().fold(0.0_f32, |m, v| m.max(v.abs()));
        for (orig, got) in rgb.iter().zip(decoded) {
            assert!(
                (orig - got).abs() <= max / 128.0 + 1e-6,
                "coefficient {orig} decoded as {got}"
            );
        }
    }
}

#[test]
fn sh_word_strides_are_padded_groups() {
    assert_eq!(sh::words_per_splat(0), 0);
    assert_eq!(sh::words_per_splat(1), 4);
    assert_eq!(sh::words_per_splat(2), 8);
    assert_eq!(sh::words_per_splat(3), 16);
    assert_eq!(sh::coeff_count(1), 3);
    assert_eq!(sh::coeff_count(2), 8);
    assert_eq!(sh::coeff_count(3), 15);
}

// ============================================================================
// Containers
// ============================================================================

#[test]
fn resident_container_fetches_splats() {
    let splats = vec![sample_splat(); 3];
    let container =
        SplatContainer::Compact(SplatArray::from_splats(SplatEncoding::Compact, &splats));

    assert_eq!(container.num_splats(), 3);
    assert!(!container.has_sh_direction());

    let fetched = container.fetch_splat(1, None).unwrap();
    assert!((fetched.center - splats[1].center).length() < 0.01);
    assert!(container.fetch_splat(3, None).is_none(), "out of bounds");
}

#[test]
fn sh_container_shifts_color_with_view_origin() {
    // One splat at the origin with a strong band-1 z coefficient: viewed
    // from -Z vs +Z the directional color must differ.
    let mut array = SplatArray::new(SplatEncoding::Extended, 1);
    let mut coeffs = vec![[0.0_f32; 3]; 3];
    coeffs[1] = [2.0, 2.0, 2.0];
    array.push(&sample_splat_at_origin(), &coeffs);
    let container = SplatContainer::Extended(array);

    assert!(container.has_sh_direction());
    let from_behind = container
        .fetch_splat(0, Some(Vec3::new(0.0, 0.0, -5.0)))
        .unwrap();
    let from_front = container
        .fetch_splat(0, Some(Vec3::new(0.0, 0.0, 5.0)))
        .unwrap();
    assert!(
        (from_behind.color[0] - from_front.color[0]).abs() > 0.1,
        "view direction should change SH color"
    );
}

fn sample_splat_at_origin() -> Splat {
    Splat {
        center: Vec3::ZERO,
        ..sample_splat()
    }
}

#[test]
fn paged_container_answers_only_resident_chunks() {
    let mut paged = PagedSplats::new(SplatEncoding::Compact, 0, 2 * u64::from(veil::PAGE_SIZE));
    assert!(!paged.is_resident(0));

    paged.insert_chunk(1, SplatArray::from_splats(SplatEncoding::Compact, &[sample_splat()]));
    assert!(paged.is_resident(1));
    let container = SplatContainer::Paged(paged);

    assert_eq!(container.num_splats(), 2 * u64::from(veil::PAGE_SIZE));
    assert!(container.fetch_splat(0, None).is_none(), "chunk 0 absent");
    assert!(
        container
            .fetch_splat(u64::from(veil::PAGE_SIZE), None)
            .is_some(),
        "first splat of resident chunk 1"
    );
}

#[test]
fn sh_eval_band1_is_directional() {
    // A pure z-aligned band-1 coefficient should brighten +Z and darken -Z.
    let mut coeffs = vec![[0.0_f32; 3]; 3];
    coeffs[1] = [1.0, 1.0, 1.0];

    let up = sh::eval(1, &coeffs, Vec3::Z);
    let down = sh::eval(1, &coeffs, Vec3::NEG_Z);
    assert!(up[0] > 0.0, "toward +Z should add color");
    assert!(down[0] < 0.0, "toward -Z should subtract color");
    assert!((up[0] + down[0]).abs() < 1e-6, "band 1 is odd in direction");
}
