//! Integration tests for the pipeline's invariants and round-trip laws:
//! forward/reverse coordinate round-trips, the auto-scale corner bound,
//! vignetting monotonicity, and the pixel-centre convention. Uses seeded
//! synthetic inputs rather than fixed golden values so the properties are
//! checked over a spread of lenses/coefficients, not one hand-picked case.

use approx::assert_relative_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use lensmod::calibration::{
    CalibrationSet, DistortionModel, DistortionSample, Lens, VignettingModel, VignettingSample,
};
use lensmod::component_layout::ComponentLayout;
use lensmod::model::distortion::Distortion;
use lensmod::model::projection::{self, LensType};
use lensmod::{Modifier, PixelFormat, Sample};

fn seeded_rng() -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(0xC0FF_EE42)
}

fn rectilinear_lens(set: CalibrationSet) -> Lens {
    Lens {
        maker: "Test".into(),
        model: "Test".into(),
        mounts: vec![],
        min_focal_mm: 20.0,
        max_focal_mm: 20.0,
        min_aperture: 2.8,
        max_aperture: 22.0,
        lens_type: LensType::Rectilinear,
        center_x: 0.0,
        center_y: 0.0,
        calibrations: vec![set],
    }
}

/// `undistort(distort(p)) ~= p` within `1e-3` of normalized radius, over
/// many random small-coefficient models and random interior points.
#[test]
fn distortion_roundtrips_for_random_models_and_points() {
    let mut rng = seeded_rng();
    for _ in 0..200 {
        let model = match rng.gen_range(0..3) {
            0 => Distortion::Poly3 {
                k1: rng.gen_range(-0.1..0.1),
            },
            1 => Distortion::Poly5 {
                k1: rng.gen_range(-0.05..0.05),
                k2: rng.gen_range(-0.02..0.02),
            },
            _ => Distortion::PTLens {
                a: rng.gen_range(-0.02..0.02),
                b: rng.gen_range(-0.02..0.02),
                c: rng.gen_range(-0.02..0.02),
            },
        };
        let x: f64 = rng.gen_range(-0.8..0.8);
        let y: f64 = rng.gen_range(-0.8..0.8);
        let (xd, yd) = model.distort(x, y);
        let Some((xu, yu)) = model.undistort(xd, yd) else {
            continue;
        };
        assert_relative_eq!(xu, x, epsilon = 1e-3);
        assert_relative_eq!(yu, y, epsilon = 1e-3);
    }
}

/// Projection `A -> B -> A` round-trips within `1e-3` for interior points,
/// over every ordered pair drawn from the pivot-compatible projection types.
#[test]
fn projection_roundtrips_for_random_pairs_and_points() {
    let types = [
        LensType::Rectilinear,
        LensType::Fisheye,
        LensType::Panoramic,
        LensType::Equirectangular,
        LensType::FisheyeStereographic,
        LensType::FisheyeEquisolid,
        LensType::FisheyeThoby,
    ];
    let mut rng = seeded_rng();
    for &from in &types {
        for &to in &types {
            if from == to {
                continue;
            }
            let Some(there) = projection::build(from, to, 10.0, 21.6) else {
                continue;
            };
            let Some(back) = projection::build(to, from, 10.0, 21.6) else {
                continue;
            };
            for _ in 0..10 {
                let x: f64 = rng.gen_range(-0.1..0.1);
                let y: f64 = rng.gen_range(-0.1..0.1);
                let (bx, by) = there.apply(x, y);
                if !bx.is_finite() || !by.is_finite() || bx.abs() > 1.0e10 || by.abs() > 1.0e10 {
                    continue;
                }
                let (rx, ry) = back.apply(bx, by);
                assert_relative_eq!(rx, x, epsilon = 1e-3);
                assert_relative_eq!(ry, y, epsilon = 1e-3);
            }
        }
    }
}

/// After `enable_scaling(0.0)` (auto-scale), the geometry-transformed image
/// corners must not grow past `1.001x` their un-scaled magnitude.
#[test]
fn auto_scale_bounds_corner_growth() {
    let mut set = CalibrationSet::new(1.5, 1.5);
    set.distortion.push(DistortionSample {
        model: DistortionModel::Poly3,
        focal_mm: 20.0,
        real_focal_mm: None,
        terms: [-0.15, 0.0, 0.0, 0.0, 0.0],
    });
    let lens = rectilinear_lens(set);

    let mut plain = Modifier::new(&lens, 20.0, 1.5, 400, 300, PixelFormat::U8, false).unwrap();
    assert!(plain.enable_distortion_correction());
    let mut scaled = Modifier::new(&lens, 20.0, 1.5, 400, 300, PixelFormat::U8, false).unwrap();
    assert!(scaled.enable_distortion_correction());
    assert!(scaled.enable_scaling(0.0));

    let corners = [(0.0, 0.0), (399.0, 0.0), (0.0, 299.0), (399.0, 299.0)];
    for &(cx, cy) in &corners {
        let mut before = [0.0; 2];
        let mut after = [0.0; 2];
        assert!(plain.apply_geometry_distortion(cx, cy, 1, &mut before));
        assert!(scaled.apply_geometry_distortion(cx, cy, 1, &mut after));
        let mag_before = before[0].hypot(before[1]);
        let mag_after = after[0].hypot(after[1]);
        assert!(
            mag_after <= mag_before * 1.001 + 1e-6,
            "corner ({cx}, {cy}): {mag_after} > 1.001 * {mag_before}"
        );
    }
}

/// Vignetting correction on a constant mid-gray U8 row must be monotone
/// with radius and stay within `[0, 255]`.
#[test]
fn vignetting_correction_is_monotone_and_clamped() {
    let mut set = CalibrationSet::new(1.5, 1.5);
    set.vignetting.push(VignettingSample {
        model: VignettingModel::Pa,
        focal_mm: 20.0,
        aperture: 10.0,
        distance_m: 10.0,
        terms: [-0.35, 0.12, -0.03],
    });
    let lens = rectilinear_lens(set);
    let mut m = Modifier::new(&lens, 20.0, 1.5, 400, 300, PixelFormat::U8, false).unwrap();
    assert!(m.enable_vignetting_correction(10.0, 10.0));

    let layout = ComponentLayout(0x3); // single Intensity component
    let mut prev = 0u8;
    for col in (0..400).step_by(20) {
        let mut px = [Sample::U8(128)];
        assert!(m.apply_color_modification(&mut px, col as f64, 150.0, 1, layout));
        let Sample::U8(v) = px[0] else { unreachable!() };
        assert!(v <= 255);
        if col > 0 {
            assert!(v >= prev, "expected monotone correction, {v} < {prev} at col {col}");
        }
        prev = v;
    }
}
