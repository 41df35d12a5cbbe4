//! Combine a lens's sparse calibration samples into effective coefficients
//! at a requested `(focal, aperture, distance)`.

use crate::calibration::{
    CalibrationSet, CropMode, CropSample, DistortionModel, DistortionSample, Lens, TcaModel,
    TcaSample, VignettingModel, VignettingSample,
};

/// Catmull-Rom-like Hermite spline with linear tangent estimates at open
/// ends. `y1`/`y4` of `None` mean "this side has no further sample".
fn hermite(y1: Option<f64>, y2: f64, y3: f64, y4: Option<f64>, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    let tg2 = match y1 {
        Some(v) => (y3 - v) * 0.5,
        None => y3 - y2,
    };
    let tg3 = match y4 {
        Some(v) => (v - y2) * 0.5,
        None => y3 - y2,
    };
    (2.0 * t3 - 3.0 * t2 + 1.0) * y2
        + (t3 - 2.0 * t2 + t) * tg2
        + (-2.0 * t3 + 3.0 * t2) * y3
        + (t3 - t2) * tg3
}

enum Bracket<'a, T> {
    Exact(&'a T),
    Interp {
        below2: Option<&'a T>,
        below1: &'a T,
        above1: &'a T,
        above2: Option<&'a T>,
    },
    Single(&'a T),
    None,
}

fn insert_spline<'a, T>(slots: &mut [Option<&'a T>; 4], dist: &mut [f64; 4], d: f64, item: &'a T) {
    if d < 0.0 {
        if d > dist[1] {
            dist[0] = dist[1];
            dist[1] = d;
            slots[0] = slots[1];
            slots[1] = Some(item);
        } else if d > dist[0] {
            dist[0] = d;
            slots[0] = Some(item);
        }
    } else if d < dist[2] {
        dist[3] = dist[2];
        dist[2] = d;
        slots[3] = slots[2];
        slots[2] = Some(item);
    } else if d < dist[3] {
        dist[3] = d;
        slots[3] = Some(item);
    }
}

fn bracket<'a, T>(items: &'a [T], focal: f64, focal_of: impl Fn(&T) -> f64) -> Bracket<'a, T> {
    let mut dist = [f64::NEG_INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::INFINITY];
    let mut slots: [Option<&T>; 4] = [None, None, None, None];
    for item in items {
        let df = focal - focal_of(item);
        if df == 0.0 {
            return Bracket::Exact(item);
        }
        insert_spline(&mut slots, &mut dist, df, item);
    }
    match (slots[1], slots[2]) {
        (Some(below1), Some(above1)) => Bracket::Interp {
            below2: slots[0],
            below1,
            above1,
            above2: slots[3],
        },
        (Some(s), None) | (None, Some(s)) => Bracket::Single(s),
        (None, None) => Bracket::None,
    }
}

fn distortion_scale(model: DistortionModel, index: usize, focal: f64) -> f64 {
    match model {
        DistortionModel::Acm => {
            let exponent = if index < 3 { 2.0 * (index as f64 + 1.0) } else { 1.0 };
            focal.powf(1.0 - exponent)
        }
        _ => focal,
    }
}

/// Find the calibration set with the closest matching crop factor and
/// interpolate distortion coefficients at `focal`. Returns `None` if no set
/// qualifies or the requested family has no samples.
pub fn interpolate_distortion(lens: &Lens, crop: f64, focal: f64) -> Option<DistortionSample> {
    let set = lens.best_calibration_set(crop, |s| !s.distortion.is_empty())?;
    interpolate_distortion_in(set, focal)
}

fn interpolate_distortion_in(set: &CalibrationSet, focal: f64) -> Option<DistortionSample> {
    let samples: Vec<&DistortionSample> = set
        .distortion
        .iter()
        .filter(|s| s.model != DistortionModel::None)
        .collect();
    let model = samples.first()?.model;
    // Conflicting model tags are dropped with a warning, keeping only the
    // first-seen model's samples -- matches the original's per-row check.
    let mut filtered = Vec::new();
    for s in &samples {
        if s.model != model {
            log::warn!("lens has multiple distortion models defined");
            continue;
        }
        filtered.push(**s);
    }
    match bracket(&filtered, focal, |s| s.focal_mm) {
        Bracket::Exact(s) | Bracket::Single(s) => Some(*s),
        Bracket::None => None,
        Bracket::Interp {
            below2,
            below1,
            above1,
            above2,
        } => {
            let t = (focal - below1.focal_mm) / (above1.focal_mm - below1.focal_mm);
            let real_focal = hermite_opt(
                below2.and_then(|s| s.real_focal_mm),
                below1.real_focal_mm,
                above1.real_focal_mm,
                above2.and_then(|s| s.real_focal_mm),
                t,
            );
            let mut terms = [0.0; 5];
            for i in 0..5 {
                let v1 = below2.map(|s| s.terms[i] * distortion_scale(model, i, s.focal_mm));
                let v2 = below1.terms[i] * distortion_scale(model, i, below1.focal_mm);
                let v3 = above1.terms[i] * distortion_scale(model, i, above1.focal_mm);
                let v4 = above2.map(|s| s.terms[i] * distortion_scale(model, i, s.focal_mm));
                let target_scale = distortion_scale(model, i, focal);
                terms[i] = hermite(v1, v2, v3, v4, t) / target_scale;
            }
            Some(DistortionSample {
                model,
                focal_mm: focal,
                real_focal_mm: real_focal,
                terms,
            })
        }
    }
}

fn hermite_opt(
    y1: Option<Option<f64>>,
    y2: Option<f64>,
    y3: Option<f64>,
    y4: Option<Option<f64>>,
    t: f64,
) -> Option<f64> {
    let y2 = y2?;
    let y3 = y3?;
    Some(hermite(y1.flatten(), y2, y3, y4.flatten(), t))
}

fn tca_scale(model: TcaModel, index: usize, focal: f64) -> f64 {
    match model {
        TcaModel::None => 1.0,
        TcaModel::Linear | TcaModel::Poly3 => {
            if index < 2 {
                1.0
            } else {
                focal
            }
        }
        TcaModel::Acm => {
            let exponent = if index > 1 && index < 8 {
                ((index / 2) * 2) as f64
            } else {
                1.0
            };
            focal.powf(1.0 - exponent)
        }
    }
}

pub fn interpolate_tca(lens: &Lens, crop: f64, focal: f64) -> Option<TcaSample> {
    let set = lens.best_calibration_set(crop, |s| !s.tca.is_empty())?;
    interpolate_tca_in(set, focal)
}

fn interpolate_tca_in(set: &CalibrationSet, focal: f64) -> Option<TcaSample> {
    let samples: Vec<&TcaSample> = set.tca.iter().filter(|s| s.model != TcaModel::None).collect();
    let model = samples.first()?.model;
    let mut filtered = Vec::new();
    for s in &samples {
        if s.model != model {
            log::warn!("lens has multiple TCA models defined");
            continue;
        }
        filtered.push(**s);
    }
    match bracket(&filtered, focal, |s| s.focal_mm) {
        Bracket::Exact(s) | Bracket::Single(s) => Some(*s),
        Bracket::None => None,
        Bracket::Interp {
            below2,
            below1,
            above1,
            above2,
        } => {
            let t = (focal - below1.focal_mm) / (above1.focal_mm - below1.focal_mm);
            let mut terms = [0.0; 12];
            for i in 0..12 {
                let v1 = below2.map(|s| s.terms[i] * tca_scale(model, i, s.focal_mm));
                let v2 = below1.terms[i] * tca_scale(model, i, below1.focal_mm);
                let v3 = above1.terms[i] * tca_scale(model, i, above1.focal_mm);
                let v4 = above2.map(|s| s.terms[i] * tca_scale(model, i, s.focal_mm));
                let target_scale = tca_scale(model, i, focal);
                terms[i] = hermite(v1, v2, v3, v4, t) / target_scale;
            }
            Some(TcaSample {
                model,
                focal_mm: focal,
                terms,
            })
        }
    }
}

pub fn interpolate_crop(lens: &Lens, crop: f64, focal: f64) -> Option<CropSample> {
    let set = lens.best_calibration_set(crop, |s| !s.crop.is_empty())?;
    let samples: Vec<&CropSample> = set.crop.iter().filter(|s| s.mode != CropMode::NoCrop).collect();
    let mode = samples.first()?.mode;
    let mut filtered = Vec::new();
    for s in &samples {
        if s.mode != mode {
            log::warn!("lens has multiple crop modes defined");
            continue;
        }
        filtered.push(**s);
    }
    match bracket(&filtered, focal, |s| s.focal_mm) {
        Bracket::Exact(s) | Bracket::Single(s) => Some(*s),
        Bracket::None => None,
        Bracket::Interp {
            below2,
            below1,
            above1,
            above2,
        } => {
            let t = (focal - below1.focal_mm) / (above1.focal_mm - below1.focal_mm);
            let mut crop = [0.0; 4];
            for i in 0..4 {
                let v1 = below2.map(|s| s.crop[i]);
                let v4 = above2.map(|s| s.crop[i]);
                crop[i] = hermite(v1, below1.crop[i], above1.crop[i], v4, t);
            }
            Some(CropSample {
                mode,
                focal_mm: focal,
                crop,
            })
        }
    }
}

fn vignetting_scale(model: VignettingModel, index: usize, focal: f64) -> f64 {
    match model {
        VignettingModel::Pa | VignettingModel::None => 1.0,
        VignettingModel::Acm => {
            let exponent = 2.0 * (index as f64 + 1.0);
            1.0 / focal.powf(exponent)
        }
    }
}

fn vignetting_dist(
    min_focal: f64,
    max_focal: f64,
    sample_focal: f64,
    sample_aperture: f64,
    sample_distance: f64,
    focal: f64,
    aperture: f64,
    distance: f64,
) -> f64 {
    let mut f1 = focal - min_focal;
    let mut f2 = sample_focal - min_focal;
    let df = max_focal - min_focal;
    if df != 0.0 {
        f1 /= df;
        f2 /= df;
    }
    let a1 = 4.0 / aperture;
    let a2 = 4.0 / sample_aperture;
    let d1 = 0.1 / distance;
    let d2 = 0.1 / sample_distance;
    ((f2 - f1).powi(2) + (a2 - a1).powi(2) + (d2 - d1).powi(2)).sqrt()
}

/// Inverse Distance Weighting over `(focal, aperture, distance)`, power
/// 3.5. Returns `None` if no sample is within interpolation distance `1`.
pub fn interpolate_vignetting(
    lens: &Lens,
    crop: f64,
    focal: f64,
    aperture: f64,
    distance: f64,
) -> Option<VignettingSample> {
    let set = lens.best_calibration_set(crop, |s| !s.vignetting.is_empty())?;
    let mut model = VignettingModel::None;
    let mut total_weight = 0.0;
    let mut terms = [0.0; 3];
    let mut smallest = f64::MAX;

    for c in &set.vignetting {
        if model == VignettingModel::None {
            model = c.model;
        } else if model != c.model {
            log::warn!("lens has multiple vignetting models defined");
            continue;
        }

        let d = vignetting_dist(
            lens.min_focal_mm,
            lens.max_focal_mm,
            c.focal_mm,
            c.aperture,
            c.distance_m,
            focal,
            aperture,
            distance,
        );
        if d < 0.0001 {
            return Some(*c);
        }
        smallest = smallest.min(d);
        let weight = (1.0 / d.powf(3.5)).abs();
        for i in 0..3 {
            terms[i] += weight * c.terms[i] * vignetting_scale(model, i, c.focal_mm);
        }
        total_weight += weight;
    }

    if smallest > 1.0 || total_weight <= 0.0 || smallest == f64::MAX {
        return None;
    }
    for i in 0..3 {
        terms[i] /= total_weight * vignetting_scale(model, i, focal);
    }
    Some(VignettingSample {
        model,
        focal_mm: focal,
        aperture,
        distance_m: distance,
        terms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationSet;

    fn lens_with_distortion(samples: Vec<DistortionSample>) -> Lens {
        let mut set = CalibrationSet::new(1.5, 1.5);
        set.distortion = samples;
        Lens {
            maker: "Test".into(),
            model: "Test".into(),
            mounts: vec![],
            min_focal_mm: 10.0,
            max_focal_mm: 50.0,
            min_aperture: 2.8,
            max_aperture: 22.0,
            lens_type: crate::model::projection::LensType::Rectilinear,
            center_x: 0.0,
            center_y: 0.0,
            calibrations: vec![set],
        }
    }

    #[test]
    fn conflicting_models_are_dropped_with_a_warning() {
        let _ = env_logger::builder().is_test(true).try_init();
        let lens = lens_with_distortion(vec![
            DistortionSample {
                model: DistortionModel::Poly3,
                focal_mm: 20.0,
                real_focal_mm: None,
                terms: [0.02, 0.0, 0.0, 0.0, 0.0],
            },
            DistortionSample {
                model: DistortionModel::Poly5,
                focal_mm: 20.0,
                real_focal_mm: None,
                terms: [0.01, 0.01, 0.0, 0.0, 0.0],
            },
        ]);
        let r = interpolate_distortion(&lens, 1.5, 20.0).unwrap();
        assert_eq!(r.model, DistortionModel::Poly3);
    }

    #[test]
    fn exact_focal_match_short_circuits() {
        let lens = lens_with_distortion(vec![DistortionSample {
            model: DistortionModel::Poly3,
            focal_mm: 20.0,
            real_focal_mm: Some(20.5),
            terms: [0.01, 0.0, 0.0, 0.0, 0.0],
        }]);
        let r = interpolate_distortion(&lens, 1.5, 20.0).unwrap();
        assert_eq!(r.focal_mm, 20.0);
        assert_eq!(r.terms[0], 0.01);
    }

    #[test]
    fn brackets_and_interpolates_between_two_samples() {
        let lens = lens_with_distortion(vec![
            DistortionSample {
                model: DistortionModel::Poly3,
                focal_mm: 10.0,
                real_focal_mm: None,
                terms: [0.02, 0.0, 0.0, 0.0, 0.0],
            },
            DistortionSample {
                model: DistortionModel::Poly3,
                focal_mm: 20.0,
                real_focal_mm: None,
                terms: [0.01, 0.0, 0.0, 0.0, 0.0],
            },
        ]);
        let r = interpolate_distortion(&lens, 1.5, 15.0).unwrap();
        // 1/f law: coefficient*focal is roughly constant between the two
        // samples (0.2 both sides), so at the midpoint we expect ~0.2/15.
        assert!((r.terms[0] - 0.2 / 15.0).abs() < 1e-6);
    }

    #[test]
    fn vignetting_exact_sample_returned_verbatim() {
        let mut set = CalibrationSet::new(1.5, 1.5);
        set.vignetting.push(VignettingSample {
            model: VignettingModel::Pa,
            focal_mm: 20.0,
            aperture: 8.0,
            distance_m: 1000.0,
            terms: [0.1, -0.05, 0.02],
        });
        let lens = Lens {
            maker: "Test".into(),
            model: "Test".into(),
            mounts: vec![],
            min_focal_mm: 10.0,
            max_focal_mm: 50.0,
            min_aperture: 2.8,
            max_aperture: 22.0,
            lens_type: crate::model::projection::LensType::Rectilinear,
            center_x: 0.0,
            center_y: 0.0,
            calibrations: vec![set],
        };
        let r = interpolate_vignetting(&lens, 1.5, 20.0, 8.0, 1000.0).unwrap();
        assert_eq!(r.terms, [0.1, -0.05, 0.02]);
    }

    #[test]
    fn vignetting_far_sample_fails() {
        let mut set = CalibrationSet::new(1.5, 1.5);
        set.vignetting.push(VignettingSample {
            model: VignettingModel::Pa,
            focal_mm: 10.0,
            aperture: 22.0,
            distance_m: 0.3,
            terms: [0.1, -0.05, 0.02],
        });
        let lens = Lens {
            maker: "Test".into(),
            model: "Test".into(),
            mounts: vec![],
            min_focal_mm: 10.0,
            max_focal_mm: 50.0,
            min_aperture: 2.8,
            max_aperture: 22.0,
            lens_type: crate::model::projection::LensType::Rectilinear,
            center_x: 0.0,
            center_y: 0.0,
            calibrations: vec![set],
        };
        // Requested point (50mm, f/2.8, 1000m) is far in normalized
        // (focal, aperture, distance) space from the single sample.
        assert!(interpolate_vignetting(&lens, 1.5, 50.0, 2.8, 1000.0).is_none());
    }

    #[test]
    fn crop_mismatch_fails() {
        let lens = lens_with_distortion(vec![DistortionSample {
            model: DistortionModel::Poly3,
            focal_mm: 20.0,
            real_focal_mm: None,
            terms: [0.01, 0.0, 0.0, 0.0, 0.0],
        }]);
        // image_crop / set_crop = 1.0 / 1.5 = 0.667 < 0.96 -> no match
        assert!(interpolate_distortion(&lens, 1.0, 20.0).is_none());
    }
}
