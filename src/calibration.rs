//! Read-only calibration input: the shape a database loader (out of scope
//! here) populates and hands to [`crate::modifier::Modifier`].

use serde::{Deserialize, Serialize};

use crate::model::projection::LensType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistortionModel {
    None,
    Poly3,
    Poly5,
    PTLens,
    Acm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TcaModel {
    None,
    Linear,
    Poly3,
    Acm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VignettingModel {
    None,
    Pa,
    Acm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CropMode {
    NoCrop,
    Crop,
}

/// A single row of distortion calibration data at one focal length.
/// `terms` holds up to 5 coefficients; unused slots are zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistortionSample {
    pub model: DistortionModel,
    pub focal_mm: f64,
    pub real_focal_mm: Option<f64>,
    pub terms: [f64; 5],
}

/// TCA calibration row. `terms` holds up to 12 coefficients (Linear uses 2,
/// Poly3 uses 6, Acm uses 12).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TcaSample {
    pub model: TcaModel,
    pub focal_mm: f64,
    pub terms: [f64; 12],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VignettingSample {
    pub model: VignettingModel,
    pub focal_mm: f64,
    pub aperture: f64,
    pub distance_m: f64,
    pub terms: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropSample {
    pub mode: CropMode,
    pub focal_mm: f64,
    /// Left, right, top, bottom crop fractions.
    pub crop: [f64; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FovSample {
    pub focal_mm: f64,
    pub fov_degrees: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RealFocalSample {
    pub focal_mm: f64,
    pub real_focal_mm: f64,
}

/// One sensor-size-specific block of calibration samples. A lens may carry
/// several (one per crop factor it was calibrated at).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSet {
    pub crop_factor: f64,
    pub aspect_ratio: f64,
    pub distortion: Vec<DistortionSample>,
    pub tca: Vec<TcaSample>,
    pub vignetting: Vec<VignettingSample>,
    pub crop: Vec<CropSample>,
    pub fov: Vec<FovSample>,
    pub real_focal: Vec<RealFocalSample>,
}

impl CalibrationSet {
    pub fn new(crop_factor: f64, aspect_ratio: f64) -> Self {
        CalibrationSet {
            crop_factor,
            aspect_ratio,
            distortion: Vec::new(),
            tca: Vec::new(),
            vignetting: Vec::new(),
            crop: Vec::new(),
            fov: Vec::new(),
            real_focal: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lens {
    pub maker: String,
    pub model: String,
    pub mounts: Vec<String>,
    pub min_focal_mm: f64,
    pub max_focal_mm: f64,
    pub min_aperture: f64,
    pub max_aperture: f64,
    pub lens_type: LensType,
    /// Optical-axis offset, each in `[-0.5, 0.5]`.
    pub center_x: f64,
    pub center_y: f64,
    pub calibrations: Vec<CalibrationSet>,
}

impl Lens {
    /// Pick the calibration set whose crop factor best matches the image's,
    /// preferring the smallest `image_crop / set_crop` ratio among those
    /// with ratio `>= 0.96`. Mirrors `lens.cpp`'s per-family crop matching
    /// loop (duplicated per family there; unified here since the predicate
    /// is identical across distortion/TCA/vignetting/crop).
    pub fn best_calibration_set<F>(&self, image_crop: f64, has_family: F) -> Option<&CalibrationSet>
    where
        F: Fn(&CalibrationSet) -> bool,
    {
        let mut best: Option<&CalibrationSet> = None;
        let mut best_ratio = f64::MAX;
        for set in &self.calibrations {
            let ratio = image_crop / set.crop_factor;
            if has_family(set) && ratio >= 0.96 && ratio < best_ratio {
                best_ratio = ratio;
                best = Some(set);
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lens_with_crops(crops: &[f64]) -> Lens {
        Lens {
            maker: "Test".into(),
            model: "Test".into(),
            mounts: vec![],
            min_focal_mm: 10.0,
            max_focal_mm: 50.0,
            min_aperture: 2.8,
            max_aperture: 22.0,
            lens_type: LensType::Rectilinear,
            center_x: 0.0,
            center_y: 0.0,
            calibrations: crops.iter().map(|&c| CalibrationSet::new(c, 1.5)).collect(),
        }
    }

    #[test]
    fn picks_smallest_qualifying_ratio() {
        // image_crop 1.5 against sets at 1.3, 1.5, 1.6: all three qualify
        // (ratio >= 0.96), smallest ratio (closest crop_factor from below)
        // should win -- that's the 1.6 set (ratio 0.9375 fails) versus 1.5
        // (ratio 1.0) versus 1.3 (ratio 1.1538). Smallest passing ratio is
        // the 1.5 set itself.
        let lens = lens_with_crops(&[1.3, 1.5, 1.6]);
        let best = lens.best_calibration_set(1.5, |_| true).unwrap();
        assert_eq!(best.crop_factor, 1.5);
    }

    #[test]
    fn rejects_sets_below_threshold() {
        let lens = lens_with_crops(&[2.0]);
        assert!(lens.best_calibration_set(1.0, |_| true).is_none());
    }

    #[test]
    fn family_predicate_filters_candidates() {
        let mut lens = lens_with_crops(&[1.5, 1.5]);
        lens.calibrations[1].distortion.push(DistortionSample {
            model: DistortionModel::Poly3,
            focal_mm: 20.0,
            real_focal_mm: None,
            terms: [0.0; 5],
        });
        let best = lens
            .best_calibration_set(1.5, |set| !set.distortion.is_empty())
            .unwrap();
        assert!(!best.distortion.is_empty());
    }
}
