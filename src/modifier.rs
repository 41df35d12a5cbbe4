//! The `Modifier`: owns one set of callback chains for one
//! `(lens, focal, aperture, distance, image size)` tuple and drives the
//! per-row apply entry points.

use crate::calibration::Lens;
use crate::callback::{priority, Chain, ColorCallback, CoordCallback, CoordOp, SubpixelCallback};
use crate::component_layout::ComponentLayout;
use crate::error::{Error, Result};
use crate::model::distortion::Distortion;
use crate::model::projection::{self, LensType};
use crate::model::tca::Tca;
use crate::model::vignetting::Vignetting;
use crate::pixel::{PixelFormat, Sample};
use rayon::prelude::*;

/// Bit flags returned by [`Modifier::mod_flags`], grounded on the
/// original's `LF_MODIFY_*` enum (`TCA=0x1, VIGNETTING=0x2, DISTORTION=0x8,
/// GEOMETRY=0x10, SCALE=0x20, PERSPECTIVE=0x40`).
pub mod flags {
    pub const TCA: u32 = 0x01;
    pub const VIGNETTING: u32 = 0x02;
    pub const DISTORTION: u32 = 0x08;
    pub const GEOMETRY: u32 = 0x10;
    pub const SCALE: u32 = 0x20;
    pub const PERSPECTIVE: u32 = 0x40;
}

/// Legacy-style bitflags argument to [`Modifier::new_with_flags`], mirroring
/// `lfModifier::Initialize`'s all-in-one entry point.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnabledMods {
    pub distortion: bool,
    pub tca: bool,
    pub vignetting: bool,
    pub geometry: Option<LensType>,
    pub scale: Option<f64>,
}

pub struct Modifier<'a> {
    lens: &'a Lens,
    width: f64,
    height: f64,
    pixel_format: PixelFormat,
    reverse: bool,

    norm_scale: f64,
    norm_unscale: f64,
    center_x: f64,
    center_y: f64,
    normalized_in_mm: f64,
    /// Nominal focal length engraved on the lens barrel; keys the
    /// distortion/TCA/vignetting calibration lookups.
    image_focal: f64,
    /// Measured (or calibration-derived) real focal length; used only for
    /// `norm_scale` and geometry/perspective's mm<->normalized conversion.
    real_focal: f64,
    image_crop: f64,

    mod_flags: u32,
    coord: Chain<CoordCallback>,
    subpixel: Chain<SubpixelCallback>,
    color: Chain<ColorCallback>,
    perspective: Option<crate::perspective::PerspectiveParams>,
}

impl<'a> Modifier<'a> {
    /// `image_focal` is the nominal focal length engraved on the lens;
    /// `RealFocal` falls back to it when no real-focal-length calibration
    /// sample exists; this silent fallback matches the original lensfun
    /// behavior rather than surfacing a warning.
    pub fn new(
        lens: &'a Lens,
        image_focal: f64,
        image_crop: f64,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        reverse: bool,
    ) -> Result<Self> {
        if width < 2 || height < 2 {
            return Err(Error::ImageTooSmall { width, height });
        }
        let width = width as f64;
        let height = height as f64;

        let real_focal = crate::interpolate::interpolate_distortion(lens, image_crop, image_focal)
            .and_then(|s| s.real_focal_mm)
            .unwrap_or(image_focal);

        let norm_scale = (36f64.hypot(24.0)) / image_crop / (width + 1.0).hypot(height + 1.0) / real_focal;
        let norm_unscale = 1.0 / norm_scale;
        let min_wh = width.min(height);
        let center_x = (width / 2.0 + min_wh / 2.0 * lens.center_x) * norm_scale;
        let center_y = (height / 2.0 + min_wh / 2.0 * lens.center_y) * norm_scale;

        let aspect_ratio = lens
            .calibrations
            .first()
            .map(|c| c.aspect_ratio)
            .unwrap_or(1.5);
        let normalized_in_mm = 36f64.hypot(24.0) / 2.0 / aspect_ratio / image_crop;

        Ok(Modifier {
            lens,
            width,
            height,
            pixel_format,
            reverse,
            norm_scale,
            norm_unscale,
            center_x,
            center_y,
            normalized_in_mm,
            image_focal,
            real_focal,
            image_crop,
            mod_flags: 0,
            coord: Chain::new(),
            subpixel: Chain::new(),
            color: Chain::new(),
            perspective: None,
        })
    }

    /// Legacy all-in-one entry point mirroring `lfModifier::Initialize`.
    pub fn new_with_flags(
        lens: &'a Lens,
        image_focal: f64,
        image_crop: f64,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        mods: EnabledMods,
        reverse: bool,
    ) -> Result<Self> {
        let mut m = Self::new(lens, image_focal, image_crop, width, height, pixel_format, reverse)?;
        if mods.tca {
            m.enable_tca_correction();
        }
        if mods.vignetting {
            m.enable_vignetting_correction(image_focal.max(1.0), 10.0);
        }
        if mods.distortion {
            m.enable_distortion_correction();
        }
        if let Some(target) = mods.geometry {
            if lens.lens_type != target {
                m.enable_projection_transform(target);
            }
        }
        if let Some(scale) = mods.scale {
            if scale != 1.0 {
                m.enable_scaling(scale);
            }
        }
        Ok(m)
    }

    pub fn enable_distortion_correction(&mut self) -> bool {
        let Some(sample) =
            crate::interpolate::interpolate_distortion(self.lens, self.image_crop, self.image_focal)
        else {
            return false;
        };
        let t = sample.terms;
        let model = match sample.model {
            crate::calibration::DistortionModel::None => return false,
            crate::calibration::DistortionModel::Poly3 => Distortion::Poly3 { k1: t[0] },
            crate::calibration::DistortionModel::Poly5 => Distortion::Poly5 { k1: t[0], k2: t[1] },
            crate::calibration::DistortionModel::PTLens => Distortion::PTLens { a: t[0], b: t[1], c: t[2] },
            crate::calibration::DistortionModel::Acm => Distortion::Acm {
                k1: t[0],
                k2: t[1],
                k3: t[2],
                k4: t[3],
                k5: t[4],
            },
        };
        let (fwd_priority, inv_priority) = (priority::DISTORTION_FORWARD, priority::DISTORTION_INVERSE);
        if self.reverse {
            self.coord.push(CoordCallback {
                priority: fwd_priority,
                op: CoordOp::Distortion(model),
                forward: true,
            });
        } else {
            self.coord.push(CoordCallback {
                priority: inv_priority,
                op: CoordOp::Distortion(model),
                forward: false,
            });
        }
        self.mod_flags |= flags::DISTORTION;
        true
    }

    pub fn enable_tca_correction(&mut self) -> bool {
        let Some(sample) = crate::interpolate::interpolate_tca(self.lens, self.image_crop, self.image_focal)
        else {
            return false;
        };
        let t = sample.terms;
        let model = match sample.model {
            crate::calibration::TcaModel::None => return false,
            crate::calibration::TcaModel::Linear => Tca::Linear { k_r: t[0], k_b: t[1] },
            crate::calibration::TcaModel::Poly3 => Tca::Poly3 {
                v_r: t[0],
                v_b: t[1],
                c_r: t[2],
                c_b: t[3],
                b_r: t[4],
                b_b: t[5],
            },
            // Terms are interleaved red/blue per coefficient degree
            // (alpha0,beta0,alpha1,beta1,...), matching the interpolation
            // rescaling index convention in `interpolate::tca_scale`.
            crate::calibration::TcaModel::Acm => Tca::Acm {
                red: [t[0], t[2], t[4], t[6], t[8], t[10]],
                blue: [t[1], t[3], t[5], t[7], t[9], t[11]],
            },
        };
        self.subpixel.push(SubpixelCallback {
            priority: priority::TCA,
            tca: model,
            forward: self.reverse,
        });
        self.mod_flags |= flags::TCA;
        true
    }

    pub fn enable_vignetting_correction(&mut self, aperture: f64, distance: f64) -> bool {
        let Some(sample) = crate::interpolate::interpolate_vignetting(
            self.lens,
            self.image_crop,
            self.image_focal,
            aperture,
            distance,
        ) else {
            return false;
        };
        let t = sample.terms;
        let model = match sample.model {
            crate::calibration::VignettingModel::None => return false,
            crate::calibration::VignettingModel::Pa => Vignetting::Pa { k1: t[0], k2: t[1], k3: t[2] },
            crate::calibration::VignettingModel::Acm => Vignetting::Acm { k1: t[0], k2: t[1], k3: t[2] },
        };
        let (devig, vig_rev) = (priority::DEVIGNETTING, priority::VIGNETTING_REVERSE);
        let ns = 2.0 / self.width.hypot(self.height);
        self.color.push(ColorCallback {
            priority: if self.reverse { vig_rev } else { devig },
            vignetting: model,
            reverse: self.reverse,
            radius_rescale: ns / self.norm_scale,
        });
        self.mod_flags |= flags::VIGNETTING;
        true
    }

    pub fn enable_projection_transform(&mut self, target_type: LensType) -> bool {
        let Some(conversion) = projection::build(
            self.lens.lens_type,
            target_type,
            self.real_focal,
            self.normalized_in_mm,
        ) else {
            return false;
        };
        self.coord.push(CoordCallback {
            priority: priority::GEOMETRY,
            op: CoordOp::Geometry(Box::new(move |x, y| conversion.apply(x, y))),
            forward: true,
        });
        self.mod_flags |= flags::GEOMETRY;
        true
    }

    /// `factor == 0.0` requests auto-scale.
    pub fn enable_scaling(&mut self, factor: f64) -> bool {
        let scale = if factor == 0.0 {
            let s = self.auto_scale_internal(self.reverse);
            if s == 0.0 {
                return false;
            }
            s
        } else {
            factor
        };
        let priority = if self.reverse { priority::SCALE_REVERSE } else { priority::SCALE };
        let op_scale = if self.reverse { scale } else { 1.0 / scale };
        self.coord.push(CoordCallback {
            priority,
            op: CoordOp::Scale(op_scale),
            forward: true,
        });
        self.mod_flags |= flags::SCALE;
        true
    }

    pub fn enable_perspective_correction(&mut self, xs: &[f64], ys: &[f64], d: f64) -> bool {
        if xs.is_empty() {
            return false;
        }
        let shifted_x: Vec<f64> = xs.iter().map(|&x| x * self.norm_scale - self.center_x).collect();
        let shifted_y: Vec<f64> = ys.iter().map(|&y| y * self.norm_scale - self.center_y).collect();
        let f_normalized = self.real_focal / self.normalized_in_mm;
        match crate::perspective::build(&shifted_x, &shifted_y, f_normalized, d, self.reverse) {
            Ok(params) => {
                self.perspective = Some(params);
                self.mod_flags |= flags::PERSPECTIVE;
                true
            }
            Err(e) => {
                log::warn!("perspective correction not enabled: {e}");
                false
            }
        }
    }

    fn auto_scale_internal(&self, reverse: bool) -> f64 {
        crate::autoscale::auto_scale(
            &self.coord,
            self.width,
            self.height,
            self.norm_scale,
            !self.subpixel.is_empty(),
            reverse,
        )
    }

    pub fn get_auto_scale(&self, reverse: bool) -> f64 {
        self.auto_scale_internal(reverse)
    }

    pub fn get_mod_flags(&self) -> u32 {
        self.mod_flags
    }

    fn to_normalized(&self, xu: f64, yu: f64) -> (f64, f64) {
        (xu * self.norm_scale - self.center_x, yu * self.norm_scale - self.center_y)
    }

    fn from_normalized(&self, x: f64, y: f64) -> (f64, f64) {
        ((x + self.center_x) * self.norm_unscale, (y + self.center_y) * self.norm_unscale)
    }

    /// Maps one row of `w` undistorted-pixel coordinates to distorted pixel
    /// coordinates. `out` must hold `2 * w` floats (`x0, y0, x1, y1, ...`).
    pub fn apply_geometry_distortion(&self, xu: f64, yu: f64, w: u32, out: &mut [f64]) -> bool {
        if self.coord.is_empty() && self.perspective.is_none() {
            return false;
        }
        let mut points: Vec<(f64, f64)> = (0..w).map(|i| self.to_normalized(xu + i as f64, yu)).collect();
        self.coord.apply(&mut points);
        if let Some(p) = &self.perspective {
            for point in points.iter_mut() {
                *point = p.apply(point.0, point.1);
            }
        }
        for (i, p) in points.iter().enumerate() {
            let (px, py) = self.from_normalized(p.0, p.1);
            out[2 * i] = px;
            out[2 * i + 1] = py;
        }
        true
    }

    /// Maps one row of `w` undistorted-pixel coordinates to per-channel
    /// distorted pixel coordinates. `out` must hold `6 * w` floats
    /// (`xr,yr,xg,yg,xb,yb` per sample).
    pub fn apply_subpixel_distortion(&self, xu: f64, yu: f64, w: u32, out: &mut [f64]) -> bool {
        if self.subpixel.is_empty() {
            return false;
        }
        let mut rgb: Vec<((f64, f64), (f64, f64), (f64, f64))> = (0..w)
            .map(|i| {
                let p = self.to_normalized(xu + i as f64, yu);
                (p, p, p)
            })
            .collect();
        self.subpixel.apply(&mut rgb);
        for (i, (r, g, b)) in rgb.iter().enumerate() {
            let (rx, ry) = self.from_normalized(r.0, r.1);
            let (gx, gy) = self.from_normalized(g.0, g.1);
            let (bx, by) = self.from_normalized(b.0, b.1);
            out[6 * i] = rx;
            out[6 * i + 1] = ry;
            out[6 * i + 2] = gx;
            out[6 * i + 3] = gy;
            out[6 * i + 4] = bx;
            out[6 * i + 5] = by;
        }
        true
    }

    /// Combined stage 2+3: geometry transform followed by per-channel TCA.
    /// `out` must hold `6 * w` floats, same layout as
    /// [`Self::apply_subpixel_distortion`].
    pub fn apply_subpixel_geometry_distortion(&self, xu: f64, yu: f64, w: u32, out: &mut [f64]) -> bool {
        if self.coord.is_empty() && self.subpixel.is_empty() && self.perspective.is_none() {
            return false;
        }
        let mut points: Vec<(f64, f64)> = (0..w).map(|i| self.to_normalized(xu + i as f64, yu)).collect();
        self.coord.apply(&mut points);
        if let Some(p) = &self.perspective {
            for point in points.iter_mut() {
                *point = p.apply(point.0, point.1);
            }
        }
        let mut rgb: Vec<((f64, f64), (f64, f64), (f64, f64))> =
            points.iter().map(|&p| (p, p, p)).collect();
        self.subpixel.apply(&mut rgb);
        for (i, (r, g, b)) in rgb.iter().enumerate() {
            let (rx, ry) = self.from_normalized(r.0, r.1);
            let (gx, gy) = self.from_normalized(g.0, g.1);
            let (bx, by) = self.from_normalized(b.0, b.1);
            out[6 * i] = rx;
            out[6 * i + 1] = ry;
            out[6 * i + 2] = gx;
            out[6 * i + 3] = gy;
            out[6 * i + 4] = bx;
            out[6 * i + 5] = by;
        }
        true
    }

    /// Row-parallel sibling of [`Modifier::apply_subpixel_geometry_distortion`].
    /// Splits `height` independent rows across a thread pool; each row's
    /// `6*w` floats land at `out[row * 6 * w ..]`. Additive convenience for
    /// batch callers — the single-row method remains the primitive contract
    /// and both produce identical output.
    pub fn apply_subpixel_geometry_distortion_parallel(
        &self,
        xu: f64,
        yu: f64,
        w: u32,
        height: u32,
        out: &mut [f64],
    ) -> bool {
        if self.coord.is_empty() && self.subpixel.is_empty() && self.perspective.is_none() {
            return false;
        }
        let row_len = 6 * w as usize;
        out.par_chunks_mut(row_len)
            .take(height as usize)
            .enumerate()
            .for_each(|(row, chunk)| {
                self.apply_subpixel_geometry_distortion(xu, yu + row as f64, w, chunk);
            });
        true
    }

    /// Applies the color chain (vignetting) to one row of `w` pixels in
    /// place, at normalized coordinates starting at `(x, y)` stepping by
    /// `norm_scale` along x.
    pub fn apply_color_modification(
        &self,
        pixels: &mut [Sample],
        x: f64,
        y: f64,
        w: u32,
        layout: ComponentLayout,
    ) -> bool {
        if self.color.is_empty() {
            return false;
        }
        let xy: Vec<(f64, f64)> = (0..w).map(|i| self.to_normalized(x + i as f64, y)).collect();
        self.color.apply(pixels, &xy, &layout);
        true
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationSet;

    fn test_lens() -> Lens {
        let mut set = CalibrationSet::new(1.5, 1.5);
        set.distortion.push(crate::calibration::DistortionSample {
            model: crate::calibration::DistortionModel::Poly3,
            focal_mm: 20.0,
            real_focal_mm: None,
            terms: [0.02, 0.0, 0.0, 0.0, 0.0],
        });
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

    #[test]
    fn rejects_tiny_images() {
        let lens = test_lens();
        let err = Modifier::new(&lens, 20.0, 1.5, 1, 1, PixelFormat::U8, false).unwrap_err();
        assert!(matches!(err, Error::ImageTooSmall { .. }));
    }

    #[test]
    fn pixel_centre_maps_to_shifted_origin() {
        let lens = test_lens();
        let m = Modifier::new(&lens, 20.0, 1.5, 100, 100, PixelFormat::U8, false).unwrap();
        let (x, y) = m.to_normalized(0.0, 0.0);
        assert!((x + m.center_x).abs() < 1e-9);
        assert!((y + m.center_y).abs() < 1e-9);
    }

    #[test]
    fn distortion_correction_enables_and_sets_flag() {
        let lens = test_lens();
        let mut m = Modifier::new(&lens, 20.0, 1.5, 100, 100, PixelFormat::U8, false).unwrap();
        assert!(m.enable_distortion_correction());
        assert_eq!(m.get_mod_flags() & flags::DISTORTION, flags::DISTORTION);
    }

    #[test]
    fn distortion_interpolates_on_nominal_focal_not_real_focal() {
        // Two distortion samples bracket a wide focal range; the one at the
        // nominal focal carries a real-focal calibration that differs
        // sharply from it. Calibration lookups must key on the nominal
        // focal (image_focal), so enabling distortion correction at the
        // same nominal focal used to construct the modifier must return
        // the bracketed sample's coefficient exactly, not an interpolated
        // value obtained by querying at the (very different) real focal.
        let mut set = CalibrationSet::new(1.5, 1.5);
        set.distortion.push(crate::calibration::DistortionSample {
            model: crate::calibration::DistortionModel::Poly3,
            focal_mm: 10.0,
            real_focal_mm: Some(14.0),
            terms: [0.05, 0.0, 0.0, 0.0, 0.0],
        });
        set.distortion.push(crate::calibration::DistortionSample {
            model: crate::calibration::DistortionModel::Poly3,
            focal_mm: 40.0,
            real_focal_mm: Some(40.0),
            terms: [0.01, 0.0, 0.0, 0.0, 0.0],
        });
        let lens = Lens {
            maker: "Test".into(),
            model: "Test".into(),
            mounts: vec![],
            min_focal_mm: 10.0,
            max_focal_mm: 40.0,
            min_aperture: 2.8,
            max_aperture: 22.0,
            lens_type: LensType::Rectilinear,
            center_x: 0.0,
            center_y: 0.0,
            calibrations: vec![set],
        };
        let mut m = Modifier::new(&lens, 10.0, 1.5, 100, 100, PixelFormat::U8, false).unwrap();
        assert_eq!(m.real_focal, 14.0);
        assert!(m.enable_distortion_correction());
        let Some(CoordCallback { op: CoordOp::Distortion(Distortion::Poly3 { k1 }), .. }) =
            m.coord.iter().next()
        else {
            panic!("expected a Poly3 distortion callback");
        };
        assert_eq!(*k1, 0.05);
    }

    #[test]
    fn parallel_rows_match_sequential_rows() {
        let lens = test_lens();
        let mut m = Modifier::new(&lens, 20.0, 1.5, 100, 100, PixelFormat::U8, false).unwrap();
        m.enable_distortion_correction();
        let w = 8u32;
        let height = 4u32;
        let mut sequential = vec![0.0; (6 * w * height) as usize];
        for row in 0..height {
            let out = &mut sequential[(6 * w * row) as usize..(6 * w * (row + 1)) as usize];
            m.apply_subpixel_geometry_distortion(0.0, row as f64, w, out);
        }
        let mut parallel = vec![0.0; (6 * w * height) as usize];
        assert!(m.apply_subpixel_geometry_distortion_parallel(0.0, 0.0, w, height, &mut parallel));
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn vignetting_rescale_is_not_one_for_rectangular_images() {
        // `ns / norm_scale` rescales the half-height-normalized coordinates
        // `to_normalized` produces into the half-diagonal-normalized system
        // the PA/ACM polynomial expects. For a non-square image this factor
        // is not 1, and omitting it evaluates the polynomial at the wrong
        // radius everywhere off-center.
        let mut set = CalibrationSet::new(1.5, 1.5);
        set.vignetting.push(crate::calibration::VignettingSample {
            model: crate::calibration::VignettingModel::Pa,
            focal_mm: 20.0,
            aperture: 10.0,
            distance_m: 10.0,
            terms: [-0.3, 0.1, -0.02],
        });
        let lens = Lens {
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
        };
        let mut m = Modifier::new(&lens, 20.0, 1.5, 200, 100, PixelFormat::U8, false).unwrap();
        assert!(m.enable_vignetting_correction(10.0, 10.0));
        let ns = 2.0 / m.width.hypot(m.height);
        let expected = ns / m.norm_scale;
        let cb = m.color.iter().next().expect("expected a vignetting callback");
        assert!((cb.radius_rescale - expected).abs() < 1e-12);
        assert!((cb.radius_rescale - 1.0).abs() > 1e-6);
    }

    #[test]
    fn zero_point_perspective_is_rejected() {
        let lens = test_lens();
        let mut m = Modifier::new(&lens, 20.0, 1.5, 100, 100, PixelFormat::U8, false).unwrap();
        let before = m.get_mod_flags();
        assert!(!m.enable_perspective_correction(&[], &[], 0.0));
        assert_eq!(m.get_mod_flags(), before);
    }
}
