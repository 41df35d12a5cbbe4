//! Lens projection types and the conversions between them. Equirectangular
//! is the pivot: a pair lacking a direct conversion is composed as
//! `from -> equirectangular -> to`.

use std::f64::consts::PI;

const THOBY_K1: f64 = 1.47;
const THOBY_K2: f64 = 0.713;
const EPSLN: f64 = 1.0e-10;
/// Sentinel for "undefined" output, matching the original's `1.6e16F`.
pub const INVALID: f64 = 1.6e16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LensType {
    Rectilinear,
    Fisheye,
    Panoramic,
    Equirectangular,
    FisheyeOrthographic,
    FisheyeStereographic,
    FisheyeEquisolid,
    FisheyeThoby,
}

/// `dist = real_focal_mm / normalized_in_mm` as seeded by
/// `AddCoordCallbackGeometry`; every formula below is expressed in these
/// units, with `inv_dist = 1 / dist`.
#[derive(Debug, Clone, Copy)]
struct Params {
    dist: f64,
    inv_dist: f64,
}

/// A reusable per-point conversion. Build once per (from, to, focal) via
/// [`build`], then call [`Conversion::apply`] per point.
pub struct Conversion {
    steps: Vec<Step>,
}

enum Step {
    Direct(fn(Params, f64, f64) -> (f64, f64), Params),
}

fn params(focal: f64, normalized_in_mm: f64) -> Params {
    let dist = focal / normalized_in_mm;
    Params {
        dist,
        inv_dist: 1.0 / dist,
    }
}

/// Returns `None` if `from == to` (no-op, matches the original's early
/// return) or either type is otherwise unconvertible.
pub fn build(from: LensType, to: LensType, focal: f64, normalized_in_mm: f64) -> Option<Conversion> {
    use LensType::*;
    if from == to {
        return None;
    }
    let p = params(focal, normalized_in_mm);

    let direct: Option<fn(Params, f64, f64) -> (f64, f64)> = match (from, to) {
        (Rectilinear, Fisheye) => Some(fisheye_rect),
        (Rectilinear, Panoramic) => Some(panoramic_rect),
        (Rectilinear, Equirectangular) => Some(erect_rect),
        (Fisheye, Rectilinear) => Some(rect_fisheye),
        (Fisheye, Panoramic) => Some(panoramic_fisheye),
        (Fisheye, Equirectangular) => Some(erect_fisheye),
        (Panoramic, Rectilinear) => Some(rect_panoramic),
        (Panoramic, Fisheye) => Some(fisheye_panoramic),
        (Panoramic, Equirectangular) => Some(erect_panoramic),
        (Equirectangular, Rectilinear) => Some(rect_erect),
        (Equirectangular, Fisheye) => Some(fisheye_erect),
        (Equirectangular, Panoramic) => Some(panoramic_erect),
        _ => None,
    };

    if let Some(f) = direct {
        return Some(Conversion {
            steps: vec![Step::Direct(f, p)],
        });
    }

    // Pivot through equirectangular: first `to`-side (erect -> to), then
    // `from`-side (from -> erect), matching the registration order in
    // AddCoordCallbackGeometry (erect->to callback is pushed before
    // from->erect, and callbacks of equal priority execute in push order).
    let to_step: fn(Params, f64, f64) -> (f64, f64) = match to {
        Rectilinear => rect_erect,
        Fisheye => fisheye_erect,
        Panoramic => panoramic_erect,
        FisheyeOrthographic => orthographic_erect,
        FisheyeStereographic => stereographic_erect,
        FisheyeEquisolid => equisolid_erect,
        FisheyeThoby => thoby_erect,
        Equirectangular => identity,
    };
    let from_step: fn(Params, f64, f64) -> (f64, f64) = match from {
        Rectilinear => erect_rect,
        Fisheye => erect_fisheye,
        Panoramic => erect_panoramic,
        FisheyeOrthographic => erect_orthographic,
        FisheyeStereographic => erect_stereographic,
        FisheyeEquisolid => erect_equisolid,
        FisheyeThoby => erect_thoby,
        Equirectangular => identity,
    };
    Some(Conversion {
        steps: vec![Step::Direct(to_step, p), Step::Direct(from_step, p)],
    })
}

fn identity(_p: Params, x: f64, y: f64) -> (f64, f64) {
    (x, y)
}

impl Conversion {
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let mut cur = (x, y);
        for step in &self.steps {
            let Step::Direct(f, p) = step;
            cur = f(*p, cur.0, cur.1);
        }
        cur
    }
}

fn fisheye_rect(p: Params, x: f64, y: f64) -> (f64, f64) {
    let r = (x * x + y * y).sqrt();
    let theta = r * p.inv_dist;
    let rho = if theta >= PI / 2.0 {
        INVALID
    } else if theta == 0.0 {
        1.0
    } else {
        theta.tan() / theta
    };
    (rho * x, rho * y)
}

fn rect_fisheye(p: Params, x: f64, y: f64) -> (f64, f64) {
    let r = (x * x + y * y).sqrt() * p.inv_dist;
    let theta = if r == 0.0 { 1.0 } else { r.atan() / r };
    (theta * x, theta * y)
}

fn panoramic_rect(p: Params, x: f64, y: f64) -> (f64, f64) {
    let xs = x * p.inv_dist;
    (p.dist * xs.tan(), y / xs.cos())
}

fn rect_panoramic(p: Params, x: f64, y: f64) -> (f64, f64) {
    let xo = p.dist * (x * p.inv_dist).atan();
    let yo = y * (xo * p.inv_dist).cos();
    (xo, yo)
}

fn fisheye_panoramic(p: Params, x: f64, y: f64) -> (f64, f64) {
    let r = (x * x + y * y).sqrt();
    let theta = r * p.inv_dist;
    let s = if theta == 0.0 { p.inv_dist } else { theta.sin() / r };
    let vx = theta.cos();
    let vy = s * x;
    let xo = p.dist * vy.atan2(vx);
    let yo = p.dist * s * y / (vx * vx + vy * vy).sqrt();
    (xo, yo)
}

fn panoramic_fisheye(p: Params, x: f64, y: f64) -> (f64, f64) {
    let phi = x * p.inv_dist;
    let s = p.dist * phi.sin();
    let r = (s * s + y * y).sqrt();
    let theta = if r == 0.0 {
        0.0
    } else {
        p.dist * r.atan2(p.dist * phi.cos()) / r
    };
    (theta * s, theta * y)
}

fn erect_rect(p: Params, x: f64, y: f64) -> (f64, f64) {
    let mut phi = x * p.inv_dist;
    let mut theta = -y * p.inv_dist + PI / 2.0;
    if theta < 0.0 {
        theta = -theta;
        phi += PI;
    }
    if theta > PI {
        theta = 2.0 * PI - theta;
        phi += PI;
    }
    (p.dist * phi.tan(), p.dist / (theta.tan() * phi.cos()))
}

fn rect_erect(p: Params, x: f64, y: f64) -> (f64, f64) {
    (
        p.dist * x.atan2(p.dist),
        p.dist * y.atan2((p.dist * p.dist + x * x).sqrt()),
    )
}

fn erect_fisheye(p: Params, x: f64, y: f64) -> (f64, f64) {
    let mut phi = x * p.inv_dist;
    let mut theta = -y * p.inv_dist + PI / 2.0;
    if theta < 0.0 {
        theta = -theta;
        phi += PI;
    }
    if theta > PI {
        theta = 2.0 * PI - theta;
        phi += PI;
    }
    let s = theta.sin();
    let vx = s * phi.sin();
    let vy = theta.cos();
    let mut r = (vx * vx + vy * vy).sqrt();
    let theta2 = p.dist * r.atan2(s * phi.cos());
    r = 1.0 / r;
    (theta2 * vx * r, theta2 * vy * r)
}

fn fisheye_erect(p: Params, x: f64, y: f64) -> (f64, f64) {
    let r = (x * x + y * y).sqrt();
    let theta = r * p.inv_dist;
    let s = if theta == 0.0 { p.inv_dist } else { theta.sin() / r };
    let vx = theta.cos();
    let vy = s * x;
    let xo = p.dist * vy.atan2(vx);
    let yo = p.dist * (s * y / (vx * vx + vy * vy).sqrt()).atan();
    (xo, yo)
}

fn erect_panoramic(p: Params, x: f64, y: f64) -> (f64, f64) {
    (x, p.dist * (y * p.inv_dist).tan())
}

fn panoramic_erect(p: Params, x: f64, y: f64) -> (f64, f64) {
    (x, p.dist * (y * p.inv_dist).atan())
}

fn orthographic_erect(p: Params, x: f64, y: f64) -> (f64, f64) {
    let r = (x * x + y * y).sqrt();
    let theta = if r < p.dist {
        (r * p.inv_dist).asin()
    } else {
        PI / 2.0
    };
    let phi = y.atan2(x);
    let s = if theta == 0.0 {
        p.inv_dist
    } else {
        theta.sin() / (theta * p.dist)
    };
    let vx = theta.cos();
    let vy = s * p.dist * theta * phi.cos();
    let xo = p.dist * vy.atan2(vx);
    let yo = p.dist * (s * p.dist * theta * phi.sin() / (vx * vx + vy * vy).sqrt()).atan();
    (xo, yo)
}

fn erect_orthographic(p: Params, x: f64, y: f64) -> (f64, f64) {
    let mut phi = x * p.inv_dist;
    let mut theta = -y * p.inv_dist + PI / 2.0;
    if theta < 0.0 {
        theta = -theta;
        phi += PI;
    }
    if theta > PI {
        theta = 2.0 * PI - theta;
        phi += PI;
    }
    let s = theta.sin();
    let vx = s * phi.sin();
    let vy = theta.cos();
    let theta2 = (vx * vx + vy * vy).sqrt().atan2(s * phi.cos());
    let phi2 = vy.atan2(vx);
    let rho = p.dist * theta2.sin();
    (rho * phi2.cos(), rho * phi2.sin())
}

fn stereographic_erect(p: Params, x: f64, y: f64) -> (f64, f64) {
    let x = x * p.inv_dist;
    let y = y * p.inv_dist;
    let rh = (x * x + y * y).sqrt();
    let c = 2.0 * (rh / 2.0).atan();
    let sinc = c.sin();
    let cosc = c.cos();

    if rh.abs() <= EPSLN {
        return (0.0, INVALID);
    }
    let yo = (y * sinc / rh).asin() * p.dist;
    let xo = if cosc.abs() >= EPSLN || x.abs() >= EPSLN {
        (x * sinc).atan2(cosc * rh) * p.dist
    } else {
        INVALID
    };
    (xo, yo)
}

fn erect_stereographic(p: Params, x: f64, y: f64) -> (f64, f64) {
    let lon = x * p.inv_dist;
    let lat = y * p.inv_dist;
    let cosphi = lat.cos();
    let ksp = p.dist * 2.0 / (1.0 + cosphi * lon.cos());
    (ksp * cosphi * lon.sin(), ksp * lat.sin())
}

fn equisolid_erect(p: Params, x: f64, y: f64) -> (f64, f64) {
    let r = (x * x + y * y).sqrt();
    let theta = if r < p.dist * 2.0 {
        2.0 * (r * p.inv_dist / 2.0).asin()
    } else {
        PI / 2.0
    };
    let phi = y.atan2(x);
    let s = if theta == 0.0 {
        p.inv_dist
    } else {
        theta.sin() / (p.dist * theta)
    };
    let vx = theta.cos();
    let vy = s * p.dist * theta * phi.cos();
    let xo = p.dist * vy.atan2(vx);
    let yo = p.dist * (s * p.dist * theta * phi.sin() / (vx * vx + vy * vy).sqrt()).atan();
    (xo, yo)
}

fn erect_equisolid(p: Params, x: f64, y: f64) -> (f64, f64) {
    let lambda = x / p.dist;
    let phi = y / p.dist;
    if (phi.cos() * lambda.cos() + 1.0).abs() <= EPSLN {
        return (INVALID, INVALID);
    }
    let k1 = (2.0 / (1.0 + phi.cos() * lambda.cos())).sqrt();
    (p.dist * k1 * phi.cos() * lambda.sin(), p.dist * k1 * phi.sin())
}

fn thoby_erect(p: Params, x: f64, y: f64) -> (f64, f64) {
    let rho = (x * x + y * y).sqrt() * p.inv_dist;
    if !(-THOBY_K1..=THOBY_K1).contains(&rho) {
        return (INVALID, INVALID);
    }
    let theta = (rho / THOBY_K1).asin() / THOBY_K2;
    let phi = y.atan2(x);
    let s = if theta == 0.0 {
        p.inv_dist
    } else {
        theta.sin() / (p.dist * theta)
    };
    let vx = theta.cos();
    let vy = s * p.dist * theta * phi.cos();
    let xo = p.dist * vy.atan2(vx);
    let yo = p.dist * (s * p.dist * theta * phi.sin() / (vx * vx + vy * vy).sqrt()).atan();
    (xo, yo)
}

fn erect_thoby(p: Params, x: f64, y: f64) -> (f64, f64) {
    let mut phi = x * p.inv_dist;
    let mut theta = -y * p.inv_dist + PI / 2.0;
    if theta < 0.0 {
        theta = -theta;
        phi += PI;
    }
    if theta > PI {
        theta = 2.0 * PI - theta;
        phi += PI;
    }
    let s = theta.sin();
    let vx = s * phi.sin();
    let vy = theta.cos();
    let theta2 = (vx * vx + vy * vy).sqrt().atan2(s * phi.cos());
    let phi2 = vy.atan2(vx);
    let rho = THOBY_K1 * p.dist * (theta2 * THOBY_K2).sin();
    (rho * phi2.cos(), rho * phi2.sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_type_has_no_conversion() {
        assert!(build(LensType::Rectilinear, LensType::Rectilinear, 20.0, 21.6).is_none());
    }

    #[test]
    fn rect_fisheye_roundtrip_near_center() {
        let to_fish = build(LensType::Rectilinear, LensType::Fisheye, 8.0, 21.6).unwrap();
        let to_rect = build(LensType::Fisheye, LensType::Rectilinear, 8.0, 21.6).unwrap();
        let (fx, fy) = to_fish.apply(0.05, 0.03);
        let (rx, ry) = to_rect.apply(fx, fy);
        assert!((rx - 0.05).abs() < 1e-6);
        assert!((ry - 0.03).abs() < 1e-6);
    }

    #[test]
    fn pivot_path_thoby_to_stereographic() {
        let c = build(
            LensType::FisheyeThoby,
            LensType::FisheyeStereographic,
            8.0,
            21.6,
        )
        .unwrap();
        let (x, y) = c.apply(0.1, 0.05);
        assert!(x.is_finite());
        assert!(y.is_finite());
    }
}
