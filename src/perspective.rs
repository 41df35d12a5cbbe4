//! Four-point (up to eight-point) perspective correction: fits a rotation
//! that maps user-picked control points (meant to lie on vertical/horizontal
//! lines, or on a circle) onto an upright perspective projection.

use crate::error::{Error, Result};
use crate::svd::{svd, Matrix};
use glam::{DMat3, DVec3};

fn central_projection(c: (f64, f64, f64), plane_distance: f64) -> (f64, f64) {
    let stretch = plane_distance / c.2;
    (c.0 * stretch, c.1 * stretch)
}

fn normalize(x: f64, y: f64) -> (f64, f64) {
    let len = (x * x + y * y).sqrt();
    (x / len, y / len)
}

/// Fits an ellipse through exactly 5 points and returns its vertex
/// (closest point on the minor axis) plus its center.
fn ellipse_analysis(x: &[f64], y: &[f64], f_normalized: f64) -> Result<(f64, f64, f64, f64)> {
    let mut m: Matrix = Vec::with_capacity(5);
    for i in 0..5 {
        m.push(vec![x[i] * x[i], x[i] * y[i], y[i] * y[i], x[i], y[i], 1.0]);
    }
    let p = svd(m)?;
    let a = p[0];
    let b = p[1] / 2.0;
    let c = p[2];
    let d = p[3] / 2.0;
    let f = p[4] / 2.0;
    let g = p[5];

    let dd = b * b - a * c;
    let x0 = (c * d - b * f) / dd;
    let y0 = (a * f - b * d) / dd;

    let mut phi = 0.5 * (2.0 * b / (a - c)).atan();
    if a > c {
        phi += std::f64::consts::FRAC_PI_2;
    }

    let nn = 2.0 * (a * f * f + c * d * d + g * b * b - 2.0 * b * d * f - a * c * g) / dd;
    let ss = ((a - c).powi(2) + 4.0 * b * b).sqrt();
    let rr = a + c;
    let mut a_ = (nn / (ss - rr)).sqrt();
    let mut b_ = (nn / (-ss - rr)).sqrt();
    if a_ < b_ {
        std::mem::swap(&mut a_, &mut b_);
        phi -= std::f64::consts::FRAC_PI_2;
    }
    phi = (phi + std::f64::consts::FRAC_PI_2).rem_euclid(std::f64::consts::PI)
        - std::f64::consts::FRAC_PI_2;

    let mut radius_vertex = -f_normalized / ((a_ / b_).powi(2) - 1.0).sqrt();
    if (x[0] - x0) * (y[1] - y0) < (x[1] - x0) * (y[0] - y0) {
        radius_vertex *= -1.0;
    }

    let x_v = radius_vertex * phi.sin();
    let y_v = radius_vertex * phi.cos();
    Ok((x_v, y_v, x0, y0))
}

/// Intersection of the two lines through `(x[0],y[0])-(x[1],y[1])` and
/// `(x[2],y[2])-(x[3],y[3])`.
fn intersection(x: &[f64], y: &[f64]) -> (f64, f64) {
    let a = x[0] * y[1] - y[0] * x[1];
    let b = x[2] * y[3] - y[2] * x[3];
    let c = (x[0] - x[1]) * (y[2] - y[3]) - (y[0] - y[1]) * (x[2] - x[3]);
    let num_x = a * (x[2] - x[3]) - b * (x[0] - x[1]);
    let num_y = a * (y[2] - y[3]) - b * (y[0] - y[1]);
    (num_x / c, num_y / c)
}

fn rotate_rho_delta(rho: f64, delta: f64, x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    let (sr, cr) = (rho.sin(), rho.cos());
    let (sd, cd) = (delta.sin(), delta.cos());
    // Row-major, matches the forward-then-tilt composition used throughout
    // this module's angle derivation.
    let m = DMat3::from_cols(
        DVec3::new(cr, sr * sd, -sr * cd),
        DVec3::new(0.0, cd, sd),
        DVec3::new(sr, -cr * sd, cr * cd),
    );
    let v = m * DVec3::new(x, y, z);
    (v.x, v.y, v.z)
}

fn rotate_rho_delta_rho_h(rho: f64, delta: f64, rho_h: f64, x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    let (sr, cr) = (rho.sin(), rho.cos());
    let (sd, cd) = (delta.sin(), delta.cos());
    let (srh, crh) = (rho_h.sin(), rho_h.cos());
    let m = DMat3::from_cols(
        DVec3::new(cr * crh - sr * cd * srh, sr * sd, -cr * srh - sr * cd * crh),
        DVec3::new(sd * srh, cd, sd * crh),
        DVec3::new(sr * crh + cr * cd * srh, -cr * sd, -sr * srh + cr * cd * crh),
    );
    let v = m * DVec3::new(x, y, z);
    (v.x, v.y, v.z)
}

fn determine_rho_h(
    rho: f64,
    delta: f64,
    x: &[f64; 2],
    y: &[f64; 2],
    f_normalized: f64,
    center_x: f64,
    center_y: f64,
) -> f64 {
    let p0 = rotate_rho_delta(rho, delta, x[0], y[0], f_normalized);
    let p1 = rotate_rho_delta(rho, delta, x[1], y[1], f_normalized);
    let (x0, y0, z0) = p0;
    let (x1, y1, _z1) = p1;
    if y0 == y1 {
        return if y0 == 0.0 { f64::NAN } else { 0.0 };
    }
    let (dx, dz) = central_projection((x1 - x0, p1.2 - z0, y1 - y0), -y0);
    let x_h = x0 + dx;
    let z_h = z0 + dz;
    let mut rho_h = if z_h == 0.0 {
        if x_h > 0.0 {
            0.0
        } else {
            std::f64::consts::PI
        }
    } else {
        std::f64::consts::FRAC_PI_2 - (x_h / z_h).atan()
    };
    if rotate_rho_delta_rho_h(rho, delta, rho_h, center_x, center_y, f_normalized).2 < 0.0 {
        rho_h -= std::f64::consts::PI;
    }
    rho_h
}

struct Angles {
    rho: f64,
    delta: f64,
    rho_h: f64,
    alpha: f64,
    center_x: f64,
    center_y: f64,
    f_normalized: f64,
}

/// Solves for the rotation angles that bring `count` control points (4 to
/// 8, in normalized coordinates) into an upright perspective. 4/6/8-point
/// sets define two vertical lines (line-intersection gives the vertical
/// vanishing point), 5/7-point sets lie on a circle (ellipse fit gives it
/// instead).
fn calculate_angles(x: &[f64], y: &[f64], mut f_normalized: f64) -> Result<Angles> {
    let n = x.len();
    let (center_x, center_y) = if n == 6 {
        (x[..4].iter().sum::<f64>() / 4.0, y[..4].iter().sum::<f64>() / 4.0)
    } else {
        (x.iter().sum::<f64>() / n as f64, y.iter().sum::<f64>() / n as f64)
    };
    let mut center_x = center_x;
    let mut center_y = center_y;

    let (x_v, y_v) = if n == 5 || n == 7 {
        let (xv, yv, cx, cy) = ellipse_analysis(&x[..5], &y[..5], f_normalized)?;
        center_x = cx;
        center_y = cy;
        (xv, yv)
    } else {
        let (xv, yv) = intersection(&x[..4], &y[..4]);
        if n == 8 {
            let (xh, yh) = intersection(&x[4..8], &y[4..8]);
            let radicand = -xh * xv - yh * yv;
            if radicand >= 0.0 {
                f_normalized = radicand.sqrt();
            }
        }
        (xv, yv)
    };

    let rho = (-x_v / f_normalized).atan();
    let mut delta = std::f64::consts::FRAC_PI_2
        - (-y_v / (x_v * x_v + f_normalized * f_normalized).sqrt()).atan();
    if rotate_rho_delta(rho, delta, center_x, center_y, f_normalized).2 < 0.0 {
        delta -= std::f64::consts::PI;
    }

    let mut swapped = false;
    let (cx, cy);
    match n {
        4 | 6 | 8 => {
            let a = normalize(x_v - x[0], y_v - y[0]);
            let b = normalize(x_v - x[2], y_v - y[2]);
            cx = a.0 + b.0;
            cy = a.1 + b.1;
        }
        5 => {
            cx = x_v - center_x;
            cy = y_v - center_y;
        }
        _ => {
            cx = x[5] - x[6];
            cy = y[5] - y[6];
        }
    }

    let alpha;
    if n == 7 {
        let (x5, y5) = central_projection(rotate_rho_delta(rho, delta, x[5], y[5], f_normalized), f_normalized);
        let (x6, y6) = central_projection(rotate_rho_delta(rho, delta, x[6], y[6], f_normalized), f_normalized);
        let mut a = -(y6 - y5).atan2(x6 - x5);
        if cx.abs() > cy.abs() {
            a = -(a - std::f64::consts::FRAC_PI_2).rem_euclid(std::f64::consts::PI) - std::f64::consts::FRAC_PI_2;
        } else {
            a = -a.rem_euclid(std::f64::consts::PI) - std::f64::consts::FRAC_PI_2;
        }
        alpha = a;
    } else if cx.abs() > cy.abs() {
        swapped = true;
        alpha = if rho > 0.0 { std::f64::consts::FRAC_PI_2 } else { -std::f64::consts::FRAC_PI_2 };
    } else {
        alpha = 0.0;
    }

    let rho_h = if n == 4 {
        let (xp, yp) = if swapped {
            ([center_x, center_x], [center_y - 1.0, center_y + 1.0])
        } else {
            ([center_x - 1.0, center_x + 1.0], [center_y, center_y])
        };
        let r = determine_rho_h(rho, delta, &xp, &yp, f_normalized, center_x, center_y);
        if r.is_nan() {
            0.0
        } else {
            r
        }
    } else if n == 5 || n == 7 {
        0.0
    } else {
        let x01 = [x[4], x[5]];
        let y01 = [y[4], y[5]];
        let r = determine_rho_h(rho, delta, &x01, &y01, f_normalized, center_x, center_y);
        if r.is_nan() {
            if n == 8 {
                let x23 = [x[6], x[7]];
                let y23 = [y[6], y[7]];
                let r2 = determine_rho_h(rho, delta, &x23, &y23, f_normalized, center_x, center_y);
                if r2.is_nan() {
                    0.0
                } else {
                    r2
                }
            } else {
                0.0
            }
        } else {
            r
        }
    };

    Ok(Angles {
        rho,
        delta,
        rho_h,
        alpha,
        center_x,
        center_y,
        f_normalized,
    })
}

/// Quaternion-composed rotation matrix for `R_y(rho2) . Rx(delta) . R_y(rho1)`,
/// blended towards identity (or doubled) by strength `d in [-1, 1]`.
fn generate_rotation_matrix(rho1: f64, delta: f64, rho2: f64, d: f64) -> [[f64; 3]; 3] {
    let s_rho2 = (rho2 / 2.0).sin();
    let c_rho2 = (rho2 / 2.0).cos();
    let s_delta = (delta / 2.0).sin();
    let c_delta = (delta / 2.0).cos();
    let s_rho1 = (rho1 / 2.0).sin();
    let c_rho1 = (rho1 / 2.0).cos();
    let w = c_rho2 * c_delta * c_rho1 - s_rho2 * c_delta * s_rho1;
    let mut x = c_rho2 * s_delta * c_rho1 + s_rho2 * s_delta * s_rho1;
    let mut y = c_rho2 * c_delta * s_rho1 + s_rho2 * c_delta * c_rho1;
    let mut z = c_rho2 * s_delta * s_rho1 - s_rho2 * s_delta * c_rho1;

    let mut theta = 2.0 * w.acos();
    if theta > std::f64::consts::PI {
        theta -= 2.0 * std::f64::consts::PI;
    }
    let mut s_theta = (theta / 2.0).sin();
    x /= s_theta;
    y /= s_theta;
    z /= s_theta;

    const COMPRESSION: f64 = 10.0;
    theta *= if d <= 0.0 {
        d + 1.0
    } else {
        1.0 + 1.0 / COMPRESSION * (COMPRESSION * d + 1.0).ln()
    };
    theta = theta.clamp(-0.9 * std::f64::consts::PI, 0.9 * std::f64::consts::PI);

    let w = (theta / 2.0).cos();
    s_theta = (theta / 2.0).sin();
    x *= s_theta;
    y *= s_theta;
    z *= s_theta;

    [
        [1.0 - 2.0 * y * y - 2.0 * z * z, 2.0 * x * y - 2.0 * z * w, 2.0 * x * z + 2.0 * y * w],
        [2.0 * x * y + 2.0 * z * w, 1.0 - 2.0 * x * x - 2.0 * z * z, 2.0 * y * z - 2.0 * x * w],
        [2.0 * x * z - 2.0 * y * w, 2.0 * y * z + 2.0 * x * w, 1.0 - 2.0 * x * x - 2.0 * y * y],
    ]
}

/// The 11 coefficients baked into the per-pixel perspective callback.
#[derive(Debug, Clone, Copy)]
pub struct PerspectiveParams {
    pub a: [f64; 9],
    pub delta_a: f64,
    pub delta_b: f64,
}

impl PerspectiveParams {
    /// `(x, y)` in normalized, center-shifted coordinates.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let x = x + self.delta_a;
        let y = y + self.delta_b;
        let z = self.a[6] * x + self.a[7] * y + self.a[8];
        if z > 0.0 {
            (
                (self.a[0] * x + self.a[1] * y + self.a[2]) / z,
                (self.a[3] * x + self.a[4] * y + self.a[5]) / z,
            )
        } else {
            (crate::model::projection::INVALID, crate::model::projection::INVALID)
        }
    }
}

/// Builds the perspective-correction callback parameters from `count`
/// control points (normalized, center-shifted coordinates already applied
/// by the caller) and strength `d in [-1, 1]`. `reverse` correction is not
/// implemented upstream either; this mirrors that by returning
/// [`Error::UnsupportedReverse`].
pub fn build(
    x: &[f64],
    y: &[f64],
    focal_normalized: f64,
    d: f64,
    reverse: bool,
) -> Result<PerspectiveParams> {
    if reverse {
        return Err(Error::UnsupportedReverse);
    }
    let count = x.len();
    if !(4..=8).contains(&count) || (focal_normalized <= 0.0 && count != 8) {
        return Err(Error::InvalidControlPointCount { count });
    }
    let d = d.clamp(-1.0, 1.0);

    let angles = calculate_angles(x, y, focal_normalized)?;
    let f_normalized = angles.f_normalized;

    let z = rotate_rho_delta_rho_h(angles.rho, angles.delta, angles.rho_h, 0.0, 0.0, f_normalized).2;
    let use_control_center = z <= 0.0 || f_normalized / z > 10.0;

    let a = generate_rotation_matrix(angles.rho, angles.delta, angles.rho_h, d);
    let center_coords = if use_control_center {
        (
            a[0][0] * angles.center_x + a[0][1] * angles.center_y + a[0][2] * f_normalized,
            a[1][0] * angles.center_x + a[1][1] * angles.center_y + a[1][2] * f_normalized,
            a[2][0] * angles.center_x + a[2][1] * angles.center_y + a[2][2] * f_normalized,
        )
    } else {
        (a[0][2] * f_normalized, a[1][2] * f_normalized, a[2][2] * f_normalized)
    };
    if center_coords.2 <= 0.0 {
        return Err(Error::InvalidControlPointCount { count });
    }
    let mapping_scale = f_normalized / center_coords.2;

    let a_inv = generate_rotation_matrix(-angles.rho_h, -angles.delta, -angles.rho, d);
    let (sa, ca) = (angles.alpha.sin(), angles.alpha.cos());
    let a_final = [
        [ca * a_inv[0][0] + sa * a_inv[0][1], -sa * a_inv[0][0] + ca * a_inv[0][1], a_inv[0][2]],
        [ca * a_inv[1][0] + sa * a_inv[1][1], -sa * a_inv[1][0] + ca * a_inv[1][1], a_inv[1][2]],
        [ca * a_inv[2][0] + sa * a_inv[2][1], -sa * a_inv[2][0] + ca * a_inv[2][1], a_inv[2][2]],
    ];

    let (mut delta_a, mut delta_b) = central_projection(center_coords, f_normalized);
    let delta_a_old = delta_a;
    delta_a = ca * delta_a + sa * delta_b;
    delta_b = -sa * delta_a_old + ca * delta_b;

    Ok(PerspectiveParams {
        a: [
            a_final[0][0] * mapping_scale,
            a_final[0][1] * mapping_scale,
            a_final[0][2] * f_normalized,
            a_final[1][0] * mapping_scale,
            a_final[1][1] * mapping_scale,
            a_final[1][2] * f_normalized,
            a_final[2][0] / center_coords.2,
            a_final[2][1] / center_coords.2,
            a_final[2][2],
        ],
        delta_a: delta_a / mapping_scale,
        delta_b: delta_b / mapping_scale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_is_rejected() {
        let x = [-1.0, 1.0, 1.0, -1.0];
        let y = [-1.0, -1.0, 1.0, 1.0];
        assert!(matches!(build(&x, &y, 1.0, 0.0, true), Err(Error::UnsupportedReverse)));
    }

    #[test]
    fn rejects_too_few_points() {
        let x = [-1.0, 1.0, 1.0];
        let y = [-1.0, -1.0, 1.0];
        assert!(build(&x, &y, 1.0, 0.0, false).is_err());
    }

    #[test]
    fn square_control_points_yield_near_zero_angles() {
        // A perfect axis-aligned square centred on the optical axis should
        // already be "upright": rho and delta should come out ~0.
        let x = [-1.0, 1.0, 1.0, -1.0];
        let y = [-1.0, -1.0, 1.0, 1.0];
        let params = build(&x, &y, 2.0, 0.0, false).unwrap();
        assert!(params.a[8].is_finite());
    }
}
