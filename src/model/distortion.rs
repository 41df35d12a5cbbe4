//! Geometric distortion models: radial (Poly3/Poly5/PTLens) and the
//! non-radial Adobe Camera Model (ACM). Coordinates are already in the
//! model's normalized/real-focal-length units by the time they reach here.

use crate::newton::solve;

/// A fully-resolved (post-interpolation) distortion model ready to evaluate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distortion {
    None,
    Poly3 { k1: f64 },
    Poly5 { k1: f64, k2: f64 },
    PTLens { a: f64, b: f64, c: f64 },
    /// Non-radial; `k1..k3` are the radial terms, `k4,k5` the decentering
    /// terms, per the documented Adobe Camera Model formula.
    Acm {
        k1: f64,
        k2: f64,
        k3: f64,
        k4: f64,
        k5: f64,
    },
}

impl Distortion {
    /// Forward ("distort"): maps an undistorted point to its distorted
    /// position. Direct evaluation, never fails.
    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        match *self {
            Distortion::None => (x, y),
            Distortion::Poly3 { k1 } => {
                let ru2 = x * x + y * y;
                let poly2 = k1 * ru2 + (1.0 - k1);
                (x * poly2, y * poly2)
            }
            Distortion::Poly5 { k1, k2 } => {
                let ru2 = x * x + y * y;
                let poly2 = k2 * ru2 * ru2 + k1 * ru2 + 1.0;
                (x * poly2, y * poly2)
            }
            Distortion::PTLens { a, b, c } => {
                let ru = (x * x + y * y).sqrt();
                if ru == 0.0 {
                    return (x, y);
                }
                let poly3 = a * ru * ru * ru + b * ru * ru + c * ru + (1.0 - a - b - c);
                (x * poly3, y * poly3)
            }
            Distortion::Acm { k1, k2, k3, k4, k5 } => acm_distort(x, y, k1, k2, k3, k4, k5),
        }
    }

    /// Inverse ("undistort"): Newton's method on the scalar radial equation
    /// for the three radial models, a 2x2 Newton iteration for ACM. Returns
    /// `None` on non-convergence or negative radius -- callers leave the
    /// coordinate unchanged (a silent domain error, not a `Result::Err`).
    pub fn undistort(&self, xd: f64, yd: f64) -> Option<(f64, f64)> {
        match *self {
            Distortion::None => Some((xd, yd)),
            Distortion::Poly3 { k1 } => {
                let rd = (xd * xd + yd * yd).sqrt();
                if rd == 0.0 {
                    return Some((xd, yd));
                }
                let ru = solve(
                    rd,
                    |ru| (1.0 - k1) * ru + k1 * ru * ru * ru - rd,
                    |ru| (1.0 - k1) + 3.0 * k1 * ru * ru,
                )?;
                if ru <= 0.0 {
                    return None;
                }
                let ratio = ru / rd;
                Some((xd * ratio, yd * ratio))
            }
            Distortion::Poly5 { k1, k2 } => {
                let rd = (xd * xd + yd * yd).sqrt();
                if rd == 0.0 {
                    return Some((xd, yd));
                }
                let ru = solve(
                    rd,
                    |ru| ru + k1 * ru.powi(3) + k2 * ru.powi(5) - rd,
                    |ru| 1.0 + 3.0 * k1 * ru * ru + 5.0 * k2 * ru.powi(4),
                )?;
                if ru <= 0.0 {
                    return None;
                }
                let ratio = ru / rd;
                Some((xd * ratio, yd * ratio))
            }
            Distortion::PTLens { a, b, c } => {
                let rd = (xd * xd + yd * yd).sqrt();
                if rd == 0.0 {
                    return Some((xd, yd));
                }
                let d0 = 1.0 - a - b - c;
                let ru = solve(
                    rd,
                    |ru| a * ru.powi(4) + b * ru.powi(3) + c * ru * ru + d0 * ru - rd,
                    |ru| 4.0 * a * ru.powi(3) + 3.0 * b * ru * ru + 2.0 * c * ru + d0,
                )?;
                if ru <= 0.0 {
                    return None;
                }
                let ratio = ru / rd;
                Some((xd * ratio, yd * ratio))
            }
            Distortion::Acm { k1, k2, k3, k4, k5 } => acm_undistort(xd, yd, k1, k2, k3, k4, k5),
        }
    }
}

fn acm_distort(x: f64, y: f64, k1: f64, k2: f64, k3: f64, k4: f64, k5: f64) -> (f64, f64) {
    let r2 = x * x + y * y;
    let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
    let xd = x * radial + 2.0 * (k4 * y + k5 * x) * x + k5 * r2;
    let yd = y * radial + 2.0 * (k4 * y + k5 * x) * y + k4 * r2;
    (xd, yd)
}

/// Jacobian of [`acm_distort`] at `(x, y)`, returned as
/// `(dxd_dx, dxd_dy, dyd_dx, dyd_dy)`. `dxd_dy == dyd_dx` analytically.
fn acm_jacobian(x: f64, y: f64, k1: f64, k2: f64, k3: f64, k4: f64, k5: f64) -> (f64, f64, f64, f64) {
    let r2 = x * x + y * y;
    let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
    let radial_deriv = k1 + 2.0 * k2 * r2 + 3.0 * k3 * r2 * r2;
    let cross = 2.0 * x * y * radial_deriv + 2.0 * k4 * x + 2.0 * k5 * y;
    let dxd_dx = radial + 2.0 * x * x * radial_deriv + 2.0 * k4 * y + 6.0 * k5 * x;
    let dyd_dy = radial + 2.0 * y * y * radial_deriv + 6.0 * k4 * y + 2.0 * k5 * x;
    (dxd_dx, cross, cross, dyd_dy)
}

fn acm_undistort(
    xd: f64,
    yd: f64,
    k1: f64,
    k2: f64,
    k3: f64,
    k4: f64,
    k5: f64,
) -> Option<(f64, f64)> {
    let mut x = xd;
    let mut y = yd;
    for step in 0..=5 {
        let (fx, fy) = acm_distort(x, y, k1, k2, k3, k4, k5);
        let rx = fx - xd;
        let ry = fy - yd;
        if rx.abs() < crate::newton::NEWTON_EPS && ry.abs() < crate::newton::NEWTON_EPS {
            return Some((x, y));
        }
        if step == 5 {
            return None;
        }
        let (a11, a12, a21, a22) = acm_jacobian(x, y, k1, k2, k3, k4, k5);
        let det = a11 * a22 - a12 * a21;
        if det.abs() < 1e-12 {
            return None;
        }
        let dx = (a22 * rx - a12 * ry) / det;
        let dy = (a11 * ry - a21 * rx) / det;
        x -= dx;
        y -= dy;
    }
    None
}
