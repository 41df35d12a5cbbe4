//! Transverse chromatic aberration: independent radial scaling of the red
//! and blue channels; green is always identity.

use crate::newton::solve;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tca {
    None,
    Linear { k_r: f64, k_b: f64 },
    Poly3 {
        v_r: f64,
        v_b: f64,
        c_r: f64,
        c_b: f64,
        b_r: f64,
        b_b: f64,
    },
    /// 12-coefficient Adobe Camera Model, 6 per channel, same shape as
    /// [`crate::model::distortion::Distortion::Acm`] applied per-channel.
    Acm {
        red: [f64; 6],
        blue: [f64; 6],
    },
}

fn acm_channel_distort(x: f64, y: f64, c: &[f64; 6]) -> (f64, f64) {
    let [a0, a1, a2, a3, a4, a5] = *c;
    let r2 = x * x + y * y;
    let radial = 1.0 + a1 * r2 + a2 * r2 * r2 + a3 * r2 * r2 * r2;
    let xd = a0 * (x * radial + 2.0 * (a4 * y + a5 * x) * x + a5 * r2);
    let yd = a0 * (y * radial + 2.0 * (a4 * y + a5 * x) * y + a4 * r2);
    (xd, yd)
}

fn acm_channel_jacobian(x: f64, y: f64, c: &[f64; 6]) -> (f64, f64, f64, f64) {
    let [a0, a1, a2, a3, a4, a5] = *c;
    let r2 = x * x + y * y;
    let radial = 1.0 + a1 * r2 + a2 * r2 * r2 + a3 * r2 * r2 * r2;
    let radial_deriv = a1 + 2.0 * a2 * r2 + 3.0 * a3 * r2 * r2;
    let cross = a0 * (2.0 * x * y * radial_deriv + 2.0 * a4 * x + 2.0 * a5 * y);
    let dxd_dx = a0 * (radial + 2.0 * x * x * radial_deriv + 2.0 * a4 * y + 6.0 * a5 * x);
    let dyd_dy = a0 * (radial + 2.0 * y * y * radial_deriv + 6.0 * a4 * y + 2.0 * a5 * x);
    (dxd_dx, cross, cross, dyd_dy)
}

fn acm_channel_undistort(xd: f64, yd: f64, c: &[f64; 6]) -> Option<(f64, f64)> {
    let mut x = xd;
    let mut y = yd;
    for step in 0..=5 {
        let (fx, fy) = acm_channel_distort(x, y, c);
        let rx = fx - xd;
        let ry = fy - yd;
        if rx.abs() < crate::newton::NEWTON_EPS && ry.abs() < crate::newton::NEWTON_EPS {
            return Some((x, y));
        }
        if step == 5 {
            return None;
        }
        let (a11, a12, a21, a22) = acm_channel_jacobian(x, y, c);
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

impl Tca {
    /// Forward ("distort"): applies per-channel magnification. Green is
    /// always passed through untouched.
    pub fn distort(&self, r: (f64, f64), g: (f64, f64), b: (f64, f64)) -> ((f64, f64), (f64, f64), (f64, f64)) {
        match *self {
            Tca::None => (r, g, b),
            Tca::Linear { k_r, k_b } => ((r.0 * k_r, r.1 * k_r), g, (b.0 * k_b, b.1 * k_b)),
            Tca::Poly3 {
                v_r,
                v_b,
                c_r,
                c_b,
                b_r,
                b_b,
            } => {
                let red = poly3_distort(r, b_r, c_r, v_r);
                let blue = poly3_distort(b, b_b, c_b, v_b);
                (red, g, blue)
            }
            Tca::Acm { ref red, ref blue } => {
                (acm_channel_distort(r.0, r.1, red), g, acm_channel_distort(b.0, b.1, blue))
            }
        }
    }

    /// Inverse ("undistort"): per-channel Newton solve. A channel that
    /// fails to converge is left unchanged (domain error policy).
    pub fn undistort(&self, r: (f64, f64), g: (f64, f64), b: (f64, f64)) -> ((f64, f64), (f64, f64), (f64, f64)) {
        match *self {
            Tca::None => (r, g, b),
            Tca::Linear { k_r, k_b } => {
                let red = if k_r != 0.0 { (r.0 / k_r, r.1 / k_r) } else { r };
                let blue = if k_b != 0.0 { (b.0 / k_b, b.1 / k_b) } else { b };
                (red, g, blue)
            }
            Tca::Poly3 {
                v_r,
                v_b,
                c_r,
                c_b,
                b_r,
                b_b,
            } => {
                let red = poly3_undistort(r, b_r, c_r, v_r).unwrap_or(r);
                let blue = poly3_undistort(b, b_b, c_b, v_b).unwrap_or(b);
                (red, g, blue)
            }
            Tca::Acm { ref red, ref blue } => {
                let r2 = acm_channel_undistort(r.0, r.1, red).unwrap_or(r);
                let b2 = acm_channel_undistort(b.0, b.1, blue).unwrap_or(b);
                (r2, g, b2)
            }
        }
    }
}

fn poly3_distort(p: (f64, f64), b: f64, c: f64, v: f64) -> (f64, f64) {
    let (x, y) = p;
    let ru2 = x * x + y * y;
    // Optimized path when c == 0 avoids the sqrt, per the original.
    let poly2 = if c == 0.0 {
        b * ru2 + v
    } else {
        b * ru2 + c * ru2.sqrt() + v
    };
    (x * poly2, y * poly2)
}

fn poly3_undistort(p: (f64, f64), b: f64, c: f64, v: f64) -> Option<(f64, f64)> {
    let (x, y) = p;
    let rd = (x * x + y * y).sqrt();
    if rd == 0.0 {
        return Some((x, y));
    }
    let ru = solve(
        rd,
        |ru| b * ru * ru * ru + c * ru * ru + v * ru - rd,
        |ru| 3.0 * b * ru * ru + 2.0 * c * ru + v,
    )?;
    if ru <= 0.0 {
        return None;
    }
    let ratio = ru / rd;
    Some((x * ratio, y * ratio))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_roundtrip() {
        let m = Tca::Linear { k_r: 1.001, k_b: 0.999 };
        let (r, g, b) = m.distort((0.3, 0.2), (0.3, 0.2), (0.3, 0.2));
        let (r2, g2, b2) = m.undistort(r, g, b);
        assert!((r2.0 - 0.3).abs() < 1e-9);
        assert!((b2.0 - 0.3).abs() < 1e-9);
        assert_eq!(g2, g);
    }

    #[test]
    fn poly3_roundtrip_with_sqrt_path() {
        let m = Tca::Poly3 {
            v_r: 1.0005,
            v_b: 0.9995,
            c_r: 0.0002,
            c_b: -0.0001,
            b_r: 0.0001,
            b_b: 0.0001,
        };
        let (r, g, b) = m.distort((0.3, 0.2), (0.3, 0.2), (0.3, 0.2));
        let (r2, _, b2) = m.undistort(r, g, b);
        assert!((r2.0 - 0.3).abs() < 1e-3);
        assert!((b2.0 - 0.3).abs() < 1e-3);
    }
}
