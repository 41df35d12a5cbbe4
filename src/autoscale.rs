//! Automatic scale-factor search: the smallest scale that still covers the
//! whole output image once geometry distortion has been applied.

use crate::callback::Chain;
use crate::callback::CoordCallback;

struct BoundaryPoint {
    angle: f64,
    dist: f64,
}

fn residual_distance(coord: (f64, f64), max_x: f64, max_y: f64) -> f64 {
    let mut result = coord.0 - max_x;
    result = result.max(-max_x - coord.0);
    result = result.max(coord.1 - max_y);
    result = result.max(-max_y - coord.1);
    result
}

/// Newton search for the `Ru` whose distorted image lands exactly on the
/// image boundary in direction `point.angle`, capped at 50 iterations.
/// Returns `None` if it never converges (e.g. an ultrawide fisheye corner
/// extending to infinity).
fn transformed_distance(
    point: &BoundaryPoint,
    chain: &Chain<CoordCallback>,
    max_x: f64,
    max_y: f64,
) -> Option<f64> {
    let sa = point.angle.sin();
    let ca = point.angle.cos();
    let mut ru = point.dist;
    let mut dx = 0.0001;

    for countdown in (0..=50).rev() {
        let mut res = [(ca * ru, sa * ru)];
        chain.apply(&mut res);
        let rd = residual_distance(res[0], max_x, max_y);
        if rd > -crate::newton::NEWTON_EPS * 100.0 && rd < crate::newton::NEWTON_EPS * 100.0 {
            return Some(ru);
        }
        if countdown == 0 {
            return None;
        }

        let mut res1 = [(ca * (ru + dx), sa * (ru + dx))];
        chain.apply(&mut res1);
        let rd1 = residual_distance(res1[0], max_x, max_y);

        if (rd1 - rd).abs() < 0.00001 {
            dx *= 2.0;
            continue;
        }

        let prime = (rd1 - rd) / dx;
        ru -= rd / prime;
    }
    None
}

/// Eight reference points on the uncorrected image boundary: 4 edge
/// midpoints, 4 corners.
///
/// ```text
/// 3 2 1
/// 4   0
/// 5 6 7
/// ```
fn boundary_points(width: f64, height: f64, norm_scale: f64) -> [BoundaryPoint; 8] {
    let corner_angle = height.atan2(width);
    let corner_dist = (width * width + height * height).sqrt() * 0.5 * norm_scale;
    let x_dist = width * 0.5 * norm_scale;
    let y_dist = height * 0.5 * norm_scale;
    let pi = std::f64::consts::PI;
    [
        BoundaryPoint { angle: 0.0, dist: x_dist },
        BoundaryPoint { angle: corner_angle, dist: corner_dist },
        BoundaryPoint { angle: pi / 2.0, dist: y_dist },
        BoundaryPoint { angle: pi - corner_angle, dist: corner_dist },
        BoundaryPoint { angle: pi, dist: x_dist },
        BoundaryPoint { angle: pi + corner_angle, dist: corner_dist },
        BoundaryPoint { angle: pi * 3.0 / 2.0, dist: y_dist },
        BoundaryPoint { angle: 2.0 * pi - corner_angle, dist: corner_dist },
    ]
}

/// Computes the auto-scale factor for a modifier's current geometry chain.
/// `has_subpixel` applies an extra `1.001` safety factor on top of the
/// unconditional one, needed when subpixel (TCA) correction is also enabled.
pub fn auto_scale(
    chain: &Chain<CoordCallback>,
    width: f64,
    height: f64,
    norm_scale: f64,
    has_subpixel: bool,
    reverse: bool,
) -> f64 {
    let subpixel_scale = if has_subpixel { 1.001 } else { 1.0 };
    if chain.is_empty() {
        return if reverse { 1.0 / subpixel_scale } else { subpixel_scale };
    }

    let max_x = width * 0.5 * norm_scale;
    let max_y = height * 0.5 * norm_scale;
    let mut scale: f64 = 0.01;
    for point in boundary_points(width, height, norm_scale) {
        if let Some(transformed) = transformed_distance(&point, chain, max_x, max_y) {
            let point_scale = point.dist / transformed;
            if point_scale > scale {
                scale = point_scale;
            }
        }
    }
    scale *= 1.001;
    scale *= subpixel_scale;
    if reverse {
        1.0 / scale
    } else {
        scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{priority, CoordOp};
    use crate::model::distortion::Distortion;

    #[test]
    fn identity_distortion_gives_scale_near_one() {
        let mut chain: Chain<CoordCallback> = Chain::new();
        chain.push(CoordCallback {
            priority: priority::DISTORTION_FORWARD,
            op: CoordOp::Distortion(Distortion::None),
            forward: true,
        });
        let scale = auto_scale(&chain, 100.0, 80.0, 0.01, false, false);
        // identity mapping: boundary already matches, so scale should be
        // very close to 1 (plus the 1.001 safety factor).
        assert!((scale - 1.001).abs() < 0.01);
    }

    #[test]
    fn empty_chain_returns_safety_factor_only() {
        let chain: Chain<CoordCallback> = Chain::new();
        assert_eq!(auto_scale(&chain, 100.0, 80.0, 0.01, false, false), 1.0);
        assert_eq!(auto_scale(&chain, 100.0, 80.0, 0.01, true, false), 1.001);
    }
}
