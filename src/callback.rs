//! Ordered callback chains. A [`Modifier`](crate::modifier::Modifier) owns
//! one chain per kind; callbacks run in ascending priority, stable on ties.

use crate::component_layout::ComponentLayout;
use crate::model::distortion::Distortion;
use crate::model::tca::Tca;
use crate::model::vignetting::Vignetting;

/// Fixed coord-chain execution order: scale 100, distortion-forward 250,
/// geometry 500, distortion-inverse 750, scale-reverse 900.
pub mod priority {
    pub const SCALE: i32 = 100;
    pub const DISTORTION_FORWARD: i32 = 250;
    pub const GEOMETRY: i32 = 500;
    pub const DISTORTION_INVERSE: i32 = 750;
    pub const SCALE_REVERSE: i32 = 900;
    pub const DEVIGNETTING: i32 = 250;
    pub const VIGNETTING_REVERSE: i32 = 750;
    pub const TCA: i32 = 500;
}

/// One coordinate-chain stage. `forward` distorts (evaluates the polynomial
/// directly); `reverse` undistorts (Newton solve on the same polynomial),
/// independent of the modifier's own `reverse` flag (which picks which
/// variant runs).
pub enum CoordOp {
    Scale(f64),
    Distortion(Distortion),
    Geometry(Box<dyn Fn(f64, f64) -> (f64, f64) + Send + Sync>),
}

pub struct CoordCallback {
    pub priority: i32,
    pub op: CoordOp,
    /// `true` evaluates the polynomial forward (distort), `false` inverts it
    /// (undistort) via Newton.
    pub forward: bool,
}

pub struct SubpixelCallback {
    pub priority: i32,
    pub tca: Tca,
    pub forward: bool,
}

pub struct ColorCallback {
    pub priority: i32,
    pub vignetting: Vignetting,
    /// `true` simulates the defect (reverse direction); `false` corrects it.
    pub reverse: bool,
    /// Rescales `to_normalized`'s half-height-normalized `(x, y)` into the
    /// half-diagonal-normalized system the PA/ACM polynomial expects, i.e.
    /// `ns / norm_scale` with `ns = 2 / hypot(width, height)`.
    pub radius_rescale: f64,
}

/// Insertion-sorted-by-priority list, stable on ties (insert after the last
/// equal-priority entry, matching the original's list-append-then-sort).
#[derive(Default)]
pub struct Chain<T> {
    items: Vec<T>,
}

impl<T> Chain<T> {
    pub fn new() -> Self {
        Chain { items: Vec::new() }
    }

    pub fn insert(&mut self, item: T, priority: impl Fn(&T) -> i32) {
        let p = priority(&item);
        let pos = self
            .items
            .iter()
            .position(|existing| priority(existing) > p)
            .unwrap_or(self.items.len());
        self.items.insert(pos, item);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Chain<CoordCallback> {
    pub fn push(&mut self, cb: CoordCallback) {
        let p = cb.priority;
        self.insert(cb, |_| p);
    }

    pub fn apply(&self, points: &mut [(f64, f64)]) {
        for cb in self.iter() {
            for p in points.iter_mut() {
                *p = match &cb.op {
                    CoordOp::Scale(factor) => {
                        if cb.forward {
                            (p.0 * factor, p.1 * factor)
                        } else {
                            (p.0 / factor, p.1 / factor)
                        }
                    }
                    CoordOp::Distortion(d) => {
                        if cb.forward {
                            d.distort(p.0, p.1)
                        } else {
                            d.undistort(p.0, p.1).unwrap_or(*p)
                        }
                    }
                    CoordOp::Geometry(f) => f(p.0, p.1),
                };
            }
        }
    }
}

impl Chain<SubpixelCallback> {
    pub fn push(&mut self, cb: SubpixelCallback) {
        let p = cb.priority;
        self.insert(cb, |_| p);
    }

    pub fn apply(&self, rgb: &mut [((f64, f64), (f64, f64), (f64, f64))]) {
        for cb in self.iter() {
            for sample in rgb.iter_mut() {
                *sample = if cb.forward {
                    cb.tca.distort(sample.0, sample.1, sample.2)
                } else {
                    cb.tca.undistort(sample.0, sample.1, sample.2)
                };
            }
        }
    }
}

impl Chain<ColorCallback> {
    pub fn push(&mut self, cb: ColorCallback) {
        let p = cb.priority;
        self.insert(cb, |_| p);
    }

    /// Applies every enabled color callback to one row of samples, walking
    /// `layout` to pick out which nibble is red/green/blue. `x`/`y` are the
    /// per-pixel normalized coordinates (same length as `row`'s pixel count).
    pub fn apply(
        &self,
        row: &mut [crate::pixel::Sample],
        xy: &[(f64, f64)],
        layout: &ComponentLayout,
    ) {
        use crate::component_layout::Component;
        let components = layout.components();
        if components.is_empty() {
            return;
        }
        let stride = components.len();
        for cb in self.iter() {
            let r = cb.radius_rescale;
            for (pixel_idx, &(x, y)) in xy.iter().enumerate() {
                let (x, y) = (x * r, y * r);
                for (slot, comp) in components.iter().enumerate() {
                    let idx = pixel_idx * stride + slot;
                    let Some(sample) = row.get(idx) else { continue };
                    let m = match comp {
                        Component::Red => cb.vignetting.multiplier(x, y, cb.reverse),
                        Component::Green => cb.vignetting.multiplier(x, y, cb.reverse),
                        Component::Blue => cb.vignetting.multiplier(x, y, cb.reverse),
                        Component::Intensity => cb.vignetting.multiplier(x, y, cb.reverse),
                        Component::Unknown | Component::Next | Component::End => continue,
                    };
                    row[idx] = sample.apply_multiplier(m);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_insert_is_stable_on_ties() {
        let mut chain: Chain<i32> = Chain::new();
        chain.insert(1, |_| priority::GEOMETRY);
        chain.insert(2, |_| priority::DISTORTION_FORWARD);
        chain.insert(3, |_| priority::GEOMETRY);
        let order: Vec<i32> = chain.iter().copied().collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn coord_chain_runs_in_ascending_priority() {
        let mut chain: Chain<CoordCallback> = Chain::new();
        chain.push(CoordCallback {
            priority: priority::SCALE,
            op: CoordOp::Scale(2.0),
            forward: true,
        });
        chain.push(CoordCallback {
            priority: priority::GEOMETRY,
            op: CoordOp::Geometry(Box::new(|x, y| (x + 1.0, y))),
            forward: true,
        });
        let mut pts = [(1.0, 1.0)];
        chain.apply(&mut pts);
        // scale first (x2 -> 2.0), then +1 -> 3.0
        assert_eq!(pts[0], (3.0, 2.0));
    }
}
