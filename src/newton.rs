//! Generic scalar Newton solver shared by every radial distortion/TCA
//! inverse. All models boil down to finding `Ru` from `Rd` given a
//! polynomial `f(Ru) = g(Ru) - Rd` and its derivative.

pub const NEWTON_EPS: f64 = 0.00001;

/// Solve `f(ru) == 0` starting from `ru0`, capped at 6 evaluations (`step >
/// 5` bails), matching the original's `for (step = 0; ; step++) { ... if
/// (step > 5) goto fail; }` shape. Returns `None` on non-convergence, which
/// callers treat as "leave this pixel's coordinate unchanged" (a silent
/// domain error, not a `Result::Err`).
pub fn solve<F, D>(ru0: f64, f: F, df: D) -> Option<f64>
where
    F: Fn(f64) -> f64,
    D: Fn(f64) -> f64,
{
    let mut ru = ru0;
    let mut step = 0;
    loop {
        let fru = f(ru);
        if fru >= -NEWTON_EPS && fru < NEWTON_EPS {
            return Some(ru);
        }
        if step > 5 {
            return None;
        }
        let deriv = df(ru);
        if deriv == 0.0 {
            return None;
        }
        ru -= fru / deriv;
        step += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_simple_cubic() {
        // f(ru) = ru^3 - 8 = 0 -> ru = 2
        let r = solve(1.0, |ru| ru * ru * ru - 8.0, |ru| 3.0 * ru * ru).unwrap();
        assert!((r - 2.0).abs() < 1e-4);
    }

    #[test]
    fn fails_on_zero_derivative() {
        let r = solve(0.0, |ru| ru * ru + 1.0, |_| 0.0);
        assert!(r.is_none());
    }
}
