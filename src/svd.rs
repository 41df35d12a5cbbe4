//! One-sided Hestenes-Jacobi SVD, used by the perspective-correction
//! ellipse fit to recover the conic through 5 points.

/// A dense matrix stored row-major, mirroring the original's `matrix`
/// (`std::vector<std::vector<double>>`) typedef closely enough to keep the
/// iteration loop below a direct transcription.
pub type Matrix = Vec<Vec<f64>>;

/// Solves for the right singular vector of the smallest singular value of
/// `m` (an `n`-column matrix), i.e. the null-space direction used by conic
/// fitting. Returns `Err` if the rotation sweep does not converge within
/// `max(60, n/2)` cycles.
pub fn svd(mut m: Matrix) -> Result<Vec<f64>, crate::error::Error> {
    let n = m[0].len();
    let mut s2 = vec![0.0; n];
    let mut estimated_column_rank = n;
    let mut counter = n;
    let mut iterations: usize = 0;
    let max_cycles: usize = if n < 120 { 60 } else { n / 2 };
    let epsilon = f64::EPSILON;
    let e2 = 10.0 * n as f64 * epsilon.powi(2);
    let threshold = 0.2 * epsilon;

    m.resize(2 * n, vec![0.0; n]);
    for i in 0..n {
        m[n + i][i] = 1.0;
    }

    while counter != 0 && {
        iterations += 1;
        iterations <= max_cycles
    } {
        counter = (estimated_column_rank * (estimated_column_rank.saturating_sub(1)) / 2) as usize;
        for j in 0..estimated_column_rank.saturating_sub(1) {
            for k in (j + 1)..estimated_column_rank {
                let mut p = 0.0;
                let mut q = 0.0;
                let mut r = 0.0;
                for i in 0..n {
                    let x0 = m[i][j];
                    let y0 = m[i][k];
                    p += x0 * y0;
                    q += x0 * x0;
                    r += y0 * y0;
                }
                s2[j] = q;
                s2[k] = r;
                if q >= r {
                    if q <= e2 * s2[0] || p.abs() <= threshold * q {
                        counter -= 1;
                    } else {
                        let p = p / q;
                        let r = 1.0 - r / q;
                        let vt = (4.0 * p * p + r * r).sqrt();
                        let c0 = (0.5 * (1.0 + r / vt)).sqrt();
                        let s0 = p / (vt * c0);
                        rotate(&mut m, j, k, c0, s0, 2 * n);
                    }
                } else {
                    let p = p / r;
                    let q = q / r - 1.0;
                    let vt = (4.0 * p * p + q * q).sqrt();
                    let mut s0 = (0.5 * (1.0 - q / vt)).sqrt();
                    if p < 0.0 {
                        s0 = -s0;
                    }
                    let c0 = p / (vt * s0);
                    rotate(&mut m, j, k, c0, s0, 2 * n);
                }
            }
        }
        while estimated_column_rank > 2
            && s2[estimated_column_rank - 1] <= s2[0] * threshold + threshold * threshold
        {
            estimated_column_rank -= 1;
        }
    }

    if iterations > max_cycles {
        return Err(crate::error::Error::SvdNonConvergence { iterations });
    }

    Ok(m[n..2 * n].iter().map(|row| row[n - 1]).collect())
}

fn rotate(m: &mut Matrix, j: usize, k: usize, c0: f64, s0: f64, rows: usize) {
    for i in 0..rows {
        let d1 = m[i][j];
        let d2 = m[i][k];
        m[i][j] = d1 * c0 + d2 * s0;
        m[i][k] = -d1 * s0 + d2 * c0;
    }
}
