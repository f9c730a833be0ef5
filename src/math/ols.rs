//! Least squares kernels.
//!
//! Every Gauss–Newton step of the fitting backends reduces to a small linear
//! least squares problem of the form:
//!
//! ```text
//! minimize ‖A δ - b‖²
//! ```
//!
//! where the rows of `A` are already scaled by `sqrt(w_i)`. The parameter
//! dimension is tiny (a handful of columns), so SVD is cheap and keeps the
//! solve well defined when columns are nearly collinear.

use nalgebra::{DMatrix, DVector};

/// Relative cutoff below which singular values are treated as zero.
const RANK_TOL: f64 = 1e-12;

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);
    let smax = svd.singular_values.max();
    if !smax.is_finite() {
        return None;
    }

    // Progressively looser cutoffs for nearly rank-deficient Jacobians.
    for &tol in &[1e-14, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol * smax.max(f64::MIN_POSITIVE)) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// `(AᵀA)⁺` computed from the SVD of `A`.
///
/// Directions with singular values below `RANK_TOL · σmax` are dropped, which
/// yields the minimum-norm pseudo-inverse for rank-deficient designs.
pub fn normal_covariance(design: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let p = design.ncols();
    let svd = design.clone().svd(false, true);
    let v_t = svd.v_t?;
    let smax = svd.singular_values.max();
    if !smax.is_finite() {
        return None;
    }

    let mut cov = DMatrix::<f64>::zeros(p, p);
    for (k, &s) in svd.singular_values.iter().enumerate() {
        if s <= RANK_TOL * smax || s == 0.0 {
            continue;
        }
        let v = v_t.row(k).transpose();
        cov += (&v * v.transpose()) / (s * s);
    }
    Some(cov)
}

/// Inverse of a small symmetric positive semi-definite matrix via SVD.
pub fn symmetric_pseudo_inverse(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = m.nrows();
    let svd = m.clone().svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let smax = svd.singular_values.max();
    if !smax.is_finite() {
        return None;
    }

    let mut inv = DMatrix::<f64>::zeros(n, n);
    for (k, &s) in svd.singular_values.iter().enumerate() {
        if s <= RANK_TOL * smax || s == 0.0 {
            continue;
        }
        inv += (v_t.row(k).transpose() * u.column(k).transpose()) / s;
    }
    Some(inv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn normal_covariance_matches_explicit_inverse() {
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let cov = normal_covariance(&x).unwrap();
        let explicit = (x.transpose() * &x).try_inverse().unwrap();
        for i in 0..2 {
            for j in 0..2 {
                assert!((cov[(i, j)] - explicit[(i, j)]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn pseudo_inverse_drops_null_direction() {
        // Rank-one matrix: inverse only along (1, 1).
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let inv = symmetric_pseudo_inverse(&m).unwrap();
        for v in inv.iter() {
            assert!((v - 0.25).abs() < 1e-12);
        }
    }
}
