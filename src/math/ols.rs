//! Linear least squares solver.
//!
//! Each Levenberg–Marquardt step solves a small damped problem of the form:
//!
//! ```text
//! minimize ||J δ + r||^2 + λ ||D δ||^2
//! ```
//!
//! which we write as one stacked least-squares system `[J; sqrt(λ) D] δ = [-r; 0]`.
//!
//! Implementation choices:
//! - We use SVD so tall systems (many curve samples, 1–4 parameters) solve
//!   robustly even when the Jacobian is nearly rank deficient.
//!   (Nalgebra's `QR::solve` is intended for square systems and will panic for
//!   non-square matrices.)
//! - Parameter counts are tiny, so SVD cost is negligible next to evaluating
//!   the response functions.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-14, 1e-12, 1e-10] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Solve the damped step `[J; sqrt(λ) diag(d)] δ = [-r; 0]`.
pub fn damped_step(jac: &DMatrix<f64>, residuals: &DVector<f64>, lambda: f64, diag: &[f64]) -> Option<DVector<f64>> {
    let (n, p) = jac.shape();
    let mut a = DMatrix::<f64>::zeros(n + p, p);
    let mut b = DVector::<f64>::zeros(n + p);
    a.view_mut((0, 0), (n, p)).copy_from(jac);
    for i in 0..n {
        b[i] = -residuals[i];
    }
    let sl = lambda.sqrt();
    for j in 0..p {
        a[(n + j, j)] = sl * diag[j];
    }
    solve_least_squares(&a, &b)
}
