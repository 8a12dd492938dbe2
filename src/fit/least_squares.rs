//! Bounded nonlinear least squares (Levenberg–Marquardt).
//!
//! Minimises `0.5 * ||r(x)||^2` over a box. Each iteration:
//!
//! - builds a forward-difference Jacobian at the current point
//! - solves the damped step `[J; sqrt(λ) D] δ = [-r; 0]` via SVD
//! - projects `x + δ` back onto the box and accepts it only if the cost drops
//!
//! `D` is Marquardt's scaling (running maximum of the Jacobian column norms),
//! which keeps the damping meaningful when parameters live on very different
//! scales (e.g. Pe ~ 10..1e4 next to tau ~ 1e-1 s).
//!
//! Running out of iterations is reported as non-convergence; the caller turns
//! that into a failed fit rather than an error.

use nalgebra::{DMatrix, DVector};

use crate::domain::{Bounds, LeastSquaresOptions};
use crate::math::damped_step;

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e16;

/// Step-rejection attempts per outer iteration before declaring a stationary point.
const MAX_REJECTIONS: usize = 40;

/// Accepted least-squares estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquaresSolution {
    pub params: Vec<f64>,
    /// `0.5 * ||r||^2` at `params`.
    pub cost: f64,
    pub iterations: usize,
}

/// Run bounded Levenberg–Marquardt from `x0`.
///
/// `residuals` must return a vector of fixed length; non-finite entries make
/// the trial point unacceptable.
///
/// Returns `Err(reason)` when the solver cannot start or exhausts its budget.
pub fn levenberg_marquardt<F>(
    residuals: F,
    x0: &[f64],
    bounds: &Bounds,
    opts: &LeastSquaresOptions,
) -> Result<LeastSquaresSolution, String>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    if x0.len() != bounds.len() {
        return Err(format!(
            "initial guess has {} entries but there are {} bounds",
            x0.len(),
            bounds.len()
        ));
    }
    bounds.check_order().map_err(|e| e.message().to_string())?;
    let p = x0.len();
    let mut x = bounds.clamp(x0);
    let mut r = DVector::from_vec(residuals(x.as_slice()));
    if r.is_empty() {
        return Err("residual vector is empty".to_string());
    }
    let mut cost = half_norm_squared(&r);
    if !cost.is_finite() {
        return Err("residuals are not finite at the initial guess".to_string());
    }

    let mut lambda = LAMBDA_INIT;
    let mut scale = vec![0.0_f64; p];

    for iter in 1..=opts.max_iterations {
        let jac = jacobian(&residuals, &x, &r, bounds);
        let grad = jac.transpose() * &r;
        if projected_gradient_norm(&x, &grad, bounds) <= opts.gtol {
            log::debug!("levenberg-marquardt: gradient tolerance reached after {} iterations", iter - 1);
            return Ok(LeastSquaresSolution { params: x, cost, iterations: iter - 1 });
        }

        for (j, s) in scale.iter_mut().enumerate() {
            *s = s.max(jac.column(j).norm());
            if *s == 0.0 {
                *s = 1.0;
            }
        }

        let mut accepted = None;
        for _ in 0..MAX_REJECTIONS {
            let Some(step) = damped_step(&jac, &r, lambda, &scale) else {
                lambda = (lambda * 2.0).min(LAMBDA_MAX);
                continue;
            };
            let raw: Vec<f64> = x.iter().zip(step.iter()).map(|(a, b)| a + b).collect();
            let trial = bounds.clamp(&raw);
            let r_trial = DVector::from_vec(residuals(trial.as_slice()));
            let cost_trial = if r_trial.len() == r.len() {
                half_norm_squared(&r_trial)
            } else {
                f64::INFINITY
            };

            if cost_trial.is_finite() && cost_trial < cost {
                accepted = Some((trial, r_trial, cost_trial));
                lambda = (lambda / 3.0).max(LAMBDA_MIN);
                break;
            }
            lambda *= 2.0;
            if lambda > LAMBDA_MAX {
                break;
            }
        }

        let Some((trial, r_trial, cost_trial)) = accepted else {
            // No descent along any damped direction: x is stationary to working precision.
            log::debug!("levenberg-marquardt: no further descent after {iter} iterations");
            return Ok(LeastSquaresSolution { params: x, cost, iterations: iter });
        };

        let reduction = cost - cost_trial;
        let step_norm = norm(x.iter().zip(trial.iter()).map(|(a, b)| b - a));
        let x_norm = norm(x.iter().copied());

        x = trial;
        r = r_trial;
        cost = cost_trial;

        if reduction <= opts.ftol * (cost + reduction) {
            log::debug!("levenberg-marquardt: ftol reached after {iter} iterations");
            return Ok(LeastSquaresSolution { params: x, cost, iterations: iter });
        }
        if step_norm <= opts.xtol * (opts.xtol + x_norm) {
            log::debug!("levenberg-marquardt: xtol reached after {iter} iterations");
            return Ok(LeastSquaresSolution { params: x, cost, iterations: iter });
        }
    }

    Err(format!(
        "maximum number of iterations ({}) exceeded",
        opts.max_iterations
    ))
}

/// Forward-difference Jacobian; steps backwards at an upper bound.
fn jacobian<F>(residuals: &F, x: &[f64], r0: &DVector<f64>, bounds: &Bounds) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let n = r0.len();
    let p = x.len();
    let mut jac = DMatrix::<f64>::zeros(n, p);
    let mut probe = x.to_vec();

    for j in 0..p {
        let (_, hi) = bounds.0[j];
        let mut h = f64::EPSILON.sqrt() * x[j].abs().max(1.0);
        if x[j] + h > hi {
            h = -h;
        }
        probe[j] = x[j] + h;
        let r = residuals(probe.as_slice());
        probe[j] = x[j];

        if r.len() != n {
            continue;
        }
        for i in 0..n {
            let d = (r[i] - r0[i]) / h;
            // A column that leaves the finite domain carries no usable slope.
            jac[(i, j)] = if d.is_finite() { d } else { 0.0 };
        }
    }
    jac
}

/// Infinity norm of the gradient with outward components at active bounds removed.
fn projected_gradient_norm(x: &[f64], grad: &DVector<f64>, bounds: &Bounds) -> f64 {
    x.iter()
        .zip(grad.iter())
        .zip(bounds.0.iter())
        .map(|((&xi, &g), &(lo, hi))| {
            if (xi <= lo && g > 0.0) || (xi >= hi && g < 0.0) {
                0.0
            } else {
                g.abs()
            }
        })
        .fold(0.0, f64::max)
}

fn half_norm_squared(r: &DVector<f64>) -> f64 {
    0.5 * r.iter().map(|v| v * v).sum::<f64>()
}

fn norm(values: impl Iterator<Item = f64>) -> f64 {
    values.map(|v| v * v).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn exp_decay_residuals(t: &[f64], y: &[f64]) -> impl Fn(&[f64]) -> Vec<f64> {
        let t = t.to_vec();
        let y = y.to_vec();
        move |p: &[f64]| {
            t.iter()
                .zip(y.iter())
                .map(|(&ti, &yi)| p[0] * (-ti / p[1]).exp() - yi)
                .collect()
        }
    }

    #[test]
    fn recovers_exponential_decay() {
        let t: Vec<f64> = (0..40).map(|i| i as f64 * 0.25).collect();
        let y: Vec<f64> = t.iter().map(|&ti| 3.0 * (-ti / 2.5).exp()).collect();
        let bounds = Bounds(vec![(0.0, 10.0), (0.1, 10.0)]);
        let sol = levenberg_marquardt(
            exp_decay_residuals(&t, &y),
            &[1.0, 1.0],
            &bounds,
            &LeastSquaresOptions::default(),
        )
        .unwrap();
        assert_relative_eq!(sol.params[0], 3.0, max_relative = 1e-6);
        assert_relative_eq!(sol.params[1], 2.5, max_relative = 1e-6);
        assert!(sol.cost < 1e-12);
    }

    #[test]
    fn respects_active_bounds() {
        // True amplitude 3 but the box caps it at 2.
        let t: Vec<f64> = (0..40).map(|i| i as f64 * 0.25).collect();
        let y: Vec<f64> = t.iter().map(|&ti| 3.0 * (-ti / 2.5).exp()).collect();
        let bounds = Bounds(vec![(0.0, 2.0), (0.1, 10.0)]);
        let sol = levenberg_marquardt(
            exp_decay_residuals(&t, &y),
            &[1.0, 1.0],
            &bounds,
            &LeastSquaresOptions::default(),
        )
        .unwrap();
        assert!(sol.params[0] <= 2.0);
        assert_relative_eq!(sol.params[0], 2.0, max_relative = 1e-9);
    }

    #[test]
    fn iteration_budget_is_non_convergence() {
        let t: Vec<f64> = (0..40).map(|i| i as f64 * 0.25).collect();
        let y: Vec<f64> = t.iter().map(|&ti| 3.0 * (-ti / 2.5).exp()).collect();
        let bounds = Bounds(vec![(0.0, 10.0), (0.1, 10.0)]);
        let opts = LeastSquaresOptions {
            max_iterations: 1,
            ..LeastSquaresOptions::default()
        };
        let err = levenberg_marquardt(exp_decay_residuals(&t, &y), &[0.5, 0.5], &bounds, &opts)
            .unwrap_err();
        assert!(err.contains("maximum number of iterations"));
    }

    #[test]
    fn non_finite_start_is_rejected() {
        let bounds = Bounds(vec![(0.0, 1.0)]);
        let err = levenberg_marquardt(|_| vec![f64::NAN], &[0.5], &bounds, &LeastSquaresOptions::default())
            .unwrap_err();
        assert!(err.contains("not finite"));
    }

    #[test]
    fn inverted_bounds_are_rejected_up_front() {
        let t = [0.0, 1.0];
        let y = [1.0, 0.5];
        let bounds = Bounds(vec![(0.0, 10.0), (5.0, 1.0)]);
        let err = levenberg_marquardt(
            exp_decay_residuals(&t, &y),
            &[1.0, 1.0],
            &bounds,
            &LeastSquaresOptions::default(),
        )
        .unwrap_err();
        assert!(err.contains("lower < upper"), "{err}");
    }
}
