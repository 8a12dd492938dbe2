//! Strategy dispatch for a single curve fit.
//!
//! Both strategies minimise the same objective:
//!
//! ```text
//! MSE(pred, y) + s * max(a + b - 1, 0)^2 + s * mean(min(pred, 0)^2)
//! ```
//!
//! where `s` is `GlobalOptions::penalty_scale`. Least squares sees it as a
//! residual vector (model residuals plus one penalty row), differential
//! evolution as a scalar. Any non-finite prediction makes a candidate cost
//! `INFEASIBLE_COST` instead of poisoning the search with NaN.

use crate::domain::{Bounds, FitOptions, FitOutcome, FitStrategy, ModelConstants, Topology};
use crate::error::AppError;
use crate::fit::{differential_evolution, levenberg_marquardt, polish};
use crate::models::ResponseParams;

/// Objective value assigned to candidates whose prediction is not finite.
pub const INFEASIBLE_COST: f64 = 1e12;

/// Observed curve plus everything needed to score a parameter vector.
#[derive(Debug, Clone, Copy)]
pub struct CurveProblem<'a> {
    topology: Topology,
    constants: &'a ModelConstants,
    t: &'a [f64],
    y: &'a [f64],
    penalty_scale: f64,
}

impl<'a> CurveProblem<'a> {
    /// Validate the data once; every evaluation afterwards is infallible.
    pub fn new(
        topology: Topology,
        constants: &'a ModelConstants,
        t: &'a [f64],
        y: &'a [f64],
        penalty_scale: f64,
    ) -> Result<Self, AppError> {
        if t.len() != y.len() {
            return Err(AppError::input_shape(format!(
                "Fit data has {} time stamps but {} observations.",
                t.len(),
                y.len()
            )));
        }
        if t.is_empty() {
            return Err(AppError::input_shape("Fit data is empty."));
        }
        if t.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(AppError::numerical("Fit data contains non-finite values."));
        }
        Ok(Self {
            topology,
            constants,
            t,
            y,
            penalty_scale,
        })
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Model prediction at the observed times.
    ///
    /// Callers pass `topology().param_len()` parameters; `fit_curve` and
    /// `Model` check that before any evaluation.
    pub(crate) fn predict(&self, params: &[f64]) -> Vec<f64> {
        ResponseParams::from_slice_unchecked(self.topology, params).evaluate_curve(self.t, self.constants)
    }

    /// Scalar objective (see module docs).
    pub(crate) fn objective(&self, params: &[f64]) -> f64 {
        let pred = self.predict(params);
        if pred.iter().any(|v| !v.is_finite()) {
            return INFEASIBLE_COST;
        }
        let n = pred.len() as f64;
        let mse = pred
            .iter()
            .zip(self.y.iter())
            .map(|(p, y)| (p - y).powi(2))
            .sum::<f64>()
            / n;
        mse + self.penalty(params, &pred)
    }

    /// Residual form of the objective: `(1/n) * ||r||^2 == objective`.
    pub(crate) fn residuals(&self, params: &[f64]) -> Vec<f64> {
        let pred = self.predict(params);
        let mut r: Vec<f64> = pred.iter().zip(self.y.iter()).map(|(p, y)| p - y).collect();
        let n = r.len() as f64;
        let penalty = self.penalty(params, &pred);
        r.push((n * penalty).sqrt());
        r
    }

    fn penalty(&self, params: &[f64], pred: &[f64]) -> f64 {
        let violation = ResponseParams::from_slice_unchecked(self.topology, params).volume_violation();
        let negative = pred.iter().map(|v| v.min(0.0).powi(2)).sum::<f64>() / pred.len() as f64;
        self.penalty_scale * (violation * violation + negative)
    }
}

/// Fit one curve with the given strategy.
///
/// Returns `Err` only for configuration problems (e.g. infinite bounds with a
/// global search). Non-convergence becomes `FitOutcome::Failed` and is logged.
pub fn fit_curve(
    problem: &CurveProblem<'_>,
    bounds: &Bounds,
    initial_guess: &[f64],
    strategy: FitStrategy,
    options: &FitOptions,
) -> Result<FitOutcome, AppError> {
    let topology = problem.topology();
    let arity = topology.param_len();
    bounds.validate(topology)?;
    if initial_guess.len() != arity {
        return Err(AppError::config(format!(
            "{} expects an initial guess of length {arity}, got {}.",
            topology.display_name(),
            initial_guess.len()
        )));
    }

    match strategy {
        FitStrategy::LeastSquares => {
            let residuals = |p: &[f64]| problem.residuals(p);
            match levenberg_marquardt(residuals, initial_guess, bounds, &options.least_squares) {
                Ok(sol) => Ok(FitOutcome::Fitted {
                    cost: problem.objective(&sol.params),
                    params: sol.params,
                    iterations: sol.iterations,
                }),
                Err(reason) => {
                    log::warn!("{topology}: least-squares fit did not converge: {reason}");
                    Ok(FitOutcome::failed(reason, arity))
                }
            }
        }
        FitStrategy::Global { polish: polish_enabled } => {
            let objective = |p: &[f64]| problem.objective(p);
            let global = differential_evolution(objective, bounds, &options.global)?;
            if !global.converged {
                log::warn!(
                    "{topology}: global search used its {} generation budget without meeting tolerance; keeping best candidate (cost {:.3e})",
                    global.generations,
                    global.cost
                );
            }
            let mut params = global.params;
            let mut cost = global.cost;

            if polish_enabled && options.global.polish {
                match polish(&objective, &params, bounds, options.global.polish_max_iterations) {
                    Some(refined) if refined.cost < cost => {
                        log::debug!(
                            "{topology}: polish lowered cost {cost:.6e} -> {:.6e} in {} iterations",
                            refined.cost,
                            refined.iterations
                        );
                        params = refined.params;
                        cost = refined.cost;
                    }
                    _ => log::debug!("{topology}: polish kept the global candidate"),
                }
            }

            if !(cost < INFEASIBLE_COST) {
                let reason = "global search found no candidate with a finite prediction".to_string();
                log::warn!("{topology}: {reason}");
                return Ok(FitOutcome::failed(reason, arity));
            }
            Ok(FitOutcome::Fitted {
                params,
                cost,
                iterations: global.generations,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GlobalOptions, LeastSquaresOptions, ModelTable};
    use crate::error::ErrorKind;

    fn grid(end: f64, step: f64) -> Vec<f64> {
        let n = (end / step).round() as usize;
        (0..=n).map(|i| i as f64 * step).collect()
    }

    #[test]
    fn least_squares_recovers_dispersion_parameters() {
        let k = ModelConstants::new(0.01, 2.0, 0.005).unwrap();
        let truth = [20.0, 2.2];
        let t = grid(10.0, 0.05);
        let y = ResponseParams::from_slice(Topology::SingleDispersion, &truth)
            .unwrap()
            .evaluate_curve(&t, &k);

        let problem = CurveProblem::new(Topology::SingleDispersion, &k, &t, &y, 1000.0).unwrap();
        let table = ModelTable::default();
        let bounds = &table.get(Topology::SingleDispersion).unwrap().bounds;
        let outcome = fit_curve(
            &problem,
            bounds,
            &[10.0, 2.0],
            FitStrategy::LeastSquares,
            &FitOptions::default(),
        )
        .unwrap();

        assert!(outcome.is_fitted(), "{outcome:?}");
        let p = outcome.params();
        assert!((p[0] / truth[0] - 1.0).abs() < 0.05, "Pe = {}", p[0]);
        assert!((p[1] / truth[1] - 1.0).abs() < 0.05, "tau = {}", p[1]);
    }

    #[test]
    fn global_search_stays_feasible_on_lfr_cstr() {
        let k = ModelConstants::new(0.01, 1.0, 1.0).unwrap();
        let truth = [0.45, 0.5];
        let t = grid(8.0, 0.05);
        let y = ResponseParams::from_slice(Topology::LfrCstr, &truth)
            .unwrap()
            .evaluate_curve(&t, &k);

        let problem = CurveProblem::new(Topology::LfrCstr, &k, &t, &y, 1000.0).unwrap();
        // The box admits a + b up to 1.98.
        let bounds = Bounds(vec![(0.01, 0.99), (0.01, 0.99)]);
        let options = FitOptions {
            global: GlobalOptions {
                max_generations: 150,
                ..GlobalOptions::default()
            },
            ..FitOptions::default()
        };
        let outcome = fit_curve(
            &problem,
            &bounds,
            &[0.4, 0.4],
            FitStrategy::Global { polish: true },
            &options,
        )
        .unwrap();

        assert!(outcome.is_fitted());
        let p = outcome.params();
        assert!(p[0] + p[1] <= 1.0 + 1e-3, "a + b = {}", p[0] + p[1]);
        assert!((p[0] - truth[0]).abs() < 0.05, "a = {}", p[0]);
        assert!((p[1] - truth[1]).abs() < 0.05, "b = {}", p[1]);
    }

    #[test]
    fn non_convergence_yields_sentinel() {
        let k = ModelConstants::new(0.01, 2.0, 0.005).unwrap();
        let t = grid(10.0, 0.05);
        let y = ResponseParams::from_slice(Topology::SingleDispersion, &[20.0, 2.2])
            .unwrap()
            .evaluate_curve(&t, &k);
        let problem = CurveProblem::new(Topology::SingleDispersion, &k, &t, &y, 1000.0).unwrap();
        let options = FitOptions {
            least_squares: LeastSquaresOptions {
                max_iterations: 1,
                ..LeastSquaresOptions::default()
            },
            ..FitOptions::default()
        };
        let bounds = Bounds(vec![(1e-3, 1e4), (1e-9, f64::INFINITY)]);
        let outcome = fit_curve(&problem, &bounds, &[5.0, 1.0], FitStrategy::LeastSquares, &options).unwrap();

        match outcome {
            FitOutcome::Failed { sentinel, .. } => assert_eq!(sentinel, vec![0.0, 0.0]),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn penalty_applies_above_unit_volume() {
        let k = ModelConstants::new(0.01, 1.0, 1.0).unwrap();
        let t = grid(5.0, 0.1);
        let y = vec![0.0; t.len()];
        let problem = CurveProblem::new(Topology::LfrCstr, &k, &t, &y, 1000.0).unwrap();

        let feasible = problem.objective(&[0.5, 0.5]);
        let infeasible = problem.objective(&[0.7, 0.5]);
        assert!(infeasible - feasible > 1000.0 * 0.04 * 0.9);

        let r = problem.residuals(&[0.7, 0.5]);
        let from_residuals = r.iter().map(|v| v * v).sum::<f64>() / t.len() as f64;
        assert!((from_residuals / infeasible - 1.0).abs() < 1e-9);
    }

    #[test]
    fn global_search_rejects_infinite_bounds() {
        let k = ModelConstants::new(0.01, 2.0, 0.005).unwrap();
        let t = grid(1.0, 0.1);
        let y = vec![0.0; t.len()];
        let problem = CurveProblem::new(Topology::SingleDispersion, &k, &t, &y, 1000.0).unwrap();
        let bounds = Bounds(vec![(1e-3, 1e4), (1e-9, f64::INFINITY)]);
        let err = fit_curve(
            &problem,
            &bounds,
            &[10.0, 2.0],
            FitStrategy::Global { polish: false },
            &FitOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn mismatched_data_is_an_input_error() {
        let k = ModelConstants::new(0.01, 2.0, 1.0).unwrap();
        let err = CurveProblem::new(Topology::TanksInSeries, &k, &[0.0, 1.0], &[0.0], 1000.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputShape);
    }

    #[test]
    fn malformed_box_or_guess_is_a_config_error() {
        let k = ModelConstants::new(0.01, 2.0, 1.0).unwrap();
        let t = grid(4.0, 0.1);
        let y = vec![0.0; t.len()];
        let problem = CurveProblem::new(Topology::LfrCstr, &k, &t, &y, 1000.0).unwrap();

        let inverted = Bounds(vec![(0.5, 0.1), (0.01, 0.99)]);
        for strategy in [FitStrategy::LeastSquares, FitStrategy::Global { polish: true }] {
            let err = fit_curve(&problem, &inverted, &[0.3, 0.3], strategy, &FitOptions::default()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config);
        }

        let ok = Bounds(vec![(0.01, 0.99), (0.01, 0.99)]);
        let err = fit_curve(&problem, &ok, &[0.3], FitStrategy::LeastSquares, &FitOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
