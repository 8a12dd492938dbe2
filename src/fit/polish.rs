//! Local L-BFGS refinement of a global-search candidate.
//!
//! Box constraints are handled by projection: every cost/gradient evaluation
//! clamps the parameters first, and gradient components that would push an
//! active bound further out are zeroed so the line search does not wander into
//! the flat clamped region.
//!
//! The objective is divided by its value at the starting point so the
//! tolerances below are relative to the candidate's own cost scale.

use argmin::core::{CostFunction, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;

use crate::domain::Bounds;

/// L-BFGS history length.
const MEMORY: usize = 7;
const GRAD_TOL: f64 = 1e-8;
const COST_TOL: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct PolishResult {
    pub params: Vec<f64>,
    pub cost: f64,
    pub iterations: u64,
}

struct Problem<'a, F> {
    objective: &'a F,
    bounds: &'a Bounds,
    scale: f64,
}

impl<F> Problem<'_, F>
where
    F: Fn(&[f64]) -> f64,
{
    fn eval(&self, x: &[f64]) -> f64 {
        (self.objective)(x) / self.scale
    }
}

impl<F> CostFunction for Problem<'_, F>
where
    F: Fn(&[f64]) -> f64,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let clamped = self.bounds.clamp(params);
        Ok(self.eval(clamped.as_slice()))
    }
}

impl<F> Gradient for Problem<'_, F>
where
    F: Fn(&[f64]) -> f64,
{
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, params: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let x = self.bounds.clamp(params);
        let mut probe = x.clone();
        let mut grad = vec![0.0; x.len()];

        for (i, g) in grad.iter_mut().enumerate() {
            let (lo, hi) = self.bounds.0[i];
            let h = 1e-8 * x[i].abs().max(1.0);
            let up = (x[i] + h).min(hi);
            let down = (x[i] - h).max(lo);
            if up <= down {
                continue;
            }
            probe[i] = up;
            let f_up = self.eval(probe.as_slice());
            probe[i] = down;
            let f_down = self.eval(probe.as_slice());
            probe[i] = x[i];

            let d = (f_up - f_down) / (up - down);
            *g = if d.is_finite() { d } else { 0.0 };

            const EPS: f64 = 1e-12;
            if (x[i] <= lo + EPS && *g > 0.0) || (x[i] >= hi - EPS && *g < 0.0) {
                *g = 0.0;
            }
        }
        Ok(grad)
    }
}

/// Refine `start` with L-BFGS; `None` if the solver errors out.
///
/// The returned parameters are clamped into `bounds` and `cost` is re-evaluated
/// there.
pub fn polish<F>(objective: &F, start: &[f64], bounds: &Bounds, max_iterations: u64) -> Option<PolishResult>
where
    F: Fn(&[f64]) -> f64,
{
    let x0 = bounds.clamp(start);
    let f0 = objective(x0.as_slice());
    if !f0.is_finite() {
        return None;
    }
    let scale = if f0 > 0.0 { f0 } else { 1.0 };

    let problem = Problem { objective, bounds, scale };
    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, MEMORY)
        .with_tolerance_grad(GRAD_TOL)
        .ok()?
        .with_tolerance_cost(COST_TOL)
        .ok()?;

    let result = Executor::new(problem, solver)
        .configure(|state| state.param(x0).max_iters(max_iterations))
        .run();

    let res = match result {
        Ok(res) => res,
        Err(e) => {
            log::debug!("polish: L-BFGS stopped early: {e}");
            return None;
        }
    };

    let state = res.state();
    let best = state.get_best_param()?;
    let params = bounds.clamp(best);
    let cost = objective(params.as_slice());
    if !cost.is_finite() {
        return None;
    }
    Some(PolishResult {
        params,
        cost,
        iterations: state.get_iter(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polish_reaches_quadratic_minimum() {
        let f = |p: &[f64]| (p[0] - 0.2).powi(2) + 2.0 * (p[1] + 0.1).powi(2);
        let bounds = Bounds(vec![(-1.0, 1.0), (-1.0, 1.0)]);
        let res = polish(&f, &[0.8, 0.7], &bounds, 100).unwrap();
        assert!((res.params[0] - 0.2).abs() < 1e-5);
        assert!((res.params[1] + 0.1).abs() < 1e-5);
    }

    #[test]
    fn polish_stays_inside_bounds() {
        // Unconstrained minimum at 2 lies outside the box.
        let f = |p: &[f64]| (p[0] - 2.0).powi(2);
        let bounds = Bounds(vec![(0.0, 1.0)]);
        if let Some(res) = polish(&f, &[0.5], &bounds, 50) {
            assert!(res.params[0] <= 1.0 && res.params[0] >= 0.0);
            assert!(res.cost <= f(&[0.5][..]));
        }
    }
}
