//! A topology bound to one system's constants.
//!
//! `Model` owns everything fixed at construction (topology, `dt`/`tau`/`C0`,
//! bounds, initial guess, preferred strategy) and the outcome of the latest
//! fit. Lifecycle:
//!
//! ```text
//! Unfitted --fit--> Fitted
//!          \-fit--> Failed   (sentinel parameters, predictions degenerate)
//! ```
//!
//! Refitting replaces the outcome wholesale; there is no way back to
//! `Unfitted`.

use crate::domain::{
    Bounds, FitOptions, FitOutcome, FitStatus, FitStrategy, ModelConstants, ModelTable,
    SystemParameters, Topology, TopologySettings,
};
use crate::error::AppError;
use crate::fit::{CurveProblem, fit_curve};
use crate::models::ResponseParams;

#[derive(Debug, Clone)]
pub struct Model {
    topology: Topology,
    constants: ModelConstants,
    bounds: Bounds,
    initial_guess: Vec<f64>,
    strategy: FitStrategy,
    outcome: Option<FitOutcome>,
}

impl Model {
    /// Build a model with explicit bounds and an optional starting point.
    ///
    /// The guess defaults to the topology's standard guess and is clamped into
    /// the bounds. The preferred strategy is least squares for smooth
    /// responses and global search for piecewise ones.
    pub fn new(
        topology: Topology,
        constants: ModelConstants,
        bounds: Bounds,
        initial_guess: Option<Vec<f64>>,
    ) -> Result<Self, AppError> {
        let strategy = if topology.is_piecewise() {
            FitStrategy::Global { polish: true }
        } else {
            FitStrategy::LeastSquares
        };
        let settings = TopologySettings {
            bounds,
            initial_guess,
            strategy,
        };
        Self::from_settings(topology, constants, &settings)
    }

    /// Build a model from one entry of the topology table.
    pub fn from_settings(
        topology: Topology,
        constants: ModelConstants,
        settings: &TopologySettings,
    ) -> Result<Self, AppError> {
        settings.bounds.validate(topology)?;
        if let Some(g) = &settings.initial_guess {
            if g.len() != topology.param_len() {
                return Err(AppError::config(format!(
                    "{} expects an initial guess of length {}, got {}.",
                    topology.display_name(),
                    topology.param_len(),
                    g.len()
                )));
            }
            if g.iter().any(|v| !v.is_finite()) {
                return Err(AppError::config("Initial guess must be finite."));
            }
        }
        Ok(Self {
            topology,
            constants,
            bounds: settings.bounds.clone(),
            initial_guess: settings.initial_guess_for(topology, &constants),
            strategy: settings.strategy,
            outcome: None,
        })
    }

    /// Model for a system using the configured table entry for `topology`.
    pub fn for_system(
        topology: Topology,
        system: &SystemParameters,
        table: &ModelTable,
    ) -> Result<Self, AppError> {
        let constants = ModelConstants::for_system(topology, system)?;
        Self::from_settings(topology, constants, table.get(topology)?)
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn constants(&self) -> &ModelConstants {
        &self.constants
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn initial_guess(&self) -> &[f64] {
        &self.initial_guess
    }

    pub fn strategy(&self) -> FitStrategy {
        self.strategy
    }

    pub fn state(&self) -> FitStatus {
        self.outcome
            .as_ref()
            .map(FitOutcome::status)
            .unwrap_or(FitStatus::Unfitted)
    }

    /// Latest fit outcome, if any.
    pub fn outcome(&self) -> Option<&FitOutcome> {
        self.outcome.as_ref()
    }

    /// Evaluate the response at explicit parameters (no fit required).
    pub fn evaluate(&self, t: &[f64], params: &[f64]) -> Result<Vec<f64>, AppError> {
        let p = ResponseParams::from_slice(self.topology, params)?;
        Ok(p.evaluate_curve(t, &self.constants))
    }

    /// Penalised objective used by both fitting strategies.
    pub fn objective(&self, params: &[f64], t: &[f64], y: &[f64], penalty_scale: f64) -> Result<f64, AppError> {
        ResponseParams::from_slice(self.topology, params)?;
        let problem = CurveProblem::new(self.topology, &self.constants, t, y, penalty_scale)?;
        Ok(problem.objective(params))
    }

    /// Fit to `(t, y)`.
    ///
    /// Malformed data is an `Err` and leaves the previous state untouched.
    /// Non-convergence is not an error: the outcome is `Failed` with a zero
    /// sentinel and a warning has been logged.
    pub fn fit(&mut self, t: &[f64], y: &[f64], options: &FitOptions) -> Result<&FitOutcome, AppError> {
        let problem = CurveProblem::new(
            self.topology,
            &self.constants,
            t,
            y,
            options.global.penalty_scale,
        )?;
        let strategy = options.strategy.unwrap_or(self.strategy);
        let outcome = fit_curve(&problem, &self.bounds, &self.initial_guess, strategy, options)?;
        Ok(self.outcome.insert(outcome))
    }

    /// Evaluate the fitted response; `Err(Precondition)` before any fit.
    pub fn predict(&self, t: &[f64]) -> Result<Vec<f64>, AppError> {
        let outcome = self.outcome.as_ref().ok_or_else(|| {
            AppError::precondition(format!(
                "{} model has not been fitted; call fit before predict.",
                self.topology.display_name()
            ))
        })?;
        self.evaluate(t, outcome.params())
    }
}
