//! Run configuration and the per-topology default table.
//!
//! Everything here is plain data built once at startup (from defaults, a JSON
//! file, or CLI flags) and passed by value into each system's fit.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::types::{Bounds, DEFAULT_DENSITY, ModelConstants, Topology};
use crate::error::AppError;

/// How a model's parameters are estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum FitStrategy {
    /// Bounded nonlinear least squares from the initial guess.
    LeastSquares,
    /// Differential evolution over the bound box, optionally polished.
    Global { polish: bool },
}

/// Options for the bounded Levenberg–Marquardt solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeastSquaresOptions {
    /// Outer-iteration budget; exhausting it is reported as non-convergence.
    pub max_iterations: usize,
    /// Relative reduction of the cost below which we stop.
    pub ftol: f64,
    /// Relative step size below which we stop.
    pub xtol: f64,
    /// Infinity norm of the (projected) gradient below which we stop.
    pub gtol: f64,
}

impl Default for LeastSquaresOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
        }
    }
}

/// Options for the differential-evolution search and its polish step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalOptions {
    pub seed: u64,
    /// Scale of the quadratic constraint penalty in the objective.
    pub penalty_scale: f64,
    /// Population size is `popsize * dim`.
    pub popsize: usize,
    /// Hard generation budget.
    pub max_generations: usize,
    /// Relative spread of population costs at which we stop.
    pub tol: f64,
    /// Absolute spread of population costs at which we stop.
    pub atol: f64,
    /// Differential weight, dithered uniformly per generation in `[lo, hi)`.
    pub mutation: (f64, f64),
    /// Crossover probability.
    pub recombination: f64,
    pub polish: bool,
    pub polish_max_iterations: u64,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            seed: 69,
            penalty_scale: 1000.0,
            popsize: 15,
            max_generations: 1000,
            tol: 0.01,
            atol: 0.0,
            mutation: (0.5, 1.0),
            recombination: 0.7,
            polish: true,
            polish_max_iterations: 200,
        }
    }
}

impl GlobalOptions {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.popsize == 0 || self.max_generations == 0 {
            return Err(AppError::config("popsize and max_generations must be > 0."));
        }
        let (lo, hi) = self.mutation;
        if !(lo.is_finite() && hi.is_finite() && 0.0 <= lo && lo <= hi && hi <= 2.0) {
            return Err(AppError::config(format!(
                "Mutation range must satisfy 0 <= lo <= hi <= 2 (got [{lo}, {hi}])."
            )));
        }
        if !(0.0..=1.0).contains(&self.recombination) {
            return Err(AppError::config("Recombination must be within [0, 1]."));
        }
        if !(self.penalty_scale.is_finite() && self.penalty_scale >= 0.0) {
            return Err(AppError::config("Penalty scale must be finite and >= 0."));
        }
        if !(self.tol >= 0.0 && self.atol >= 0.0) {
            return Err(AppError::config("Convergence tolerances must be >= 0."));
        }
        Ok(())
    }
}

/// Per-call fitting options.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Overrides the topology's preferred strategy when set.
    pub strategy: Option<FitStrategy>,
    pub least_squares: LeastSquaresOptions,
    pub global: GlobalOptions,
}

/// Default bounds / guess / strategy for one topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySettings {
    #[serde(deserialize_with = "deserialize_bounds")]
    pub bounds: Bounds,
    /// Missing means "derive from the system constants".
    #[serde(default)]
    pub initial_guess: Option<Vec<f64>>,
    pub strategy: FitStrategy,
}

impl TopologySettings {
    /// Resolve the starting point for a least-squares fit.
    pub fn initial_guess_for(&self, topology: Topology, constants: &ModelConstants) -> Vec<f64> {
        let guess = self
            .initial_guess
            .clone()
            .unwrap_or_else(|| default_guess(topology, constants));
        self.bounds.clamp(&guess)
    }
}

fn default_guess(topology: Topology, constants: &ModelConstants) -> Vec<f64> {
    let tau = constants.tau;
    match topology {
        Topology::SingleDispersion => vec![10.0, tau],
        Topology::DoubleDispersion => vec![10.0, 10.0, 0.8 * tau, 1.5 * tau],
        Topology::TanksInSeries => vec![5.0],
        Topology::LfrCstr => vec![0.4, 0.4],
        Topology::LfrCstrBypass => vec![0.5, 0.5],
        Topology::LfrCstrDzBypass | Topology::LfrCstrPfrParallel => vec![0.4, 0.4, 0.5],
    }
}

/// Explicit table of per-topology defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTable {
    entries: BTreeMap<Topology, TopologySettings>,
}

impl Default for ModelTable {
    fn default() -> Self {
        let frac = (0.01, 0.99);
        let global = FitStrategy::Global { polish: true };
        let mut entries = BTreeMap::new();
        entries.insert(
            Topology::SingleDispersion,
            TopologySettings {
                bounds: Bounds(vec![(1e-3, 1e4), (1e-9, f64::INFINITY)]),
                initial_guess: None,
                strategy: FitStrategy::LeastSquares,
            },
        );
        entries.insert(
            Topology::DoubleDispersion,
            TopologySettings {
                bounds: Bounds(vec![
                    (1e-3, 1e4),
                    (1e-3, 1e4),
                    (1e-9, f64::INFINITY),
                    (1e-9, f64::INFINITY),
                ]),
                initial_guess: None,
                strategy: FitStrategy::LeastSquares,
            },
        );
        entries.insert(
            Topology::TanksInSeries,
            TopologySettings {
                bounds: Bounds(vec![(1.0, 105.0)]),
                initial_guess: None,
                strategy: FitStrategy::LeastSquares,
            },
        );
        entries.insert(
            Topology::LfrCstr,
            TopologySettings {
                bounds: Bounds(vec![frac, frac]),
                initial_guess: None,
                strategy: global,
            },
        );
        entries.insert(
            Topology::LfrCstrBypass,
            TopologySettings {
                bounds: Bounds(vec![frac, frac]),
                initial_guess: None,
                strategy: global,
            },
        );
        for t in [Topology::LfrCstrDzBypass, Topology::LfrCstrPfrParallel] {
            entries.insert(
                t,
                TopologySettings {
                    bounds: Bounds(vec![frac, frac, frac]),
                    initial_guess: None,
                    strategy: global,
                },
            );
        }
        Self { entries }
    }
}

impl ModelTable {
    pub fn get(&self, topology: Topology) -> Result<&TopologySettings, AppError> {
        self.entries.get(&topology).ok_or_else(|| {
            AppError::unknown(format!("No settings registered for topology '{topology}'."))
        })
    }

    /// Replace the entry for one topology after validating it.
    pub fn set(&mut self, topology: Topology, settings: TopologySettings) -> Result<(), AppError> {
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
        }
        self.entries.insert(topology, settings);
        Ok(())
    }

    /// Overlay entries from another table (used for JSON overrides).
    pub fn merge(&mut self, overrides: BTreeMap<Topology, TopologySettings>) -> Result<(), AppError> {
        for (t, s) in overrides {
            self.set(t, s)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Topology, &TopologySettings)> {
        self.entries.iter()
    }
}

/// Everything the batch driver needs besides the data itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub topology: Topology,
    pub density: f64,
    pub fit: FitOptions,
    /// Per-topology overrides merged over `ModelTable::default()`.
    pub models: BTreeMap<Topology, TopologySettings>,
    /// Fit systems on the rayon pool instead of sequentially.
    pub parallel: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            topology: Topology::LfrCstr,
            density: DEFAULT_DENSITY,
            fit: FitOptions::default(),
            models: BTreeMap::new(),
            parallel: false,
        }
    }
}

impl RunConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, AppError> {
        let config: RunConfig = serde_json::from_str(text)
            .map_err(|e| AppError::config(format!("Invalid configuration JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.density.is_finite() && self.density > 0.0) {
            return Err(AppError::config(format!(
                "Density must be finite and > 0 (got {}).",
                self.density
            )));
        }
        self.fit.global.validate()
    }

    /// Default table with this config's overrides applied.
    pub fn model_table(&self) -> Result<ModelTable, AppError> {
        let mut table = ModelTable::default();
        table.merge(self.models.clone())?;
        Ok(table)
    }
}

/// A bound entry in config files: a number, or `"INF"` / `"-INF"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum BoundValue {
    Number(f64),
    Text(String),
}

impl BoundValue {
    fn resolve(self) -> Result<f64, String> {
        match self {
            BoundValue::Number(v) => Ok(v),
            BoundValue::Text(s) => match s.trim().to_ascii_uppercase().as_str() {
                "INF" | "+INF" => Ok(f64::INFINITY),
                "-INF" => Ok(f64::NEG_INFINITY),
                other => other
                    .parse::<f64>()
                    .map_err(|_| format!("invalid bound value '{s}'")),
            },
        }
    }
}

fn deserialize_bounds<'de, D>(deserializer: D) -> Result<Bounds, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<(BoundValue, BoundValue)> = Vec::deserialize(deserializer)?;
    let mut out = Vec::with_capacity(raw.len());
    for (lo, hi) in raw {
        let lo = lo.resolve().map_err(serde::de::Error::custom)?;
        let hi = hi.resolve().map_err(serde::de::Error::custom)?;
        out.push((lo, hi));
    }
    Ok(Bounds(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_covers_every_topology() {
        let table = ModelTable::default();
        for t in Topology::ALL {
            let s = table.get(t).unwrap();
            s.bounds.validate(t).unwrap();
        }
    }

    #[test]
    fn config_json_accepts_inf_strings() {
        let json = r#"{
            "topology": "tanks-in-series",
            "models": {
                "tanks-in-series": {
                    "bounds": [[1, "INF"]],
                    "strategy": { "kind": "least-squares" }
                }
            }
        }"#;
        let config = RunConfig::from_json(json).unwrap();
        assert_eq!(config.topology, Topology::TanksInSeries);
        let table = config.model_table().unwrap();
        let s = table.get(Topology::TanksInSeries).unwrap();
        assert_eq!(s.bounds.0[0].0, 1.0);
        assert!(s.bounds.0[0].1.is_infinite());
        assert_eq!(config.fit.global.seed, 69);
    }

    #[test]
    fn config_rejects_wrong_bound_arity() {
        let json = r#"{
            "models": {
                "lfr-cstr": { "bounds": [[0.0, 1.0]], "strategy": { "kind": "least-squares" } }
            }
        }"#;
        let config = RunConfig::from_json(json).unwrap();
        assert!(config.model_table().is_err());
    }

    #[test]
    fn initial_guess_is_clamped_into_bounds() {
        let settings = TopologySettings {
            bounds: Bounds(vec![(1.0, 3.0)]),
            initial_guess: Some(vec![10.0]),
            strategy: FitStrategy::LeastSquares,
        };
        let c = ModelConstants::new(0.01, 2.0, 1.0).unwrap();
        assert_eq!(settings.initial_guess_for(Topology::TanksInSeries, &c), vec![3.0]);
    }
}
