//! Shared domain types.
//!
//! These types are kept small and serializable so they can be:
//!
//! - passed by value into independent per-system fits
//! - exported to CSV/JSON by the thin IO layer
//! - reloaded later for comparisons

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Unit conversion for DOE flow rates (mL/s -> m³/s).
pub const ML_PER_S_TO_M3_PER_S: f64 = 1e-6;

/// Default working-fluid density (blood, kg/m³).
pub const DEFAULT_DENSITY: f64 = 1045.0;

/// Reactor topology whose tracer response is fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    /// Taylor dispersion superimposed on plug flow, one path.
    SingleDispersion,
    /// Two parallel dispersion paths.
    DoubleDispersion,
    /// `n` equal CSTRs in series.
    TanksInSeries,
    /// LFR followed by a CSTR; the remaining volume is dead.
    LfrCstr,
    /// LFR whose outlet is split between a CSTR and a bypass.
    LfrCstrBypass,
    /// LFR, then a CSTR with dead zone, plus a bypass stream.
    LfrCstrDzBypass,
    /// LFR feeding a CSTR and a PFR in parallel.
    LfrCstrPfrParallel,
}

impl Topology {
    pub const ALL: [Topology; 7] = [
        Topology::SingleDispersion,
        Topology::DoubleDispersion,
        Topology::TanksInSeries,
        Topology::LfrCstr,
        Topology::LfrCstrBypass,
        Topology::LfrCstrDzBypass,
        Topology::LfrCstrPfrParallel,
    ];

    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            Topology::SingleDispersion => "single dispersion",
            Topology::DoubleDispersion => "double dispersion",
            Topology::TanksInSeries => "tanks in series",
            Topology::LfrCstr => "LFR + CSTR (dead zone)",
            Topology::LfrCstrBypass => "LFR + CSTR with bypass",
            Topology::LfrCstrDzBypass => "LFR + CSTR (dead zone) with bypass",
            Topology::LfrCstrPfrParallel => "LFR + parallel CSTR/PFR",
        }
    }

    /// Stable identifier (matches the serde/CLI spelling).
    pub fn id(self) -> &'static str {
        match self {
            Topology::SingleDispersion => "single-dispersion",
            Topology::DoubleDispersion => "double-dispersion",
            Topology::TanksInSeries => "tanks-in-series",
            Topology::LfrCstr => "lfr-cstr",
            Topology::LfrCstrBypass => "lfr-cstr-bypass",
            Topology::LfrCstrDzBypass => "lfr-cstr-dz-bypass",
            Topology::LfrCstrPfrParallel => "lfr-cstr-pfr-parallel",
        }
    }

    /// Names of the tunable parameters, in vector order.
    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            Topology::SingleDispersion => &["Pe", "tau"],
            Topology::DoubleDispersion => &["Pe1", "Pe2", "tau1", "tau2"],
            Topology::TanksInSeries => &["n"],
            Topology::LfrCstr => &["a", "b"],
            Topology::LfrCstrBypass => &["b", "c"],
            Topology::LfrCstrDzBypass | Topology::LfrCstrPfrParallel => &["a", "b", "c"],
        }
    }

    pub fn param_len(self) -> usize {
        self.param_names().len()
    }

    /// Piecewise (transit-delay) responses defeat local gradient methods.
    pub fn is_piecewise(self) -> bool {
        matches!(
            self,
            Topology::LfrCstr
                | Topology::LfrCstrBypass
                | Topology::LfrCstrDzBypass
                | Topology::LfrCstrPfrParallel
        )
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Topology {
    type Err = AppError;

    /// Accepts the kebab-case id or the legacy upper-case class names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace('_', "-");
        let found = match norm.as_str() {
            "single-dispersion" | "taylor-dispersion" => Some(Topology::SingleDispersion),
            "double-dispersion" => Some(Topology::DoubleDispersion),
            "tanks-in-series" => Some(Topology::TanksInSeries),
            "lfr-cstr" | "lfr-dz-cstr" => Some(Topology::LfrCstr),
            "lfr-cstr-bypass" | "lfr-cstr-with-bypass" => Some(Topology::LfrCstrBypass),
            "lfr-cstr-dz-bypass" => Some(Topology::LfrCstrDzBypass),
            "lfr-cstr-pfr-parallel" => Some(Topology::LfrCstrPfrParallel),
            _ => None,
        };
        found.ok_or_else(|| {
            let known: Vec<&str> = Topology::ALL.iter().map(|t| t.id()).collect();
            AppError::unknown(format!(
                "Unknown topology '{s}'. Expected one of: {}",
                known.join(", ")
            ))
        })
    }
}

/// Which representation a curve holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveKind {
    /// Raw outlet tracer mass fraction vs time.
    #[serde(rename = "C")]
    Concentration,
    /// Residence-time density E(t).
    #[serde(rename = "Et")]
    E,
    /// Dimensionless E(theta) vs theta = t / tau.
    #[serde(rename = "Etheta")]
    ETheta,
}

impl CurveKind {
    pub fn id(self) -> &'static str {
        match self {
            CurveKind::Concentration => "C",
            CurveKind::E => "Et",
            CurveKind::ETheta => "Etheta",
        }
    }

    /// Column labels (abscissa, ordinate) used in curve CSV files.
    pub fn columns(self) -> (&'static str, &'static str) {
        match self {
            CurveKind::Concentration => ("time", "mass_fraction"),
            CurveKind::E => ("time", "Et"),
            CurveKind::ETheta => ("theta", "Etheta"),
        }
    }
}

impl FromStr for CurveKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "C" => Ok(CurveKind::Concentration),
            "Et" => Ok(CurveKind::E),
            "Etheta" => Ok(CurveKind::ETheta),
            other => Err(AppError::unknown(format!(
                "Invalid curve type '{other}'. Expected one of: C, Et, Etheta"
            ))),
        }
    }
}

/// An ordered `(time, value)` sequence.
///
/// Construction validates the shape once; afterwards the curve is immutable and
/// transforms always produce new curves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Curve {
    kind: CurveKind,
    time: Vec<f64>,
    values: Vec<f64>,
}

impl Curve {
    /// Build a validated curve.
    ///
    /// Requirements: equal, non-zero lengths; finite entries; `time >= 0`;
    /// strictly increasing time.
    pub fn new(kind: CurveKind, time: Vec<f64>, values: Vec<f64>) -> Result<Self, AppError> {
        if time.len() != values.len() {
            return Err(AppError::input_shape(format!(
                "Curve has {} time stamps but {} values.",
                time.len(),
                values.len()
            )));
        }
        if time.is_empty() {
            return Err(AppError::input_shape("Curve is empty."));
        }
        if let Some(i) = time.iter().position(|t| !t.is_finite() || *t < 0.0) {
            return Err(AppError::input_shape(format!(
                "Curve time at index {i} is negative or non-finite ({}).",
                time[i]
            )));
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(AppError::numerical(format!(
                "Curve value at index {i} is non-finite ({}).",
                values[i]
            )));
        }
        if let Some(i) = time.windows(2).position(|w| w[1] <= w[0]) {
            return Err(AppError::input_shape(format!(
                "Curve time must be strictly increasing (index {} -> {}: {} -> {}).",
                i,
                i + 1,
                time[i],
                time[i + 1]
            )));
        }
        Ok(Self { kind, time, values })
    }

    /// Shorthand for a raw concentration (mass-fraction) curve.
    pub fn concentration(time: Vec<f64>, mass_fraction: Vec<f64>) -> Result<Self, AppError> {
        Self::new(CurveKind::Concentration, time, mass_fraction)
    }

    pub fn kind(&self) -> CurveKind {
        self.kind
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Trapezoidal integral of the values over the abscissa.
    pub fn area(&self) -> f64 {
        self.time
            .windows(2)
            .zip(self.values.windows(2))
            .map(|(t, v)| 0.5 * (t[1] - t[0]) * (v[0] + v[1]))
            .sum()
    }

    /// Internal constructor for transforms that preserve validity by construction.
    pub(crate) fn from_parts(kind: CurveKind, time: Vec<f64>, values: Vec<f64>) -> Self {
        Self { kind, time, values }
    }
}

/// CFD turbulence treatment recorded in the design of experiments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ViscousModel {
    Laminar,
    Turbulent,
}

impl ViscousModel {
    pub fn id(self) -> &'static str {
        match self {
            ViscousModel::Laminar => "LAMINAR",
            ViscousModel::Turbulent => "TURBULENT",
        }
    }
}

impl FromStr for ViscousModel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LAMINAR" => Ok(ViscousModel::Laminar),
            "TURBULENT" => Ok(ViscousModel::Turbulent),
            other => Err(AppError::unknown(format!(
                "Unknown viscous model '{other}'. Expected LAMINAR or TURBULENT."
            ))),
        }
    }
}

/// One row of the design-of-experiments table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoeRecord {
    pub case_id: u32,
    /// Volumetric flow rate in mL/s.
    pub flow_rate: f64,
    /// System (arterial/reactor) volume in m³.
    pub volume: f64,
    /// CFD time-step size, equal to the tracer injection duration (s).
    pub timestep_size: f64,
    pub viscous_model: ViscousModel,
    pub cohort: Option<u32>,
    pub geometry: Option<u32>,
    pub perc_ds: Option<f64>,
    pub ramp_angle: Option<f64>,
    pub no_timesteps: Option<u64>,
}

/// Physical constants for one system instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemParameters {
    pub case_id: u32,
    /// Injection / time-step duration (s).
    pub dt: f64,
    /// Space time `V / Q` (s).
    pub tau: f64,
    /// Fluid density (kg/m³).
    pub rho: f64,
    /// Injected tracer mass `Q * rho * dt` (unit inlet mass fraction).
    pub n0: f64,
    /// Volumetric flow rate (m³/s).
    pub flow_rate: f64,
    /// Volume (m³).
    pub volume: f64,
}

impl SystemParameters {
    /// Build the constants from explicit SI values.
    pub fn new(case_id: u32, dt: f64, flow_rate: f64, volume: f64, rho: f64) -> Result<Self, AppError> {
        for (name, v) in [("dt", dt), ("flow_rate", flow_rate), ("volume", volume), ("rho", rho)] {
            if !(v.is_finite() && v > 0.0) {
                return Err(AppError::config(format!(
                    "System {case_id}: {name} must be finite and > 0 (got {v})."
                )));
            }
        }
        Ok(Self {
            case_id,
            dt,
            tau: volume / flow_rate,
            rho,
            n0: flow_rate * rho * dt,
            flow_rate,
            volume,
        })
    }

    /// Derive the constants from a DOE row (flow rate given in mL/s).
    pub fn from_doe(record: &DoeRecord, rho: f64) -> Result<Self, AppError> {
        Self::new(
            record.case_id,
            record.timestep_size,
            record.flow_rate * ML_PER_S_TO_M3_PER_S,
            record.volume,
            rho,
        )
    }

    /// Amplitude for dispersion responses: `Q * dt / V = dt / tau`.
    pub fn dispersion_c0(&self) -> f64 {
        self.dt / self.tau
    }
}

/// Constants fixed for the lifetime of a model instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelConstants {
    pub dt: f64,
    pub tau: f64,
    pub c0: f64,
}

impl ModelConstants {
    pub fn new(dt: f64, tau: f64, c0: f64) -> Result<Self, AppError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(AppError::config(format!("dt must be finite and > 0 (got {dt}).")));
        }
        if !(tau.is_finite() && tau > 0.0) {
            return Err(AppError::config(format!("tau must be finite and > 0 (got {tau}).")));
        }
        if !c0.is_finite() {
            return Err(AppError::config(format!("C0 must be finite (got {c0}).")));
        }
        Ok(Self { dt, tau, c0 })
    }

    /// Default constants for a topology on a given system.
    ///
    /// Dispersion topologies use `C0 = dt / tau`; all other families carry the
    /// `dt * C0` factor inside the response, so `C0 = 1` (unit inlet fraction).
    pub fn for_system(topology: Topology, system: &SystemParameters) -> Result<Self, AppError> {
        let c0 = match topology {
            Topology::SingleDispersion | Topology::DoubleDispersion => system.dispersion_c0(),
            _ => 1.0,
        };
        Self::new(system.dt, system.tau, c0)
    }
}

/// Per-parameter `(lower, upper)` bounds. Infinite entries are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds(pub Vec<(f64, f64)>);

impl Bounds {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|(lo, hi)| lo.is_finite() && hi.is_finite())
    }

    /// Check arity and ordering against a topology.
    pub fn validate(&self, topology: Topology) -> Result<(), AppError> {
        if self.len() != topology.param_len() {
            return Err(AppError::config(format!(
                "{} expects {} bounds ({}), got {}.",
                topology.display_name(),
                topology.param_len(),
                topology.param_names().join(", "),
                self.len()
            )));
        }
        match self.first_disordered() {
            Some(i) => Err(AppError::config(format!(
                "Invalid bound for '{}': [{}, {}] (need lower < upper).",
                topology.param_names()[i],
                self.0[i].0,
                self.0[i].1
            ))),
            None => Ok(()),
        }
    }

    /// Every pair must satisfy `lower < upper` (no NaN).
    pub fn check_order(&self) -> Result<(), AppError> {
        match self.first_disordered() {
            Some(i) => Err(AppError::config(format!(
                "Invalid bound #{i}: [{}, {}] (need lower < upper).",
                self.0[i].0,
                self.0[i].1
            ))),
            None => Ok(()),
        }
    }

    fn first_disordered(&self) -> Option<usize> {
        self.0
            .iter()
            .position(|(lo, hi)| lo.is_nan() || hi.is_nan() || lo >= hi)
    }

    /// Project a parameter vector onto the box.
    pub fn clamp(&self, params: &[f64]) -> Vec<f64> {
        params
            .iter()
            .zip(self.0.iter())
            // max/min rather than f64::clamp: never panics on a malformed box.
            .map(|(&v, &(lo, hi))| v.max(lo).min(hi))
            .collect()
    }
}

/// Tagged fit result.
///
/// A failed fit keeps the batch going: it carries a zero sentinel of the
/// expected arity so downstream tables keep their shape, while callers can
/// still tell "degenerate" from "legitimately near zero".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitOutcome {
    Fitted {
        params: Vec<f64>,
        /// Final objective value (MSE plus any penalty).
        cost: f64,
        iterations: usize,
    },
    Failed {
        reason: String,
        sentinel: Vec<f64>,
    },
}

impl FitOutcome {
    pub fn failed(reason: impl Into<String>, arity: usize) -> Self {
        FitOutcome::Failed {
            reason: reason.into(),
            sentinel: vec![0.0; arity],
        }
    }

    /// Parameters to evaluate: fitted values or the sentinel.
    pub fn params(&self) -> &[f64] {
        match self {
            FitOutcome::Fitted { params, .. } => params,
            FitOutcome::Failed { sentinel, .. } => sentinel,
        }
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self, FitOutcome::Fitted { .. })
    }

    pub fn status(&self) -> FitStatus {
        match self {
            FitOutcome::Fitted { .. } => FitStatus::Fitted,
            FitOutcome::Failed { .. } => FitStatus::Failed,
        }
    }
}

/// Model lifecycle state (`Fitting` is transient inside `Model::fit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitStatus {
    Unfitted,
    Fitted,
    Failed,
}

impl FitStatus {
    pub fn id(self) -> &'static str {
        match self {
            FitStatus::Unfitted => "unfitted",
            FitStatus::Fitted => "fitted",
            FitStatus::Failed => "failed",
        }
    }
}

/// Goodness-of-fit scores for one system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitMetrics {
    pub rae: f64,
    pub mae: f64,
    pub mean_residual: f64,
    pub std_residual: f64,
}

/// Fitted parameters plus scores, one per `(system, topology)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub outcome: FitOutcome,
    pub metrics: FitMetrics,
}

/// A row of the evaluation summary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub case_id: u32,
    pub topology: Topology,
    pub status: FitStatus,
    pub params: Vec<f64>,
    pub metrics: FitMetrics,
    /// Area under the ground-truth E-curve (close to 1 for a full elution).
    pub e_area: f64,
}

impl SummaryRow {
    pub fn new(case_id: u32, topology: Topology, result: FitResult, e_area: f64) -> Self {
        Self {
            case_id,
            topology,
            status: result.outcome.status(),
            params: result.outcome.params().to_vec(),
            metrics: result.metrics,
            e_area,
        }
    }
}

/// A system the batch driver could not evaluate (malformed input, missing curve).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFailure {
    pub case_id: u32,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_rejects_mismatched_lengths() {
        let err = Curve::concentration(vec![0.0, 1.0], vec![0.0]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InputShape);
    }

    #[test]
    fn curve_rejects_non_increasing_time() {
        let err = Curve::concentration(vec![0.0, 1.0, 1.0], vec![0.0, 0.1, 0.2]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InputShape);
    }

    #[test]
    fn curve_area_of_triangle() {
        let c = Curve::concentration(vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 0.0]).unwrap();
        assert!((c.area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn inverted_bounds_are_a_config_error_and_clamp_stays_total() {
        let b = Bounds(vec![(0.0, 1.0), (2.0, 1.0)]);
        assert_eq!(b.check_order().unwrap_err().kind(), crate::error::ErrorKind::Config);
        let err = b.validate(Topology::LfrCstr).unwrap_err();
        assert!(err.message().contains("'b'"), "{}", err.message());
        // f64::clamp would panic here.
        assert_eq!(b.clamp(&[1.5, 0.0]), vec![1.0, 1.0]);
        assert!(Bounds(vec![(0.0, f64::NAN)]).check_order().is_err());
    }

    #[test]
    fn curve_kind_parsing() {
        assert_eq!("Etheta".parse::<CurveKind>().unwrap(), CurveKind::ETheta);
        let err = "F".parse::<CurveKind>().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnknownIdentifier);
    }

    #[test]
    fn topology_parses_legacy_names() {
        assert_eq!("LFR_DZ_CSTR".parse::<Topology>().unwrap(), Topology::LfrCstr);
        assert_eq!("TAYLOR_DISPERSION".parse::<Topology>().unwrap(), Topology::SingleDispersion);
        assert!("PFR_ONLY".parse::<Topology>().is_err());
    }

    #[test]
    fn system_parameters_from_doe() {
        let rec = DoeRecord {
            case_id: 7,
            flow_rate: 2.0,
            volume: 4e-6,
            timestep_size: 0.01,
            viscous_model: ViscousModel::Laminar,
            cohort: None,
            geometry: None,
            perc_ds: None,
            ramp_angle: None,
            no_timesteps: None,
        };
        let sys = SystemParameters::from_doe(&rec, DEFAULT_DENSITY).unwrap();
        assert!((sys.tau - 2.0).abs() < 1e-12);
        assert!((sys.n0 - 2e-6 * 1045.0 * 0.01).abs() < 1e-18);
        assert!((sys.dispersion_c0() - 0.005).abs() < 1e-15);
    }

    #[test]
    fn bounds_validate_arity_and_order() {
        let b = Bounds(vec![(0.01, 0.99), (0.01, 0.99)]);
        assert!(b.validate(Topology::LfrCstr).is_ok());
        assert!(b.validate(Topology::TanksInSeries).is_err());
        let bad = Bounds(vec![(0.5, 0.1), (0.0, 1.0)]);
        assert!(bad.validate(Topology::LfrCstr).is_err());
    }

    #[test]
    fn failed_outcome_carries_zero_sentinel() {
        let o = FitOutcome::failed("no convergence", 3);
        assert_eq!(o.params(), &[0.0, 0.0, 0.0]);
        assert_eq!(o.status(), FitStatus::Failed);
    }
}
