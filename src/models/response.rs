//! Analytical tracer responses for each reactor topology.
//!
//! Every function returns the tracer mass fraction at the outlet at time `t`
//! for a pulse injected over `dt` at unit inlet fraction (scaled by `C0`).
//! They are pure, never panic, and mask removable singularities to 0.
//!
//! Mass balance:
//! - LFR/CSTR/PFR/TIS family: `∫ c(t) dt = dt * C0`
//! - dispersion family: `∫ c(t) dt = C0 * tau_path` (callers pass `C0 = dt / tau`)
//!
//! Parameter combinations that produce non-finite or negative output are not
//! rejected here; the fit objective penalises them.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::domain::{ModelConstants, Topology};
use crate::error::AppError;
use crate::math::{cstr_kernel, ln_gamma};

/// Pe and mean residence time of one dispersion path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispersionParams {
    pub pe: f64,
    pub tau: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoubleDispersionParams {
    pub first: DispersionParams,
    pub second: DispersionParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TanksParams {
    /// Number of tanks (real-valued).
    pub n: f64,
}

/// LFR volume fraction `a` and CSTR volume fraction `b`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LfrCstrParams {
    pub a: f64,
    pub b: f64,
}

/// CSTR volume fraction `b` and the flow fraction `c` entering it.
///
/// The LFR takes the remaining `1 - b` of the volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BypassParams {
    pub b: f64,
    pub c: f64,
}

/// LFR volume `a`, CSTR volume `b`, CSTR flow fraction `c`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitParams {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

/// Topology parameters in typed form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ResponseParams {
    SingleDispersion(DispersionParams),
    DoubleDispersion(DoubleDispersionParams),
    TanksInSeries(TanksParams),
    LfrCstr(LfrCstrParams),
    LfrCstrBypass(BypassParams),
    LfrCstrDzBypass(SplitParams),
    LfrCstrPfrParallel(SplitParams),
}

impl ResponseParams {
    /// Interpret a flat parameter vector (in `Topology::param_names` order).
    pub fn from_slice(topology: Topology, p: &[f64]) -> Result<Self, AppError> {
        if p.len() != topology.param_len() {
            return Err(AppError::input_shape(format!(
                "{} expects {} parameters ({}), got {}.",
                topology.display_name(),
                topology.param_len(),
                topology.param_names().join(", "),
                p.len()
            )));
        }
        Ok(Self::from_slice_unchecked(topology, p))
    }

    /// Same as `from_slice` for callers that already checked the arity.
    pub(crate) fn from_slice_unchecked(topology: Topology, p: &[f64]) -> Self {
        match topology {
            Topology::SingleDispersion => {
                ResponseParams::SingleDispersion(DispersionParams { pe: p[0], tau: p[1] })
            }
            Topology::DoubleDispersion => ResponseParams::DoubleDispersion(DoubleDispersionParams {
                first: DispersionParams { pe: p[0], tau: p[2] },
                second: DispersionParams { pe: p[1], tau: p[3] },
            }),
            Topology::TanksInSeries => ResponseParams::TanksInSeries(TanksParams { n: p[0] }),
            Topology::LfrCstr => ResponseParams::LfrCstr(LfrCstrParams { a: p[0], b: p[1] }),
            Topology::LfrCstrBypass => ResponseParams::LfrCstrBypass(BypassParams { b: p[0], c: p[1] }),
            Topology::LfrCstrDzBypass => {
                ResponseParams::LfrCstrDzBypass(SplitParams { a: p[0], b: p[1], c: p[2] })
            }
            Topology::LfrCstrPfrParallel => {
                ResponseParams::LfrCstrPfrParallel(SplitParams { a: p[0], b: p[1], c: p[2] })
            }
        }
    }

    pub fn topology(&self) -> Topology {
        match self {
            ResponseParams::SingleDispersion(_) => Topology::SingleDispersion,
            ResponseParams::DoubleDispersion(_) => Topology::DoubleDispersion,
            ResponseParams::TanksInSeries(_) => Topology::TanksInSeries,
            ResponseParams::LfrCstr(_) => Topology::LfrCstr,
            ResponseParams::LfrCstrBypass(_) => Topology::LfrCstrBypass,
            ResponseParams::LfrCstrDzBypass(_) => Topology::LfrCstrDzBypass,
            ResponseParams::LfrCstrPfrParallel(_) => Topology::LfrCstrPfrParallel,
        }
    }

    /// Flatten back to `Topology::param_names` order.
    pub fn to_vec(&self) -> Vec<f64> {
        match *self {
            ResponseParams::SingleDispersion(d) => vec![d.pe, d.tau],
            ResponseParams::DoubleDispersion(d) => {
                vec![d.first.pe, d.second.pe, d.first.tau, d.second.tau]
            }
            ResponseParams::TanksInSeries(p) => vec![p.n],
            ResponseParams::LfrCstr(p) => vec![p.a, p.b],
            ResponseParams::LfrCstrBypass(p) => vec![p.b, p.c],
            ResponseParams::LfrCstrDzBypass(p) | ResponseParams::LfrCstrPfrParallel(p) => {
                vec![p.a, p.b, p.c]
            }
        }
    }

    /// Amount by which the volume fractions exceed 1 (`max(0, a + b - 1)`).
    pub fn volume_violation(&self) -> f64 {
        let (a, b) = match *self {
            ResponseParams::LfrCstr(p) => (p.a, p.b),
            ResponseParams::LfrCstrDzBypass(p) | ResponseParams::LfrCstrPfrParallel(p) => (p.a, p.b),
            _ => return 0.0,
        };
        (a + b - 1.0).max(0.0)
    }

    /// Evaluate the response at a single time.
    pub fn evaluate(&self, t: f64, k: &ModelConstants) -> f64 {
        match *self {
            ResponseParams::SingleDispersion(d) => dispersion(t, d.pe, d.tau, k.c0),
            ResponseParams::DoubleDispersion(d) => {
                dispersion(t, d.first.pe, d.first.tau, k.c0) + dispersion(t, d.second.pe, d.second.tau, k.c0)
            }
            ResponseParams::TanksInSeries(p) => tanks_in_series(t, p.n, k),
            ResponseParams::LfrCstr(p) => lfr_cstr(t, p, k),
            ResponseParams::LfrCstrBypass(p) => lfr_cstr_bypass(t, p, k),
            ResponseParams::LfrCstrDzBypass(p) => lfr_cstr_dz_bypass(t, p, k),
            ResponseParams::LfrCstrPfrParallel(p) => lfr_cstr_pfr_parallel(t, p, k),
        }
    }

    /// Evaluate over a time grid.
    pub fn evaluate_curve(&self, times: &[f64], k: &ModelConstants) -> Vec<f64> {
        times.iter().map(|&t| self.evaluate(t, k)).collect()
    }
}

/// Taylor dispersion superimposed on plug flow (open-open vessel).
///
/// `c0 / (2 sqrt(pi θ / Pe)) * exp(-(1 - θ)^2 Pe / (4 θ))`, `θ = t / tau`.
/// Exactly 0 at `t <= 0` and for non-positive `Pe`/`tau` (failed-fit sentinel).
pub fn dispersion(t: f64, pe: f64, tau: f64, c0: f64) -> f64 {
    if t <= 0.0 || !(pe > 0.0 && tau > 0.0) {
        return 0.0;
    }
    let theta = t / tau;
    let exponent = -(1.0 - theta).powi(2) * pe / (4.0 * theta);
    // exp underflows to 0 near θ = 0 while the prefactor diverges; short-circuit.
    if exponent < -745.0 {
        return 0.0;
    }
    c0 / (2.0 * (PI * theta / pe).sqrt()) * exponent.exp()
}

/// `n` equal CSTRs in series, evaluated in log space.
///
/// `dt * C0 * t^(n-1) / (Γ(n) tau_i^n) * exp(-t / tau_i)` with `tau_i = tau / n`.
/// For `n = 1` this is the single-CSTR decay `dt * C0 / tau * exp(-t / tau)`.
pub fn tanks_in_series(t: f64, n: f64, k: &ModelConstants) -> f64 {
    if t < 0.0 || !(n > 0.0) {
        return 0.0;
    }
    let amp = k.dt * k.c0;
    let tau_i = k.tau / n;
    if t == 0.0 {
        // t^(n-1) is 0 for n > 1, 1 for n == 1 and singular below.
        return if n == 1.0 { amp / tau_i } else { 0.0 };
    }
    let log_shape = (n - 1.0) * t.ln() - ln_gamma(n) - n * tau_i.ln() - t / tau_i;
    amp * log_shape.exp()
}

/// Outlet of an LFR with space time `tau_lfr`: `tau_lfr^2 amp / (2 t^3)` after
/// the first-appearance time `tau_lfr / 2`, zero before.
pub fn lfr_outlet(t: f64, tau_lfr: f64, amp: f64) -> f64 {
    let th = 0.5 * tau_lfr;
    if !(t >= th) || t <= 0.0 {
        return 0.0;
    }
    tau_lfr * tau_lfr * amp / (2.0 * t * t * t)
}

/// Outlet of a CSTR (space time `tau_cstr`) fed by an LFR (space time `tau_lfr`).
///
/// Zero before the LFR transit threshold `tau_lfr / 2`. Degenerate stages
/// collapse to the remaining one (no LFR volume: plain CSTR decay; no CSTR
/// volume: plain LFR outlet; no CSTR flow: nothing leaves).
pub fn cstr_after_lfr(t: f64, tau_lfr: f64, tau_cstr: f64, amp: f64) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }
    if !(tau_cstr > 0.0) {
        return lfr_outlet(t, tau_lfr, amp);
    }
    let m = 1.0 / tau_cstr;
    if !(m > 0.0) {
        return 0.0;
    }
    if !(tau_lfr > 0.0) {
        return amp * m * (-m * t).exp();
    }
    let th = 0.5 * tau_lfr;
    if t < th {
        return 0.0;
    }
    let n = m * tau_lfr * tau_lfr * amp / 2.0;
    0.5 * n * ((-m * (t - th)).exp() * cstr_kernel(th, m) - cstr_kernel(t, m))
}

/// LFR (volume `a`) in series with a CSTR (volume `b`); `1 - a - b` is dead.
pub fn lfr_cstr(t: f64, p: LfrCstrParams, k: &ModelConstants) -> f64 {
    let amp = k.dt * k.c0;
    cstr_after_lfr(t, p.a * k.tau, p.b * k.tau, amp)
}

/// LFR (volume `1 - b`) whose outlet splits: `c` through a CSTR of volume `b`,
/// `1 - c` straight to the mixing point.
pub fn lfr_cstr_bypass(t: f64, p: BypassParams, k: &ModelConstants) -> f64 {
    let amp = k.dt * k.c0;
    let tau_lfr = (1.0 - p.b) * k.tau;
    split_lfr_cstr(t, tau_lfr, p.b, p.c, k.tau, amp)
}

/// LFR (volume `a`), CSTR (volume `b`, flow `c`) and bypass (flow `1 - c`);
/// `1 - a - b` is dead.
pub fn lfr_cstr_dz_bypass(t: f64, p: SplitParams, k: &ModelConstants) -> f64 {
    let amp = k.dt * k.c0;
    split_lfr_cstr(t, p.a * k.tau, p.b, p.c, k.tau, amp)
}

/// LFR (volume `a`) feeding a CSTR (volume `b`, flow `c`) in parallel with a
/// PFR holding the remaining `1 - a - b` volume at flow `1 - c`.
pub fn lfr_cstr_pfr_parallel(t: f64, p: SplitParams, k: &ModelConstants) -> f64 {
    let amp = k.dt * k.c0;
    let tau_lfr = p.a * k.tau;
    let cstr = if p.c > 0.0 {
        p.c * cstr_after_lfr(t, tau_lfr, p.b * k.tau / p.c, amp)
    } else {
        0.0
    };
    let pfr = if p.c < 1.0 {
        let delay = ((1.0 - p.a - p.b) * k.tau / (1.0 - p.c)).max(0.0);
        (1.0 - p.c) * lfr_outlet(t - delay, tau_lfr, amp)
    } else {
        0.0
    };
    cstr + pfr
}

fn split_lfr_cstr(t: f64, tau_lfr: f64, b: f64, c: f64, tau: f64, amp: f64) -> f64 {
    let cstr = if c > 0.0 {
        c * cstr_after_lfr(t, tau_lfr, b * tau / c, amp)
    } else {
        0.0
    };
    cstr + (1.0 - c) * lfr_outlet(t, tau_lfr, amp)
}
