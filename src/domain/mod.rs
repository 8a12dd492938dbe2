//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - topology and curve identifiers (`Topology`, `CurveKind`)
//! - validated curves and per-system constants (`Curve`, `SystemParameters`)
//! - fit outputs (`FitOutcome`, `FitResult`, `SummaryRow`)
//! - run configuration and the per-topology default table (`config`)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
