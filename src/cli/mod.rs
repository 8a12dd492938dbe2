//! Command-line parsing for the RTD reactor-model fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "rtd", version, about = "Residence-time distribution reactor-model fitter")]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Convert raw `sim{N}_tracer_conc.out` reports into C, E and E(theta) CSVs.
    Curves(CurvesArgs),
    /// Fit one topology to every selected system and print a summary table.
    Fit(FitArgs),
    /// List topologies, their parameters and default bounds.
    Topologies(TopologiesArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct CurvesArgs {
    /// Design-of-experiments CSV.
    #[arg(long, value_name = "CSV")]
    pub doe: PathBuf,

    /// Directory holding the tracer reports.
    #[arg(long, value_name = "DIR")]
    pub input: PathBuf,

    /// Output root; curves land in `C_curves/`, `E_curves/`, `Etheta_curves/`.
    #[arg(long, value_name = "DIR")]
    pub out: PathBuf,

    /// Fluid density (kg/m³).
    #[arg(long, default_value_t = crate::domain::DEFAULT_DENSITY)]
    pub density: f64,
}

#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Design-of-experiments CSV.
    #[arg(long, value_name = "CSV")]
    pub doe: PathBuf,

    /// Output root of `rtd curves` (reads `C_curves/sim{N}.csv`).
    #[arg(long, value_name = "DIR")]
    pub curves: PathBuf,

    /// Topology to fit (overrides the config file), e.g. `lfr-cstr`.
    #[arg(short, long)]
    pub topology: Option<String>,

    /// JSON run configuration.
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Write `eval_outputs.csv` into this directory.
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Fit systems in parallel.
    #[arg(long)]
    pub parallel: bool,

    /// Only these case numbers (repeatable).
    #[arg(long = "case", value_name = "ID")]
    pub cases: Vec<u32>,

    /// DOE selection `COLUMN=value[,value]` (repeatable), e.g. `VISCOUS_MODEL=TURBULENT`.
    #[arg(long = "where", value_name = "COLUMN=VALUES")]
    pub criteria: Vec<String>,
}

#[derive(Debug, Parser, Clone)]
pub struct TopologiesArgs {
    /// Show bounds after applying this JSON run configuration.
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fit_accepts_repeated_cases_and_criteria() {
        let cli = Cli::parse_from([
            "rtd", "-vv", "fit", "--doe", "doe.csv", "--curves", "results", "--case", "3", "--case", "5",
            "--where", "FLOW_RATE=4.0", "-t", "lfr-cstr",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.cases, vec![3, 5]);
        assert_eq!(args.criteria, vec!["FLOW_RATE=4.0".to_string()]);
        assert_eq!(args.topology.as_deref(), Some("lfr-cstr"));
        assert!(!args.parallel);
    }

    #[test]
    fn topology_flag_accepts_legacy_aliases() {
        use crate::domain::Topology;

        let cli = Cli::parse_from(["rtd", "fit", "--doe", "d.csv", "--curves", "c", "-t", "LFR_DZ_CSTR"]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        let name = args.topology.unwrap();
        assert_eq!(name.parse::<Topology>().unwrap(), Topology::LfrCstr);
        let err = "cstr-only".parse::<Topology>().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnknownIdentifier);
    }
}
