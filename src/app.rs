//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and sets up logging
//! - loads the DOE table and run configuration
//! - converts tracer reports or runs the batch fit
//! - prints reports and writes optional exports

use std::path::Path;

use clap::Parser;
use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

use crate::cli::{Command, CurvesArgs, FitArgs, TopologiesArgs};
use crate::domain::{CurveKind, DoeRecord, RunConfig, Topology};
use crate::error::AppError;
use crate::io::{
    SUMMARY_FILE, curve_path, find_case, parse_criteria, read_curve_csv, read_doe, select_cases,
    write_summary_csv,
};

pub mod pipeline;

/// Entry point for the `rtd` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Curves(args) => handle_curves(args),
        Command::Fit(args) => handle_fit(args),
        Command::Topologies(args) => handle_topologies(args),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build();
    // A logger may already be installed when embedded; keep that one.
    let _ = TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto);
}

fn handle_curves(args: CurvesArgs) -> Result<(), AppError> {
    let records = read_doe(&args.doe)?;
    let (converted, skipped) = pipeline::convert_tracer_dir(&records, &args.input, &args.out, args.density)?;
    if converted.is_empty() && skipped.is_empty() {
        return Err(AppError::io(format!(
            "No sim{{N}}_tracer_conc.out files found in '{}'.",
            args.input.display()
        )));
    }
    println!(
        "Converted {} case(s) into '{}' ({} skipped).",
        converted.len(),
        args.out.display(),
        skipped.len()
    );
    for s in &skipped {
        println!("  case {:>4}: {}", s.case_id, s.message);
    }
    Ok(())
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(name) = &args.topology {
        config.topology = name.parse::<Topology>()?;
    }
    config.parallel |= args.parallel;
    let settings = pipeline::BatchSettings::from_config(&config)?;

    let records = selected_records(&read_doe(&args.doe)?, &args)?;
    let load = |r: &DoeRecord| {
        let path = curve_path(&args.curves, CurveKind::Concentration, r.case_id);
        read_curve_csv(&path, CurveKind::Concentration)
    };
    let out = pipeline::run_batch(&records, load, &settings);

    println!(
        "{}",
        crate::report::format_summary(settings.topology, &out.rows, &out.failures)
    );

    if let Some(dir) = &args.out {
        write_summary_csv(&dir.join(SUMMARY_FILE), settings.topology, &out.rows)?;
    }
    Ok(())
}

fn handle_topologies(args: TopologiesArgs) -> Result<(), AppError> {
    let config = load_config(args.config.as_deref())?;
    println!("{}", crate::report::format_topologies(&config.model_table()?));
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RunConfig, AppError> {
    let Some(path) = path else {
        return Ok(RunConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read config '{}': {e}", path.display())))?;
    RunConfig::from_json(&text)
}

/// DOE rows matching `--where` criteria and, if given, the `--case` list.
fn selected_records(records: &[DoeRecord], args: &FitArgs) -> Result<Vec<DoeRecord>, AppError> {
    let criteria = parse_criteria(&args.criteria)?;
    let mut ids = select_cases(records, &criteria)?;
    if !args.cases.is_empty() {
        for id in &args.cases {
            find_case(records, *id)?;
        }
        ids.retain(|id| args.cases.contains(id));
    }
    if ids.is_empty() {
        return Err(AppError::unknown("No DOE cases match the selection."));
    }
    Ok(records.iter().filter(|r| ids.contains(&r.case_id)).cloned().collect())
}
