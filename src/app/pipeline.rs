//! Shared batch logic used by the `curves` and `fit` commands.
//!
//! Per system the workflow is:
//! DOE record -> constants -> fit on C(t) -> predict -> metrics on C(t) ->
//! E(t) area of the truth -> summary row.
//!
//! A system that cannot be evaluated is recorded as a `SystemFailure`; it never
//! aborts the rest of the batch.

use std::path::Path;

use log::{info, warn};
use rayon::prelude::*;

use crate::domain::{
    Curve, CurveKind, DoeRecord, FitOptions, FitResult, ModelTable, RunConfig, SummaryRow, SystemFailure,
    SystemParameters, Topology,
};
use crate::error::AppError;
use crate::io::{curve_path, list_tracer_files, read_tracer_out, write_curve_csv};
use crate::models::Model;
use crate::report::score;
use crate::transform::DerivedCurves;

/// Everything a batch run needs besides the data.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub topology: Topology,
    pub density: f64,
    pub table: ModelTable,
    pub options: FitOptions,
    pub parallel: bool,
}

impl BatchSettings {
    pub fn from_config(config: &RunConfig) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            topology: config.topology,
            density: config.density,
            table: config.model_table()?,
            options: config.fit.clone(),
            parallel: config.parallel,
        })
    }
}

/// Rows and failures of one batch, both in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    pub rows: Vec<SummaryRow>,
    pub failures: Vec<SystemFailure>,
}

/// Fit one system and score the prediction against its own ground truth.
///
/// Metrics compare the raw concentration curves (mass fraction), the same
/// space the model is fitted in.
pub fn evaluate_system(
    system: &SystemParameters,
    curve: &Curve,
    topology: Topology,
    table: &ModelTable,
    options: &FitOptions,
) -> Result<SummaryRow, AppError> {
    if curve.kind() != CurveKind::Concentration {
        return Err(AppError::input_shape(format!(
            "System {} must be fitted on a concentration curve, got '{}'.",
            system.case_id,
            curve.kind().id()
        )));
    }

    let mut model = Model::for_system(topology, system, table)?;
    let outcome = model.fit(curve.time(), curve.values(), options)?.clone();
    let predicted = model.predict(curve.time())?;
    let metrics = score(curve.values(), &predicted)?;
    let truth = DerivedCurves::from_concentration(curve, system)?;

    info!(
        "case {}: {} {} params={:?} RAE={:.4}",
        system.case_id,
        topology,
        outcome.status().id(),
        outcome.params(),
        metrics.rae
    );

    let result = FitResult { outcome, metrics };
    Ok(SummaryRow::new(system.case_id, topology, result, truth.e.area()))
}

/// Evaluate every record, loading each system's curve through `load_curve`.
pub fn run_batch<L>(records: &[DoeRecord], load_curve: L, settings: &BatchSettings) -> BatchOutput
where
    L: Fn(&DoeRecord) -> Result<Curve, AppError> + Sync,
{
    let one = |record: &DoeRecord| -> Result<SummaryRow, AppError> {
        let system = SystemParameters::from_doe(record, settings.density)?;
        let curve = load_curve(record)?;
        evaluate_system(&system, &curve, settings.topology, &settings.table, &settings.options)
    };

    let results: Vec<(u32, Result<SummaryRow, AppError>)> = if settings.parallel {
        records.par_iter().map(|r| (r.case_id, one(r))).collect()
    } else {
        records.iter().map(|r| (r.case_id, one(r))).collect()
    };

    let mut out = BatchOutput::default();
    for (case_id, result) in results {
        match result {
            Ok(row) => out.rows.push(row),
            Err(err) => {
                warn!("case {case_id}: not evaluated: {err}");
                out.failures.push(SystemFailure {
                    case_id,
                    message: err.to_string(),
                });
            }
        }
    }
    out
}

/// Convert every `sim{N}_tracer_conc.out` in `input` into C, E and E(theta)
/// CSVs under `out`. Returns the converted case ids and the skipped ones.
pub fn convert_tracer_dir(
    records: &[DoeRecord],
    input: &Path,
    out: &Path,
    density: f64,
) -> Result<(Vec<u32>, Vec<SystemFailure>), AppError> {
    let mut converted = Vec::new();
    let mut skipped = Vec::new();
    for (case_id, path) in list_tracer_files(input)? {
        let result = (|| -> Result<(), AppError> {
            let record = crate::io::find_case(records, case_id)?;
            let system = SystemParameters::from_doe(record, density)?;
            let curves = DerivedCurves::from_concentration(&read_tracer_out(&path)?, &system)?;
            for kind in [CurveKind::Concentration, CurveKind::E, CurveKind::ETheta] {
                write_curve_csv(&curve_path(out, kind, case_id), curves.get(kind))?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => converted.push(case_id),
            Err(err) => {
                warn!("case {case_id}: skipped: {err}");
                skipped.push(SystemFailure {
                    case_id,
                    message: err.to_string(),
                });
            }
        }
    }
    info!("converted {} tracer files ({} skipped)", converted.len(), skipped.len());
    Ok((converted, skipped))
}
