//! Curve files.
//!
//! - raw CFD tracer reports `sim{N}_tracer_conc.out`: whitespace-separated
//!   `step mass_fraction time` rows under a few free-text header lines
//! - curve CSVs `sim{N}.csv` under `C_curves/`, `E_curves/`, `Etheta_curves/`

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::domain::{Curve, CurveKind};
use crate::error::AppError;

const TRACER_SUFFIX: &str = "_tracer_conc.out";

/// Directory holding curves of one kind below an output root.
pub fn curve_dir(root: &Path, kind: CurveKind) -> PathBuf {
    let name = match kind {
        CurveKind::Concentration => "C_curves",
        CurveKind::E => "E_curves",
        CurveKind::ETheta => "Etheta_curves",
    };
    root.join(name)
}

/// `<root>/<kind dir>/sim{case_id}.csv`.
pub fn curve_path(root: &Path, kind: CurveKind, case_id: u32) -> PathBuf {
    curve_dir(root, kind).join(format!("sim{case_id}.csv"))
}

/// Case id encoded in a tracer report name (`sim12_tracer_conc.out` -> 12).
pub fn case_id_from_filename(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix("sim")?.strip_suffix(TRACER_SUFFIX)?.parse().ok()
}

/// Tracer reports in `dir`, sorted by case id. Other files are ignored.
pub fn list_tracer_files(dir: &Path) -> Result<Vec<(u32, PathBuf)>, AppError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| AppError::io(format!("Failed to list '{}': {e}", dir.display())))?;
    let mut out = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| AppError::io(format!("Failed to list '{}': {e}", dir.display())))?
            .path();
        if let Some(id) = case_id_from_filename(&path) {
            out.push((id, path));
        }
    }
    out.sort_by_key(|(id, _)| *id);
    Ok(out)
}

/// Read a raw tracer report as a concentration curve.
pub fn read_tracer_out(path: &Path) -> Result<Curve, AppError> {
    let text = fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read tracer file '{}': {e}", path.display())))?;
    parse_tracer_out(&text).map_err(|e| AppError::new(e.kind(), format!("{}: {}", path.display(), e.message())))
}

/// Parse tracer report text. Lines that are not three numbers are header noise.
pub fn parse_tracer_out(text: &str) -> Result<Curve, AppError> {
    let mut time = Vec::new();
    let mut values = Vec::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            continue;
        }
        let parsed: Result<Vec<f64>, _> = fields.iter().map(|f| f.parse::<f64>()).collect();
        if let Ok(row) = parsed {
            values.push(row[1]);
            time.push(row[2]);
        }
    }
    if time.is_empty() {
        return Err(AppError::input_shape("No `step mass_fraction time` rows found."));
    }
    Curve::concentration(time, values)
}

/// Read a curve CSV written by `write_curve_csv`.
///
/// Columns are located by name so extra columns (e.g. a leading step index)
/// are tolerated.
pub fn read_curve_csv(path: &Path, kind: CurveKind) -> Result<Curve, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open curve CSV '{}': {e}", path.display())))?;
    read_curve_csv_from(file, kind)
        .map_err(|e| AppError::new(e.kind(), format!("{}: {}", path.display(), e.message())))
}

pub fn read_curve_csv_from<R: std::io::Read>(reader: R, kind: CurveKind) -> Result<Curve, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader
        .headers()
        .map_err(|e| AppError::io(format!("Failed to read curve CSV headers: {e}")))?
        .clone();
    let header_map: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim_start_matches('\u{feff}'), i))
        .collect();

    let (x_col, y_col) = kind.columns();
    let x_idx = *header_map
        .get(x_col)
        .ok_or_else(|| AppError::io(format!("Missing `{x_col}` column for a '{}' curve.", kind.id())))?;
    let y_idx = *header_map
        .get(y_col)
        .ok_or_else(|| AppError::io(format!("Missing `{y_col}` column for a '{}' curve.", kind.id())))?;

    let mut time = Vec::new();
    let mut values = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result.map_err(|e| AppError::io(format!("line {line}: CSV parse error: {e}")))?;
        let field = |i: usize, name: &str| -> Result<f64, AppError> {
            let raw = record.get(i).unwrap_or("");
            raw.parse::<f64>()
                .map_err(|_| AppError::io(format!("line {line}: invalid `{name}` value '{raw}'.")))
        };
        time.push(field(x_idx, x_col)?);
        values.push(field(y_idx, y_col)?);
    }
    Curve::new(kind, time, values)
}

/// Write a curve as a two-column CSV named after its kind.
pub fn write_curve_csv(path: &Path, curve: &Curve) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io(format!("Failed to create '{}': {e}", parent.display())))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::io(format!("Failed to create curve CSV '{}': {e}", path.display())))?;
    let (x_col, y_col) = curve.kind().columns();
    writer
        .write_record([x_col, y_col])
        .map_err(|e| AppError::io(format!("Failed to write curve CSV header: {e}")))?;
    for (t, v) in curve.time().iter().zip(curve.values()) {
        writer
            .write_record([t.to_string(), v.to_string()])
            .map_err(|e| AppError::io(format!("Failed to write curve CSV row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::io(format!("Failed to flush curve CSV '{}': {e}", path.display())))
}
