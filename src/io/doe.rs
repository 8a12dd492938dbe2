//! Design-of-experiments (DOE) table.
//!
//! One row per simulated system. Required columns:
//!
//! - `CASE_NUM`, `FLOW_RATE` (mL/s), `ARTERIAL_VOLUME` (m³), `TIMESTEP_SIZE` (s),
//!   `VISCOUS_MODEL` (`LAMINAR` / `TURBULENT`)
//!
//! Optional columns (`COHORT`, `GEOMETRY`, `PERC_DS`, `RAMP_ANGLE`,
//! `NO_TIMESTEPS`) are carried through for case selection. Column names are
//! matched case-insensitively; unknown columns are ignored.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use csv::StringRecord;

use crate::domain::{DoeRecord, ViscousModel};
use crate::error::AppError;

const REQUIRED: [&str; 5] = ["CASE_NUM", "FLOW_RATE", "ARTERIAL_VOLUME", "TIMESTEP_SIZE", "VISCOUS_MODEL"];

/// Columns usable in selection criteria.
pub const SELECTABLE: [&str; 10] = [
    "CASE_NUM",
    "FLOW_RATE",
    "ARTERIAL_VOLUME",
    "TIMESTEP_SIZE",
    "VISCOUS_MODEL",
    "COHORT",
    "GEOMETRY",
    "PERC_DS",
    "RAMP_ANGLE",
    "NO_TIMESTEPS",
];

/// Column name -> accepted values (any match passes), all columns must pass.
pub type Criteria = BTreeMap<String, Vec<String>>;

/// Read the DOE CSV. Malformed rows abort the load with their line number.
pub fn read_doe(path: &Path) -> Result<Vec<DoeRecord>, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open DOE CSV '{}': {e}", path.display())))?;
    read_doe_from(file)
}

/// Same as `read_doe` for any reader (used by tests).
pub fn read_doe_from<R: std::io::Read>(reader: R) -> Result<Vec<DoeRecord>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| AppError::io(format!("Failed to read DOE headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);
    for col in REQUIRED {
        if !header_map.contains_key(col) {
            return Err(AppError::unknown(format!("Missing required DOE column: `{col}`")));
        }
    }

    let mut records = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result.map_err(|e| AppError::io(format!("DOE line {line}: CSV parse error: {e}")))?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        let row = parse_row(&record, &header_map)
            .map_err(|e| AppError::io(format!("DOE line {line}: {e}")))?;
        records.push(row);
    }
    Ok(records)
}

/// Look up one case.
pub fn find_case(records: &[DoeRecord], case_id: u32) -> Result<&DoeRecord, AppError> {
    records
        .iter()
        .find(|r| r.case_id == case_id)
        .ok_or_else(|| AppError::unknown(format!("Case {case_id} is not in the DOE table.")))
}

/// Case ids whose rows satisfy every criterion, in table order.
pub fn select_cases(records: &[DoeRecord], criteria: &Criteria) -> Result<Vec<u32>, AppError> {
    let mut parsed: Vec<(&str, Vec<Accepted>)> = Vec::with_capacity(criteria.len());
    for (column, values) in criteria {
        let column = canonical_column(column)?;
        let accepted = values
            .iter()
            .map(|v| Accepted::parse(column, v))
            .collect::<Result<Vec<_>, _>>()?;
        parsed.push((column, accepted));
    }

    Ok(records
        .iter()
        .filter(|r| {
            parsed
                .iter()
                .all(|(column, accepted)| accepted.iter().any(|a| a.matches(column, r)))
        })
        .map(|r| r.case_id)
        .collect())
}

/// Parse `COLUMN=value[,value...]` pairs into criteria.
pub fn parse_criteria(pairs: &[String]) -> Result<Criteria, AppError> {
    let mut criteria = Criteria::new();
    for pair in pairs {
        let (column, values) = pair
            .split_once('=')
            .ok_or_else(|| AppError::config(format!("Selection '{pair}' must look like COLUMN=value[,value].")))?;
        let column = canonical_column(column)?.to_string();
        let entry = criteria.entry(column).or_default();
        entry.extend(values.split(',').map(|v| v.trim().to_string()).filter(|v| !v.is_empty()));
    }
    Ok(criteria)
}

#[derive(Debug, Clone, PartialEq)]
enum Accepted {
    Number(f64),
    Viscous(ViscousModel),
}

impl Accepted {
    fn parse(column: &str, value: &str) -> Result<Self, AppError> {
        if column == "VISCOUS_MODEL" {
            return value
                .parse::<ViscousModel>()
                .map(Accepted::Viscous)
                .map_err(|e| AppError::config(e.message().to_string()));
        }
        value.trim().parse::<f64>().map(Accepted::Number).map_err(|_| {
            AppError::config(format!("Criterion for `{column}` expects a number, got '{value}'."))
        })
    }

    fn matches(&self, column: &str, r: &DoeRecord) -> bool {
        match self {
            Accepted::Viscous(v) => r.viscous_model == *v,
            Accepted::Number(x) => numeric_field(column, r).is_some_and(|v| (v - x).abs() <= 1e-9 * x.abs().max(1.0)),
        }
    }
}

fn numeric_field(column: &str, r: &DoeRecord) -> Option<f64> {
    match column {
        "CASE_NUM" => Some(r.case_id as f64),
        "FLOW_RATE" => Some(r.flow_rate),
        "ARTERIAL_VOLUME" => Some(r.volume),
        "TIMESTEP_SIZE" => Some(r.timestep_size),
        "COHORT" => r.cohort.map(f64::from),
        "GEOMETRY" => r.geometry.map(f64::from),
        "PERC_DS" => r.perc_ds,
        "RAMP_ANGLE" => r.ramp_angle,
        "NO_TIMESTEPS" => r.no_timesteps.map(|v| v as f64),
        _ => None,
    }
}

fn canonical_column(name: &str) -> Result<&'static str, AppError> {
    let norm = normalize_header_name(name);
    SELECTABLE
        .iter()
        .copied()
        .find(|c| *c == norm)
        .ok_or_else(|| {
            AppError::unknown(format!(
                "Unknown DOE column '{name}'. Expected one of: {}",
                SELECTABLE.join(", ")
            ))
        })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_uppercase()
}

fn parse_row(record: &StringRecord, header_map: &HashMap<String, usize>) -> Result<DoeRecord, String> {
    Ok(DoeRecord {
        case_id: parse_required(record, header_map, "CASE_NUM")?,
        flow_rate: parse_required(record, header_map, "FLOW_RATE")?,
        volume: parse_required(record, header_map, "ARTERIAL_VOLUME")?,
        timestep_size: parse_required(record, header_map, "TIMESTEP_SIZE")?,
        viscous_model: get_required(record, header_map, "VISCOUS_MODEL")?
            .parse::<ViscousModel>()
            .map_err(|e| e.message().to_string())?,
        cohort: parse_optional(record, header_map, "COHORT")?,
        geometry: parse_optional(record, header_map, "GEOMETRY")?,
        perc_ds: parse_optional(record, header_map, "PERC_DS")?,
        ramp_angle: parse_optional(record, header_map, "RAMP_ANGLE")?,
        no_timesteps: parse_optional(record, header_map, "NO_TIMESTEPS")?,
    })
}

fn get_required<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, key: &str) -> Result<&'a str, String> {
    get_optional(record, header_map, key).ok_or_else(|| format!("Missing `{key}` value."))
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, key: &str) -> Option<&'a str> {
    let idx = *header_map.get(key)?;
    let v = record.get(idx)?.trim();
    if v.is_empty() { None } else { Some(v) }
}

fn parse_required<T: std::str::FromStr>(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    key: &str,
) -> Result<T, String> {
    let raw = get_required(record, header_map, key)?;
    parse_value(raw, key)
}

fn parse_optional<T: std::str::FromStr>(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    key: &str,
) -> Result<Option<T>, String> {
    get_optional(record, header_map, key)
        .map(|raw| parse_value(raw, key))
        .transpose()
}

fn parse_value<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T, String> {
    if let Ok(v) = raw.parse::<T>() {
        return Ok(v);
    }
    // Integer columns exported by spreadsheets often read `3.0`.
    if let Some(stripped) = raw.strip_suffix(".0") {
        if let Ok(v) = stripped.parse::<T>() {
            return Ok(v);
        }
    }
    Err(format!("Invalid `{key}` value '{raw}'."))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOE: &str = "\
CASE_NUM,FLOW_RATE,ARTERIAL_VOLUME,TIMESTEP_SIZE,VISCOUS_MODEL,PERC_DS,RAMP_ANGLE
1,4.0,2.0e-6,0.01,LAMINAR,50,60
2,4.0,2.0e-6,0.01,TURBULENT,50,60
3,2.0,2.5e-6,0.005,turbulent,70,
";

    #[test]
    fn reads_required_and_optional_columns() {
        let records = read_doe_from(DOE.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].viscous_model, ViscousModel::Turbulent);
        assert_eq!(records[2].ramp_angle, None);
        assert_eq!(records[0].perc_ds, Some(50.0));
        assert_eq!(records[1].cohort, None);
    }

    #[test]
    fn missing_required_column_is_reported() {
        let err = read_doe_from("CASE_NUM,FLOW_RATE\n1,2\n".as_bytes()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnknownIdentifier);
        assert!(err.message().contains("ARTERIAL_VOLUME"));
    }

    #[test]
    fn select_cases_by_criteria() {
        let records = read_doe_from(DOE.as_bytes()).unwrap();
        let criteria = parse_criteria(&[
            "flow_rate=4.0".to_string(),
            "VISCOUS_MODEL=TURBULENT".to_string(),
        ])
        .unwrap();
        assert_eq!(select_cases(&records, &criteria).unwrap(), vec![2]);

        let criteria = parse_criteria(&["PERC_DS=50,70".to_string()]).unwrap();
        assert_eq!(select_cases(&records, &criteria).unwrap(), vec![1, 2, 3]);

        let criteria = parse_criteria(&["RAMP_ANGLE=60".to_string()]).unwrap();
        assert_eq!(select_cases(&records, &criteria).unwrap(), vec![1, 2]);
    }

    #[test]
    fn select_cases_rejects_bad_criteria() {
        let records = read_doe_from(DOE.as_bytes()).unwrap();
        let mut criteria = Criteria::new();
        criteria.insert("COLOR".to_string(), vec!["red".to_string()]);
        let err = select_cases(&records, &criteria).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnknownIdentifier);

        let mut criteria = Criteria::new();
        criteria.insert("FLOW_RATE".to_string(), vec!["fast".to_string()]);
        let err = select_cases(&records, &criteria).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn find_case_reports_unknown_ids() {
        let records = read_doe_from(DOE.as_bytes()).unwrap();
        assert_eq!(find_case(&records, 3).unwrap().flow_rate, 2.0);
        assert!(find_case(&records, 42).is_err());
    }
}
