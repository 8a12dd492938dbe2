//! Export batch results to CSV (`eval_outputs.csv`).
//!
//! The export is meant to be easy to consume in spreadsheets or downstream scripts.

use std::fmt::Write;
use std::fs;
use std::path::Path;

use crate::domain::{SummaryRow, Topology};
use crate::error::AppError;

pub const SUMMARY_FILE: &str = "eval_outputs.csv";

/// Write one row per evaluated system. Parameter columns are named after the
/// topology's parameters.
pub fn write_summary_csv(path: &Path, topology: Topology, rows: &[SummaryRow]) -> Result<(), AppError> {
    // Rows are formatted before the file is touched so a rejected row never
    // leaves a truncated export behind.
    let mut header = vec!["case_num", "topology", "status"];
    header.extend_from_slice(topology.param_names());
    header.extend_from_slice(&["rae", "mae", "mean_residual", "std_residual", "e_area"]);
    let mut buf = String::new();
    writeln!(buf, "{}", header.join(",")).map_err(format_error)?;

    for r in rows {
        if r.topology != topology || r.params.len() != topology.param_len() {
            return Err(AppError::input_shape(format!(
                "Case {} was fitted with '{}' ({} params); export expects '{}'.",
                r.case_id,
                r.topology,
                r.params.len(),
                topology
            )));
        }
        let params: Vec<String> = r.params.iter().map(|p| format!("{p:.10}")).collect();
        let m = &r.metrics;
        writeln!(
            buf,
            "{},{},{},{},{:.10},{:.10e},{:.10e},{:.10e},{:.10}",
            r.case_id,
            r.topology.id(),
            r.status.id(),
            params.join(","),
            m.rae,
            m.mae,
            m.mean_residual,
            m.std_residual,
            r.e_area,
        )
        .map_err(format_error)?;
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io(format!("Failed to create '{}': {e}", parent.display())))?;
    }
    fs::write(path, buf)
        .map_err(|e| AppError::io(format!("Failed to write export CSV '{}': {e}", path.display())))
}

fn format_error(e: std::fmt::Error) -> AppError {
    AppError::io(format!("Failed to format export CSV row: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitMetrics, FitStatus};

    fn row(case_id: u32, params: Vec<f64>) -> SummaryRow {
        SummaryRow {
            case_id,
            topology: Topology::LfrCstr,
            status: FitStatus::Fitted,
            params,
            metrics: FitMetrics {
                rae: 0.25,
                mae: 1e-4,
                mean_residual: -1e-6,
                std_residual: 3e-5,
            },
            e_area: 0.99,
        }
    }

    #[test]
    fn summary_csv_has_named_parameter_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join(SUMMARY_FILE);
        write_summary_csv(&path, Topology::LfrCstr, &[row(4, vec![0.4, 0.5])]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "case_num,topology,status,a,b,rae,mae,mean_residual,std_residual,e_area"
        );
        let fields: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(fields.len(), 10);
        assert_eq!(fields[0], "4");
        assert_eq!(fields[1], "lfr-cstr");
        assert_eq!(fields[3].parse::<f64>().unwrap(), 0.4);
        assert!(lines.next().is_none());
    }

    #[test]
    fn rejected_row_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SUMMARY_FILE);
        let rows = [row(1, vec![0.4, 0.5]), row(2, vec![0.3])];
        let err = write_summary_csv(&path, Topology::LfrCstr, &rows).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InputShape);
        // The first row was valid, but nothing is written on error.
        assert!(!path.exists());
    }
}
