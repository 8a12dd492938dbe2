//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized

use crate::domain::{FitStatus, ModelTable, SummaryRow, SystemFailure, Topology};

/// Batch summary: header, one row per system, then the systems that errored.
pub fn format_summary(topology: Topology, rows: &[SummaryRow], failures: &[SystemFailure]) -> String {
    let mut out = String::new();

    out.push_str("=== rtd - Reactor model fit ===\n");
    out.push_str(&format!(
        "Topology: {} ({}) | params: {}\n",
        topology.display_name(),
        topology.id(),
        topology.param_names().join(", ")
    ));
    let fitted = rows.iter().filter(|r| r.status == FitStatus::Fitted).count();
    out.push_str(&format!(
        "Systems: n={} | fitted={} | failed={} | errors={}\n\n",
        rows.len() + failures.len(),
        fitted,
        rows.len() - fitted,
        failures.len()
    ));

    out.push_str(
        format!(
            "{:>6} {:<8} {:>10} {:>12} {:>12} {:>12} {:>8}  {}\n",
            "case", "status", "RAE", "MAE", "mean_res", "std_res", "E_area", "params"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!(
            "{:-<6} {:-<8} {:-<10} {:-<12} {:-<12} {:-<12} {:-<8}  {:-<6}\n",
            "", "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');

    for r in rows {
        let m = &r.metrics;
        out.push_str(
            format!(
                "{:>6} {:<8} {:>10.4} {:>12.4e} {:>12.4e} {:>12.4e} {:>8.4}  {}\n",
                r.case_id,
                r.status.id(),
                m.rae,
                m.mae,
                m.mean_residual,
                m.std_residual,
                r.e_area,
                fmt_vec(&r.params)
            )
            .trim_end(),
        );
        out.push('\n');
    }

    if !failures.is_empty() {
        out.push_str("\nNot evaluated:\n");
        for f in failures {
            out.push_str(&format!("  case {:>4}: {}\n", f.case_id, truncate(&f.message, 96)));
        }
    }

    out
}

/// Table of topologies with their parameters and default bounds.
pub fn format_topologies(table: &ModelTable) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:<24} {:<18} {}\n", "topology", "params", "default bounds").trim_end().to_string());
    out.push('\n');
    for (topology, settings) in table.iter() {
        let bounds: Vec<String> = settings
            .bounds
            .0
            .iter()
            .map(|(lo, hi)| format!("[{}, {}]", fmt_bound(*lo), fmt_bound(*hi)))
            .collect();
        out.push_str(
            format!(
                "{:<24} {:<18} {}\n",
                topology.id(),
                topology.param_names().join(", "),
                bounds.join(" ")
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

fn fmt_bound(v: f64) -> String {
    if v.is_infinite() {
        if v > 0.0 { "INF".to_string() } else { "-INF".to_string() }
    } else {
        format!("{v}")
    }
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FitMetrics;

    fn row(case_id: u32, status: FitStatus) -> SummaryRow {
        SummaryRow {
            case_id,
            topology: Topology::LfrCstr,
            status,
            params: vec![0.4, 0.5],
            metrics: FitMetrics {
                rae: 0.1,
                mae: 1e-5,
                mean_residual: 0.0,
                std_residual: 2e-5,
            },
            e_area: 0.998,
        }
    }

    #[test]
    fn summary_lists_rows_and_failures() {
        let rows = vec![row(1, FitStatus::Fitted), row(2, FitStatus::Failed)];
        let failures = vec![SystemFailure {
            case_id: 9,
            message: "missing curve".to_string(),
        }];
        let text = format_summary(Topology::LfrCstr, &rows, &failures);
        assert!(text.contains("Systems: n=3 | fitted=1 | failed=1 | errors=1"));
        assert!(text.contains("[0.400000, 0.500000]"));
        assert!(text.contains("case    9: missing curve"));
        assert!(text.lines().all(|l| l == l.trim_end()));
    }

    #[test]
    fn topology_table_prints_infinite_bounds() {
        let text = format_topologies(&ModelTable::default());
        assert!(text.contains("single-dispersion"));
        assert!(text.contains("INF]"));
        assert_eq!(text.lines().count(), 1 + Topology::ALL.len());
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
