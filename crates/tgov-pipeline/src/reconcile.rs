//! Pre-commit reconciliation: source row counts against loaded lineage
//! counts, within a configured tolerance.
//!
//! Mismatches never roll the transaction back; they downgrade the run to
//! partial and inform operators through a WARNING alert.

use tgov_parser::FileKind;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationResult {
    pub source_file: String,
    pub file_kind: FileKind,
    /// Rows in the input table after schema acceptance.
    pub source_count: i64,
    /// Distinct lineage entities recorded for this file in this run.
    pub loaded_count: i64,
    pub discrepancy: i64,
    pub discrepancy_percent: f64,
    pub within_tolerance: bool,
}

/// Evaluate one file group against the tolerance threshold.
pub fn evaluate(
    source_file: &str,
    file_kind: FileKind,
    source_count: i64,
    loaded_count: i64,
    tolerance_percent: u32,
) -> ReconciliationResult {
    let discrepancy = (source_count - loaded_count).abs();
    let discrepancy_percent = discrepancy as f64 / source_count.max(1) as f64 * 100.0;
    ReconciliationResult {
        source_file: source_file.to_string(),
        file_kind,
        source_count,
        loaded_count,
        discrepancy,
        discrepancy_percent,
        within_tolerance: discrepancy_percent <= tolerance_percent as f64,
    }
}

/// Human-readable block for the run alert.
pub fn summary_message(results: &[ReconciliationResult], tolerance_percent: u32) -> String {
    let mut lines = Vec::new();
    for result in results {
        if result.within_tolerance {
            continue;
        }
        lines.push(format!(
            "{}: source={} loaded={} discrepancy={} ({:.1}% > {}%)",
            result.source_file,
            result.source_count,
            result.loaded_count,
            result.discrepancy,
            result.discrepancy_percent,
            tolerance_percent,
        ));
    }
    if lines.is_empty() {
        "All file groups reconciled within tolerance.".to_string()
    } else {
        format!("Reconciliation mismatches:\n{}", lines.join("\n"))
    }
}
