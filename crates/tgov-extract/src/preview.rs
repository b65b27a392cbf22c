//! Structured preview returned by dry-run executions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub data_dir: String,
    pub entities_found: BTreeMap<String, usize>,
    pub validation_errors: Vec<String>,
    pub relationships_found: Vec<String>,
    pub warnings: Vec<String>,
    pub run_timestamp: DateTime<Utc>,
}

impl DryRunReport {
    pub fn new(data_dir: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            entities_found: BTreeMap::new(),
            validation_errors: Vec::new(),
            relationships_found: Vec::new(),
            warnings: Vec::new(),
            run_timestamp: Utc::now(),
        }
    }

    pub fn has_validation_errors(&self) -> bool {
        !self.validation_errors.is_empty()
    }

    /// Console rendering for `run --dry-run`.
    pub fn render(&self) -> String {
        let mut lines = vec![
            "=".repeat(60),
            "DRY RUN REPORT".to_string(),
            "=".repeat(60),
            format!("Timestamp: {}", self.run_timestamp.to_rfc3339()),
            format!("Data directory: {}", self.data_dir),
            String::new(),
            "Entities found:".to_string(),
        ];

        if self.entities_found.is_empty() {
            lines.push("  (none)".to_string());
        } else {
            for (entity, count) in &self.entities_found {
                lines.push(format!("  {entity}: {count} records"));
            }
        }

        if !self.relationships_found.is_empty() {
            lines.push(String::new());
            lines.push("Relationships detected:".to_string());
            for rel in &self.relationships_found {
                lines.push(format!("  - {rel}"));
            }
        }

        lines.push(String::new());
        if self.validation_errors.is_empty() {
            lines.push("No validation errors".to_string());
        } else {
            lines.push(format!("Validation errors ({}):", self.validation_errors.len()));
            for error in &self.validation_errors {
                lines.push(format!("  - {error}"));
            }
        }

        if !self.warnings.is_empty() {
            lines.push(String::new());
            lines.push("Warnings:".to_string());
            for warning in &self.warnings {
                lines.push(format!("  - {warning}"));
            }
        }

        let total: usize = self.entities_found.values().sum();
        lines.push("=".repeat(60));
        lines.push(format!(
            "Summary: {total} total records, {} errors, {} warnings",
            self.validation_errors.len(),
            self.warnings.len()
        ));

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_counts_and_errors() {
        let mut report = DryRunReport::new("data/raw/2026-02-06");
        report.entities_found.insert("propostas".into(), 100);
        report.entities_found.insert("programas".into(), 3);
        report
            .validation_errors
            .push("propostas.csv: row 7: invalid estado UF code: XX".into());
        report.warnings.push("missing file group: emendas".into());

        let text = report.render();
        assert!(text.contains("propostas: 100 records"));
        assert!(text.contains("invalid estado UF code"));
        assert!(text.contains("103 total records, 1 errors, 1 warnings"));
        assert!(report.has_validation_errors());
    }
}
