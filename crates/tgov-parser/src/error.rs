//! Parse-layer error taxonomy.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    /// The file exists but holds no data rows. Distinct from an I/O error
    /// so the orchestrator can quarantine the file group.
    #[error("file contains no data rows: {path}")]
    EmptyFile { path: PathBuf },

    /// Required canonical columns could not be resolved from the headers.
    #[error("missing required columns for {file_kind}: {}", missing.join(", "))]
    SchemaValidation {
        file_kind: &'static str,
        missing: Vec<String>,
    },

    #[error("unsupported file extension: {path}")]
    UnsupportedExtension { path: PathBuf },

    #[error("reading {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing delimited file {path}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("reading workbook {path}")]
    Xlsx {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },
}

impl ParseError {
    /// Validation-class errors quarantine the file group instead of
    /// failing the run.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ParseError::EmptyFile { .. } | ParseError::SchemaValidation { .. }
        )
    }
}
