//! Directory resolution and per-file extraction with quarantine.
//!
//! Each file group is parsed and validated independently; a failure
//! inside one file never stops the others, it only downgrades the run.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use tgov_core::records::ExtractionBatch;
use tgov_extract::{build_proponentes, extract_relationships, validate_programas, validate_propostas};
use tgov_parser::{infer_file_kind, parse_file, FileKind};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::PipelineError;

/// Per-file read budget, covering parse and schema mapping.
pub const FILE_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// One schema-accepted input file.
#[derive(Debug, Clone)]
pub struct FileGroup {
    pub path: PathBuf,
    pub kind: FileKind,
    /// Rows after schema acceptance; the source side of reconciliation.
    pub source_count: usize,
}

#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub batch: ExtractionBatch,
    pub groups: Vec<FileGroup>,
    /// Row- and file-level validation failures, already labeled with the
    /// file name.
    pub validation_errors: Vec<String>,
    pub warnings: Vec<String>,
    pub missing_kinds: Vec<FileKind>,
    /// File groups that failed parsing or validation wholesale.
    pub failed_files: usize,
    /// Individual rows rejected by validation.
    pub row_errors: usize,
    /// Link rows skipped for lacking a proposal id or both sides.
    pub skipped_rows: usize,
}

impl ExtractionOutcome {
    pub fn is_clean(&self) -> bool {
        self.validation_errors.is_empty() && self.missing_kinds.is_empty() && self.failed_files == 0
    }
}

/// Pick the input directory: an explicit path must exist; otherwise the
/// latest `YYYY-MM-DD` subdirectory of the raw root, or the root itself
/// when no dated directory exists.
pub fn resolve_data_directory(
    root: &Path,
    explicit: Option<&Path>,
) -> Result<PathBuf, PipelineError> {
    if let Some(dir) = explicit {
        if !dir.is_dir() {
            return Err(PipelineError::MissingDataDir(dir.to_path_buf()));
        }
        return Ok(dir.to_path_buf());
    }

    if !root.is_dir() {
        return Err(PipelineError::MissingDataDir(root.to_path_buf()));
    }

    let mut dated: Vec<(NaiveDate, PathBuf)> = std::fs::read_dir(root)
        .map_err(|_| PipelineError::MissingDataDir(root.to_path_buf()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            NaiveDate::parse_from_str(&name, "%Y-%m-%d")
                .ok()
                .map(|date| (date, entry.path()))
        })
        .collect();
    dated.sort();

    match dated.pop() {
        Some((date, path)) => {
            info!(date = %date, path = %path.display(), "resolved latest dated directory");
            Ok(path)
        }
        None => Ok(root.to_path_buf()),
    }
}

/// Parse, validate, and extract every recognized file in the directory.
pub async fn extract_directory(
    data_dir: &Path,
    cancel: &watch::Receiver<bool>,
) -> Result<ExtractionOutcome, PipelineError> {
    let mut out = ExtractionOutcome::default();
    let mut attempted_kinds: BTreeSet<&'static str> = BTreeSet::new();

    let mut files: Vec<PathBuf> = std::fs::read_dir(data_dir)
        .map_err(|_| PipelineError::MissingDataDir(data_dir.to_path_buf()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    if files.is_empty() {
        out.warnings
            .push(format!("no input files found in {}", data_dir.display()));
    }

    for path in files {
        if *cancel.borrow() {
            return Err(PipelineError::Cancelled);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if !matches!(extension.as_deref(), Some("csv") | Some("xlsx")) {
            warn!(file = %name, "ignoring non-tabular file");
            out.warnings.push(format!("ignored unrecognized file: {name}"));
            continue;
        }

        let Some(kind) = infer_file_kind(&name) else {
            warn!(file = %name, "could not determine file group");
            out.warnings
                .push(format!("ignored file with unknown group: {name}"));
            continue;
        };
        attempted_kinds.insert(kind.as_str());

        if out.groups.iter().any(|g| g.kind == kind) {
            out.warnings
                .push(format!("duplicate {} file {name}; merging", kind.as_str()));
        }

        let parse_path = path.clone();
        let parsed = tokio::time::timeout(
            FILE_READ_TIMEOUT,
            tokio::task::spawn_blocking(move || parse_file(&parse_path, kind)),
        )
        .await;

        let (table, columns) = match parsed {
            Err(_) => {
                out.validation_errors.push(format!(
                    "{name}: read timed out after {}s",
                    FILE_READ_TIMEOUT.as_secs()
                ));
                out.failed_files += 1;
                continue;
            }
            Ok(Err(join_err)) => {
                out.validation_errors
                    .push(format!("{name}: parse task failed: {join_err}"));
                out.failed_files += 1;
                continue;
            }
            Ok(Ok(Err(parse_err))) => {
                out.validation_errors.push(format!("{name}: {parse_err}"));
                out.failed_files += 1;
                continue;
            }
            Ok(Ok(Ok(pair))) => pair,
        };

        let source_count = table.row_count();
        info!(file = %name, kind = kind.as_str(), rows = source_count, "processing file group");

        match kind {
            FileKind::Propostas => {
                let (rows, errors) = validate_propostas(&table, &columns);
                out.row_errors += errors.len();
                for error in &errors {
                    out.validation_errors.push(format!("{name}: {error}"));
                }
                if rows.is_empty() {
                    out.validation_errors
                        .push(format!("{name}: all {source_count} rows failed validation"));
                    out.failed_files += 1;
                    continue;
                }

                let dimension = build_proponentes(rows);
                if dimension.rejected_cnpjs > 0 {
                    out.warnings.push(format!(
                        "{name}: {} CNPJ candidates rejected, proposals keep a null proponent reference",
                        dimension.rejected_cnpjs
                    ));
                }
                out.batch.propostas.extend(dimension.propostas);
                out.batch.proponentes.extend(dimension.proponentes);
            }
            FileKind::Programas => {
                let (records, errors) = validate_programas(&table, &columns);
                out.row_errors += errors.len();
                for error in &errors {
                    out.validation_errors.push(format!("{name}: {error}"));
                }
                if records.is_empty() {
                    out.validation_errors
                        .push(format!("{name}: all {source_count} rows failed validation"));
                    out.failed_files += 1;
                    continue;
                }
                out.batch.programas.extend(records);
            }
            FileKind::ApoiadoresEmendas => {
                let extraction = extract_relationships(&table, &columns);
                out.skipped_rows += extraction.skipped_rows;
                if extraction.skipped_rows > 0 {
                    out.warnings.push(format!(
                        "{name}: {} link rows skipped (missing proposal id or both sides)",
                        extraction.skipped_rows
                    ));
                }
                if extraction.partial_rows > 0 {
                    out.warnings.push(format!(
                        "{name}: {} link rows contributed only one relationship side",
                        extraction.partial_rows
                    ));
                }

                out.batch.apoiadores.extend(extraction.apoiadores);
                out.batch.emendas.extend(extraction.emendas);
                out.batch
                    .proposta_apoiadores
                    .extend(extraction.proposta_apoiadores);
                out.batch.proposta_emendas.extend(extraction.proposta_emendas);
                for (proposta, programa) in extraction.programa_links {
                    out.batch
                        .programa_links
                        .entry(proposta)
                        .or_insert(programa);
                }
            }
        }

        out.groups.push(FileGroup {
            path,
            kind,
            source_count,
        });
    }

    for kind in FileKind::all() {
        if !attempted_kinds.contains(kind.as_str()) {
            out.warnings
                .push(format!("missing file group: {}", kind.as_str()));
            out.missing_kinds.push(kind);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn cancel_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    const PROPOSTAS_CSV: &str = "\
id_proposta;titulo;valor_global;situacao;estado;municipio;proponente;identif_proponente;natureza_juridica
PROP-1;Quadra;1000;Nova;CE;Fortaleza;Prefeitura;27.167.477/0001-12;103-1
PROP-2;Escola;2000;Nova;SP;Campinas;Associacao;27167477000112;306-9
";

    const PROGRAMAS_CSV: &str = "\
id_programa;nome;orgao_superior
PR-1;Saneamento;Ministerio
";

    const LINK_CSV: &str = "\
id_cnpj_programa_emenda_apoiadores_emendas;numero_emenda_apoiadores_emendas;nome_parlamentar_apoiadores_emendas;id_programa
PROP-1;E-1;MARIA DA SILVA;PR-1
PROP-2;E-1;MARIA DA SILVA;PR-1
";

    #[tokio::test]
    async fn full_directory_extracts_all_entities() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "propostas.csv", PROPOSTAS_CSV);
        write(dir.path(), "programas.csv", PROGRAMAS_CSV);
        write(dir.path(), "apoiadores_emendas.csv", LINK_CSV);

        let (_tx, cancel) = cancel_channel();
        let out = extract_directory(dir.path(), &cancel).await.unwrap();

        assert!(out.is_clean(), "errors: {:?}", out.validation_errors);
        assert_eq!(out.groups.len(), 3);
        assert_eq!(out.batch.propostas.len(), 2);
        assert_eq!(out.batch.programas.len(), 1);
        assert_eq!(out.batch.proponentes.len(), 1);
        assert_eq!(out.batch.apoiadores.len(), 1);
        assert_eq!(out.batch.emendas.len(), 1);
        assert_eq!(out.batch.proposta_apoiadores.len(), 2);
        assert_eq!(out.batch.proposta_emendas.len(), 2);
        assert_eq!(out.batch.programa_links.len(), 2);
    }

    #[tokio::test]
    async fn missing_link_file_is_a_warning_not_a_failure() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "propostas.csv", PROPOSTAS_CSV);
        write(dir.path(), "programas.csv", PROGRAMAS_CSV);

        let (_tx, cancel) = cancel_channel();
        let out = extract_directory(dir.path(), &cancel).await.unwrap();

        assert_eq!(out.batch.propostas.len(), 2);
        assert!(out.batch.apoiadores.is_empty());
        assert_eq!(out.missing_kinds, vec![FileKind::ApoiadoresEmendas]);
        assert!(out
            .warnings
            .iter()
            .any(|w| w.contains("missing file group: apoiadores_emendas")));
    }

    #[tokio::test]
    async fn broken_file_is_quarantined_and_others_proceed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "propostas.csv", "");
        write(dir.path(), "programas.csv", PROGRAMAS_CSV);

        let (_tx, cancel) = cancel_channel();
        let out = extract_directory(dir.path(), &cancel).await.unwrap();

        assert_eq!(out.failed_files, 1);
        assert_eq!(out.batch.programas.len(), 1);
        assert!(out
            .validation_errors
            .iter()
            .any(|e| e.contains("propostas.csv")));
    }

    #[tokio::test]
    async fn extra_files_are_ignored_with_a_warning() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "programas.csv", PROGRAMAS_CSV);
        write(dir.path(), "leiame.txt", "nada");
        write(dir.path(), "resumo.csv", "a;b\n1;2\n");

        let (_tx, cancel) = cancel_channel();
        let out = extract_directory(dir.path(), &cancel).await.unwrap();

        assert_eq!(out.groups.len(), 1);
        assert!(out.warnings.iter().any(|w| w.contains("leiame.txt")));
        assert!(out.warnings.iter().any(|w| w.contains("resumo.csv")));
    }

    #[test]
    fn latest_dated_directory_wins() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("2026-02-05")).unwrap();
        fs::create_dir(root.path().join("2026-02-06")).unwrap();
        fs::create_dir(root.path().join("not-a-date")).unwrap();

        let resolved = resolve_data_directory(root.path(), None).unwrap();
        assert!(resolved.ends_with("2026-02-06"));
    }

    #[test]
    fn explicit_directory_must_exist() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("2026-01-01");
        assert!(matches!(
            resolve_data_directory(root.path(), Some(&missing)),
            Err(PipelineError::MissingDataDir(_))
        ));
    }

    #[test]
    fn root_without_dated_directories_is_used_directly() {
        let root = TempDir::new().unwrap();
        let resolved = resolve_data_directory(root.path(), None).unwrap();
        assert_eq!(resolved, root.path());
    }
}
