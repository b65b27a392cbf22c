//! The run orchestrator: single-writer lock, atomic transaction scope,
//! retries, cancellation, alerting, and the run log.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use tgov_core::records::{EntityKind, RunStatus, TableCounts};
use tgov_extract::DryRunReport;
use tgov_parser::FileKind;
use tgov_store::lineage::{lineage_entries, record_lineage};
use tgov_store::run_log::{insert_run_log, last_run, NewRunLog};
use tgov_store::{aggregate, lineage, run_log, schema, upsert, RunLock, StoreError};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::alert::{AlertSeverity, Alerter};
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::ingest::{extract_directory, resolve_data_directory, ExtractionOutcome, FileGroup};
use crate::reconcile::{self, ReconciliationResult};
use crate::retry::RetryPolicy;
use crate::volume;

/// Sample size for error excerpts in alerts and the run log.
const MAX_SAMPLE_ERRORS: usize = 5;

/// Outcome of one executed (non-dry) run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub files_processed: usize,
    pub stats: BTreeMap<String, TableCounts>,
    pub validation_errors: Vec<String>,
    pub warnings: Vec<String>,
    pub reconciliation: Vec<ReconciliationResult>,
}

impl RunSummary {
    pub fn total_records(&self) -> u64 {
        self.stats.values().map(|c| c.total()).sum()
    }

    pub fn severity(&self) -> AlertSeverity {
        match self.status {
            RunStatus::Success => AlertSeverity::Info,
            RunStatus::Partial => AlertSeverity::Warning,
            RunStatus::Failed => AlertSeverity::Critical,
        }
    }
}

/// Requests cooperative cancellation of the owning pipeline's current
/// run. Checked between file groups and between phases.
#[derive(Clone)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

pub struct Pipeline {
    config: AppConfig,
    pool: PgPool,
    alerter: Alerter,
    retry: RetryPolicy,
    cancel: watch::Receiver<bool>,
}

impl Pipeline {
    /// Connect to the store, initialize the schema, and build the
    /// pipeline. The pool is owned here; components receive a scoped
    /// transaction handle, never the pool.
    pub async fn connect(config: AppConfig) -> Result<(Self, CancelHandle), PipelineError> {
        let pool =
            tgov_store::connect(&config.database.url, config.database.max_connections).await?;
        schema::init_schema(&pool).await?;
        Ok(Self::with_pool(config, pool))
    }

    pub fn with_pool(config: AppConfig, pool: PgPool) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let alerter = Alerter::new(&config.alerting);
        (
            Self {
                config,
                pool,
                alerter,
                retry: RetryPolicy::default(),
                cancel: rx,
            },
            CancelHandle(tx),
        )
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn alerter(&self) -> &Alerter {
        &self.alerter
    }

    fn check_cancel(&self) -> Result<(), PipelineError> {
        if *self.cancel.borrow() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Execute the extraction phases only (parse, validate, extract) and
    /// return the preview. No lock, no transaction, no writes.
    pub async fn dry_run(&self, data_dir: Option<&Path>) -> Result<DryRunReport, PipelineError> {
        let dir = resolve_data_directory(&self.config.data.raw_dir, data_dir)?;
        info!(dir = %dir.display(), "starting dry run");
        let outcome = extract_directory(&dir, &self.cancel).await?;
        Ok(build_dry_run_report(&dir, &outcome))
    }

    /// Execute one full pipeline run against the resolved directory.
    pub async fn run_once(&self, data_dir: Option<&Path>) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let extraction_date = started_at.date_naive();
        let dir = resolve_data_directory(&self.config.data.raw_dir, data_dir)?;
        info!(run_id = %run_id, dir = %dir.display(), "starting pipeline run");

        let lock = RunLock::acquire(&self.pool).await?;

        // Previous totals feed the volume-anomaly check after commit.
        let previous_total = last_run(&self.pool)
            .await
            .ok()
            .flatten()
            .and_then(|run| run.total_records);

        let result = self
            .run_locked(run_id, started_at, extraction_date, &dir)
            .await;
        lock.release().await;

        match result {
            Ok(summary) => {
                info!(
                    run_id = %run_id,
                    status = summary.status.as_str(),
                    records = summary.total_records(),
                    duration_seconds = summary.duration_seconds,
                    "pipeline run finished"
                );
                self.send_run_alerts(&summary, previous_total).await;
                Ok(summary)
            }
            Err(err) => {
                error!(run_id = %run_id, error = %err, "pipeline run failed");
                self.write_failed_log(run_id, started_at, &err).await;
                self.alerter
                    .send(
                        "Extraction run failed",
                        &format!("run_id: {run_id}\nerror: {err}"),
                        AlertSeverity::Critical,
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn run_locked(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        extraction_date: NaiveDate,
        dir: &Path,
    ) -> Result<RunSummary, PipelineError> {
        let extraction = extract_directory(dir, &self.cancel).await?;
        self.check_cancel()?;
        for warning in &extraction.warnings {
            warn!(warning = %warning, "extraction warning");
        }

        if extraction.batch.is_empty() {
            return Err(PipelineError::Other(anyhow::anyhow!(
                "no valid records found in any input file"
            )));
        }

        // The whole transactional block is idempotent, so transient
        // failures retry it from a fresh transaction.
        let (stats, reconciliation, status) = self
            .retry
            .run(
                "load-transaction",
                PipelineError::is_transient,
                || self.transactional_phase(run_id, started_at, extraction_date, &extraction),
            )
            .await?;

        let finished_at = Utc::now();
        Ok(RunSummary {
            run_id,
            status,
            started_at,
            finished_at,
            duration_seconds: duration_seconds(started_at, finished_at),
            files_processed: extraction.groups.len(),
            stats,
            validation_errors: extraction.validation_errors,
            warnings: extraction.warnings,
            reconciliation,
        })
    }

    /// LOAD -> AGGREGATE -> RECONCILE -> LOG inside a single transaction.
    /// Cancellation is honored between phases; once COMMIT starts, the
    /// outcome is whatever the store acknowledges.
    async fn transactional_phase(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        extraction_date: NaiveDate,
        extraction: &ExtractionOutcome,
    ) -> Result<(BTreeMap<String, TableCounts>, Vec<ReconciliationResult>, RunStatus), PipelineError>
    {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        let stats = upsert::load_batch(&mut tx, &extraction.batch, extraction_date).await?;
        self.write_lineage(&mut tx, run_id, started_at, extraction)
            .await?;

        let dangling = upsert::count_dangling_references(&mut tx).await?;
        if dangling.programas > 0 || dangling.proponentes > 0 {
            // Expected under partial ingestion; the next successful run
            // resolves them.
            warn!(
                programas = dangling.programas,
                proponentes = dangling.proponentes,
                "proposals with dangling soft references"
            );
        }
        self.check_cancel()?;

        aggregate::recompute_proponent_aggregates(&mut tx).await?;
        self.check_cancel()?;

        let reconciliation = self.reconcile(&mut tx, run_id, extraction).await?;

        let mut status = if extraction.is_clean() {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };
        if status == RunStatus::Success
            && reconciliation.iter().any(|r| !r.within_tolerance)
        {
            status = RunStatus::Partial;
        }

        let error_message = sample_errors(&extraction.validation_errors);
        let log = NewRunLog::from_stats(
            run_id,
            status,
            extraction.groups.len(),
            &stats,
            extraction.row_errors + extraction.skipped_rows,
            duration_seconds(started_at, Utc::now()),
            error_message.as_deref(),
        );
        insert_run_log(&mut tx, &log).await?;

        tx.commit().await.map_err(StoreError::from)?;
        Ok((stats, reconciliation, status))
    }

    /// One lineage row per entity upserted in this run, attributed to the
    /// file group that produced it.
    async fn write_lineage(
        &self,
        conn: &mut sqlx::PgConnection,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        extraction: &ExtractionOutcome,
    ) -> Result<(), PipelineError> {
        let version = self.config.lineage.version();
        let batch = &extraction.batch;

        for kind in FileKind::all() {
            let Some(group) = extraction.groups.iter().find(|g| g.kind == kind) else {
                continue;
            };
            let source_file = group.path.display().to_string();

            let mut entries = Vec::new();
            match kind {
                FileKind::Propostas => {
                    entries.extend(lineage_entries(EntityKind::Proposta, &batch.propostas, |r| {
                        r.transfer_gov_id.clone()
                    })?);
                    entries.extend(lineage_entries(
                        EntityKind::Proponente,
                        &batch.proponentes,
                        |r| r.cnpj.clone(),
                    )?);
                }
                FileKind::Programas => {
                    entries.extend(lineage_entries(EntityKind::Programa, &batch.programas, |r| {
                        r.transfer_gov_id.clone()
                    })?);
                }
                FileKind::ApoiadoresEmendas => {
                    entries.extend(lineage_entries(EntityKind::Apoiador, &batch.apoiadores, |r| {
                        r.transfer_gov_id.clone()
                    })?);
                    entries.extend(lineage_entries(EntityKind::Emenda, &batch.emendas, |r| {
                        r.transfer_gov_id.clone()
                    })?);
                    entries.extend(lineage_entries(
                        EntityKind::PropostaApoiador,
                        &batch.proposta_apoiadores,
                        |r| r.natural_key(),
                    )?);
                    entries.extend(lineage_entries(
                        EntityKind::PropostaEmenda,
                        &batch.proposta_emendas,
                        |r| r.natural_key(),
                    )?);
                }
            }

            record_lineage(&mut *conn, run_id, &source_file, started_at, &version, &entries)
                .await?;
        }

        Ok(())
    }

    /// Compare per-group source counts against distinct lineage counts.
    /// The link file reconciles against its junction rows, whose
    /// cardinality tracks the source rows; its deduplicated base entities
    /// do not.
    async fn reconcile(
        &self,
        conn: &mut sqlx::PgConnection,
        run_id: Uuid,
        extraction: &ExtractionOutcome,
    ) -> Result<Vec<ReconciliationResult>, PipelineError> {
        let tolerance = self.config.reconciliation.volume_tolerance_percent;
        let mut results = Vec::new();

        for group in &extraction.groups {
            let FileGroup {
                path,
                kind,
                source_count,
            } = group;
            let source_file = path.display().to_string();

            let loaded = match kind {
                FileKind::Propostas => {
                    lineage::count_lineage(&mut *conn, run_id, &source_file, EntityKind::Proposta)
                        .await?
                }
                FileKind::Programas => {
                    lineage::count_lineage(&mut *conn, run_id, &source_file, EntityKind::Programa)
                        .await?
                }
                FileKind::ApoiadoresEmendas => {
                    let apoiadores = lineage::count_lineage(
                        &mut *conn,
                        run_id,
                        &source_file,
                        EntityKind::PropostaApoiador,
                    )
                    .await?;
                    let emendas = lineage::count_lineage(
                        &mut *conn,
                        run_id,
                        &source_file,
                        EntityKind::PropostaEmenda,
                    )
                    .await?;
                    apoiadores.max(emendas)
                }
            };

            let result = reconcile::evaluate(
                &source_file,
                *kind,
                *source_count as i64,
                loaded,
                tolerance,
            );
            if !result.within_tolerance {
                warn!(
                    file = %source_file,
                    source = result.source_count,
                    loaded = result.loaded_count,
                    discrepancy_percent = result.discrepancy_percent,
                    "reconciliation discrepancy"
                );
            }
            results.push(result);
        }

        Ok(results)
    }

    async fn send_run_alerts(&self, summary: &RunSummary, previous_total: Option<i64>) {
        let subject = format!("Extraction run {}", summary.status.as_str());
        self.alerter
            .send(&subject, &run_alert_body(summary), summary.severity())
            .await;

        let mismatched: Vec<ReconciliationResult> = summary
            .reconciliation
            .iter()
            .filter(|r| !r.within_tolerance)
            .cloned()
            .collect();
        if !mismatched.is_empty() && self.config.reconciliation.alert_on_mismatch {
            let tolerance = self.config.reconciliation.volume_tolerance_percent;
            let body = format!(
                "run_id: {}\n{}",
                summary.run_id,
                reconcile::summary_message(&mismatched, tolerance)
            );
            self.alerter
                .send("Data reconciliation mismatch", &body, AlertSeverity::Warning)
                .await;
        }

        if let Some(message) = volume::volume_anomaly(
            summary.total_records() as i64,
            previous_total,
            self.config.reconciliation.volume_tolerance_percent,
        ) {
            let body = format!("run_id: {}\n{message}", summary.run_id);
            self.alerter
                .send("Extraction volume anomaly", &body, AlertSeverity::Warning)
                .await;
        }
    }

    /// Record a failed run in its own short transaction; the main
    /// transaction has already rolled back.
    async fn write_failed_log(&self, run_id: Uuid, started_at: DateTime<Utc>, err: &PipelineError) {
        let message = err.to_string();
        let log = NewRunLog {
            run_id,
            status: RunStatus::Failed,
            files_processed: 0,
            total_records: 0,
            records_inserted: 0,
            records_updated: 0,
            records_skipped: 0,
            duration_seconds: duration_seconds(started_at, Utc::now()),
            error_message: Some(&message),
        };

        match self.pool.begin().await {
            Ok(mut tx) => {
                if let Err(log_err) = insert_run_log(&mut tx, &log).await {
                    warn!(error = %log_err, "could not write failed run log");
                    return;
                }
                if let Err(commit_err) = tx.commit().await {
                    warn!(error = %commit_err, "could not commit failed run log");
                }
            }
            Err(conn_err) => {
                warn!(error = %conn_err, "could not open transaction for failed run log");
            }
        }
    }

    /// Check for a missed daily slot; used by serve mode.
    pub async fn check_scheduler_miss(&self) -> Option<String> {
        if !self.config.reconciliation.alert_on_scheduler_miss {
            return None;
        }
        let last = run_log::last_run(&self.pool).await.ok().flatten();
        volume::scheduler_miss(last.map(|run| run.run_date), Utc::now())
    }
}

fn duration_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

fn sample_errors(errors: &[String]) -> Option<String> {
    if errors.is_empty() {
        return None;
    }
    let mut sample: Vec<&str> = errors
        .iter()
        .take(MAX_SAMPLE_ERRORS)
        .map(String::as_str)
        .collect();
    if errors.len() > MAX_SAMPLE_ERRORS {
        sample.push("...");
    }
    Some(sample.join("; "))
}

fn run_alert_body(summary: &RunSummary) -> String {
    let mut lines = vec![
        format!("run_id: {}", summary.run_id),
        format!("status: {}", summary.status.as_str()),
        format!("duration: {:.1}s", summary.duration_seconds),
        format!("files processed: {}", summary.files_processed),
        format!("records: {}", summary.total_records()),
    ];

    for (table, counts) in &summary.stats {
        lines.push(format!(
            "  {table}: {} inserted, {} updated",
            counts.inserted, counts.updated
        ));
    }

    if !summary.validation_errors.is_empty() {
        lines.push(format!(
            "validation errors: {}",
            summary.validation_errors.len()
        ));
        for error in summary.validation_errors.iter().take(MAX_SAMPLE_ERRORS) {
            lines.push(format!("  - {error}"));
        }
    }

    let mismatches = summary
        .reconciliation
        .iter()
        .filter(|r| !r.within_tolerance)
        .count();
    if mismatches > 0 {
        lines.push(format!("reconciliation mismatches: {mismatches}"));
    }

    lines.join("\n")
}

fn build_dry_run_report(dir: &Path, outcome: &ExtractionOutcome) -> DryRunReport {
    let mut report = DryRunReport::new(dir.display().to_string());
    let batch = &outcome.batch;

    let counts = [
        ("programas", batch.programas.len()),
        ("propostas", batch.propostas.len()),
        ("proponentes", batch.proponentes.len()),
        ("apoiadores", batch.apoiadores.len()),
        ("emendas", batch.emendas.len()),
        ("proposta_apoiadores", batch.proposta_apoiadores.len()),
        ("proposta_emendas", batch.proposta_emendas.len()),
    ];
    for (entity, count) in counts {
        if count > 0 {
            report.entities_found.insert(entity.to_string(), count);
        }
    }

    if !batch.proposta_apoiadores.is_empty() {
        report.relationships_found.push(format!(
            "propostas <-> apoiadores ({} links)",
            batch.proposta_apoiadores.len()
        ));
    }
    if !batch.proposta_emendas.is_empty() {
        report.relationships_found.push(format!(
            "propostas <-> emendas ({} links)",
            batch.proposta_emendas.len()
        ));
    }
    if !batch.programa_links.is_empty() {
        report.relationships_found.push(format!(
            "propostas -> programas ({} links)",
            batch.programa_links.len()
        ));
    }

    report.validation_errors = outcome.validation_errors.clone();
    report.warnings = outcome.warnings.clone();
    report
}
