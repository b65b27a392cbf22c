//! Extraction run log: the append-only audit trail read by the health
//! endpoints and the scheduler-miss check.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use tgov_core::records::{RunStatus, TableCounts};
use uuid::Uuid;

use crate::error::StoreError;

/// Error messages are truncated to keep the log row bounded.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

#[derive(Debug, Clone)]
pub struct NewRunLog<'a> {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub files_processed: i32,
    pub total_records: i64,
    pub records_inserted: i64,
    pub records_updated: i64,
    pub records_skipped: i64,
    pub duration_seconds: f64,
    pub error_message: Option<&'a str>,
}

impl<'a> NewRunLog<'a> {
    /// Aggregate the per-table counts into one log row.
    pub fn from_stats(
        run_id: Uuid,
        status: RunStatus,
        files_processed: usize,
        stats: &std::collections::BTreeMap<String, TableCounts>,
        records_skipped: usize,
        duration_seconds: f64,
        error_message: Option<&'a str>,
    ) -> Self {
        let inserted: u64 = stats.values().map(|c| c.inserted).sum();
        let updated: u64 = stats.values().map(|c| c.updated).sum();
        Self {
            run_id,
            status,
            files_processed: files_processed as i32,
            total_records: (inserted + updated) as i64,
            records_inserted: inserted as i64,
            records_updated: updated as i64,
            records_skipped: records_skipped as i64,
            duration_seconds,
            error_message,
        }
    }
}

/// Insert the run log row. Does not commit; the orchestrator owns the
/// transaction boundary.
pub async fn insert_run_log(
    conn: &mut PgConnection,
    log: &NewRunLog<'_>,
) -> Result<(), StoreError> {
    let truncated: Option<String> = log
        .error_message
        .map(|msg| msg.chars().take(MAX_ERROR_MESSAGE_CHARS).collect());

    sqlx::query(
        r#"
        INSERT INTO extraction_logs
            (run_id, status, files_processed, total_records, records_inserted,
             records_updated, records_skipped, duration_seconds, error_message)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(log.run_id)
    .bind(log.status.as_str())
    .bind(log.files_processed)
    .bind(log.total_records)
    .bind(log.records_inserted)
    .bind(log.records_updated)
    .bind(log.records_skipped)
    .bind(log.duration_seconds)
    .bind(truncated.as_deref())
    .execute(&mut *conn)
    .await?;

    tracing::info!(
        run_id = %log.run_id,
        status = log.status.as_str(),
        records = log.total_records,
        duration_seconds = log.duration_seconds,
        "extraction log created"
    );
    Ok(())
}

/// The most recent terminal run, as the health publisher sees it.
#[derive(Debug, Clone)]
pub struct LastRun {
    pub run_id: Uuid,
    pub run_date: DateTime<Utc>,
    pub status: String,
    pub total_records: Option<i64>,
    pub records_inserted: Option<i64>,
    pub records_updated: Option<i64>,
    pub error_message: Option<String>,
}

pub async fn last_run(pool: &PgPool) -> Result<Option<LastRun>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT run_id, run_date, status, total_records, records_inserted,
               records_updated, error_message
          FROM extraction_logs
         ORDER BY run_date DESC
         LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(LastRun {
        run_id: row.try_get("run_id")?,
        run_date: row.try_get("run_date")?,
        status: row.try_get("status")?,
        total_records: row.try_get("total_records")?,
        records_inserted: row.try_get("records_inserted")?,
        records_updated: row.try_get("records_updated")?,
        error_message: row.try_get("error_message")?,
    }))
}

/// Aggregate run statistics for the metrics endpoint.
#[derive(Debug, Clone, Default)]
pub struct RunMetrics {
    pub total_runs: i64,
    pub successful_runs: i64,
    pub partial_runs: i64,
    pub failed_runs: i64,
    pub last_run_date: Option<DateTime<Utc>>,
}

impl RunMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            return 0.0;
        }
        self.successful_runs as f64 / self.total_runs as f64
    }
}

pub async fn run_metrics(pool: &PgPool) -> Result<RunMetrics, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS total,
               COUNT(*) FILTER (WHERE status = 'success') AS succeeded,
               COUNT(*) FILTER (WHERE status = 'partial') AS partial,
               COUNT(*) FILTER (WHERE status = 'failed') AS failed,
               MAX(run_date) AS last_run_date
          FROM extraction_logs
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(RunMetrics {
        total_runs: row.try_get("total")?,
        successful_runs: row.try_get("succeeded")?,
        partial_runs: row.try_get("partial")?,
        failed_runs: row.try_get("failed")?,
        last_run_date: row.try_get("last_run_date")?,
    })
}
