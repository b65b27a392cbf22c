//! Append-only per-record provenance, written inside the run transaction.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgExecutor, Postgres, QueryBuilder};
use tgov_core::hash::record_hash;
use tgov_core::records::EntityKind;
use uuid::Uuid;

use crate::error::StoreError;

const LINEAGE_CHUNK: usize = 500;

/// One provenance row awaiting insertion.
#[derive(Debug, Clone)]
pub struct LineageEntry {
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub record_hash: String,
}

/// Hash a slice of records into lineage entries. The hash covers the
/// key-sorted canonical JSON of the record at the moment of write.
pub fn lineage_entries<T: Serialize>(
    kind: EntityKind,
    records: &[T],
    natural_key: impl Fn(&T) -> String,
) -> Result<Vec<LineageEntry>, StoreError> {
    records
        .iter()
        .map(|record| {
            Ok(LineageEntry {
                entity_type: kind,
                entity_id: natural_key(record),
                record_hash: record_hash(record)?,
            })
        })
        .collect()
}

/// Append lineage rows for one source file within the current run.
pub async fn record_lineage(
    conn: &mut PgConnection,
    run_id: Uuid,
    source_file: &str,
    extraction_timestamp: DateTime<Utc>,
    pipeline_version: &str,
    entries: &[LineageEntry],
) -> Result<u64, StoreError> {
    if entries.is_empty() {
        return Ok(0);
    }

    let mut written = 0u64;
    for chunk in entries.chunks(LINEAGE_CHUNK) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO data_lineage (run_id, entity_type, entity_id, source_file, \
             extraction_timestamp, pipeline_version, record_hash) ",
        );
        qb.push_values(chunk, |mut b, entry| {
            b.push_bind(run_id)
                .push_bind(entry.entity_type.as_str())
                .push_bind(&entry.entity_id)
                .push_bind(source_file)
                .push_bind(extraction_timestamp)
                .push_bind(pipeline_version)
                .push_bind(&entry.record_hash);
        });
        written += qb.build().execute(&mut *conn).await?.rows_affected();
    }

    tracing::debug!(source_file, written, "recorded lineage");
    Ok(written)
}

/// Distinct entities recorded for one file within one run; the loaded
/// side of reconciliation.
pub async fn count_lineage<'e, E>(
    executor: E,
    run_id: Uuid,
    source_file: &str,
    entity_type: EntityKind,
) -> Result<i64, StoreError>
where
    E: PgExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(DISTINCT entity_id)
          FROM data_lineage
         WHERE run_id = $1
           AND source_file = $2
           AND entity_type = $3
        "#,
    )
    .bind(run_id)
    .bind(source_file)
    .bind(entity_type.as_str())
    .fetch_one(executor)
    .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgov_core::records::ProgramaRecord;

    fn programa(id: &str, nome: &str) -> ProgramaRecord {
        ProgramaRecord {
            transfer_gov_id: id.to_string(),
            nome: Some(nome.to_string()),
            orgao_superior: None,
            orgao_vinculado: None,
            modalidade: None,
            acao_orcamentaria: None,
            natureza_juridica: None,
        }
    }

    #[test]
    fn entries_carry_the_natural_key_and_a_stable_hash() {
        let records = [programa("PR-1", "Saneamento"), programa("PR-2", "Saude")];
        let entries =
            lineage_entries(EntityKind::Programa, &records, |r| r.transfer_gov_id.clone()).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entity_id, "PR-1");
        assert_eq!(entries[0].entity_type, EntityKind::Programa);

        // Identical content hashes identically across calls.
        let again =
            lineage_entries(EntityKind::Programa, &records, |r| r.transfer_gov_id.clone()).unwrap();
        assert_eq!(entries[0].record_hash, again[0].record_hash);
        assert_ne!(entries[0].record_hash, entries[1].record_hash);
    }

    #[test]
    fn changed_content_changes_the_hash() {
        let before = [programa("PR-1", "Saneamento")];
        let after = [programa("PR-1", "Saneamento Rural")];
        let a = lineage_entries(EntityKind::Programa, &before, |r| r.transfer_gov_id.clone()).unwrap();
        let b = lineage_entries(EntityKind::Programa, &after, |r| r.transfer_gov_id.clone()).unwrap();
        assert_ne!(a[0].record_hash, b[0].record_hash);
    }
}
