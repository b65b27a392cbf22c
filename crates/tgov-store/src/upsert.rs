//! Batched idempotent upserts, ordered by the table dependency DAG.
//!
//! Every statement is `INSERT .. ON CONFLICT (natural key) DO UPDATE` over
//! the non-key, non-creation columns plus `updated_at`. `RETURNING
//! (xmax = 0)` splits inserted rows from updated ones. The caller owns the
//! transaction; nothing here commits.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tgov_core::records::{
    ApoiadorRecord, EmendaRecord, ExtractionBatch, ProgramaRecord, ProponenteRecord,
    PropostaApoiadorRecord, PropostaEmendaRecord, PropostaRecord, TableCounts,
};
use tracing::{debug, info};

use crate::error::StoreError;

/// Server-side batch size for multi-row inserts.
const UPSERT_CHUNK: usize = 500;

/// Load a full extraction batch in dependency order and return per-table
/// affected counts. Program links are applied after the base tables so a
/// proposal's existing reference is never clobbered.
pub async fn load_batch(
    conn: &mut PgConnection,
    batch: &ExtractionBatch,
    extraction_date: NaiveDate,
) -> Result<BTreeMap<String, TableCounts>, StoreError> {
    let mut stats = BTreeMap::new();

    if !batch.programas.is_empty() {
        let counts = upsert_programas(conn, &batch.programas, extraction_date).await?;
        log_table("programas", batch.programas.len(), counts);
        stats.insert("programas".to_string(), counts);
    }
    if !batch.propostas.is_empty() {
        let counts = upsert_propostas(conn, &batch.propostas, extraction_date).await?;
        log_table("propostas", batch.propostas.len(), counts);
        stats.insert("propostas".to_string(), counts);
    }
    if !batch.proponentes.is_empty() {
        let counts = upsert_proponentes(conn, &batch.proponentes, extraction_date).await?;
        log_table("proponentes", batch.proponentes.len(), counts);
        stats.insert("proponentes".to_string(), counts);
    }
    if !batch.apoiadores.is_empty() {
        let counts = upsert_apoiadores(conn, &batch.apoiadores, extraction_date).await?;
        log_table("apoiadores", batch.apoiadores.len(), counts);
        stats.insert("apoiadores".to_string(), counts);
    }
    if !batch.emendas.is_empty() {
        let counts = upsert_emendas(conn, &batch.emendas, extraction_date).await?;
        log_table("emendas", batch.emendas.len(), counts);
        stats.insert("emendas".to_string(), counts);
    }
    if !batch.proposta_apoiadores.is_empty() {
        let counts =
            upsert_proposta_apoiadores(conn, &batch.proposta_apoiadores, extraction_date).await?;
        log_table("proposta_apoiadores", batch.proposta_apoiadores.len(), counts);
        stats.insert("proposta_apoiadores".to_string(), counts);
    }
    if !batch.proposta_emendas.is_empty() {
        let counts =
            upsert_proposta_emendas(conn, &batch.proposta_emendas, extraction_date).await?;
        log_table("proposta_emendas", batch.proposta_emendas.len(), counts);
        stats.insert("proposta_emendas".to_string(), counts);
    }

    if !batch.programa_links.is_empty() {
        let linked = apply_program_links(conn, &batch.programa_links).await?;
        info!(linked, "applied program links to proposals");
    }

    Ok(stats)
}

fn log_table(table: &str, records: usize, counts: TableCounts) {
    info!(
        table,
        records,
        inserted = counts.inserted,
        updated = counts.updated,
        "upserted records"
    );
}

/// A single multi-row insert cannot touch the same key twice, so each
/// chunk source is deduplicated first; the first occurrence wins.
fn dedup_by_key<'a, T>(rows: &'a [T], key: impl Fn(&T) -> &str) -> Vec<&'a T> {
    let mut seen = BTreeSet::new();
    rows.iter().filter(|row| seen.insert(key(row).to_string())).collect()
}

async fn run_chunks<'a, T>(
    conn: &mut PgConnection,
    rows: Vec<&'a T>,
    mut build: impl FnMut(&[&'a T]) -> QueryBuilder<'a, Postgres>,
) -> Result<TableCounts, StoreError> {
    let mut counts = TableCounts::default();
    for chunk in rows.chunks(UPSERT_CHUNK) {
        let mut query = build(chunk);
        let inserted_flags: Vec<bool> = query
            .build_query_scalar()
            .fetch_all(&mut *conn)
            .await?;
        for inserted in inserted_flags {
            if inserted {
                counts.inserted += 1;
            } else {
                counts.updated += 1;
            }
        }
    }
    Ok(counts)
}

fn programas_query<'a>(
    chunk: &[&'a ProgramaRecord],
    extraction_date: NaiveDate,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(
        "INSERT INTO programas (transfer_gov_id, nome, orgao_superior, orgao_vinculado, \
         modalidade, acao_orcamentaria, natureza_juridica, extraction_date) ",
    );
    qb.push_values(chunk.iter().copied(), |mut b, r| {
        b.push_bind(&r.transfer_gov_id)
            .push_bind(r.nome.as_deref())
            .push_bind(r.orgao_superior.as_deref())
            .push_bind(r.orgao_vinculado.as_deref())
            .push_bind(r.modalidade.as_deref())
            .push_bind(r.acao_orcamentaria.as_deref())
            .push_bind(r.natureza_juridica.as_deref())
            .push_bind(extraction_date);
    });
    qb.push(
        " ON CONFLICT (transfer_gov_id) DO UPDATE SET \
         nome = EXCLUDED.nome, orgao_superior = EXCLUDED.orgao_superior, \
         orgao_vinculado = EXCLUDED.orgao_vinculado, modalidade = EXCLUDED.modalidade, \
         acao_orcamentaria = EXCLUDED.acao_orcamentaria, \
         natureza_juridica = EXCLUDED.natureza_juridica, \
         extraction_date = EXCLUDED.extraction_date, updated_at = now() \
         RETURNING (xmax = 0)",
    );
    qb
}

pub async fn upsert_programas(
    conn: &mut PgConnection,
    rows: &[ProgramaRecord],
    extraction_date: NaiveDate,
) -> Result<TableCounts, StoreError> {
    let rows = dedup_by_key(rows, |r| &r.transfer_gov_id);
    run_chunks(conn, rows, |chunk| programas_query(chunk, extraction_date)).await
}

fn propostas_query<'a>(
    chunk: &[&'a PropostaRecord],
    extraction_date: NaiveDate,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(
        "INSERT INTO propostas (transfer_gov_id, titulo, valor_global, valor_repasse, \
         valor_contrapartida, data_publicacao, data_inicio_vigencia, data_fim_vigencia, \
         situacao, estado, municipio, proponente, programa_id, proponente_cnpj, \
         extraction_date) ",
    );
    qb.push_values(chunk.iter().copied(), |mut b, r| {
        b.push_bind(&r.transfer_gov_id)
            .push_bind(r.titulo.as_deref())
            .push_bind(r.valor_global)
            .push_bind(r.valor_repasse)
            .push_bind(r.valor_contrapartida)
            .push_bind(r.data_publicacao)
            .push_bind(r.data_inicio_vigencia)
            .push_bind(r.data_fim_vigencia)
            .push_bind(r.situacao.as_deref())
            .push_bind(r.estado.as_deref())
            .push_bind(r.municipio.as_deref())
            .push_bind(r.proponente.as_deref())
            .push_bind(r.programa_id.as_deref())
            .push_bind(r.proponente_cnpj.as_deref())
            .push_bind(extraction_date);
    });
    qb.push(
        " ON CONFLICT (transfer_gov_id) DO UPDATE SET \
         titulo = EXCLUDED.titulo, valor_global = EXCLUDED.valor_global, \
         valor_repasse = EXCLUDED.valor_repasse, \
         valor_contrapartida = EXCLUDED.valor_contrapartida, \
         data_publicacao = EXCLUDED.data_publicacao, \
         data_inicio_vigencia = EXCLUDED.data_inicio_vigencia, \
         data_fim_vigencia = EXCLUDED.data_fim_vigencia, situacao = EXCLUDED.situacao, \
         estado = EXCLUDED.estado, municipio = EXCLUDED.municipio, \
         proponente = EXCLUDED.proponente, programa_id = EXCLUDED.programa_id, \
         proponente_cnpj = EXCLUDED.proponente_cnpj, \
         extraction_date = EXCLUDED.extraction_date, updated_at = now() \
         RETURNING (xmax = 0)",
    );
    qb
}

pub async fn upsert_propostas(
    conn: &mut PgConnection,
    rows: &[PropostaRecord],
    extraction_date: NaiveDate,
) -> Result<TableCounts, StoreError> {
    let rows = dedup_by_key(rows, |r| &r.transfer_gov_id);
    run_chunks(conn, rows, |chunk| propostas_query(chunk, extraction_date)).await
}

fn proponentes_query<'a>(
    chunk: &[&'a ProponenteRecord],
    extraction_date: NaiveDate,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(
        "INSERT INTO proponentes (cnpj, nome, natureza_juridica, estado, municipio, cep, \
         endereco, bairro, is_osc, extraction_date) ",
    );
    qb.push_values(chunk.iter().copied(), |mut b, r| {
        b.push_bind(&r.cnpj)
            .push_bind(r.nome.as_deref())
            .push_bind(r.natureza_juridica.as_deref())
            .push_bind(r.estado.as_deref())
            .push_bind(r.municipio.as_deref())
            .push_bind(r.cep.as_deref())
            .push_bind(r.endereco.as_deref())
            .push_bind(r.bairro.as_deref())
            .push_bind(r.is_osc)
            .push_bind(extraction_date);
    });
    qb.push(
        " ON CONFLICT (cnpj) DO UPDATE SET \
         nome = EXCLUDED.nome, natureza_juridica = EXCLUDED.natureza_juridica, \
         estado = EXCLUDED.estado, municipio = EXCLUDED.municipio, cep = EXCLUDED.cep, \
         endereco = EXCLUDED.endereco, bairro = EXCLUDED.bairro, \
         is_osc = EXCLUDED.is_osc, extraction_date = EXCLUDED.extraction_date, \
         updated_at = now() \
         RETURNING (xmax = 0)",
    );
    qb
}

pub async fn upsert_proponentes(
    conn: &mut PgConnection,
    rows: &[ProponenteRecord],
    extraction_date: NaiveDate,
) -> Result<TableCounts, StoreError> {
    let rows = dedup_by_key(rows, |r| &r.cnpj);
    run_chunks(conn, rows, |chunk| proponentes_query(chunk, extraction_date)).await
}

fn apoiadores_query<'a>(
    chunk: &[&'a ApoiadorRecord],
    extraction_date: NaiveDate,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(
        "INSERT INTO apoiadores (transfer_gov_id, nome, tipo, orgao, extraction_date) ",
    );
    qb.push_values(chunk.iter().copied(), |mut b, r| {
        b.push_bind(&r.transfer_gov_id)
            .push_bind(r.nome.as_deref())
            .push_bind(r.tipo.as_deref())
            .push_bind(r.orgao.as_deref())
            .push_bind(extraction_date);
    });
    qb.push(
        " ON CONFLICT (transfer_gov_id) DO UPDATE SET \
         nome = EXCLUDED.nome, tipo = EXCLUDED.tipo, orgao = EXCLUDED.orgao, \
         extraction_date = EXCLUDED.extraction_date, updated_at = now() \
         RETURNING (xmax = 0)",
    );
    qb
}

pub async fn upsert_apoiadores(
    conn: &mut PgConnection,
    rows: &[ApoiadorRecord],
    extraction_date: NaiveDate,
) -> Result<TableCounts, StoreError> {
    let rows = dedup_by_key(rows, |r| &r.transfer_gov_id);
    run_chunks(conn, rows, |chunk| apoiadores_query(chunk, extraction_date)).await
}

fn emendas_query<'a>(
    chunk: &[&'a EmendaRecord],
    extraction_date: NaiveDate,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(
        "INSERT INTO emendas (transfer_gov_id, numero, autor, valor, tipo, ano, \
         extraction_date) ",
    );
    qb.push_values(chunk.iter().copied(), |mut b, r| {
        b.push_bind(&r.transfer_gov_id)
            .push_bind(r.numero.as_deref())
            .push_bind(r.autor.as_deref())
            .push_bind(r.valor)
            .push_bind(r.tipo.as_deref())
            .push_bind(r.ano)
            .push_bind(extraction_date);
    });
    qb.push(
        " ON CONFLICT (transfer_gov_id) DO UPDATE SET \
         numero = EXCLUDED.numero, autor = EXCLUDED.autor, valor = EXCLUDED.valor, \
         tipo = EXCLUDED.tipo, ano = EXCLUDED.ano, \
         extraction_date = EXCLUDED.extraction_date, updated_at = now() \
         RETURNING (xmax = 0)",
    );
    qb
}

pub async fn upsert_emendas(
    conn: &mut PgConnection,
    rows: &[EmendaRecord],
    extraction_date: NaiveDate,
) -> Result<TableCounts, StoreError> {
    let rows = dedup_by_key(rows, |r| &r.transfer_gov_id);
    run_chunks(conn, rows, |chunk| emendas_query(chunk, extraction_date)).await
}

fn proposta_apoiadores_query<'a>(
    chunk: &[&'a PropostaApoiadorRecord],
    extraction_date: NaiveDate,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(
        "INSERT INTO proposta_apoiadores (proposta_transfer_gov_id, \
         apoiador_transfer_gov_id, extraction_date) ",
    );
    qb.push_values(chunk.iter().copied(), |mut b, r| {
        b.push_bind(&r.proposta_transfer_gov_id)
            .push_bind(&r.apoiador_transfer_gov_id)
            .push_bind(extraction_date);
    });
    qb.push(
        " ON CONFLICT (proposta_transfer_gov_id, apoiador_transfer_gov_id) DO UPDATE SET \
         extraction_date = EXCLUDED.extraction_date \
         RETURNING (xmax = 0)",
    );
    qb
}

pub async fn upsert_proposta_apoiadores(
    conn: &mut PgConnection,
    rows: &[PropostaApoiadorRecord],
    extraction_date: NaiveDate,
) -> Result<TableCounts, StoreError> {
    let mut seen = BTreeSet::new();
    let rows: Vec<_> = rows
        .iter()
        .filter(|r| {
            seen.insert((
                r.proposta_transfer_gov_id.clone(),
                r.apoiador_transfer_gov_id.clone(),
            ))
        })
        .collect();
    run_chunks(conn, rows, |chunk| {
        proposta_apoiadores_query(chunk, extraction_date)
    })
    .await
}

fn proposta_emendas_query<'a>(
    chunk: &[&'a PropostaEmendaRecord],
    extraction_date: NaiveDate,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(
        "INSERT INTO proposta_emendas (proposta_transfer_gov_id, emenda_transfer_gov_id, \
         extraction_date) ",
    );
    qb.push_values(chunk.iter().copied(), |mut b, r| {
        b.push_bind(&r.proposta_transfer_gov_id)
            .push_bind(&r.emenda_transfer_gov_id)
            .push_bind(extraction_date);
    });
    qb.push(
        " ON CONFLICT (proposta_transfer_gov_id, emenda_transfer_gov_id) DO UPDATE SET \
         extraction_date = EXCLUDED.extraction_date \
         RETURNING (xmax = 0)",
    );
    qb
}

pub async fn upsert_proposta_emendas(
    conn: &mut PgConnection,
    rows: &[PropostaEmendaRecord],
    extraction_date: NaiveDate,
) -> Result<TableCounts, StoreError> {
    let mut seen = BTreeSet::new();
    let rows: Vec<_> = rows
        .iter()
        .filter(|r| {
            seen.insert((
                r.proposta_transfer_gov_id.clone(),
                r.emenda_transfer_gov_id.clone(),
            ))
        })
        .collect();
    run_chunks(conn, rows, |chunk| proposta_emendas_query(chunk, extraction_date)).await
}

/// Soft-reference audit: proposals pointing at a program or proponent
/// that is not present yet. Dangling references are expected under
/// partial ingestion and resolve on the next successful run; callers log
/// them as warnings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DanglingReferences {
    pub programas: i64,
    pub proponentes: i64,
}

pub async fn count_dangling_references(
    conn: &mut PgConnection,
) -> Result<DanglingReferences, StoreError> {
    let programas: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
          FROM propostas p
          LEFT JOIN programas g ON g.transfer_gov_id = p.programa_id
         WHERE p.programa_id IS NOT NULL
           AND g.id IS NULL
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;

    let proponentes: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
          FROM propostas p
          LEFT JOIN proponentes d ON d.cnpj = p.proponente_cnpj
         WHERE p.proponente_cnpj IS NOT NULL
           AND d.id IS NULL
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;

    Ok(DanglingReferences {
        programas,
        proponentes,
    })
}

/// Fill `propostas.programa_id` from the relationship file's links, only
/// where the reference is currently null.
pub async fn apply_program_links(
    conn: &mut PgConnection,
    links: &BTreeMap<String, String>,
) -> Result<u64, StoreError> {
    let proposta_ids: Vec<String> = links.keys().cloned().collect();
    let programa_ids: Vec<String> = links.values().cloned().collect();

    let result = sqlx::query(
        r#"
        UPDATE propostas
           SET programa_id = v.programa_id,
               updated_at = now()
          FROM (SELECT unnest($1::text[]) AS transfer_gov_id,
                       unnest($2::text[]) AS programa_id) v
         WHERE propostas.transfer_gov_id = v.transfer_gov_id
           AND propostas.programa_id IS NULL
        "#,
    )
    .bind(&proposta_ids)
    .bind(&programa_ids)
    .execute(&mut *conn)
    .await?;

    debug!(candidates = links.len(), linked = result.rows_affected(), "program links");
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn programa(id: &str) -> ProgramaRecord {
        ProgramaRecord {
            transfer_gov_id: id.to_string(),
            nome: Some("Programa".into()),
            orgao_superior: None,
            orgao_vinculado: None,
            modalidade: None,
            acao_orcamentaria: None,
            natureza_juridica: None,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 6).unwrap()
    }

    #[test]
    fn base_upserts_target_the_natural_key_and_refresh_updated_at() {
        let rows = [programa("PR-1")];
        let refs: Vec<&ProgramaRecord> = rows.iter().collect();
        let qb = programas_query(&refs, date());
        let sql = qb.sql();

        assert!(sql.contains("ON CONFLICT (transfer_gov_id) DO UPDATE"));
        assert!(sql.contains("updated_at = now()"));
        assert!(sql.contains("RETURNING (xmax = 0)"));
        // Creation audit and the key itself are never in the update set.
        assert!(!sql.contains("created_at = EXCLUDED"));
        assert!(!sql.contains("transfer_gov_id = EXCLUDED"));
    }

    #[test]
    fn junction_upserts_target_the_compound_key() {
        let rows = [PropostaApoiadorRecord {
            proposta_transfer_gov_id: "P-1".into(),
            apoiador_transfer_gov_id: "A-1".into(),
        }];
        let refs: Vec<&PropostaApoiadorRecord> = rows.iter().collect();
        let qb = proposta_apoiadores_query(&refs, date());
        let sql = qb.sql();

        assert!(sql.contains(
            "ON CONFLICT (proposta_transfer_gov_id, apoiador_transfer_gov_id) DO UPDATE"
        ));
        assert!(sql.contains("extraction_date = EXCLUDED.extraction_date"));
    }

    #[test]
    fn proponente_update_set_recomputes_is_osc_but_not_aggregates() {
        let rows = [ProponenteRecord {
            cnpj: "27167477000112".into(),
            nome: None,
            natureza_juridica: None,
            estado: None,
            municipio: None,
            cep: None,
            endereco: None,
            bairro: None,
            is_osc: true,
        }];
        let refs: Vec<&ProponenteRecord> = rows.iter().collect();
        let qb = proponentes_query(&refs, date());
        let sql = qb.sql();

        assert!(sql.contains("ON CONFLICT (cnpj) DO UPDATE"));
        assert!(sql.contains("is_osc = EXCLUDED.is_osc"));
        // Aggregates are owned by the in-store recomputation, never by the
        // upsert path.
        assert!(!sql.contains("total_propostas"));
        assert!(!sql.contains("valor_total_emendas"));
    }

    #[test]
    fn duplicate_keys_collapse_before_the_insert() {
        let rows = [programa("PR-1"), programa("PR-2"), programa("PR-1")];
        let deduped = dedup_by_key(&rows, |r| &r.transfer_gov_id);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn proposta_update_set_covers_all_non_key_columns() {
        let rows = [PropostaRecord {
            transfer_gov_id: "P-1".into(),
            titulo: None,
            valor_global: None,
            valor_repasse: None,
            valor_contrapartida: None,
            data_publicacao: None,
            data_inicio_vigencia: None,
            data_fim_vigencia: None,
            situacao: None,
            estado: None,
            municipio: None,
            proponente: None,
            programa_id: None,
            proponente_cnpj: None,
        }];
        let refs: Vec<&PropostaRecord> = rows.iter().collect();
        let qb = propostas_query(&refs, date());
        let sql = qb.sql();

        for column in [
            "titulo",
            "valor_global",
            "situacao",
            "estado",
            "municipio",
            "programa_id",
            "proponente_cnpj",
            "extraction_date",
        ] {
            assert!(
                sql.contains(&format!("{column} = EXCLUDED.{column}")),
                "update set missing {column}"
            );
        }
    }
}
