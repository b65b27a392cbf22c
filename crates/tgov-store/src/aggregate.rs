//! In-store aggregate recomputation for the proponent dimension.
//!
//! Runs after the base upserts, inside the run transaction. One statement
//! per metric; joined data never leaves the server. Aggregates fully
//! overwrite previous values for every proponent row, including rows
//! whose counts dropped to zero.

use sqlx::PgConnection;
use tracing::info;

use crate::error::StoreError;

pub const TOTAL_PROPOSTAS_SQL: &str = r#"
UPDATE proponentes p
   SET total_propostas = (
           SELECT COUNT(*)
             FROM propostas pr
            WHERE pr.proponente_cnpj = p.cnpj
       )
"#;

pub const TOTAL_EMENDAS_SQL: &str = r#"
UPDATE proponentes p
   SET total_emendas = (
           SELECT COUNT(*)
             FROM proposta_emendas pe
             JOIN propostas pr
               ON pr.transfer_gov_id = pe.proposta_transfer_gov_id
            WHERE pr.proponente_cnpj = p.cnpj
       )
"#;

pub const VALOR_TOTAL_EMENDAS_SQL: &str = r#"
UPDATE proponentes p
   SET valor_total_emendas = (
           SELECT COALESCE(SUM(e.valor), 0)
             FROM proposta_emendas pe
             JOIN propostas pr
               ON pr.transfer_gov_id = pe.proposta_transfer_gov_id
             JOIN emendas e
               ON e.transfer_gov_id = pe.emenda_transfer_gov_id
            WHERE pr.proponente_cnpj = p.cnpj
       )
"#;

/// Recompute every proponent aggregate from the current table state.
pub async fn recompute_proponent_aggregates(conn: &mut PgConnection) -> Result<u64, StoreError> {
    let propostas = sqlx::query(TOTAL_PROPOSTAS_SQL)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    sqlx::query(TOTAL_EMENDAS_SQL).execute(&mut *conn).await?;
    sqlx::query(VALOR_TOTAL_EMENDAS_SQL)
        .execute(&mut *conn)
        .await?;

    info!(proponentes = propostas, "recomputed proponent aggregates");
    Ok(propostas)
}
