//! Postgres persistence for the ingestion pipeline: pool construction,
//! schema, idempotent upserts, aggregates, lineage, run log, and the
//! single-writer advisory lock.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub mod aggregate;
pub mod error;
pub mod lineage;
pub mod lock;
pub mod run_log;
pub mod schema;
pub mod upsert;

pub const CRATE_NAME: &str = "tgov-store";

pub use error::StoreError;
pub use lock::RunLock;

/// Statement budget installed on every pooled connection.
const STATEMENT_TIMEOUT_MS: i64 = 60_000;

fn pool_options(max_connections: u32) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query(&format!("SET statement_timeout = {STATEMENT_TIMEOUT_MS}"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
}

/// Connect eagerly; used by the pipeline so a bad URL fails the run at
/// startup. The pool must fit one writer plus the health readers.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = pool_options(max_connections).connect(database_url).await?;
    Ok(pool)
}

/// Connect lazily; used by the health publisher, which must come up and
/// report `unknown` even when the database is unreachable.
pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = pool_options(max_connections).connect_lazy(database_url)?;
    Ok(pool)
}
