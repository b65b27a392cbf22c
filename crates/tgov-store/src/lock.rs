//! Session advisory lock enforcing the single-writer guarantee.

use sqlx::{Connection, PgConnection, PgPool};
use tracing::{debug, warn};

use crate::error::StoreError;

/// Fixed application-wide advisory lock key.
const INGEST_LOCK_KEY: i64 = 0x7467_6f76; // "tgov"

/// Holds the ingestion advisory lock for the duration of one run.
///
/// The lock lives on a dedicated connection detached from the pool: if
/// the process dies mid-run, the server releases the lock when the
/// connection drops, so a crashed run can never wedge the scheduler.
pub struct RunLock {
    conn: PgConnection,
}

impl RunLock {
    /// Try to take the lock. Contention returns
    /// [`StoreError::AlreadyRunning`] immediately; there is no wait.
    pub async fn acquire(pool: &PgPool) -> Result<Self, StoreError> {
        let mut conn = pool.acquire().await?.detach();

        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(INGEST_LOCK_KEY)
            .fetch_one(&mut conn)
            .await?;

        if !locked {
            let _ = conn.close().await;
            return Err(StoreError::AlreadyRunning);
        }

        debug!(key = INGEST_LOCK_KEY, "acquired ingestion lock");
        Ok(Self { conn })
    }

    /// Release the lock and close the dedicated connection.
    pub async fn release(mut self) {
        let released: Result<bool, _> = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(INGEST_LOCK_KEY)
            .fetch_one(&mut self.conn)
            .await;

        match released {
            Ok(true) => debug!("released ingestion lock"),
            Ok(false) => warn!("ingestion lock was not held at release"),
            Err(err) => warn!(error = %err, "failed to release ingestion lock cleanly"),
        }
        let _ = self.conn.close().await;
    }
}
