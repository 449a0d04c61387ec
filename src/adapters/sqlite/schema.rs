//! Schema evolution for the state database.
//!
//! The schema revision lives in SQLite's `user_version` header field, so
//! the store needs no bookkeeping table of its own. [`SCHEMA_STEPS`]
//! holds one SQL script per revision; a fresh store replays all of them,
//! an existing store only the ones past its recorded revision. Each step
//! and its revision bump commit together, so a crash mid-upgrade leaves
//! the store at the previous revision with nothing half-applied.
//!
//! Compatibility rule for new steps: only add tables, or add columns
//! with defaults. An older tandem binary reading a newer store must keep
//! loading (unknown columns are simply not selected into the aggregate).

use sqlx::SqlitePool;
use thiserror::Error;

/// Revision n is reached by applying steps `0..n`.
const SCHEMA_STEPS: &[&str] = &[include_str!("../../../migrations/001_initial_schema.sql")];

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("cannot read the store's schema revision: {0}")]
    Revision(#[source] sqlx::Error),
    #[error("upgrading the store to schema revision {revision} failed: {source}")]
    Upgrade {
        revision: usize,
        #[source]
        source: sqlx::Error,
    },
}

/// The store's current schema revision (0 for a fresh database).
pub async fn current_revision(pool: &SqlitePool) -> Result<i64, SchemaError> {
    let (revision,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await
        .map_err(SchemaError::Revision)?;
    Ok(revision)
}

/// Bring the store up to the current schema. Returns how many steps ran.
///
/// A store written by a newer binary reports a revision past our last
/// step; that is fine here (nothing to apply) and the compatibility rule
/// above keeps the aggregate loadable.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<usize, SchemaError> {
    let have = usize::try_from(current_revision(pool).await?.max(0)).unwrap_or(usize::MAX);

    let mut applied = 0;
    for (index, step) in SCHEMA_STEPS.iter().enumerate().skip(have) {
        let revision = index + 1;
        let wrap = |source| SchemaError::Upgrade { revision, source };

        let mut tx = pool.begin().await.map_err(wrap)?;
        sqlx::raw_sql(step).execute(&mut *tx).await.map_err(wrap)?;
        // user_version is part of the database header and commits with
        // the transaction.
        sqlx::query(&format!("PRAGMA user_version = {revision}"))
            .execute(&mut *tx)
            .await
            .map_err(wrap)?;
        tx.commit().await.map_err(wrap)?;

        tracing::info!(revision, "State schema upgraded");
        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::open_memory_database;

    #[tokio::test]
    async fn fresh_store_replays_every_step() {
        let pool = open_memory_database().await.unwrap();
        // open_memory_database already ran ensure_schema.
        assert_eq!(
            current_revision(&pool).await.unwrap(),
            SCHEMA_STEPS.len() as i64
        );
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let pool = open_memory_database().await.unwrap();
        assert_eq!(ensure_schema(&pool).await.unwrap(), 0);
        assert_eq!(ensure_schema(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn newer_store_revision_is_tolerated() {
        let pool = open_memory_database().await.unwrap();
        let future = SCHEMA_STEPS.len() as i64 + 3;
        sqlx::query(&format!("PRAGMA user_version = {future}"))
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(ensure_schema(&pool).await.unwrap(), 0);
        assert_eq!(current_revision(&pool).await.unwrap(), future);
    }
}
