//! SQLite adapters for the tandem coordination server.
//!
//! The store holds one aggregate that the coordinator rewrites wholesale
//! under its serialization token, so the pool here is not a write-scaling
//! device: it exists so queries (and the notifier's count snapshots) can
//! read while a save is in flight, and so a second tandem process
//! pointed at the same store stays functional. WAL journaling gives those
//! readers non-blocking snapshots; the busy timeout bounds how long a
//! save waits on another process's save, which is short because every
//! write is one aggregate replace. The schema declares no foreign keys —
//! relations live in the aggregate as plain ids — so no FK pragma is
//! needed.

pub mod schema;
pub mod state_store;

pub use schema::SchemaError;
pub use state_store::SqliteStateStore;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::domain::errors::{DomainError, DomainResult};

/// Upper bound on waiting for another process's aggregate save.
const CROSS_PROCESS_LOCK_WAIT: Duration = Duration::from_secs(10);

/// Upper bound on waiting for a free pooled connection in this process.
const SNAPSHOT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreOpenError {
    #[error("cannot create state directory {dir}: {source}")]
    StateDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot open state database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Open (creating if missing) and upgrade the state database at `path`.
///
/// `max_connections` comes from [`DatabaseConfig`]; one connection
/// carries the coordinator's saves and the rest serve read snapshots.
///
/// [`DatabaseConfig`]: crate::domain::models::DatabaseConfig
pub async fn open_state_database(
    path: &Path,
    max_connections: u32,
) -> Result<SqlitePool, StoreOpenError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| StoreOpenError::StateDir {
            dir: dir.to_path_buf(),
            source,
        })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(CROSS_PROCESS_LOCK_WAIT);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(SNAPSHOT_ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await
        .map_err(|source| StoreOpenError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    schema::ensure_schema(&pool).await?;
    Ok(pool)
}

/// Open a throwaway in-memory store with the schema applied.
///
/// An in-memory database lives and dies with its connection, so the pool
/// is pinned to a single connection that every load and save shares.
pub async fn open_memory_database() -> Result<SqlitePool, StoreOpenError> {
    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .synchronous(SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|source| StoreOpenError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;

    schema::ensure_schema(&pool).await?;
    Ok(pool)
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| DomainError::Serialization(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional RFC3339 datetime string from a SQLite row field.
pub fn parse_optional_datetime(s: Option<String>) -> DomainResult<Option<DateTime<Utc>>> {
    s.map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| DomainError::Serialization(e.to_string()))
}

/// Parse a JSON string from a SQLite row field, falling back to the type's default.
pub fn parse_json_or_default<T: serde::de::DeserializeOwned + Default>(
    s: Option<String>,
) -> DomainResult<T> {
    s.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| DomainError::Serialization(e.to_string()))
        .map(Option::unwrap_or_default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opening_creates_missing_state_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tandem.db");
        let pool = open_state_database(&path, 2).await.unwrap();
        assert!(path.exists());
        pool.close().await;
    }

    #[tokio::test]
    async fn zero_connections_is_clamped() {
        // A config of 0 must not produce an unusable pool.
        let dir = tempfile::tempdir().unwrap();
        let pool = open_state_database(&dir.path().join("t.db"), 0).await.unwrap();
        sqlx::query("SELECT 1").fetch_one(&pool).await.unwrap();
    }

    #[test]
    fn parse_datetime_round_trip() {
        let now = Utc::now();
        assert_eq!(parse_datetime(&now.to_rfc3339()).unwrap(), now);
        assert!(parse_datetime("not a date").is_err());
    }

    #[test]
    fn parse_json_defaults_on_none() {
        let v: Vec<i64> = parse_json_or_default(None).unwrap();
        assert!(v.is_empty());
        let v: Vec<i64> = parse_json_or_default(Some("[1,2]".to_string())).unwrap();
        assert_eq!(v, vec![1, 2]);
    }
}
