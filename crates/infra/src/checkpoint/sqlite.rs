//! SQLite checkpoint repository backed by an r2d2 connection pool

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use rxflow_core::batch::ports::CheckpointRepository;
use rxflow_domain::{validate_batch_id, CheckpointRecord, Result as DomainResult, RxflowError};
use tokio::task;
use tracing::info;

use crate::errors::{into_domain, map_join_error};

const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = include_str!("schema.sql");
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type SqlitePool = Pool<SqliteConnectionManager>;

/// One row per batch in the `checkpoints` table
///
/// Saves are upserts inside a transaction, so a row always holds a complete
/// record.
#[derive(Debug, Clone)]
pub struct SqliteCheckpointRepository {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteCheckpointRepository {
    /// Open (creating if needed) the database at `path` and apply the schema
    pub fn open(path: impl AsRef<Path>, pool_size: u32) -> DomainResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(into_domain)?;
        }

        let manager = SqliteConnectionManager::file(&path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL;\nPRAGMA synchronous=NORMAL;")?;
            conn.busy_timeout(BUSY_TIMEOUT)
        });
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager).map_err(into_domain)?;

        let repo = Self { pool, path };
        repo.run_migrations()?;
        info!(
            db_path = %repo.path.display(),
            max_connections = pool_size.max(1),
            "sqlite checkpoint pool initialised"
        );
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure the schema exists
    pub fn run_migrations(&self) -> DomainResult<()> {
        let conn = self.pool.get().map_err(into_domain)?;
        conn.execute_batch(SCHEMA_SQL).map_err(into_domain)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
            params![SCHEMA_VERSION],
        )
        .map_err(into_domain)?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointRepository for SqliteCheckpointRepository {
    async fn load(&self, batch_id: &str) -> DomainResult<Option<CheckpointRecord>> {
        validate_batch_id(batch_id)?;
        let pool = self.pool.clone();
        let batch_id = batch_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Option<CheckpointRecord>> {
            let conn = pool.get().map_err(into_domain)?;
            let json: Option<String> = conn
                .query_row(
                    "SELECT record_json FROM checkpoints WHERE batch_id = ?1",
                    params![batch_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(into_domain)?;
            json.map(|json| decode(&batch_id, &json)).transpose()
        })
        .await
        .map_err(map_join_error)?
    }

    async fn save(&self, record: &CheckpointRecord) -> DomainResult<()> {
        validate_batch_id(&record.batch_id)?;
        let pool = self.pool.clone();
        let record = record.clone();
        let json = serde_json::to_string(&record).map_err(into_domain)?;

        task::spawn_blocking(move || -> DomainResult<()> {
            let mut conn = pool.get().map_err(into_domain)?;
            let tx = conn.transaction().map_err(into_domain)?;
            tx.execute(
                "INSERT INTO checkpoints (
                    batch_id, source, status, total, processed_count, record_json,
                    started_at, updated_at, completed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(batch_id) DO UPDATE SET
                    source = excluded.source,
                    status = excluded.status,
                    total = excluded.total,
                    processed_count = excluded.processed_count,
                    record_json = excluded.record_json,
                    started_at = excluded.started_at,
                    updated_at = excluded.updated_at,
                    completed_at = excluded.completed_at",
                params![
                    record.batch_id,
                    record.source,
                    record.status.to_string(),
                    i64::try_from(record.total).unwrap_or(i64::MAX),
                    i64::try_from(record.processed_count()).unwrap_or(i64::MAX),
                    json,
                    record.started_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                    record.completed_at.map(|at| at.to_rfc3339()),
                ],
            )
            .map_err(into_domain)?;
            tx.commit().map_err(into_domain)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list(&self) -> DomainResult<Vec<CheckpointRecord>> {
        let pool = self.pool.clone();

        task::spawn_blocking(move || -> DomainResult<Vec<CheckpointRecord>> {
            let conn = pool.get().map_err(into_domain)?;
            let mut stmt = conn
                .prepare("SELECT batch_id, record_json FROM checkpoints ORDER BY batch_id")
                .map_err(into_domain)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .map_err(into_domain)?;

            let mut records = Vec::new();
            for row in rows {
                let (batch_id, json) = row.map_err(into_domain)?;
                records.push(decode(&batch_id, &json)?);
            }
            Ok(records)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn delete(&self, batch_id: &str) -> DomainResult<bool> {
        validate_batch_id(batch_id)?;
        let pool = self.pool.clone();
        let batch_id = batch_id.to_string();

        task::spawn_blocking(move || -> DomainResult<bool> {
            let conn = pool.get().map_err(into_domain)?;
            let deleted = conn
                .execute("DELETE FROM checkpoints WHERE batch_id = ?1", params![batch_id])
                .map_err(into_domain)?;
            Ok(deleted > 0)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn decode(batch_id: &str, json: &str) -> DomainResult<CheckpointRecord> {
    serde_json::from_str(json).map_err(|err| {
        RxflowError::Serialization(format!("corrupt checkpoint row {batch_id}: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rxflow_domain::{BatchStatus, ItemOutcome};
    use tempfile::TempDir;

    use super::*;

    fn repository() -> (SqliteCheckpointRepository, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let repo = SqliteCheckpointRepository::open(dir.path().join("rxflow.db"), 2).expect("repo");
        (repo, dir)
    }

    #[tokio::test]
    async fn upsert_replaces_row() {
        let (repo, _dir) = repository();
        let mut record = CheckpointRecord::new("b1", "s", 3, Utc::now());
        repo.save(&record).await.expect("insert");
        record.apply(ItemOutcome::failure("x", "boom"), Utc::now());
        record.status = BatchStatus::Interrupted;
        repo.save(&record).await.expect("update");

        let loaded = repo.load("b1").await.expect("load").expect("present");
        assert_eq!(loaded, record);

        let conn = repo.pool.get().unwrap();
        let (count, status, processed): (i64, String, i64) = conn
            .query_row(
                "SELECT COUNT(*), MAX(status), MAX(processed_count) FROM checkpoints",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!((count, status.as_str(), processed), (1, "interrupted", 1));
    }

    #[tokio::test]
    async fn list_and_delete() {
        let (repo, _dir) = repository();
        repo.save(&CheckpointRecord::new("zeta", "s", 1, Utc::now())).await.unwrap();
        repo.save(&CheckpointRecord::new("alpha", "s", 1, Utc::now())).await.unwrap();

        let ids: Vec<_> = repo.list().await.unwrap().into_iter().map(|r| r.batch_id).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert!(repo.delete("alpha").await.unwrap());
        assert!(!repo.delete("alpha").await.unwrap());
        assert!(repo.load("alpha").await.unwrap().is_none());
    }

    #[test]
    fn migrations_are_idempotent() {
        let (repo, _dir) = repository();
        repo.run_migrations().expect("second run");
        let conn = repo.pool.get().unwrap();
        let version: i32 =
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
