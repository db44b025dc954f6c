//! Checkpoint repository storing one JSON file per batch

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rxflow_core::batch::ports::CheckpointRepository;
use rxflow_domain::{validate_batch_id, CheckpointRecord, Result as DomainResult, RxflowError};
use tempfile::NamedTempFile;
use tokio::task;
use tracing::{debug, warn};

use crate::errors::{into_domain, map_join_error};

const EXTENSION: &str = "json";

/// `<dir>/<batch_id>.json`, replaced atomically on every save
///
/// Each save writes a temporary file in the same directory, syncs it and
/// renames it over the target, so readers see either the old or the new
/// record.
#[derive(Debug, Clone)]
pub struct JsonFileCheckpointRepository {
    dir: Arc<PathBuf>,
}

impl JsonFileCheckpointRepository {
    /// Use `dir` for checkpoint files, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> DomainResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(into_domain)?;
        debug!(dir = %dir.display(), "json checkpoint directory ready");
        Ok(Self { dir: Arc::new(dir) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `batch_id`
    pub fn path_for(&self, batch_id: &str) -> DomainResult<PathBuf> {
        validate_batch_id(batch_id)?;
        Ok(self.dir.join(format!("{batch_id}.{EXTENSION}")))
    }
}

#[async_trait]
impl CheckpointRepository for JsonFileCheckpointRepository {
    async fn load(&self, batch_id: &str) -> DomainResult<Option<CheckpointRecord>> {
        let path = self.path_for(batch_id)?;
        task::spawn_blocking(move || read_record(&path)).await.map_err(map_join_error)?
    }

    async fn save(&self, record: &CheckpointRecord) -> DomainResult<()> {
        let path = self.path_for(&record.batch_id)?;
        let dir = Arc::clone(&self.dir);
        let json = serde_json::to_vec_pretty(record).map_err(into_domain)?;

        task::spawn_blocking(move || -> DomainResult<()> {
            let mut file = NamedTempFile::new_in(dir.as_path()).map_err(into_domain)?;
            file.write_all(&json).map_err(into_domain)?;
            file.as_file().sync_all().map_err(into_domain)?;
            file.persist(&path).map_err(into_domain)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list(&self) -> DomainResult<Vec<CheckpointRecord>> {
        let dir = Arc::clone(&self.dir);

        task::spawn_blocking(move || -> DomainResult<Vec<CheckpointRecord>> {
            let mut records = Vec::new();
            for entry in fs::read_dir(dir.as_path()).map_err(into_domain)? {
                let path = entry.map_err(into_domain)?.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                    continue;
                }
                match read_record(&path) {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {}
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping unreadable checkpoint");
                    }
                }
            }
            records.sort_by(|a, b| a.batch_id.cmp(&b.batch_id));
            Ok(records)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn delete(&self, batch_id: &str) -> DomainResult<bool> {
        let path = self.path_for(batch_id)?;

        task::spawn_blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(into_domain(err)),
        })
        .await
        .map_err(map_join_error)?
    }
}

fn read_record(path: &Path) -> DomainResult<Option<CheckpointRecord>> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(into_domain(err)),
    };
    serde_json::from_slice(&contents).map(Some).map_err(|err| {
        RxflowError::Serialization(format!("corrupt checkpoint {}: {err}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rxflow_domain::{BatchStatus, ItemOutcome};
    use tempfile::TempDir;

    use super::*;

    fn repository() -> (JsonFileCheckpointRepository, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let repo = JsonFileCheckpointRepository::new(dir.path().join("checkpoints")).expect("repo");
        (repo, dir)
    }

    #[tokio::test]
    async fn save_then_load_returns_same_record() {
        let (repo, _dir) = repository();
        let mut record = CheckpointRecord::new("b1", "items.txt", 2, Utc::now());
        record.apply(ItemOutcome::success("a", "ok"), Utc::now());

        repo.save(&record).await.expect("save");
        let loaded = repo.load("b1").await.expect("load").expect("present");
        assert_eq!(loaded, record);
        assert!(repo.dir().join("b1.json").exists());
    }

    #[tokio::test]
    async fn save_replaces_previous_contents() {
        let (repo, _dir) = repository();
        let mut record = CheckpointRecord::new("b1", "s", 2, Utc::now());
        repo.save(&record).await.expect("save");
        record.status = BatchStatus::Completed;
        repo.save(&record).await.expect("save");

        let loaded = repo.load("b1").await.expect("load").expect("present");
        assert_eq!(loaded.status, BatchStatus::Completed);
        let files: Vec<_> = fs::read_dir(repo.dir()).unwrap().collect();
        assert_eq!(files.len(), 1, "temporary files must not be left behind");
    }

    #[tokio::test]
    async fn missing_record_loads_as_none() {
        let (repo, _dir) = repository();
        assert!(repo.load("nothing").await.expect("load").is_none());
        assert!(!repo.delete("nothing").await.expect("delete"));
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let (repo, _dir) = repository();
        fs::write(repo.dir().join("broken.json"), b"{ not json").unwrap();

        let err = repo.load("broken").await.unwrap_err();
        assert!(matches!(err, RxflowError::Serialization(_)), "{err:?}");
        assert!(repo.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn unsafe_batch_ids_never_touch_the_filesystem() {
        let (repo, _dir) = repository();
        let err = repo.load("../outside").await.unwrap_err();
        assert!(matches!(err, RxflowError::InvalidInput(_)));
    }
}
