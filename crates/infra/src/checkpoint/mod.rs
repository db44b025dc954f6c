//! Checkpoint repository implementations
//!
//! - [`JsonFileCheckpointRepository`]: one JSON file per batch
//! - [`SqliteCheckpointRepository`]: one row per batch in SQLite
//!
//! [`open_repository`] picks one from [`CheckpointConfig`].

pub mod json_file;
pub mod sqlite;

use std::sync::Arc;

use rxflow_core::{CheckpointRepository, InMemoryCheckpointRepository};
use rxflow_domain::{CheckpointBackend, CheckpointConfig, Result};
use tracing::info;

pub use json_file::JsonFileCheckpointRepository;
pub use sqlite::SqliteCheckpointRepository;

/// Build the repository selected by `config.backend`
pub fn open_repository(config: &CheckpointConfig) -> Result<Arc<dyn CheckpointRepository>> {
    info!(backend = %config.backend, path = %config.path, "opening checkpoint repository");
    let repository: Arc<dyn CheckpointRepository> = match config.backend {
        CheckpointBackend::Json => Arc::new(JsonFileCheckpointRepository::new(&config.path)?),
        CheckpointBackend::Sqlite => {
            Arc::new(SqliteCheckpointRepository::open(&config.path, config.pool_size)?)
        }
        CheckpointBackend::Memory => Arc::new(InMemoryCheckpointRepository::new()),
    };
    Ok(repository)
}
