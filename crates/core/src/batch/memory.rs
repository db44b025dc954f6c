//! In-memory checkpoint repository
//!
//! Used by the `memory` checkpoint backend and by tests. Nothing survives the
//! process.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rxflow_domain::{CheckpointRecord, Result};

use super::ports::CheckpointRepository;

#[derive(Debug, Default)]
pub struct InMemoryCheckpointRepository {
    records: Mutex<BTreeMap<String, CheckpointRecord>>,
    saves: AtomicUsize,
}

impl InMemoryCheckpointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous read of the stored record
    pub fn get(&self, batch_id: &str) -> Option<CheckpointRecord> {
        self.records.lock().get(batch_id).cloned()
    }

    /// Number of successful `save` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointRepository for InMemoryCheckpointRepository {
    async fn load(&self, batch_id: &str) -> Result<Option<CheckpointRecord>> {
        Ok(self.get(batch_id))
    }

    async fn save(&self, record: &CheckpointRecord) -> Result<()> {
        self.records.lock().insert(record.batch_id.clone(), record.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CheckpointRecord>> {
        Ok(self.records.lock().values().cloned().collect())
    }

    async fn delete(&self, batch_id: &str) -> Result<bool> {
        Ok(self.records.lock().remove(batch_id).is_some())
    }
}
