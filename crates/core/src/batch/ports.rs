//! Port interfaces for resumable batch runs

use async_trait::async_trait;
use rxflow_domain::{CheckpointRecord, ItemOutcome, Result};
use tokio_util::sync::CancellationToken;

/// Durable storage for checkpoint records, one per batch id
///
/// `save` always replaces the whole stored record; implementations must make
/// the replacement atomic so a crash never leaves a torn checkpoint.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    /// Load the record for `batch_id`, if one was saved
    async fn load(&self, batch_id: &str) -> Result<Option<CheckpointRecord>>;

    /// Replace the stored record for `record.batch_id`
    async fn save(&self, record: &CheckpointRecord) -> Result<()>;

    /// All stored records, ordered by batch id
    async fn list(&self) -> Result<Vec<CheckpointRecord>>;

    /// Remove the record for `batch_id`; returns whether one existed
    async fn delete(&self, batch_id: &str) -> Result<bool>;
}

/// Something a batch can process, identified by a stable id
pub trait WorkItem: Send + Sync {
    fn item_id(&self) -> String;
}

impl WorkItem for String {
    fn item_id(&self) -> String {
        self.clone()
    }
}

impl WorkItem for &'static str {
    fn item_id(&self) -> String {
        (*self).to_string()
    }
}

/// Per-item unit of work
///
/// Returning `Err` (or panicking) is turned into a `Failure` outcome by the
/// coordinator; it never aborts the run. The one exception is an error
/// wrapping [`ItemCancelled`](super::error::ItemCancelled): the item is left
/// unrecorded and the run stops as interrupted.
#[async_trait]
pub trait ItemPipeline<I: WorkItem>: Send + Sync {
    /// Process one item; `cancel` is the run's token and should be passed
    /// on to any retry or wait loop
    async fn process(&self, item: &I, cancel: &CancellationToken) -> anyhow::Result<ItemOutcome>;
}
