//! Checkpoint store: the in-memory view of one batch's progress
//!
//! The store owns the current [`CheckpointRecord`] and writes it through to a
//! [`CheckpointRepository`] after every change, so the durable copy is never
//! more than one item behind what has been attempted.

use std::collections::HashSet;
use std::sync::Arc;

use rxflow_common::resilience::{Clock, SystemClock};
use rxflow_domain::{
    validate_batch_id, BatchResult, BatchStatus, CheckpointRecord, ItemOutcome, Result,
};
use tracing::{debug, info, warn};

use super::ports::CheckpointRepository;

/// Progress of one batch, persisted after every recorded outcome
pub struct CheckpointStore {
    repository: Arc<dyn CheckpointRepository>,
    clock: Arc<dyn Clock>,
    record: CheckpointRecord,
    processed: HashSet<String>,
}

impl CheckpointStore {
    /// Load or create the checkpoint for `batch_id`
    ///
    /// - `in_progress` and `interrupted` records resume as `in_progress`
    /// - `pending` records restart as `in_progress`
    /// - `completed` records are returned unchanged and not re-saved
    /// - a missing record is created and persisted immediately
    pub async fn open(
        repository: Arc<dyn CheckpointRepository>,
        batch_id: &str,
        source: &str,
        total: usize,
    ) -> Result<Self> {
        Self::open_with_clock(repository, batch_id, source, total, Arc::new(SystemClock)).await
    }

    /// [`open`](Self::open) with an explicit clock for timestamps
    pub async fn open_with_clock(
        repository: Arc<dyn CheckpointRepository>,
        batch_id: &str,
        source: &str,
        total: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        validate_batch_id(batch_id)?;

        let now = clock.utc_now();
        let (record, needs_save) = match repository.load(batch_id).await? {
            Some(record) if record.status == BatchStatus::Completed => {
                info!(batch_id, total = record.total, "batch already completed");
                (record, false)
            }
            Some(mut record) => {
                if record.status == BatchStatus::Pending {
                    record.started_at = now;
                }
                if record.total != total {
                    warn!(
                        batch_id,
                        stored_total = record.total,
                        total,
                        "item count changed since the checkpoint was written"
                    );
                    record.total = total;
                }
                info!(
                    batch_id,
                    previous_status = %record.status,
                    processed = record.processed_count(),
                    total,
                    "resuming batch from checkpoint"
                );
                record.status = BatchStatus::InProgress;
                record.updated_at = now;
                (record, true)
            }
            None => {
                debug!(batch_id, source, total, "creating checkpoint");
                (CheckpointRecord::new(batch_id, source, total, now), true)
            }
        };

        let processed = record.processed.iter().cloned().collect();
        let store = Self { repository, clock, record, processed };
        if needs_save {
            store.save().await?;
        }
        Ok(store)
    }

    pub fn batch_id(&self) -> &str {
        &self.record.batch_id
    }

    pub fn status(&self) -> BatchStatus {
        self.record.status
    }

    /// The record as last saved
    pub fn checkpoint(&self) -> &CheckpointRecord {
        &self.record
    }

    pub fn processed_count(&self) -> usize {
        self.record.processed_count()
    }

    /// Whether an outcome has already been recorded for `item_id`
    pub fn is_processed(&self, item_id: &str) -> bool {
        self.processed.contains(item_id)
    }

    /// Append `outcome` and persist the whole record
    ///
    /// An outcome for an item that is already recorded is ignored.
    pub async fn record(&mut self, outcome: ItemOutcome) -> Result<()> {
        if !self.processed.insert(outcome.item_id.clone()) {
            debug!(batch_id = %self.record.batch_id, item_id = %outcome.item_id, "outcome already recorded");
            return Ok(());
        }
        self.record.apply(outcome, self.clock.utc_now());
        self.save().await
    }

    /// Flush the record as `interrupted`
    pub async fn mark_interrupted(&mut self) -> Result<()> {
        self.record.status = BatchStatus::Interrupted;
        self.record.updated_at = self.clock.utc_now();
        self.save().await
    }

    /// Flush the record as `completed`
    pub async fn mark_completed(&mut self) -> Result<()> {
        let now = self.clock.utc_now();
        self.record.status = BatchStatus::Completed;
        self.record.completed_at = Some(now);
        self.record.updated_at = now;
        self.save().await
    }

    pub fn summary(&self) -> BatchResult {
        self.record.summary()
    }

    async fn save(&self) -> Result<()> {
        self.repository.save(&self.record).await
    }
}
