//! Batch run types: checkpoint record, item outcomes and run summaries

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_BATCH_ID_LENGTH;
use crate::errors::{Result, RxflowError};

/// Lifecycle of a batch run
///
/// `Pending → InProgress → {Completed | Interrupted}`; an interrupted run
/// goes back to `InProgress` when resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    InProgress,
    Interrupted,
    Completed,
}

crate::impl_domain_status_conversions!(BatchStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Interrupted => "interrupted",
    Completed => "completed",
});

impl BatchStatus {
    /// A run in this state picks up where it stopped
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::InProgress | Self::Interrupted)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// What the item pipeline decided for one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Processed; carries a short result summary
    Success(String),
    /// Could not be processed; carries the reason
    Failure(String),
    /// Deliberately not processed; carries the reason
    Skipped(String),
}

/// Outcome of one item, keyed by its identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub item_id: String,
    #[serde(flatten)]
    pub kind: OutcomeKind,
}

impl ItemOutcome {
    pub fn success(item_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self { item_id: item_id.into(), kind: OutcomeKind::Success(summary.into()) }
    }

    pub fn failure(item_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { item_id: item_id.into(), kind: OutcomeKind::Failure(reason.into()) }
    }

    pub fn skipped(item_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { item_id: item_id.into(), kind: OutcomeKind::Skipped(reason.into()) }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.kind, OutcomeKind::Failure(_))
    }
}

/// Successful item with its result summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessEntry {
    pub item_id: String,
    pub result_summary: String,
}

/// Failed or skipped item with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonEntry {
    pub item_id: String,
    pub reason: String,
}

/// Durable progress of one batch run
///
/// Saved in full after every item; the stored copy is always replaced,
/// never appended to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub batch_id: String,
    /// Opaque description of where the items came from
    pub source: String,
    pub total: usize,
    /// Identifiers in the order they were attempted
    pub processed: Vec<String>,
    pub successful: Vec<SuccessEntry>,
    pub failed: Vec<ReasonEntry>,
    pub skipped: Vec<ReasonEntry>,
    pub status: BatchStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Fresh record for a run that starts now
    pub fn new(
        batch_id: impl Into<String>,
        source: impl Into<String>,
        total: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            source: source.into(),
            total,
            processed: Vec::new(),
            successful: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            status: BatchStatus::InProgress,
            started_at: now,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Append an outcome to `processed` and to its outcome list
    pub fn apply(&mut self, outcome: ItemOutcome, now: DateTime<Utc>) {
        let ItemOutcome { item_id, kind } = outcome;
        self.processed.push(item_id.clone());
        match kind {
            OutcomeKind::Success(result_summary) => {
                self.successful.push(SuccessEntry { item_id, result_summary });
            }
            OutcomeKind::Failure(reason) => self.failed.push(ReasonEntry { item_id, reason }),
            OutcomeKind::Skipped(reason) => self.skipped.push(ReasonEntry { item_id, reason }),
        }
        self.updated_at = now;
    }

    /// Items attempted so far
    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Items not yet attempted (against the declared total)
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.processed.len())
    }

    /// Summary of this record as a run result
    pub fn summary(&self) -> BatchResult {
        BatchResult {
            batch_id: self.batch_id.clone(),
            status: self.status,
            total: self.total,
            successful: self.successful.len(),
            failed: self.failed.len(),
            skipped: self.skipped.len(),
            errors: self.failed.clone(),
        }
    }
}

/// Counts reported at the end of a run
///
/// Counts are cumulative over every run of the same batch, so a resumed
/// run reports the whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub status: BatchStatus,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Every failed item with its reason
    pub errors: Vec<ReasonEntry>,
}

impl BatchResult {
    pub fn processed(&self) -> usize {
        self.successful + self.failed + self.skipped
    }
}

impl fmt::Display for BatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {} {}: {}/{} processed ({} ok, {} failed, {} skipped)",
            self.batch_id,
            self.status,
            self.processed(),
            self.total,
            self.successful,
            self.failed,
            self.skipped
        )
    }
}

/// Check a batch id is safe to use as a file name or row key
///
/// Accepts 1..=128 characters from `[A-Za-z0-9._-]`, not starting with `.`.
pub fn validate_batch_id(batch_id: &str) -> Result<()> {
    if batch_id.is_empty() || batch_id.len() > MAX_BATCH_ID_LENGTH {
        return Err(RxflowError::InvalidInput(format!(
            "batch id must be 1-{MAX_BATCH_ID_LENGTH} characters, got {}",
            batch_id.len()
        )));
    }
    if batch_id.starts_with('.') {
        return Err(RxflowError::InvalidInput(format!("batch id must not start with '.': {batch_id}")));
    }
    if let Some(c) = batch_id.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))) {
        return Err(RxflowError::InvalidInput(format!(
            "batch id contains invalid character {c:?}: {batch_id}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_batch_status_wire_format() {
        assert_eq!(serde_json::to_string(&BatchStatus::InProgress).unwrap(), "\"in_progress\"");
        assert_eq!("INTERRUPTED".parse::<BatchStatus>().unwrap(), BatchStatus::Interrupted);
        assert_eq!(BatchStatus::Completed.to_string(), "completed");
        assert!(BatchStatus::Interrupted.is_resumable());
        assert!(!BatchStatus::Pending.is_resumable());
    }

    /// Validates the persisted JSON uses the logical checkpoint field names.
    ///
    /// Assertions:
    /// - Successful entries carry `result_summary`; failed and skipped carry
    ///   `reason`.
    /// - `completed_at` is present (null) before completion.
    #[test]
    fn test_checkpoint_json_layout() {
        let mut record = CheckpointRecord::new("b1", "items.txt", 3, t0());
        record.apply(ItemOutcome::success("aspirin", "3 labels"), t0());
        record.apply(ItemOutcome::failure("xyz", "timeout"), t0());
        record.apply(ItemOutcome::skipped("", "blank line"), t0());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["batch_id"], "b1");
        assert_eq!(json["source"], "items.txt");
        assert_eq!(json["total"], 3);
        assert_eq!(json["processed"], serde_json::json!(["aspirin", "xyz", ""]));
        assert_eq!(json["successful"][0]["result_summary"], "3 labels");
        assert_eq!(json["failed"][0]["reason"], "timeout");
        assert_eq!(json["skipped"][0]["reason"], "blank line");
        assert_eq!(json["status"], "in_progress");
        assert!(json["completed_at"].is_null());
        assert!(json.get("started_at").is_some());

        let back: CheckpointRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_record_without_updated_at_still_loads() {
        let json = serde_json::json!({
            "batch_id": "legacy",
            "source": "s",
            "total": 1,
            "processed": [],
            "successful": [],
            "failed": [],
            "skipped": [],
            "status": "interrupted",
            "started_at": "2024-06-01T12:00:00Z",
            "completed_at": null
        });
        let record: CheckpointRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.status, BatchStatus::Interrupted);
    }

    #[test]
    fn test_summary_counts_and_errors() {
        let mut record = CheckpointRecord::new("b2", "s", 10, t0());
        for i in 0..4 {
            record.apply(ItemOutcome::success(format!("ok-{i}"), "done"), t0());
        }
        record.apply(ItemOutcome::failure("bad", "boom"), t0());
        let summary = record.summary();
        assert_eq!(summary.successful, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors, vec![ReasonEntry { item_id: "bad".into(), reason: "boom".into() }]);
        assert_eq!(record.remaining(), 5);
        assert_eq!(summary.to_string(), "batch b2 in_progress: 5/10 processed (4 ok, 1 failed, 0 skipped)");
    }

    #[test]
    fn test_item_outcome_serde_shape() {
        let json = serde_json::to_value(ItemOutcome::failure("x", "why")).unwrap();
        assert_eq!(json, serde_json::json!({"item_id": "x", "kind": "failure", "detail": "why"}));
    }

    #[test]
    fn test_validate_batch_id() {
        assert!(validate_batch_id("run-2024.06_01").is_ok());
        assert!(validate_batch_id("").is_err());
        assert!(validate_batch_id("../etc").is_err());
        assert!(validate_batch_id(".hidden").is_err());
        assert!(validate_batch_id("a/b").is_err());
        assert!(validate_batch_id(&"x".repeat(129)).is_err());
    }
}
