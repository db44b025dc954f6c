//! Errors returned by batch runs

use rxflow_common::{ErrorClassification, ErrorSeverity};
use rxflow_domain::{BatchResult, RxflowError};
use thiserror::Error;

/// Why a batch run stopped before completing
///
/// Item failures never show up here; they are recorded in the checkpoint
/// and reported through [`BatchResult`].
#[derive(Debug, Error)]
pub enum BatchError {
    /// Cancelled at an item boundary; the checkpoint was flushed as
    /// `interrupted` and the partial result is attached.
    #[error("batch interrupted: {0}")]
    Interrupted(BatchResult),

    /// The checkpoint could not be loaded or saved
    #[error("checkpoint persistence failed: {0}")]
    Persistence(#[from] RxflowError),
}

/// Pipeline error for an item abandoned because the run was cancelled
///
/// The coordinator does not record such items, so they stay pending and are
/// attempted again when the batch resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("item abandoned after cancellation")]
pub struct ItemCancelled;

impl BatchError {
    /// Partial result for an interrupted run
    pub fn partial_result(&self) -> Option<&BatchResult> {
        match self {
            Self::Interrupted(result) => Some(result),
            Self::Persistence(_) => None,
        }
    }
}

impl ErrorClassification for BatchError {
    fn is_retryable(&self) -> bool {
        // Re-running an interrupted batch resumes it
        matches!(self, Self::Interrupted(_))
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Interrupted(_) => ErrorSeverity::Warning,
            Self::Persistence(_) => ErrorSeverity::Critical,
        }
    }
}
