//! Domain types and models

pub mod batch;

pub use batch::{
    validate_batch_id, BatchResult, BatchStatus, CheckpointRecord, ItemOutcome, OutcomeKind,
    ReasonEntry, SuccessEntry,
};
