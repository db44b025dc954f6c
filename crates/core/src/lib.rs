//! # rxflow Core
//!
//! Pure batch logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces for checkpoint storage and item pipelines
//! - The checkpoint store and batch coordinator
//! - An in-memory checkpoint repository
//!
//! ## Architecture Principles
//! - Only depends on `rxflow-common` and `rxflow-domain`
//! - No database, filesystem or HTTP code
//! - All external dependencies via traits
//! - Time comes from an injected `Clock`

pub mod batch;

pub use batch::{
    BatchCoordinator, BatchError, CheckpointRepository, CheckpointStore,
    InMemoryCheckpointRepository, ItemCancelled, ItemPipeline, WorkItem,
};
