//! Resumable batch processing
//!
//! [`BatchCoordinator`] drives a list of work items through an
//! [`ItemPipeline`], recording each outcome in a [`CheckpointStore`] backed
//! by a [`CheckpointRepository`] so an interrupted run resumes where it
//! stopped.

pub mod checkpoint;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod ports;

pub use checkpoint::CheckpointStore;
pub use coordinator::BatchCoordinator;
pub use error::{BatchError, ItemCancelled};
pub use memory::InMemoryCheckpointRepository;
pub use ports::{CheckpointRepository, ItemPipeline, WorkItem};
