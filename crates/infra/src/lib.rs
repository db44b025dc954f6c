//! # rxflow Infrastructure
//!
//! Infrastructure implementations of core domain ports.
//!
//! This crate contains:
//! - Checkpoint repositories (JSON files, SQLite)
//! - Single-attempt HTTP client whose failures feed the resilient transport
//! - Transport registry built from per-dependency configuration
//! - Configuration loading (environment, JSON, TOML)
//! - Tracing subscriber setup
//!
//! ## Architecture
//! - Implements traits defined in `rxflow-core`
//! - Depends on `rxflow-common`, `rxflow-domain` and `rxflow-core`
//! - Contains all "impure" code (filesystem, database, network)

pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod http;
pub mod observability;
pub mod transport;

// Re-export commonly used items
pub use checkpoint::{open_repository, JsonFileCheckpointRepository, SqliteCheckpointRepository};
pub use errors::InfraError;
pub use http::{HttpClient, HttpClientBuilder};
pub use observability::init_tracing;
pub use transport::TransportRegistry;
