//! Observability infrastructure
//!
//! Structured logging through `tracing`. Batch runs, transports and
//! checkpoint repositories emit spans and events; this module installs the
//! subscriber that renders them.

pub mod logging;

pub use logging::{build_filter, init_tracing};
