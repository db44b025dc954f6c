//! Infrastructure error conversions

pub mod conversions;

pub use conversions::{into_domain, map_join_error, InfraError};
