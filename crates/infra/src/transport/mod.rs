//! Per-dependency resilient transports built from configuration

pub mod registry;

pub use registry::{transport_for, TransportRegistry};
