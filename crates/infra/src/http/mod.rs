//! HTTP operation adapter

pub mod client;

pub use client::{parse_retry_after, HttpClient, HttpClientBuilder};
