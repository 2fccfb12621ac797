//! Remote portal API access.

pub mod client;

pub use client::{ApiClient, ProbeResult};
