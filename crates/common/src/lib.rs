//! Shared configuration, error types, IDs, and metrics for spillway crates.
//!
//! Architecture role:
//! - defines spill read-back configuration passed across layers
//! - provides common [`SpillwayError`] / [`Result`] contracts
//! - hosts the prometheus metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::{RearmPolicy, SpillConfig};
pub use error::{Result, SpillwayError};
pub use ids::*;
pub use metrics::{MetricsRegistry, global_metrics};
