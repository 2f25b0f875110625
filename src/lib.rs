//! Karbon Budget Reconciliation
//!
//! This library reconciles time-tracking data from the Karbon API against
//! work-item budget estimates, producing a flat per-task report of actual
//! vs. budgeted hours grouped by client and worker.

pub mod config;
pub mod error;
pub mod helpers;
pub mod models;
pub mod reconcile;
pub mod service;

pub use config::Config;
pub use service::{ReconService, RunOutcome};

// Re-export key types for convenience
pub use error::ApiError;
pub use helpers::karbon::{KarbonClient, RetryPolicy};
pub use models::report::ReportRecord;
