//! Conveyor Orchestrator
//!
//! Owns job definitions and their schedules:
//! - Lifecycle: create, update and delete jobs while keeping the source-query
//!   registrations in step with them
//! - Reconciliation: periodic removal of registrations left behind by crashes
//! - Monitoring: the per-job view assembled from both stores
//! - Scheduler: fires due registrations onto the source-query queue

pub mod config;
pub mod scheduler;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use scheduler::Scheduler;
pub use service::{JobOverview, LifecycleManager, ReconcileReport, job_overview};
