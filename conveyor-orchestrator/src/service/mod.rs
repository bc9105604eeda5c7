//! Service Module
//!
//! Job lifecycle, orphan reconciliation and monitoring reads. These are the
//! entry points an upstream API layer calls.

pub mod lifecycle;
pub mod monitoring;
pub mod reconcile;

pub use lifecycle::LifecycleManager;
pub use monitoring::{JobOverview, job_overview};
pub use reconcile::{ReconcileFailure, ReconcileReport};
