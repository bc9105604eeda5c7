//! Core domain types
//!
//! This module contains the core domain structures used across Conveyor services.
//! These types are shared between the orchestrator (lifecycle, reconciliation)
//! and the runner (plugin execution, source polling).

pub mod job;
pub mod pipeline;
pub mod plugin;
pub mod run;
pub mod source;
pub mod step;
