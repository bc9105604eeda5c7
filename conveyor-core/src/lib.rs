//! Conveyor Core
//!
//! Core types and abstractions for the Conveyor pipeline orchestrator.
//!
//! This crate contains:
//! - Domain types: Job definitions, pipelines, steps, runs, plugin metadata
//!   and the resumable polling state of source jobs
//! - DTOs: Requests and queue payloads exchanged between services
//! - Error taxonomy shared by every layer

pub mod domain;
pub mod dto;
pub mod error;

pub use error::{ApiStatus, Checkpoint, Error, Result};
