//! Data Transfer Objects
//!
//! Requests consumed by the lifecycle manager and the payloads carried by
//! queue jobs between services.

pub mod job;
pub mod queue;
