//! Postgres repositories
//!
//! Free functions over a `PgPool`, one module per table. `PgDurableStore`
//! is the trait-facing wrapper around them.

pub mod item;
pub mod job;
pub mod run;
pub mod step;
