//! Conveyor state stores
//!
//! Two independently consistent stores back the system:
//! - the durable store (Postgres) is the system of record for job, run and
//!   step history
//! - the fast store (Redis) holds the latest observed live state and may lag
//!   or miss writes after a crash
//!
//! Both sit behind traits with in-memory twins. `StateSync` owns the key
//! scheme and the order in which the two are written.

pub mod db;
pub mod durable;
pub mod error;
pub mod fast;
pub mod keys;
pub mod repository;
pub mod sync;

pub use durable::{DurableStore, InMemoryDurableStore, PgDurableStore};
pub use error::{Result, StoreError};
pub use fast::{FastStore, InMemoryFastStore, RedisFastStore};
pub use sync::{CachedError, StateSync};
