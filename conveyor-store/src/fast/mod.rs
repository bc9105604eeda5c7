//! Fast store: low-latency key-value state for live monitoring
//!
//! Values are JSON documents. Lists are newest-first and capped on push.

mod memory;
mod redis_store;

pub use redis_store::RedisFastStore;
pub use memory::InMemoryFastStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

#[async_trait]
pub trait FastStore: Send + Sync {
    async fn set(&self, key: &str, value: &Value) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Deletes the given keys; returns how many existed
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Pushes to the head of a list and trims it to `max_len` entries
    async fn push_capped(&self, key: &str, value: &Value, max_len: usize) -> Result<()>;

    /// Up to `limit` entries from the head of a list
    async fn list(&self, key: &str, limit: usize) -> Result<Vec<Value>>;

    /// Deletes every key starting with `prefix`; returns how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
}
