//! In-process fast store for tests and single-process development

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::FastStore;
use crate::error::{Result, StoreError};

#[derive(Default)]
struct Entries {
    values: HashMap<String, Value>,
    lists: HashMap<String, VecDeque<Value>>,
}

#[derive(Default)]
pub struct InMemoryFastStore {
    entries: Mutex<Entries>,
    fail_writes: AtomicBool,
}

impl InMemoryFastStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail, simulating an unreachable store
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every key currently present, values and lists alike
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|e| e.values.keys().chain(e.lists.keys()).cloned().collect())
            .unwrap_or_default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, Entries>> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("fast store lock poisoned: {}", e)))
    }

    fn writable(&self) -> Result<MutexGuard<'_, Entries>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "fast store rejected the write".to_string(),
            ));
        }
        self.entries()
    }
}

#[async_trait]
impl FastStore for InMemoryFastStore {
    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.writable()?
            .values
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries()?.values.get(key).cloned())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut entries = self.writable()?;
        let mut removed = 0;
        for key in keys {
            if entries.values.remove(key).is_some() || entries.lists.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn push_capped(&self, key: &str, value: &Value, max_len: usize) -> Result<()> {
        let mut entries = self.writable()?;
        let list = entries.lists.entry(key.to_string()).or_default();
        list.push_front(value.clone());
        list.truncate(max_len);
        Ok(())
    }

    async fn list(&self, key: &str, limit: usize) -> Result<Vec<Value>> {
        Ok(self
            .entries()?
            .lists
            .get(key)
            .map(|list| list.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut entries = self.writable()?;
        let before = entries.values.len() + entries.lists.len();
        entries.values.retain(|key, _| !key.starts_with(prefix));
        entries.lists.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.values.len() - entries.lists.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_push_capped_keeps_newest_first() {
        let store = InMemoryFastStore::new();
        for i in 0..5 {
            store.push_capped("history", &json!(i), 3).await.unwrap();
        }
        let values = store.list("history", 10).await.unwrap();
        assert_eq!(values, vec![json!(4), json!(3), json!(2)]);
        assert_eq!(store.list("history", 1).await.unwrap(), vec![json!(4)]);
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let store = InMemoryFastStore::new();
        store.set("job-run:a:1", &json!(1)).await.unwrap();
        store.set("job-run:a:2", &json!(2)).await.unwrap();
        store.set("job-run:b:1", &json!(3)).await.unwrap();

        assert_eq!(store.delete_prefix("job-run:a:").await.unwrap(), 2);
        assert!(store.get("job-run:a:1").await.unwrap().is_none());
        assert_eq!(store.get("job-run:b:1").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = InMemoryFastStore::new();
        store.set("k", &json!(1)).await.unwrap();
        store.set_fail_writes(true);

        assert!(store.set("k", &json!(2)).await.is_err());
        assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));
    }
}
