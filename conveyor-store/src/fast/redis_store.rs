use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;

use super::FastStore;
use crate::error::Result;

const SCAN_BATCH: usize = 200;

/// Redis-backed fast store
#[derive(Clone)]
pub struct RedisFastStore {
    conn: ConnectionManager,
}

impl RedisFastStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl FastStore for RedisFastStore {
    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, json).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn push_capped(&self, key: &str, value: &Value, max_len: usize) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        let stop = max_len.saturating_sub(1) as isize;
        let _: () = redis::pipe()
            .atomic()
            .lpush(key, json)
            .ignore()
            .ltrim(key, 0, stop)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list(&self, key: &str, limit: usize) -> Result<Vec<Value>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(key, 0, limit as isize - 1).await?;
        raw.iter()
            .map(|json| serde_json::from_str(json).map_err(Into::into))
            .collect()
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let pattern = format!("{}*", prefix);
        let keys: Vec<String> = {
            let mut conn = self.conn.clone();
            let mut iter = conn.scan_match::<_, String>(pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut removed = 0;
        for batch in keys.chunks(SCAN_BATCH) {
            removed += self.delete(batch).await?;
        }
        Ok(removed)
    }
}
