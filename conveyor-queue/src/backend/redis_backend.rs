//! Redis queue backend
//!
//! Layout per queue `q` (all keys prefixed `conveyor:queue:{q}:`):
//! - `job:{id}`: job record as JSON
//! - `waiting`: LIST, pushed at the head and claimed from the tail
//! - `active`: LIST, filled atomically by `RPOPLPUSH` from `waiting`
//! - `delayed`, `completed`, `failed`: ZSETs scored by epoch millis; the
//!   finished sets are capped by `Retention`, oldest first
//! - `paused`: flag
//! - `repeat`: HASH of repeat registrations by id
//! - `fired:{id}:{millis}`: SET NX marker deduplicating repeat firings
//!
//! Repeat registrations advance through a compare-and-set script so a
//! concurrent removal or reschedule is never overwritten.
//!
//! State moves that span several keys are sent as MULTI pipelines. Record
//! updates are read-modify-write and not isolated from each other, which is
//! acceptable under at-least-once delivery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::QueueBackend;
use super::memory::{reset_for_retry, retry_refusal};
use crate::error::Result;
use crate::job::{JobState, QueueCounts, QueueJob, QueueOutcome, Retention};
use crate::schedule::RepeatRegistration;

const FIRED_MARKER_TTL_SECS: u64 = 24 * 60 * 60;

/// Replaces a hash field only while it still holds the expected value
const COMPARE_AND_SET_FIELD: &str = r#"
if redis.call('HGET', KEYS[1], ARGV[1]) == ARGV[2] then
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
    return 1
end
return 0
"#;

#[derive(Clone)]
pub struct RedisQueueBackend {
    conn: ConnectionManager,
    retention: Retention,
}

struct Keys {
    queue: String,
    prefix: String,
}

impl Keys {
    fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
            prefix: format!("conveyor:queue:{}:", queue),
        }
    }

    fn job(&self, id: &str) -> String {
        format!("{}job:{}", self.prefix, id)
    }

    fn list(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn state(&self, state: JobState) -> String {
        let name = match state {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        self.list(name)
    }

    fn fired(&self, id: &str, fire_at: DateTime<Utc>) -> String {
        format!("{}fired:{}:{}", self.prefix, id, fire_at.timestamp_millis())
    }
}

impl RedisQueueBackend {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_manager(conn))
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self {
            conn,
            retention: Retention::default(),
        }
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    /// Drops the oldest records of a finished-state ZSET beyond `keep`
    async fn trim(&self, keys: &Keys, state: JobState, keep: usize) -> Result<()> {
        let set = keys.state(state);
        let mut conn = self.conn.clone();
        let stale: Vec<String> = conn.zrange(&set, 0, -(keep as isize) - 1).await?;
        if stale.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in &stale {
            pipe.del(keys.job(id)).ignore().zrem(&set, id).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        debug!(queue = %keys.queue, state = ?state, dropped = stale.len(), "Trimmed finished jobs");
        Ok(())
    }

    async fn load(&self, queue: &str, id: &str) -> Result<Option<QueueJob>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Keys::new(queue).job(id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, job: &QueueJob) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(job)?;
        conn.set::<_, _, ()>(Keys::new(&job.queue).job(&job.id), json)
            .await?;
        Ok(())
    }
}

/// ZSET score of a job in its current state
fn score(job: &QueueJob) -> i64 {
    match job.state {
        JobState::Delayed => job.run_at.timestamp_millis(),
        _ => job
            .finished_at
            .unwrap_or_else(Utc::now)
            .timestamp_millis(),
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn enqueue(&self, job: &QueueJob) -> Result<()> {
        let keys = Keys::new(&job.queue);
        let mut job = job.clone();
        job.state = if job.run_at > Utc::now() {
            JobState::Delayed
        } else {
            JobState::Waiting
        };
        let json = serde_json::to_string(&job)?;

        let mut pipe = redis::pipe();
        pipe.atomic().set(keys.job(&job.id), json).ignore();
        if job.state == JobState::Delayed {
            pipe.zadd(keys.state(JobState::Delayed), &job.id, score(&job))
                .ignore();
        } else {
            pipe.lpush(keys.state(JobState::Waiting), &job.id).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, queue: &str, id: &str) -> Result<Option<QueueJob>> {
        self.load(queue, id).await
    }

    async fn update(&self, job: &QueueJob) -> Result<()> {
        let Some(existing) = self.load(&job.queue, &job.id).await? else {
            return Ok(());
        };
        let mut job = job.clone();
        job.state = existing.state;
        self.store(&job).await
    }

    async fn promote_due(&self, queue: &str, now: DateTime<Utc>) -> Result<u64> {
        let keys = Keys::new(queue);
        let delayed = keys.state(JobState::Delayed);
        let mut conn = self.conn.clone();

        let due: Vec<String> = conn
            .zrangebyscore(&delayed, "-inf", now.timestamp_millis())
            .await?;

        let mut promoted = 0;
        for id in due {
            // Whoever removes the member owns the promotion
            let removed: i64 = conn.zrem(&delayed, &id).await?;
            if removed == 0 {
                continue;
            }
            let Some(mut job) = self.load(queue, &id).await? else {
                continue;
            };
            job.state = JobState::Waiting;
            let json = serde_json::to_string(&job)?;
            let _: () = redis::pipe()
                .atomic()
                .set(keys.job(&id), json)
                .ignore()
                .lpush(keys.state(JobState::Waiting), &id)
                .ignore()
                .query_async(&mut conn)
                .await?;
            promoted += 1;
        }
        Ok(promoted)
    }

    async fn claim(&self, queue: &str, now: DateTime<Utc>) -> Result<Option<QueueJob>> {
        if self.is_paused(queue).await? {
            return Ok(None);
        }
        let keys = Keys::new(queue);
        let mut conn = self.conn.clone();

        loop {
            let id: Option<String> = conn
                .rpoplpush(keys.state(JobState::Waiting), keys.state(JobState::Active))
                .await?;
            let Some(id) = id else {
                return Ok(None);
            };

            let Some(mut job) = self.load(queue, &id).await? else {
                // Record removed after it was queued
                let _: i64 = conn.lrem(keys.state(JobState::Active), 0, &id).await?;
                continue;
            };
            job.state = JobState::Active;
            job.attempts_made += 1;
            job.processed_at = Some(now);
            self.store(&job).await?;
            return Ok(Some(job));
        }
    }

    async fn finish(&self, job: &QueueJob) -> Result<()> {
        let keys = Keys::new(&job.queue);
        let json = serde_json::to_string(job)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(keys.state(JobState::Active), 0, &job.id)
            .ignore()
            .set(keys.job(&job.id), json)
            .ignore();
        match job.state {
            JobState::Waiting => {
                pipe.lpush(keys.state(JobState::Waiting), &job.id).ignore();
            }
            JobState::Active => {
                pipe.lpush(keys.state(JobState::Active), &job.id).ignore();
            }
            state => {
                pipe.zadd(keys.state(state), &job.id, score(job)).ignore();
            }
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;

        if let Some(keep) = self.retention.keep(job.state) {
            self.trim(&keys, job.state, keep).await?;
        }
        Ok(())
    }

    async fn remove(&self, queue: &str, id: &str) -> Result<QueueOutcome> {
        let Some(job) = self.load(queue, id).await? else {
            return Ok(QueueOutcome::Rejected(format!("job {} not found", id)));
        };
        if job.state == JobState::Active {
            return Ok(QueueOutcome::Rejected(format!(
                "job {} is active and cannot be removed",
                id
            )));
        }

        let keys = Keys::new(queue);
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(keys.job(id))
            .ignore()
            .lrem(keys.state(JobState::Waiting), 0, id)
            .ignore()
            .zrem(keys.state(JobState::Delayed), id)
            .ignore()
            .zrem(keys.state(JobState::Completed), id)
            .ignore()
            .zrem(keys.state(JobState::Failed), id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(QueueOutcome::Done)
    }

    async fn retry(&self, queue: &str, id: &str) -> Result<QueueOutcome> {
        let Some(mut job) = self.load(queue, id).await? else {
            return Ok(QueueOutcome::Rejected(format!("job {} not found", id)));
        };
        if let Some(reason) = retry_refusal(&job) {
            return Ok(QueueOutcome::Rejected(reason));
        }
        reset_for_retry(&mut job);

        let keys = Keys::new(queue);
        let json = serde_json::to_string(&job)?;
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .zrem(keys.state(JobState::Completed), id)
            .ignore()
            .zrem(keys.state(JobState::Failed), id)
            .ignore()
            .set(keys.job(id), json)
            .ignore()
            .lpush(keys.state(JobState::Waiting), id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(QueueOutcome::Done)
    }

    async fn set_paused(&self, queue: &str, paused: bool) -> Result<()> {
        let key = Keys::new(queue).list("paused");
        let mut conn = self.conn.clone();
        if paused {
            conn.set::<_, _, ()>(key, 1).await?;
        } else {
            conn.del::<_, ()>(key).await?;
        }
        Ok(())
    }

    async fn is_paused(&self, queue: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let paused: bool = conn.exists(Keys::new(queue).list("paused")).await?;
        Ok(paused)
    }

    async fn ids_in(&self, queue: &str, state: JobState) -> Result<Vec<String>> {
        let key = Keys::new(queue).state(state);
        let mut conn = self.conn.clone();
        match state {
            JobState::Waiting => {
                let mut ids: Vec<String> = conn.lrange(key, 0, -1).await?;
                ids.reverse();
                Ok(ids)
            }
            JobState::Active => Ok(conn.lrange(key, 0, -1).await?),
            _ => Ok(conn.zrange(key, 0, -1).await?),
        }
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts> {
        let keys = Keys::new(queue);
        let mut conn = self.conn.clone();
        let (waiting, delayed, active, completed, failed): (u64, u64, u64, u64, u64) =
            redis::pipe()
                .llen(keys.state(JobState::Waiting))
                .zcard(keys.state(JobState::Delayed))
                .llen(keys.state(JobState::Active))
                .zcard(keys.state(JobState::Completed))
                .zcard(keys.state(JobState::Failed))
                .query_async(&mut conn)
                .await?;
        Ok(QueueCounts {
            waiting,
            delayed,
            active,
            completed,
            failed,
        })
    }

    async fn upsert_repeat(&self, registration: &RepeatRegistration) -> Result<()> {
        let key = Keys::new(&registration.queue).list("repeat");
        let json = serde_json::to_string(registration)?;
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, &registration.id, json).await?;
        Ok(())
    }

    async fn remove_repeat(&self, queue: &str, id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.hdel(Keys::new(queue).list("repeat"), id).await?;
        Ok(removed > 0)
    }

    async fn list_repeats(&self, queue: &str) -> Result<Vec<RepeatRegistration>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hvals(Keys::new(queue).list("repeat")).await?;
        let mut registrations = raw
            .iter()
            .map(|json| serde_json::from_str::<RepeatRegistration>(json))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        registrations.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(registrations)
    }

    async fn advance_repeat(
        &self,
        seen: &RepeatRegistration,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        // Registrations round-trip through serde_json deterministically, so
        // the re-serialized snapshot matches the stored field byte for byte.
        let expected = serde_json::to_string(seen)?;
        let advanced = RepeatRegistration {
            next_run_at,
            ..seen.clone()
        };
        let replacement = serde_json::to_string(&advanced)?;

        let mut conn = self.conn.clone();
        let swapped: i64 = redis::Script::new(COMPARE_AND_SET_FIELD)
            .key(Keys::new(&seen.queue).list("repeat"))
            .arg(&seen.id)
            .arg(expected)
            .arg(replacement)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn claim_fire(&self, queue: &str, id: &str, fire_at: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(Keys::new(queue).fired(id, fire_at))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(FIRED_MARKER_TTL_SECS)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}
