//! In-process queue backend for tests and single-process development

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::QueueBackend;
use crate::error::{QueueError, Result};
use crate::job::{JobState, QueueCounts, QueueJob, QueueOutcome, Retention};
use crate::schedule::RepeatRegistration;

#[derive(Default)]
struct QueueData {
    jobs: HashMap<String, QueueJob>,
    /// Waiting ids, oldest first
    waiting: VecDeque<String>,
    paused: bool,
    repeats: BTreeMap<String, RepeatRegistration>,
    fired: HashSet<(String, i64)>,
}

impl QueueData {
    fn ids_with_state(&self, state: JobState) -> Vec<String> {
        let mut jobs: Vec<&QueueJob> = self.jobs.values().filter(|j| j.state == state).collect();
        jobs.sort_by_key(|j| (j.run_at, j.created_at));
        jobs.into_iter().map(|j| j.id.clone()).collect()
    }

    /// Drops the oldest finished jobs of `state` beyond `keep`
    fn trim(&mut self, state: JobState, keep: usize) {
        let mut finished: Vec<(Option<DateTime<Utc>>, String)> = self
            .jobs
            .values()
            .filter(|j| j.state == state)
            .map(|j| (j.finished_at, j.id.clone()))
            .collect();
        if finished.len() <= keep {
            return;
        }
        finished.sort();
        let excess = finished.len() - keep;
        for (_, id) in finished.into_iter().take(excess) {
            self.jobs.remove(&id);
        }
    }
}

#[derive(Default)]
pub struct InMemoryQueueBackend {
    queues: Mutex<HashMap<String, QueueData>>,
    retention: Retention,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    fn queues(&self) -> Result<MutexGuard<'_, HashMap<String, QueueData>>> {
        self.queues
            .lock()
            .map_err(|e| QueueError::Unavailable(format!("queue lock poisoned: {}", e)))
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn enqueue(&self, job: &QueueJob) -> Result<()> {
        let mut queues = self.queues()?;
        let data = queues.entry(job.queue.clone()).or_default();
        let mut job = job.clone();
        if job.run_at > Utc::now() {
            job.state = JobState::Delayed;
        } else {
            job.state = JobState::Waiting;
            data.waiting.push_back(job.id.clone());
        }
        data.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, queue: &str, id: &str) -> Result<Option<QueueJob>> {
        Ok(self
            .queues()?
            .get(queue)
            .and_then(|data| data.jobs.get(id))
            .cloned())
    }

    async fn update(&self, job: &QueueJob) -> Result<()> {
        let mut queues = self.queues()?;
        if let Some(existing) = queues
            .get_mut(&job.queue)
            .and_then(|data| data.jobs.get_mut(&job.id))
        {
            let state = existing.state;
            *existing = job.clone();
            existing.state = state;
        }
        Ok(())
    }

    async fn promote_due(&self, queue: &str, now: DateTime<Utc>) -> Result<u64> {
        let mut queues = self.queues()?;
        let Some(data) = queues.get_mut(queue) else {
            return Ok(0);
        };

        let mut due: Vec<(DateTime<Utc>, String)> = data
            .jobs
            .values()
            .filter(|j| j.state == JobState::Delayed && j.run_at <= now)
            .map(|j| (j.run_at, j.id.clone()))
            .collect();
        due.sort();

        for (_, id) in &due {
            if let Some(job) = data.jobs.get_mut(id) {
                job.state = JobState::Waiting;
            }
            data.waiting.push_back(id.clone());
        }
        Ok(due.len() as u64)
    }

    async fn claim(&self, queue: &str, now: DateTime<Utc>) -> Result<Option<QueueJob>> {
        let mut queues = self.queues()?;
        let Some(data) = queues.get_mut(queue) else {
            return Ok(None);
        };
        if data.paused {
            return Ok(None);
        }

        while let Some(id) = data.waiting.pop_front() {
            if let Some(job) = data.jobs.get_mut(&id) {
                job.state = JobState::Active;
                job.attempts_made += 1;
                job.processed_at = Some(now);
                return Ok(Some(job.clone()));
            }
        }
        Ok(None)
    }

    async fn finish(&self, job: &QueueJob) -> Result<()> {
        let mut queues = self.queues()?;
        let data = queues.entry(job.queue.clone()).or_default();
        if job.state == JobState::Waiting {
            data.waiting.push_back(job.id.clone());
        }
        data.jobs.insert(job.id.clone(), job.clone());
        if let Some(keep) = self.retention.keep(job.state) {
            data.trim(job.state, keep);
        }
        Ok(())
    }

    async fn remove(&self, queue: &str, id: &str) -> Result<QueueOutcome> {
        let mut queues = self.queues()?;
        let Some(data) = queues.get_mut(queue) else {
            return Ok(QueueOutcome::Rejected(format!("job {} not found", id)));
        };
        match data.jobs.get(id).map(|j| j.state) {
            None => Ok(QueueOutcome::Rejected(format!("job {} not found", id))),
            Some(JobState::Active) => Ok(QueueOutcome::Rejected(format!(
                "job {} is active and cannot be removed",
                id
            ))),
            Some(_) => {
                data.jobs.remove(id);
                data.waiting.retain(|waiting| waiting != id);
                Ok(QueueOutcome::Done)
            }
        }
    }

    async fn retry(&self, queue: &str, id: &str) -> Result<QueueOutcome> {
        let mut queues = self.queues()?;
        let Some(job) = queues.get_mut(queue).and_then(|data| data.jobs.get_mut(id)) else {
            return Ok(QueueOutcome::Rejected(format!("job {} not found", id)));
        };
        if let Some(reason) = retry_refusal(job) {
            return Ok(QueueOutcome::Rejected(reason));
        }
        reset_for_retry(job);

        if let Some(data) = queues.get_mut(queue) {
            data.waiting.push_back(id.to_string());
        }
        Ok(QueueOutcome::Done)
    }

    async fn set_paused(&self, queue: &str, paused: bool) -> Result<()> {
        self.queues()?
            .entry(queue.to_string())
            .or_default()
            .paused = paused;
        Ok(())
    }

    async fn is_paused(&self, queue: &str) -> Result<bool> {
        Ok(self
            .queues()?
            .get(queue)
            .map(|data| data.paused)
            .unwrap_or(false))
    }

    async fn ids_in(&self, queue: &str, state: JobState) -> Result<Vec<String>> {
        let queues = self.queues()?;
        let Some(data) = queues.get(queue) else {
            return Ok(Vec::new());
        };
        if state == JobState::Waiting {
            return Ok(data.waiting.iter().cloned().collect());
        }
        Ok(data.ids_with_state(state))
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts> {
        let queues = self.queues()?;
        let mut counts = QueueCounts::default();
        if let Some(data) = queues.get(queue) {
            for job in data.jobs.values() {
                match job.state {
                    JobState::Waiting => counts.waiting += 1,
                    JobState::Delayed => counts.delayed += 1,
                    JobState::Active => counts.active += 1,
                    JobState::Completed => counts.completed += 1,
                    JobState::Failed => counts.failed += 1,
                }
            }
        }
        Ok(counts)
    }

    async fn upsert_repeat(&self, registration: &RepeatRegistration) -> Result<()> {
        self.queues()?
            .entry(registration.queue.clone())
            .or_default()
            .repeats
            .insert(registration.id.clone(), registration.clone());
        Ok(())
    }

    async fn remove_repeat(&self, queue: &str, id: &str) -> Result<bool> {
        Ok(self
            .queues()?
            .get_mut(queue)
            .and_then(|data| data.repeats.remove(id))
            .is_some())
    }

    async fn list_repeats(&self, queue: &str) -> Result<Vec<RepeatRegistration>> {
        Ok(self
            .queues()?
            .get(queue)
            .map(|data| data.repeats.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn advance_repeat(
        &self,
        seen: &RepeatRegistration,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut queues = self.queues()?;
        let stored = queues
            .get_mut(&seen.queue)
            .and_then(|data| data.repeats.get_mut(&seen.id));
        match stored {
            Some(registration) if registration == seen => {
                registration.next_run_at = next_run_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_fire(&self, queue: &str, id: &str, fire_at: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .queues()?
            .entry(queue.to_string())
            .or_default()
            .fired
            .insert((id.to_string(), fire_at.timestamp_millis())))
    }
}

/// Why a job may not be retried, if it may not
pub(crate) fn retry_refusal(job: &QueueJob) -> Option<String> {
    match job.state {
        JobState::Active => Some(format!("job {} is active", job.id)),
        state if state.is_queued() => Some(format!("job {} is already queued", job.id)),
        _ => None,
    }
}

/// A retried job starts over with a fresh attempt budget
pub(crate) fn reset_for_retry(job: &mut QueueJob) {
    let now = Utc::now();
    job.state = JobState::Waiting;
    job.attempts_made = 0;
    job.failure_reason = None;
    job.processed_at = None;
    job.finished_at = None;
    job.run_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn finish_as(backend: &InMemoryQueueBackend, state: JobState, offset_secs: i64) -> String {
        let job = QueueJob::new("work", "j", json!({}), 1);
        backend.enqueue(&job).await.unwrap();
        let mut claimed = backend.claim("work", Utc::now()).await.unwrap().unwrap();
        claimed.state = state;
        claimed.finished_at = Some(Utc::now() + chrono::Duration::seconds(offset_secs));
        backend.finish(&claimed).await.unwrap();
        claimed.id
    }

    #[tokio::test]
    async fn test_finished_jobs_are_capped_oldest_first() {
        let backend = InMemoryQueueBackend::new().with_retention(Retention {
            completed: 2,
            failed: 1,
        });

        let mut completed = Vec::new();
        for offset in 0..4 {
            completed.push(finish_as(&backend, JobState::Completed, offset).await);
        }
        let old_failure = finish_as(&backend, JobState::Failed, 0).await;
        let new_failure = finish_as(&backend, JobState::Failed, 1).await;

        assert_eq!(
            backend.ids_in("work", JobState::Completed).await.unwrap().len(),
            2
        );
        assert!(backend.get("work", &completed[0]).await.unwrap().is_none());
        assert!(backend.get("work", &completed[1]).await.unwrap().is_none());
        assert!(backend.get("work", &completed[3]).await.unwrap().is_some());

        assert_eq!(
            backend.ids_in("work", JobState::Failed).await.unwrap(),
            vec![new_failure]
        );
        assert!(backend.get("work", &old_failure).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retried_job_is_not_trimmed() {
        let backend = InMemoryQueueBackend::new().with_retention(Retention {
            completed: 0,
            failed: 0,
        });
        let job = QueueJob::new("work", "j", json!({}), 3);
        backend.enqueue(&job).await.unwrap();
        let mut claimed = backend.claim("work", Utc::now()).await.unwrap().unwrap();
        claimed.state = JobState::Delayed;
        backend.finish(&claimed).await.unwrap();

        assert!(backend.get("work", &job.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_advance_repeat_requires_unchanged_registration() {
        let backend = InMemoryQueueBackend::new();
        let seen = RepeatRegistration {
            id: "job:1".to_string(),
            queue: "work".to_string(),
            name: "tick".to_string(),
            cron: "*/5 * * * *".to_string(),
            payload: json!({}),
            next_run_at: Some(Utc::now()),
        };
        let later = Some(Utc::now() + chrono::Duration::minutes(5));

        assert!(!backend.advance_repeat(&seen, later).await.unwrap());

        backend.upsert_repeat(&seen).await.unwrap();
        assert!(backend.advance_repeat(&seen, later).await.unwrap());
        assert!(!backend.advance_repeat(&seen, later).await.unwrap());
        assert_eq!(backend.list_repeats("work").await.unwrap()[0].next_run_at, later);
    }
}
