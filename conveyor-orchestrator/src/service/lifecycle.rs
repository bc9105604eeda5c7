//! Job Lifecycle Manager
//!
//! Keeps queue registrations consistent with job definitions. Every write
//! to a definition goes through here so that:
//! - an active scheduled job has exactly one repeating registration
//! - an active unscheduled job gets one immediate run when it is created or
//!   loses its schedule
//! - a paused or deleted job has no registration left behind

use chrono::Utc;
use conveyor_core::domain::job::{JobDefinition, JobStatus};
use conveyor_core::domain::run::{JobLiveState, JobRun, RunStatus};
use conveyor_core::dto::job::{CreateJobDefinition, UpdateJobDefinition};
use conveyor_core::dto::queue::{
    SOURCE_QUERY_JOB, SOURCE_QUERY_QUEUE, SourceQueryPayload, registration_id,
};
use conveyor_core::{Error, Result};
use conveyor_queue::schedule::parse_cron;
use conveyor_queue::{JobOptions, JobQueueService, QueueJob};
use conveyor_store::StateSync;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct LifecycleManager {
    state: StateSync,
    queue: JobQueueService,
    immediate_run_delay: Duration,
}

impl LifecycleManager {
    pub fn new(state: StateSync, queue: JobQueueService, immediate_run_delay: Duration) -> Self {
        Self {
            state,
            queue,
            immediate_run_delay,
        }
    }

    pub fn state(&self) -> &StateSync {
        &self.state
    }

    pub fn queue(&self) -> &JobQueueService {
        &self.queue
    }

    /// Persists a new job definition and schedules it
    pub async fn create_with_scheduling(&self, req: CreateJobDefinition) -> Result<JobDefinition> {
        validate_definition(&req.name, &req.source_plugin, req.schedule.as_deref())?;

        let now = Utc::now();
        let job = JobDefinition {
            id: Uuid::new_v4(),
            name: req.name,
            schedule: req.schedule,
            source_plugin: req.source_plugin,
            source_version: req.source_version,
            source_config: req.source_config,
            source_search: req.source_search,
            pipeline: req.pipeline,
            status: req.status.unwrap_or(JobStatus::Active),
            created_at: now,
            updated_at: now,
        };

        self.state.durable().insert_job(&job).await?;
        info!(job_id = %job.id, name = %job.name, schedule = ?job.schedule, "Job created");

        self.admit(&job).await?;
        self.publish_status(&job).await;
        Ok(job)
    }

    /// Applies a partial update and reconciles the job's registration
    ///
    /// - schedule changed: the old registration is removed, then the
    ///   create-time rule applies
    /// - paused to active: the job is admitted again
    /// - active to paused: the registration is removed
    pub async fn update_with_scheduling(
        &self,
        job_id: Uuid,
        req: UpdateJobDefinition,
    ) -> Result<JobDefinition> {
        let existing = self.require_job(job_id).await?;

        let mut job = existing.clone();
        if let Some(name) = req.name {
            job.name = name;
        }
        if let Some(schedule) = req.schedule {
            job.schedule = schedule;
        }
        if let Some(source_plugin) = req.source_plugin {
            job.source_plugin = source_plugin;
        }
        if let Some(source_version) = req.source_version {
            job.source_version = source_version;
        }
        if let Some(source_config) = req.source_config {
            job.source_config = source_config;
        }
        if let Some(source_search) = req.source_search {
            job.source_search = source_search;
        }
        if let Some(pipeline) = req.pipeline {
            job.pipeline = pipeline;
        }
        if let Some(status) = req.status {
            job.status = status;
        }
        validate_definition(&job.name, &job.source_plugin, job.schedule.as_deref())?;
        job.updated_at = Utc::now();

        if !self.state.durable().update_job(&job).await? {
            return Err(Error::NotFound(format!("job {}", job_id)));
        }
        info!(job_id = %job.id, "Job updated");

        let schedule_changed = job.schedule != existing.schedule;
        let activated = !existing.is_active() && job.is_active();
        let deactivated = existing.is_active() && !job.is_active();

        if schedule_changed {
            self.unregister(job.id).await?;
            self.admit(&job).await?;
        } else if activated {
            self.admit(&job).await?;
        } else if deactivated {
            self.unregister(job.id).await?;
        }

        if existing.status != job.status {
            self.publish_status(&job).await;
        }
        Ok(job)
    }

    /// Removes a job and everything derived from it
    ///
    /// Order: registration, then fast-store keys, then the durable record.
    /// The durable delete is the irreversible step, so a failed delete can
    /// be retried from the start. Returns whether the durable record existed.
    pub async fn delete_with_cleanup(&self, job_id: Uuid) -> Result<bool> {
        self.unregister(job_id).await?;

        let purged = self.state.purge_job(job_id).await?;
        debug!(%job_id, keys = purged, "Live state purged");

        let deleted = self.state.durable().delete_job(job_id).await?;
        if deleted {
            info!(%job_id, "Job deleted");
        } else {
            warn!(%job_id, "Job was already gone, cleanup completed anyway");
        }
        Ok(deleted)
    }

    /// Enqueues one immediate run of an active job
    pub async fn trigger_now(&self, job_id: Uuid) -> Result<QueueJob> {
        let job = self.require_job(job_id).await?;
        if !job.is_active() {
            return Err(Error::Configuration(format!("job {} is paused", job_id)));
        }
        self.enqueue_immediate(&job).await
    }

    /// Marks a running run as cancelled
    ///
    /// Advisory: jobs already dispatched for the run see the status and skip
    /// their work. Cancelling a run that already ended leaves it as is.
    pub async fn cancel_run(&self, job_id: Uuid, run_id: Uuid) -> Result<JobRun> {
        let job = self.require_job(job_id).await?;
        let Some(mut run) = self.state.run(job_id, run_id).await? else {
            return Err(Error::NotFound(format!("run {}", run_id)));
        };

        if run.status.is_terminal() {
            debug!(%job_id, %run_id, status = ?run.status, "Run already ended, nothing to cancel");
            return Ok(run);
        }

        run.status = RunStatus::Cancelled;
        run.completed_at = Some(Utc::now());
        self.state.save_run(&run, job.status).await?;
        info!(%job_id, %run_id, "Run cancelled");
        Ok(run)
    }

    async fn require_job(&self, job_id: Uuid) -> Result<JobDefinition> {
        self.state
            .durable()
            .get_job(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    /// Create-time rule: a scheduled job gets a repeating registration, an
    /// unscheduled one a single immediate run. Paused jobs get neither.
    async fn admit(&self, job: &JobDefinition) -> Result<()> {
        if !job.is_active() {
            debug!(job_id = %job.id, "Job is paused, not scheduling");
            return Ok(());
        }

        match &job.schedule {
            Some(cron) => {
                let payload = encode(&SourceQueryPayload::new_run(job.id))?;
                self.queue
                    .upsert_scheduled(
                        SOURCE_QUERY_QUEUE,
                        &registration_id(job.id),
                        SOURCE_QUERY_JOB,
                        cron,
                        payload,
                    )
                    .await?;
            }
            None => {
                self.enqueue_immediate(job).await?;
            }
        }
        Ok(())
    }

    async fn enqueue_immediate(&self, job: &JobDefinition) -> Result<QueueJob> {
        let queued = self
            .queue
            .add(
                SOURCE_QUERY_QUEUE,
                SOURCE_QUERY_JOB,
                encode(&SourceQueryPayload::new_run(job.id))?,
                JobOptions::delayed(self.immediate_run_delay),
            )
            .await?;
        info!(job_id = %job.id, queue_job = %queued.id, "Immediate run enqueued");
        Ok(queued)
    }

    async fn unregister(&self, job_id: Uuid) -> Result<bool> {
        Ok(self
            .queue
            .remove_scheduled(SOURCE_QUERY_QUEUE, &registration_id(job_id))
            .await?)
    }

    /// Reflects the job's status in its live state
    async fn publish_status(&self, job: &JobDefinition) {
        let live = match self.state.job_state(job.id).await {
            Ok(Some(mut live)) => {
                live.job_status = job.status;
                live.updated_at = Utc::now();
                live
            }
            Ok(None) => JobLiveState {
                job_id: job.id,
                job_status: job.status,
                current_run: None,
                run_status: None,
                items_discovered: 0,
                last_error: None,
                updated_at: Utc::now(),
            },
            Err(e) => {
                warn!(job_id = %job.id, "Live state unreadable, not publishing status: {}", e);
                return;
            }
        };
        if let Err(e) = self.state.publish_job_state(&live).await {
            warn!(job_id = %job.id, "Failed to publish job status: {}", e);
        }
    }
}

fn validate_definition(name: &str, source_plugin: &str, schedule: Option<&str>) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Configuration("job name must not be empty".to_string()));
    }
    if source_plugin.trim().is_empty() {
        return Err(Error::Configuration("source plugin must not be empty".to_string()));
    }
    if let Some(cron) = schedule {
        parse_cron(cron)?;
    }
    Ok(())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| Error::Queue(format!("cannot encode payload: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_request, manager};
    use conveyor_core::ApiStatus;
    use conveyor_queue::JobState;

    async fn queued_runs(manager: &LifecycleManager) -> Vec<QueueJob> {
        let mut jobs = manager
            .queue()
            .jobs_in(SOURCE_QUERY_QUEUE, JobState::Waiting)
            .await
            .unwrap();
        jobs.extend(
            manager
                .queue()
                .jobs_in(SOURCE_QUERY_QUEUE, JobState::Delayed)
                .await
                .unwrap(),
        );
        jobs
    }

    async fn registrations(manager: &LifecycleManager) -> Vec<String> {
        manager
            .queue()
            .list_scheduled(SOURCE_QUERY_QUEUE)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    #[tokio::test]
    async fn test_scheduled_job_is_registered() {
        let manager = manager();
        let job = manager
            .create_with_scheduling(create_request(Some("*/5 * * * *")))
            .await
            .unwrap();

        assert_eq!(registrations(&manager).await, vec![registration_id(job.id)]);
        assert!(queued_runs(&manager).await.is_empty());

        let live = manager.state().job_state(job.id).await.unwrap().unwrap();
        assert_eq!(live.job_status, JobStatus::Active);
    }

    #[tokio::test]
    async fn test_unscheduled_job_runs_once() {
        let manager = manager();
        let job = manager.create_with_scheduling(create_request(None)).await.unwrap();

        assert!(registrations(&manager).await.is_empty());
        let runs = queued_runs(&manager).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].state, JobState::Delayed);
        let payload: SourceQueryPayload = runs[0].payload_as().unwrap();
        assert_eq!(payload, SourceQueryPayload::new_run(job.id));
    }

    #[tokio::test]
    async fn test_clearing_schedule_emits_one_immediate_run() {
        let manager = manager();
        let job = manager
            .create_with_scheduling(create_request(Some("*/5 * * * *")))
            .await
            .unwrap();

        let update = UpdateJobDefinition {
            schedule: Some(None),
            ..UpdateJobDefinition::default()
        };
        let updated = manager.update_with_scheduling(job.id, update).await.unwrap();

        assert_eq!(updated.schedule, None);
        assert!(registrations(&manager).await.is_empty());
        assert_eq!(queued_runs(&manager).await.len(), 1);
    }

    #[tokio::test]
    async fn test_changing_schedule_replaces_registration() {
        let manager = manager();
        let job = manager
            .create_with_scheduling(create_request(Some("*/5 * * * *")))
            .await
            .unwrap();

        let update = UpdateJobDefinition {
            schedule: Some(Some("0 * * * *".to_string())),
            ..UpdateJobDefinition::default()
        };
        manager.update_with_scheduling(job.id, update).await.unwrap();

        let scheduled = manager.queue().list_scheduled(SOURCE_QUERY_QUEUE).await.unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].cron, "0 * * * *");
        assert!(queued_runs(&manager).await.is_empty());
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let manager = manager();
        let job = manager
            .create_with_scheduling(create_request(Some("*/5 * * * *")))
            .await
            .unwrap();

        let pause = UpdateJobDefinition {
            status: Some(JobStatus::Paused),
            ..UpdateJobDefinition::default()
        };
        manager.update_with_scheduling(job.id, pause).await.unwrap();
        assert!(registrations(&manager).await.is_empty());
        let live = manager.state().job_state(job.id).await.unwrap().unwrap();
        assert_eq!(live.job_status, JobStatus::Paused);

        let resume = UpdateJobDefinition {
            status: Some(JobStatus::Active),
            ..UpdateJobDefinition::default()
        };
        manager.update_with_scheduling(job.id, resume).await.unwrap();
        assert_eq!(registrations(&manager).await, vec![registration_id(job.id)]);
    }

    #[tokio::test]
    async fn test_paused_job_created_without_registration() {
        let manager = manager();
        let mut req = create_request(Some("*/5 * * * *"));
        req.status = Some(JobStatus::Paused);
        manager.create_with_scheduling(req).await.unwrap();

        assert!(registrations(&manager).await.is_empty());
        assert!(queued_runs(&manager).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_definition_is_not_persisted() {
        let manager = manager();
        let err = manager
            .create_with_scheduling(create_request(Some("every tuesday")))
            .await
            .unwrap_err();
        assert_eq!(err.api_status(), ApiStatus::Validation);
        assert!(manager.state().durable().list_jobs().await.unwrap().is_empty());

        let mut nameless = create_request(None);
        nameless.name = "  ".to_string();
        assert!(manager.create_with_scheduling(nameless).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_cleans_registration_and_live_state() {
        let manager = manager();
        let job = manager
            .create_with_scheduling(create_request(Some("*/5 * * * *")))
            .await
            .unwrap();
        let run = JobRun::start(job.id);
        manager.state().start_run(&run, job.status).await.unwrap();

        assert!(manager.delete_with_cleanup(job.id).await.unwrap());
        assert!(registrations(&manager).await.is_empty());
        assert!(manager.state().job_state(job.id).await.unwrap().is_none());
        assert!(manager.state().durable().get_job(job.id).await.unwrap().is_none());

        // A retried delete still succeeds
        assert!(!manager.delete_with_cleanup(job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_unknown_job_is_not_found() {
        let manager = manager();
        let err = manager
            .update_with_scheduling(Uuid::new_v4(), UpdateJobDefinition::default())
            .await
            .unwrap_err();
        assert_eq!(err.api_status(), ApiStatus::NotFound);
    }

    #[tokio::test]
    async fn test_trigger_now() {
        let manager = manager();
        let job = manager
            .create_with_scheduling(create_request(Some("*/5 * * * *")))
            .await
            .unwrap();

        let queued = manager.trigger_now(job.id).await.unwrap();
        assert_eq!(queued.queue, SOURCE_QUERY_QUEUE);
        assert_eq!(queued_runs(&manager).await.len(), 1);

        let pause = UpdateJobDefinition {
            status: Some(JobStatus::Paused),
            ..UpdateJobDefinition::default()
        };
        manager.update_with_scheduling(job.id, pause).await.unwrap();
        assert!(manager.trigger_now(job.id).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_run() {
        let manager = manager();
        let job = manager
            .create_with_scheduling(create_request(Some("*/5 * * * *")))
            .await
            .unwrap();
        let run = JobRun::start(job.id);
        manager.state().start_run(&run, job.status).await.unwrap();

        let cancelled = manager.cancel_run(job.id, run.id).await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());

        let durable = manager.state().durable().get_run(run.id).await.unwrap().unwrap();
        assert_eq!(durable.status, RunStatus::Cancelled);
        let live = manager.state().job_state(job.id).await.unwrap().unwrap();
        assert_eq!(live.run_status, Some(RunStatus::Cancelled));

        // Cancelling again is a no-op
        let again = manager.cancel_run(job.id, run.id).await.unwrap();
        assert_eq!(again.completed_at, cancelled.completed_at);
    }
}
