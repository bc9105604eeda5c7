//! Source worker
//!
//! Each invocation advances a run by one step of the external-job state
//! machine and, unless the run is finished, re-enqueues itself with the
//! updated polling state as payload:
//!
//! - nothing outstanding: submit a search, check back after the slow delay
//! - outstanding and still running: check back after the slow delay
//! - outstanding and done with a full page: dispatch the items, submit the
//!   next search from the new cursor, check back after the fast delay
//! - outstanding and done with a short page: dispatch the items, finish the run
//! - outstanding and failed or timed out: fail the run
//!
//! A full page is taken to mean the source has more data. That holds only
//! while the source keeps its page size stable; a source that shrinks pages
//! mid-stream ends the run early and the remainder is picked up by the next
//! firing from the recorded cursor.

use async_trait::async_trait;
use chrono::Utc;
use conveyor_core::domain::job::JobDefinition;
use conveyor_core::domain::pipeline::ExecutionContext;
use conveyor_core::domain::run::{JobRun, RunStatus};
use conveyor_core::domain::source::{
    AsyncSourceJobProgress, AsyncSourceJobStatus, ResumablePollingState, SourceItem,
    SourceRequest,
};
use conveyor_core::dto::queue::{
    PIPELINE_EXECUTION_QUEUE, PIPELINE_ITEM_JOB, PipelineExecutionPayload, SOURCE_QUERY_JOB,
    SOURCE_QUERY_QUEUE, SourceQueryPayload,
};
use conveyor_core::{Error, Result};
use conveyor_lua::{Plugin, SourcePlugin};
use conveyor_queue::{JobOptions, JobProcessor, JobQueueService, QueueJob};
use conveyor_store::StateSync;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::encode;
use crate::plugin::PluginProvider;
use crate::service::hydrator::{self, SecretProvider};

#[derive(Debug, Clone)]
pub struct PollingOptions {
    /// Delay after a full page, when more data is expected right away
    pub fast_poll_delay: Duration,
    /// Delay while an external job runs or right after submitting one
    pub slow_poll_delay: Duration,
    /// Pipeline jobs enqueued concurrently per page
    pub dispatch_concurrency: usize,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            fast_poll_delay: Duration::from_secs(60),
            slow_poll_delay: Duration::from_secs(300),
            dispatch_concurrency: 10,
        }
    }
}

/// Result of one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub run_id: Uuid,
    pub state: ResumablePollingState,
    /// Delay of the follow-up invocation; `None` once the run is finished
    pub next_poll: Option<Duration>,
}

/// Where an invocation sits in its queue job's attempt budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// Id of the run this invocation starts; retries of the same queue job
    /// see the same id and resume that run
    pub run_id: Uuid,
    /// No retry follows a failure of this attempt
    pub is_final: bool,
}

impl Attempt {
    pub fn of(job: &QueueJob) -> Self {
        Self {
            run_id: Uuid::parse_str(&job.id).unwrap_or_else(|_| Uuid::new_v4()),
            is_final: !job.can_retry(),
        }
    }

    /// A one-shot invocation outside the queue's retry loop
    pub fn single() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            is_final: true,
        }
    }
}

pub struct SourceWorker {
    plugins: Arc<dyn PluginProvider>,
    state: StateSync,
    queue: JobQueueService,
    secrets: Arc<dyn SecretProvider>,
    options: PollingOptions,
}

impl SourceWorker {
    pub fn new(
        plugins: Arc<dyn PluginProvider>,
        state: StateSync,
        queue: JobQueueService,
        secrets: Arc<dyn SecretProvider>,
        options: PollingOptions,
    ) -> Self {
        Self {
            plugins,
            state,
            queue,
            secrets,
            options,
        }
    }

    /// Handles one source-query invocation that will not be retried
    pub async fn poll(&self, payload: SourceQueryPayload) -> Result<Option<PollOutcome>> {
        self.poll_attempt(payload, Attempt::single()).await
    }

    /// Handles one source-query invocation
    ///
    /// Returns `None` when there is nothing to do: the job is gone, a new
    /// firing arrived for a paused job, or the run already ended. A failure
    /// marks the run failed only on the final attempt; earlier failures leave
    /// it running for the retry to resume.
    pub async fn poll_attempt(
        &self,
        payload: SourceQueryPayload,
        attempt: Attempt,
    ) -> Result<Option<PollOutcome>> {
        let Some(job) = self.state.durable().get_job(payload.job_id).await? else {
            warn!(job_id = %payload.job_id, "Job definition no longer exists, dropping source query");
            return Ok(None);
        };

        let mut run = match payload.run_id {
            Some(run_id) => match self.state.run(job.id, run_id).await? {
                Some(run) if run.status.is_terminal() => {
                    info!(job_id = %job.id, %run_id, status = ?run.status, "Run already ended, polling stops");
                    return Ok(None);
                }
                Some(run) => run,
                None => return Err(Error::NotFound(format!("run {}", run_id))),
            },
            None => match self.state.run(job.id, attempt.run_id).await? {
                Some(run) if run.status.is_terminal() => {
                    info!(job_id = %job.id, run_id = %run.id, status = ?run.status, "Run already ended, polling stops");
                    return Ok(None);
                }
                Some(run) => {
                    info!(job_id = %job.id, run_id = %run.id, "Resuming run after a failed attempt");
                    run
                }
                None => {
                    if !job.is_active() {
                        info!(job_id = %job.id, "Job is paused, skipping firing");
                        return Ok(None);
                    }
                    let run = JobRun::start_with_id(attempt.run_id, job.id);
                    self.state.start_run(&run, job.status).await?;
                    info!(job_id = %job.id, run_id = %run.id, "Run started");
                    run
                }
            },
        };

        let polling = match payload.resumable_polling_state {
            Some(polling) => polling,
            None => ResumablePollingState {
                latest_processed_cursor: self.state.durable().latest_run_cursor(job.id).await?,
                ..ResumablePollingState::default()
            },
        };

        match self.advance(&job, &mut run, polling).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(err) if attempt.is_final => {
                self.fail_run(&job, &mut run, &err).await;
                Err(err)
            }
            Err(err) => {
                warn!(job_id = %job.id, run_id = %run.id, "Run step failed, will retry: {}", err);
                if let Err(e) = self.state.cache_error(job.id, Some(run.id), &err.to_string()).await {
                    warn!(job_id = %job.id, "Failed to cache run error: {}", e);
                }
                Err(err)
            }
        }
    }

    async fn advance(
        &self,
        job: &JobDefinition,
        run: &mut JobRun,
        polling: ResumablePollingState,
    ) -> Result<PollOutcome> {
        let config = hydrator::hydrate(&job.source_config, &job.pipeline.secrets, self.secrets.as_ref())?;
        let source = self
            .plugins
            .resolve_source(&job.source_plugin, job.source_version.as_deref(), &config)
            .await?;

        let outcome = self.step(source.as_ref(), job, run, polling).await;

        if let Err(e) = source.shutdown().await {
            warn!(plugin = %job.source_plugin, "Source shutdown failed: {}", e);
        }
        outcome
    }

    async fn step(
        &self,
        source: &dyn SourcePlugin,
        job: &JobDefinition,
        run: &mut JobRun,
        mut polling: ResumablePollingState,
    ) -> Result<PollOutcome> {
        let Some(mut progress) = polling.current_async_job.take() else {
            let external_id = self.submit(source, job, &polling).await?;
            polling.current_async_job = Some(AsyncSourceJobProgress::submitted(external_id));
            return self
                .reschedule(job, run, polling, self.options.slow_poll_delay)
                .await;
        };

        let status = source.status(&progress.external_job_id).await?;
        progress.status = status.status;
        progress.last_checked_at = Some(Utc::now());

        match status.status {
            AsyncSourceJobStatus::Done => {
                let page = source.results(&progress.external_job_id).await?;
                let dispatched = self.dispatch(job, run.id, &polling, &page.items).await?;
                polling.items_dispatched += dispatched;
                run.items_discovered += dispatched;
                if page.cursor.is_some() {
                    polling.latest_processed_cursor = page.cursor.clone();
                }
                run.final_cursor = polling.latest_processed_cursor.clone();

                info!(
                    job_id = %job.id,
                    run_id = %run.id,
                    external_job_id = %progress.external_job_id,
                    items = dispatched,
                    full_page = page.is_full(),
                    "Source page processed"
                );

                if page.is_full() {
                    if !self.state.save_running_run(run, job.status).await? {
                        return Ok(self.ended_elsewhere(job, run, polling));
                    }
                    let external_id = self.submit(source, job, &polling).await?;
                    polling.current_async_job = Some(AsyncSourceJobProgress::submitted(external_id));
                    return self
                        .reschedule(job, run, polling, self.options.fast_poll_delay)
                        .await;
                }

                run.status = RunStatus::Completed;
                run.completed_at = Some(Utc::now());
                if !self.state.save_running_run(run, job.status).await? {
                    return Ok(self.ended_elsewhere(job, run, polling));
                }
                info!(
                    job_id = %job.id,
                    run_id = %run.id,
                    items = run.items_discovered,
                    "Run completed"
                );
                Ok(PollOutcome {
                    run_id: run.id,
                    state: polling,
                    next_poll: None,
                })
            }
            AsyncSourceJobStatus::Error | AsyncSourceJobStatus::Timeout => {
                let reason = status.message.unwrap_or_else(|| "no reason given".to_string());
                Err(Error::Execution(format!(
                    "external job {} ended with status {:?}: {}",
                    progress.external_job_id, status.status, reason
                )))
            }
            AsyncSourceJobStatus::Submitted
            | AsyncSourceJobStatus::Pending
            | AsyncSourceJobStatus::Processing => {
                debug!(
                    job_id = %job.id,
                    external_job_id = %progress.external_job_id,
                    status = ?progress.status,
                    "External job still running"
                );
                polling.current_async_job = Some(progress);
                self.reschedule(job, run, polling, self.options.slow_poll_delay)
                    .await
            }
        }
    }

    async fn submit(
        &self,
        source: &dyn SourcePlugin,
        job: &JobDefinition,
        polling: &ResumablePollingState,
    ) -> Result<String> {
        let request = SourceRequest {
            search: job.source_search.clone(),
            cursor: polling.latest_processed_cursor.clone(),
        };
        let external_id = source.submit(&request).await?;
        debug!(job_id = %job.id, %external_id, cursor = ?request.cursor, "External job submitted");
        Ok(external_id)
    }

    /// Upserts every item and enqueues one pipeline job per item
    ///
    /// The upsert is bookkeeping: items seen by an earlier run are
    /// dispatched again.
    async fn dispatch(
        &self,
        job: &JobDefinition,
        run_id: Uuid,
        polling: &ResumablePollingState,
        items: &[SourceItem],
    ) -> Result<u64> {
        let first_index = polling.items_dispatched;
        let pending: Vec<_> = items
            .iter()
            .enumerate()
            .map(|(offset, item)| self.dispatch_item(job, run_id, first_index + offset as u64, item))
            .collect();
        let results: Vec<Result<()>> = stream::iter(pending)
            .buffer_unordered(self.options.dispatch_concurrency.max(1))
            .collect()
            .await;
        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(items.len() as u64)
    }

    async fn dispatch_item(
        &self,
        job: &JobDefinition,
        run_id: Uuid,
        item_index: u64,
        item: &SourceItem,
    ) -> Result<()> {
        let first_seen = self
            .state
            .durable()
            .upsert_source_item(job.id, run_id, item)
            .await?;
        if !first_seen {
            debug!(job_id = %job.id, external_id = %item.external_id, "Item seen before");
        }

        let payload = PipelineExecutionPayload {
            run_id,
            external_id: Some(item.external_id.clone()),
            item_payload: item.payload.clone(),
            context: ExecutionContext {
                run_id,
                item_index,
                source_job_id: job.id,
                secrets: job.pipeline.secrets.clone(),
            },
        };
        self.queue
            .add(
                PIPELINE_EXECUTION_QUEUE,
                PIPELINE_ITEM_JOB,
                encode(&payload)?,
                JobOptions::default(),
            )
            .await?;
        Ok(())
    }

    async fn reschedule(
        &self,
        job: &JobDefinition,
        run: &JobRun,
        polling: ResumablePollingState,
        delay: Duration,
    ) -> Result<PollOutcome> {
        let stored = self.state.durable().get_run(run.id).await?;
        if stored.is_none_or(|stored| stored.status.is_terminal()) {
            return Ok(self.ended_elsewhere(job, run, polling));
        }

        let payload = SourceQueryPayload {
            job_id: job.id,
            run_id: Some(run.id),
            resumable_polling_state: Some(polling.clone()),
        };
        self.queue
            .add(
                SOURCE_QUERY_QUEUE,
                SOURCE_QUERY_JOB,
                encode(&payload)?,
                JobOptions::delayed(delay),
            )
            .await?;

        debug!(job_id = %job.id, run_id = %run.id, ?delay, "Source query rescheduled");
        Ok(PollOutcome {
            run_id: run.id,
            state: polling,
            next_poll: Some(delay),
        })
    }

    /// Outcome for a run cancelled or finished by someone else mid-poll
    fn ended_elsewhere(
        &self,
        job: &JobDefinition,
        run: &JobRun,
        polling: ResumablePollingState,
    ) -> PollOutcome {
        info!(job_id = %job.id, run_id = %run.id, "Run ended during poll, polling stops");
        PollOutcome {
            run_id: run.id,
            state: polling,
            next_poll: None,
        }
    }

    async fn fail_run(&self, job: &JobDefinition, run: &mut JobRun, err: &Error) {
        error!(job_id = %job.id, run_id = %run.id, "Run failed: {}", err);

        run.status = RunStatus::Failed;
        run.error = Some(err.to_string());
        run.completed_at = Some(Utc::now());
        match self.state.save_running_run(run, job.status).await {
            Ok(true) => {}
            Ok(false) => debug!(run_id = %run.id, "Run already ended, failure not recorded"),
            Err(e) => error!(run_id = %run.id, "Failed to record run failure: {}", e),
        }
        if let Err(e) = self.state.cache_error(job.id, Some(run.id), &err.to_string()).await {
            warn!(job_id = %job.id, "Failed to cache run error: {}", e);
        }
    }
}

#[async_trait]
impl JobProcessor for SourceWorker {
    async fn process(&self, job: &QueueJob) -> Result<()> {
        let payload: SourceQueryPayload = job
            .payload_as()
            .map_err(|e| Error::Queue(format!("malformed source-query payload: {}", e)))?;
        self.poll_attempt(payload, Attempt::of(job)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginLoader;
    use crate::service::SecretSet;
    use crate::test_support;
    use conveyor_core::domain::job::JobStatus;
    use conveyor_core::domain::pipeline::{ExecutionMode, PipelineDefinition, StepDefinition};
    use conveyor_core::domain::source::SourcePage;
    use conveyor_lua::SourceStatus;
    use conveyor_queue::{InMemoryQueueBackend, JobState};
    use conveyor_store::{DurableStore, InMemoryDurableStore, InMemoryFastStore};
    use serde_json::json;

    /// Source whose external job finishes with a full page, while the run
    /// gets cancelled from the outside as soon as its status is checked
    struct CancelledWhilePolling {
        state: StateSync,
        job_id: Uuid,
        run_id: Uuid,
    }

    #[async_trait]
    impl Plugin for CancelledWhilePolling {
        fn id(&self) -> &str {
            "native-source"
        }

        async fn initialize(&self, _config: &serde_json::Value) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, input: &serde_json::Value) -> Result<Option<serde_json::Value>> {
            Ok(Some(input.clone()))
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl SourcePlugin for CancelledWhilePolling {
        async fn submit(&self, _request: &SourceRequest) -> Result<String> {
            Ok("job-next".to_string())
        }

        async fn status(&self, _external_job_id: &str) -> Result<SourceStatus> {
            let mut run = self
                .state
                .run(self.job_id, self.run_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("run {}", self.run_id)))?;
            run.status = RunStatus::Cancelled;
            run.completed_at = Some(Utc::now());
            self.state.save_run(&run, JobStatus::Active).await?;
            Ok(SourceStatus {
                status: AsyncSourceJobStatus::Done,
                message: None,
            })
        }

        async fn results(&self, _external_job_id: &str) -> Result<SourcePage> {
            Ok(SourcePage {
                items: vec![SourceItem {
                    external_id: "a".to_string(),
                    payload: json!({"text": "alpha"}),
                }],
                page_size: 1,
                cursor: Some("c1".to_string()),
            })
        }
    }

    struct Fixture {
        worker: SourceWorker,
        durable: Arc<InMemoryDurableStore>,
        state: StateSync,
        queue: JobQueueService,
        job: JobDefinition,
    }

    async fn fixture() -> Fixture {
        let durable = Arc::new(InMemoryDurableStore::new());
        let state = StateSync::new(durable.clone(), Arc::new(InMemoryFastStore::new()));
        let queue = JobQueueService::new(
            Arc::new(InMemoryQueueBackend::new()),
            &[SOURCE_QUERY_QUEUE, PIPELINE_EXECUTION_QUEUE],
        );
        let loader = PluginLoader::new(test_support::registry(), Arc::new(test_support::fetcher()));

        let now = Utc::now();
        let job = JobDefinition {
            id: Uuid::new_v4(),
            name: "feed".to_string(),
            schedule: None,
            source_plugin: "feed".to_string(),
            source_version: None,
            source_config: json!({}),
            source_search: json!({"q": "rust"}),
            pipeline: PipelineDefinition {
                id: Uuid::new_v4(),
                name: "shout".to_string(),
                steps: vec![StepDefinition {
                    step_id: "up".to_string(),
                    plugin_id: "uppercase".to_string(),
                    plugin_version: None,
                    config: json!({"prefix": ""}),
                }],
                secrets: vec!["API_TOKEN".to_string()],
                mode: ExecutionMode::Sequential,
            },
            status: JobStatus::Active,
            created_at: now,
            updated_at: now,
        };
        durable.insert_job(&job).await.unwrap();

        let worker = SourceWorker::new(
            Arc::new(loader),
            state.clone(),
            queue.clone(),
            Arc::new(SecretSet::new()),
            PollingOptions::default(),
        );
        Fixture {
            worker,
            durable,
            state,
            queue,
            job,
        }
    }

    fn continuation(job_id: Uuid, outcome: &PollOutcome) -> SourceQueryPayload {
        SourceQueryPayload {
            job_id,
            run_id: Some(outcome.run_id),
            resumable_polling_state: Some(outcome.state.clone()),
        }
    }

    async fn queued(f: &Fixture, queue: &str) -> Vec<QueueJob> {
        let mut jobs = f.queue.jobs_in(queue, JobState::Waiting).await.unwrap();
        jobs.extend(f.queue.jobs_in(queue, JobState::Delayed).await.unwrap());
        jobs
    }

    #[tokio::test]
    async fn test_full_page_then_empty_page() {
        let f = fixture().await;
        let options = PollingOptions::default();

        // First invocation submits and backs off
        let first = f.worker.poll(SourceQueryPayload::new_run(f.job.id)).await.unwrap().unwrap();
        assert_eq!(first.next_poll, Some(options.slow_poll_delay));
        let outstanding = first.state.current_async_job.clone().unwrap();
        assert_eq!(outstanding.external_job_id, "job-start");
        assert_eq!(outstanding.status, AsyncSourceJobStatus::Submitted);

        // The queued continuation carries exactly that state
        let queued_first = queued(&f, SOURCE_QUERY_QUEUE).await;
        assert_eq!(queued_first.len(), 1);
        let payload: SourceQueryPayload = queued_first[0].payload_as().unwrap();
        assert_eq!(payload, continuation(f.job.id, &first));

        // Full page: items dispatched, next search submitted from the new cursor
        let second = f.worker.poll(payload).await.unwrap().unwrap();
        assert_eq!(second.next_poll, Some(options.fast_poll_delay));
        assert_eq!(second.state.items_dispatched, 2);
        assert_eq!(second.state.latest_processed_cursor.as_deref(), Some("c1"));
        assert_eq!(
            second.state.current_async_job.as_ref().unwrap().external_job_id,
            "job-c1"
        );

        // Empty page: polling stops
        let third = f.worker.poll(continuation(f.job.id, &second)).await.unwrap().unwrap();
        assert_eq!(third.next_poll, None);
        assert!(third.state.current_async_job.is_none());

        assert_eq!(queued(&f, SOURCE_QUERY_QUEUE).await.len(), 2);
        assert_eq!(f.durable.source_item_upserts(f.job.id, "a"), 1);
        assert_eq!(f.durable.source_item_upserts(f.job.id, "b"), 1);

        let items = queued(&f, PIPELINE_EXECUTION_QUEUE).await;
        let mut indexes: Vec<u64> = items
            .iter()
            .map(|j| j.payload_as::<PipelineExecutionPayload>().unwrap().context.item_index)
            .collect();
        indexes.sort();
        assert_eq!(indexes, vec![0, 1]);

        let run = f.state.run(f.job.id, first.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.items_discovered, 2);
        assert_eq!(run.final_cursor.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_new_run_resumes_from_last_cursor() {
        let f = fixture().await;
        let mut previous = JobRun::start(f.job.id);
        previous.status = RunStatus::Completed;
        previous.final_cursor = Some("c9".to_string());
        f.durable.insert_run(&previous).await.unwrap();

        let outcome = f.worker.poll(SourceQueryPayload::new_run(f.job.id)).await.unwrap().unwrap();
        assert_eq!(outcome.state.latest_processed_cursor.as_deref(), Some("c9"));
        assert_eq!(
            outcome.state.current_async_job.unwrap().external_job_id,
            "job-c9"
        );
    }

    #[tokio::test]
    async fn test_running_external_job_backs_off() {
        let f = fixture().await;
        let run = JobRun::start(f.job.id);
        f.state.start_run(&run, JobStatus::Active).await.unwrap();

        let payload = SourceQueryPayload {
            job_id: f.job.id,
            run_id: Some(run.id),
            resumable_polling_state: Some(ResumablePollingState {
                current_async_job: Some(AsyncSourceJobProgress::submitted("job-slow")),
                ..ResumablePollingState::default()
            }),
        };
        let outcome = f.worker.poll(payload).await.unwrap().unwrap();

        assert_eq!(outcome.next_poll, Some(PollingOptions::default().slow_poll_delay));
        let progress = outcome.state.current_async_job.unwrap();
        assert_eq!(progress.status, AsyncSourceJobStatus::Processing);
        assert!(progress.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_external_job_fails_the_run() {
        let f = fixture().await;
        let run = JobRun::start(f.job.id);
        f.state.start_run(&run, JobStatus::Active).await.unwrap();

        let payload = SourceQueryPayload {
            job_id: f.job.id,
            run_id: Some(run.id),
            resumable_polling_state: Some(ResumablePollingState {
                current_async_job: Some(AsyncSourceJobProgress::submitted("job-broken")),
                ..ResumablePollingState::default()
            }),
        };
        let err = f.worker.poll(payload).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));

        let stored = f.state.run(f.job.id, run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert!(stored.error.unwrap().contains("quota exceeded"));
        assert!(f.state.cached_error(f.job.id).await.unwrap().is_some());
        assert!(queued(&f, SOURCE_QUERY_QUEUE).await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_before_last_attempt_leaves_run_running() {
        let f = fixture().await;
        let run = JobRun::start(f.job.id);
        f.state.start_run(&run, JobStatus::Active).await.unwrap();

        let payload = SourceQueryPayload {
            job_id: f.job.id,
            run_id: Some(run.id),
            resumable_polling_state: Some(ResumablePollingState {
                current_async_job: Some(AsyncSourceJobProgress::submitted("job-broken")),
                ..ResumablePollingState::default()
            }),
        };
        let early = Attempt {
            run_id: Uuid::new_v4(),
            is_final: false,
        };
        f.worker.poll_attempt(payload.clone(), early).await.unwrap_err();

        let stored = f.state.run(f.job.id, run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);
        assert!(f.state.cached_error(f.job.id).await.unwrap().is_some());

        // The retry still finds a live run to work on
        let last = Attempt {
            is_final: true,
            ..early
        };
        f.worker.poll_attempt(payload, last).await.unwrap_err();
        let stored = f.state.run(f.job.id, run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_retried_first_invocation_resumes_its_run() {
        let f = fixture().await;
        let mut down = f.job.clone();
        down.source_search = json!({"q": "down"});
        f.durable.update_job(&down).await.unwrap();

        let mut delivery = QueueJob::new(
            SOURCE_QUERY_QUEUE,
            SOURCE_QUERY_JOB,
            encode(&SourceQueryPayload::new_run(f.job.id)).unwrap(),
            3,
        );
        delivery.attempts_made = 1;
        let err = f.worker.process(&delivery).await.unwrap_err();
        assert!(err.to_string().contains("search backend down"));

        let runs = f.durable.list_runs(f.job.id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Running);
        assert_eq!(runs[0].id, Attempt::of(&delivery).run_id);

        delivery.attempts_made = 3;
        f.worker.process(&delivery).await.unwrap_err();

        let runs = f.durable.list_runs(f.job.id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_cancelled_during_poll_stays_cancelled() {
        let f = fixture().await;
        let run = JobRun::start(f.job.id);
        f.state.start_run(&run, JobStatus::Active).await.unwrap();

        let mut native = f.job.clone();
        native.source_plugin = "native-source".to_string();
        f.durable.update_job(&native).await.unwrap();

        let (state, job_id, run_id) = (f.state.clone(), f.job.id, run.id);
        let plugins = test_support::NativePlugins::new().with_source("native-source", move || {
            Box::new(CancelledWhilePolling {
                state: state.clone(),
                job_id,
                run_id,
            })
        });
        let worker = SourceWorker::new(
            Arc::new(plugins),
            f.state.clone(),
            f.queue.clone(),
            Arc::new(SecretSet::new()),
            PollingOptions::default(),
        );

        let payload = SourceQueryPayload {
            job_id: f.job.id,
            run_id: Some(run.id),
            resumable_polling_state: Some(ResumablePollingState {
                current_async_job: Some(AsyncSourceJobProgress::submitted("job-start")),
                ..ResumablePollingState::default()
            }),
        };
        let outcome = worker.poll(payload).await.unwrap().unwrap();
        assert_eq!(outcome.next_poll, None);

        let stored = f.durable.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Cancelled);
        let live = f.state.run(f.job.id, run.id).await.unwrap().unwrap();
        assert_eq!(live.status, RunStatus::Cancelled);
        assert!(queued(&f, SOURCE_QUERY_QUEUE).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_polling() {
        let f = fixture().await;
        let mut run = JobRun::start(f.job.id);
        f.state.start_run(&run, JobStatus::Active).await.unwrap();
        run.status = RunStatus::Cancelled;
        f.state.save_run(&run, JobStatus::Active).await.unwrap();

        let payload = SourceQueryPayload {
            job_id: f.job.id,
            run_id: Some(run.id),
            resumable_polling_state: Some(ResumablePollingState::default()),
        };
        assert!(f.worker.poll(payload).await.unwrap().is_none());
        assert!(queued(&f, SOURCE_QUERY_QUEUE).await.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_job_is_dropped() {
        let f = fixture().await;
        f.durable.delete_job(f.job.id).await.unwrap();
        assert!(f.worker.poll(SourceQueryPayload::new_run(f.job.id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_paused_job_starts_no_run() {
        let f = fixture().await;
        let mut paused = f.job.clone();
        paused.status = JobStatus::Paused;
        f.durable.update_job(&paused).await.unwrap();

        assert!(f.worker.poll(SourceQueryPayload::new_run(f.job.id)).await.unwrap().is_none());
        assert!(f.durable.list_runs(f.job.id, 10).await.unwrap().is_empty());
    }
}
