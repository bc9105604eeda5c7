//! Orphan reconciliation
//!
//! A registration is an orphan when its job no longer exists, is paused, or
//! has lost its schedule. Those can be left behind by a crash between the
//! durable write and the registration change.

use conveyor_core::dto::queue::{SOURCE_QUERY_QUEUE, job_id_from_registration};
use conveyor_core::Result;
use conveyor_queue::RepeatRegistration;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::lifecycle::LifecycleManager;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileFailure {
    pub registration_id: String,
    pub error: String,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub inspected: usize,
    pub removed: Vec<String>,
    pub failures: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.removed.is_empty() && self.failures.is_empty()
    }
}

impl LifecycleManager {
    /// Removes every orphaned registration
    ///
    /// Per-registration failures are collected in the report and the sweep
    /// moves on. Only a failure to list registrations aborts it.
    pub async fn reconcile_orphans(&self) -> Result<ReconcileReport> {
        let registrations = self.queue().list_scheduled(SOURCE_QUERY_QUEUE).await?;
        let mut report = ReconcileReport {
            inspected: registrations.len(),
            ..ReconcileReport::default()
        };

        for registration in registrations {
            match self.is_orphan(&registration).await {
                Ok(false) => {}
                Ok(true) => match self
                    .queue()
                    .remove_scheduled(SOURCE_QUERY_QUEUE, &registration.id)
                    .await
                {
                    Ok(_) => {
                        info!(registration = %registration.id, "Orphaned registration removed");
                        report.removed.push(registration.id);
                    }
                    Err(e) => report.failures.push(ReconcileFailure {
                        registration_id: registration.id,
                        error: e.to_string(),
                    }),
                },
                Err(e) => report.failures.push(ReconcileFailure {
                    registration_id: registration.id,
                    error: e.to_string(),
                }),
            }
        }

        for failure in &report.failures {
            warn!(registration = %failure.registration_id, "Reconciliation failed: {}", failure.error);
        }
        info!(
            inspected = report.inspected,
            removed = report.removed.len(),
            failures = report.failures.len(),
            "Reconciliation sweep finished"
        );
        Ok(report)
    }

    async fn is_orphan(&self, registration: &RepeatRegistration) -> Result<bool> {
        let Some(job_id) = embedded_job_id(registration) else {
            warn!(registration = %registration.id, "Registration carries no job id");
            return Ok(true);
        };

        Ok(match self.state().durable().get_job(job_id).await? {
            Some(job) => !job.wants_registration(),
            None => true,
        })
    }
}

/// Job id from the registration id, falling back to the payload
fn embedded_job_id(registration: &RepeatRegistration) -> Option<Uuid> {
    job_id_from_registration(&registration.id).or_else(|| {
        registration
            .payload
            .get("jobId")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_request, manager};
    use conveyor_core::domain::job::JobStatus;
    use conveyor_core::dto::queue::{SOURCE_QUERY_JOB, SourceQueryPayload, registration_id};
    use serde_json::json;

    #[tokio::test]
    async fn test_deleted_job_leaves_no_orphan() {
        let manager = manager();
        let job = manager
            .create_with_scheduling(create_request(Some("*/5 * * * *")))
            .await
            .unwrap();
        manager.delete_with_cleanup(job.id).await.unwrap();

        let report = manager.reconcile_orphans().await.unwrap();
        assert!(report.is_clean());
        assert!(!report.removed.contains(&registration_id(job.id)));
    }

    #[tokio::test]
    async fn test_orphans_are_removed() {
        let manager = manager();
        let kept = manager
            .create_with_scheduling(create_request(Some("*/5 * * * *")))
            .await
            .unwrap();
        let paused = manager
            .create_with_scheduling(create_request(Some("*/5 * * * *")))
            .await
            .unwrap();

        // Simulate crashes that left registrations behind
        let mut status = paused.clone();
        status.status = JobStatus::Paused;
        manager.state().durable().update_job(&status).await.unwrap();

        let ghost = Uuid::new_v4();
        manager
            .queue()
            .upsert_scheduled(
                SOURCE_QUERY_QUEUE,
                &registration_id(ghost),
                SOURCE_QUERY_JOB,
                "*/5 * * * *",
                serde_json::to_value(SourceQueryPayload::new_run(ghost)).unwrap(),
            )
            .await
            .unwrap();

        let report = manager.reconcile_orphans().await.unwrap();
        assert_eq!(report.inspected, 3);
        assert!(report.failures.is_empty());

        let mut removed = report.removed.clone();
        removed.sort();
        let mut expected = vec![registration_id(paused.id), registration_id(ghost)];
        expected.sort();
        assert_eq!(removed, expected);

        let left = manager.queue().list_scheduled(SOURCE_QUERY_QUEUE).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, registration_id(kept.id));
    }

    #[test]
    fn test_job_id_falls_back_to_payload() {
        let id = Uuid::new_v4();
        let registration = RepeatRegistration {
            id: "legacy-name".to_string(),
            queue: SOURCE_QUERY_QUEUE.to_string(),
            name: SOURCE_QUERY_JOB.to_string(),
            cron: "*/5 * * * *".to_string(),
            payload: json!({ "jobId": id }),
            next_run_at: None,
        };
        assert_eq!(embedded_job_id(&registration), Some(id));
    }
}
