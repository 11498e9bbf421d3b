//! A typed handle over a single named queue of the broker.
use std::{fmt::Debug, sync::Arc, time::Duration};

use tracing::instrument;

use crate::{
    broker::{Broker, BrokerError, JobRange, QueueStats},
    job::{JobHandle, JobId, JobOptions, JobRecord, JobStatus, NewJob},
    QueueWatchError, Result,
};

/// Forwards every call to the broker for one named queue.
///
/// The gateway keeps no state of its own. Job options are validated before a request reaches
/// the broker, broker failures surface as [`QueueWatchError::QueueUnavailable`] naming the queue
/// and operation, and missing jobs are reported as `None`/`false` rather than errors.
#[derive(Clone)]
pub struct JobQueueGateway {
    name: String,
    broker: Arc<dyn Broker>,
}

impl Debug for JobQueueGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueueGateway")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl JobQueueGateway {
    pub fn new(name: impl Into<String>, broker: Arc<dyn Broker>) -> Self {
        Self {
            name: name.into(),
            broker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn unavailable(&self, operation: &'static str) -> impl FnOnce(BrokerError) -> QueueWatchError + '_ {
        move |source| {
            tracing::error!(
                queue = %self.name,
                operation,
                ?source,
                "Broker call {operation} failed for queue {}: {source}",
                self.name
            );
            QueueWatchError::QueueUnavailable {
                queue: self.name.clone(),
                operation,
                source,
            }
        }
    }

    #[instrument(skip(self, payload, options), fields(queue = %self.name))]
    pub async fn enqueue(
        &self,
        job_name: String,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobHandle> {
        let job = NewJob {
            name: job_name,
            payload,
            options,
        };
        job.validate().inspect_err(|err| {
            tracing::warn!(?err, "Rejected job {} for queue {}: {err}", job.name, self.name)
        })?;
        let record = self
            .broker
            .enqueue(&self.name, job)
            .await
            .map_err(self.unavailable("enqueue"))?;
        tracing::debug!(job_id = %record.id, "Enqueued job {} as {}", record.name, record.id);
        Ok(record.handle())
    }

    /// Enqueues all jobs in one broker call. Every job is validated first, so either all jobs
    /// are sent or none are.
    #[instrument(skip(self, jobs), fields(queue = %self.name, count = jobs.len()))]
    pub async fn enqueue_bulk(&self, jobs: Vec<NewJob>) -> Result<Vec<JobHandle>> {
        for job in &jobs {
            job.validate().inspect_err(|err| {
                tracing::warn!(?err, "Rejected bulk enqueue for queue {}: {err}", self.name)
            })?;
        }
        let records = self
            .broker
            .enqueue_bulk(&self.name, jobs)
            .await
            .map_err(self.unavailable("enqueue_bulk"))?;
        tracing::debug!("Enqueued {} jobs", records.len());
        Ok(records.iter().map(JobRecord::handle).collect())
    }

    pub async fn job(&self, id: JobId) -> Result<Option<JobRecord>> {
        self.broker
            .job(&self.name, id)
            .await
            .map_err(self.unavailable("job"))
    }

    pub async fn jobs(&self, statuses: &[JobStatus], range: JobRange) -> Result<Vec<JobRecord>> {
        self.broker
            .jobs(&self.name, statuses, range)
            .await
            .map_err(self.unavailable("jobs"))
    }

    pub async fn remove(&self, id: JobId) -> Result<bool> {
        let removed = self
            .broker
            .remove(&self.name, id)
            .await
            .map_err(self.unavailable("remove"))?;
        tracing::debug!(queue = %self.name, job_id = %id, removed, "Remove job {id}");
        Ok(removed)
    }

    /// Retries a failed job. Returns `false` if the job does not exist or has not failed.
    pub async fn retry(&self, id: JobId) -> Result<bool> {
        let retried = self
            .broker
            .retry(&self.name, id)
            .await
            .map_err(self.unavailable("retry"))?;
        tracing::debug!(queue = %self.name, job_id = %id, retried, "Retry job {id}");
        Ok(retried)
    }

    /// Moves a delayed job to waiting. Returns `false` if the job does not exist or is not
    /// delayed.
    pub async fn promote(&self, id: JobId) -> Result<bool> {
        let promoted = self
            .broker
            .promote(&self.name, id)
            .await
            .map_err(self.unavailable("promote"))?;
        tracing::debug!(queue = %self.name, job_id = %id, promoted, "Promote job {id}");
        Ok(promoted)
    }

    pub async fn pause(&self) -> Result<()> {
        self.broker
            .pause(&self.name)
            .await
            .map_err(self.unavailable("pause"))?;
        tracing::info!(queue = %self.name, "Paused queue {}", self.name);
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        self.broker
            .resume(&self.name)
            .await
            .map_err(self.unavailable("resume"))?;
        tracing::info!(queue = %self.name, "Resumed queue {}", self.name);
        Ok(())
    }

    /// Removes up to `limit` jobs in `status` older than `grace`, returning the removed ids.
    ///
    /// Finding nothing to clean is a success with an empty result.
    pub async fn clean(
        &self,
        grace: Duration,
        status: JobStatus,
        limit: Option<usize>,
    ) -> Result<Vec<JobId>> {
        let removed = self
            .broker
            .clean(&self.name, grace, status, limit)
            .await
            .map_err(self.unavailable("clean"))?;
        tracing::info!(
            queue = %self.name,
            %status,
            removed = removed.len(),
            "Cleaned {} {status} jobs from queue {}",
            removed.len(),
            self.name
        );
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let stats = self
            .broker
            .stats(&self.name)
            .await
            .map_err(self.unavailable("stats"))?;
        tracing::trace!(queue = %self.name, ?stats, "Fetched stats");
        Ok(stats)
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::{
        broker::{memory::InMemoryBroker, MockBroker},
        job::{builder::JobBuilder, ValidationError},
    };

    fn gateway(broker: impl Broker + 'static) -> JobQueueGateway {
        JobQueueGateway::new("email", Arc::new(broker))
    }

    #[tokio::test]
    async fn enqueue() {
        let gateway = gateway(InMemoryBroker::with_queues(["email"]));

        let handle = gateway
            .enqueue("welcome".to_owned(), json!({ "to": "a@b.c" }), JobOptions::default())
            .await
            .unwrap();

        assert_eq!(handle.queue, "email");
        assert_eq!(handle.name, "welcome");
        let job = gateway.job(handle.id).await.unwrap().unwrap();
        assert_eq!(job.payload, json!({ "to": "a@b.c" }));
    }

    #[tokio::test]
    async fn invalid_options_never_reach_the_broker() {
        let mut broker = MockBroker::new();
        broker.expect_enqueue().never();
        let gateway = gateway(broker);

        let result = gateway
            .enqueue(
                "welcome".to_owned(),
                json!(null),
                JobOptions {
                    timeout_ms: Some(-5),
                    ..Default::default()
                },
            )
            .await;

        assert_matches!(
            result,
            Err(QueueWatchError::Validation(ValidationError::Timeout(-5)))
        );
    }

    #[tokio::test]
    async fn invalid_bulk_job_rejects_the_whole_batch() {
        let mut broker = MockBroker::new();
        broker.expect_enqueue_bulk().never();
        let gateway = gateway(broker);

        let result = gateway
            .enqueue_bulk(vec![
                JobBuilder::new("ok").build(),
                JobBuilder::new("bad").with_max_attempts(0).build(),
            ])
            .await;

        assert_matches!(
            result,
            Err(QueueWatchError::Validation(ValidationError::MaxAttempts))
        );
    }

    #[tokio::test]
    async fn broker_failure_names_queue_and_operation() {
        let mut broker = MockBroker::new();
        broker
            .expect_stats()
            .times(1)
            .returning(|_| Err(BrokerError::Unavailable("connection reset".to_owned())));
        let gateway = gateway(broker);

        let result = gateway.stats().await;

        assert_matches!(
            result,
            Err(QueueWatchError::QueueUnavailable {
                ref queue,
                operation: "stats",
                source: BrokerError::Unavailable(_),
            }) if queue == "email"
        );
    }

    #[tokio::test]
    async fn unknown_queue_is_unavailable() {
        let gateway = gateway(InMemoryBroker::with_queues(["reports"]));

        assert_matches!(
            gateway.pause().await,
            Err(QueueWatchError::QueueUnavailable {
                operation: "pause",
                source: BrokerError::UnknownQueue(_),
                ..
            })
        );
    }

    #[tokio::test]
    async fn missing_jobs_are_not_errors() {
        let gateway = gateway(InMemoryBroker::with_queues(["email"]));

        assert_matches!(gateway.job(7.into()).await, Ok(None));
        assert_matches!(gateway.retry(7.into()).await, Ok(false));
        assert_matches!(gateway.promote(7.into()).await, Ok(false));
        assert_matches!(gateway.remove(7.into()).await, Ok(false));
    }

    #[tokio::test]
    async fn clean_without_completed_jobs_succeeds() {
        let gateway = gateway(InMemoryBroker::with_queues(["email"]));
        JobBuilder::new("welcome").enqueue(&gateway).await.unwrap();

        let removed = gateway
            .clean(
                Duration::from_millis(3_600_000),
                JobStatus::Completed,
                Some(100),
            )
            .await
            .unwrap();

        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn enqueue_bulk_and_list() {
        let gateway = gateway(InMemoryBroker::with_queues(["email"]));

        let handles = gateway
            .enqueue_bulk(vec![
                JobBuilder::new("first").build(),
                JobBuilder::new("second").with_delay_ms(60_000).build(),
            ])
            .await
            .unwrap();
        assert_eq!(handles.len(), 2);

        let delayed = gateway
            .jobs(&[JobStatus::Delayed], JobRange::default())
            .await
            .unwrap();
        assert_eq!(delayed.len(), 1);
        assert_eq!(delayed[0].id, handles[1].id);

        assert!(gateway.promote(handles[1].id).await.unwrap());
        assert_eq!(gateway.stats().await.unwrap().waiting, 2);
    }

    #[tokio::test]
    async fn list_with_unbounded_end() {
        let gateway = gateway(InMemoryBroker::with_queues(["email"]));
        for name in ["first", "second"] {
            JobBuilder::new(name).enqueue(&gateway).await.unwrap();
        }

        let jobs = gateway
            .jobs(&[], JobRange::new(0, Some(usize::MAX)))
            .await
            .unwrap();

        assert_eq!(jobs.len(), 2);
    }
}
