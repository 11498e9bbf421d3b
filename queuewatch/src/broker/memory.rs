//! Provides an in memory implementation of [`Broker`].
//!
//! Currently this is provided for testing and demo purposes and not designed for use in a
//! production system.
//!
//! It is not optimized instead is designed to be a correct implementation for use in a test setup.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::job::{JobId, JobRecord, JobStatus, NewJob};

use super::{Broker, BrokerError, JobRange, QueueStats};

#[derive(Debug, Default)]
struct QueueState {
    jobs: Vec<JobRecord>,
    paused: bool,
}

impl QueueState {
    fn find_mut(&mut self, id: JobId) -> Option<&mut JobRecord> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    fn promote_due(&mut self, now: DateTime<Utc>) {
        self.jobs
            .iter_mut()
            .filter(|job| job.status == JobStatus::Delayed)
            .filter(|job| job.process_after.map_or(true, |at| at <= now))
            .for_each(|job| {
                job.status = JobStatus::Waiting;
                job.process_after = None;
            });
    }

    fn remove(&mut self, id: JobId) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|job| job.id != id);
        self.jobs.len() != before
    }
}

/// An in memory implementation of [`Broker`].
///
/// Queues must be declared up front, either via [`InMemoryBroker::with_queues`] or
/// [`InMemoryBroker::declare`]; operations on undeclared queues fail with
/// [`BrokerError::UnknownQueue`]. A lost connection can be simulated with
/// [`InMemoryBroker::set_offline`].
///
/// **This is not designed for use in a production systems.**
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    queues: Arc<RwLock<HashMap<String, QueueState>>>,
    id_counter: Arc<AtomicU64>,
    offline: Arc<AtomicBool>,
}

impl InMemoryBroker {
    /// Creates a new instance of [`InMemoryBroker`] with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queues<I, S>(queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let broker = Self::new();
        for queue in queues {
            // A freshly created lock cannot be poisoned.
            let _ = broker.declare(queue);
        }
        broker
    }

    pub fn declare(&self, queue: impl Into<String>) -> Result<(), BrokerError> {
        self.queues
            .write()
            .map_err(|_| BrokerError::BadState)?
            .entry(queue.into())
            .or_default();
        Ok(())
    }

    /// While offline every operation fails with [`BrokerError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    fn check_online(&self) -> Result<(), BrokerError> {
        if self.offline.load(Ordering::Relaxed) {
            Err(BrokerError::Unavailable("connection refused".to_owned()))
        } else {
            Ok(())
        }
    }

    fn read_queue<T>(
        &self,
        queue: &str,
        f: impl FnOnce(&QueueState) -> T,
    ) -> Result<T, BrokerError> {
        self.check_online()?;
        let queues = self.queues.read().map_err(|_| BrokerError::BadState)?;
        let state = queues
            .get(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_owned()))?;
        Ok(f(state))
    }

    fn write_queue<T>(
        &self,
        queue: &str,
        f: impl FnOnce(&mut QueueState) -> T,
    ) -> Result<T, BrokerError> {
        self.check_online()?;
        let mut queues = self.queues.write().map_err(|_| BrokerError::BadState)?;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_owned()))?;
        Ok(f(state))
    }

    fn new_record(&self, queue: &str, job: NewJob, now: DateTime<Utc>) -> JobRecord {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let process_after =
            (job.options.delay_ms > 0).then(|| offset(now, job.options.delay_ms as u64));
        JobRecord {
            id: id.into(),
            queue: queue.to_owned(),
            name: job.name,
            payload: job.payload,
            status: if process_after.is_some() {
                JobStatus::Delayed
            } else {
                JobStatus::Waiting
            },
            options: job.options,
            attempts_made: 0,
            failed_reason: None,
            created_at: now,
            process_after,
            processed_at: None,
            finished_at: None,
        }
    }
}

fn offset(now: DateTime<Utc>, millis: u64) -> DateTime<Utc> {
    TimeDelta::from_std(Duration::from_millis(millis))
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl JobRecord {
    fn mark_active(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Active;
        self.attempts_made += 1;
        self.processed_at = Some(now);
    }

    fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.finished_at = Some(now);
    }

    fn mark_failed_attempt(&mut self, reason: String, now: DateTime<Utc>) {
        self.failed_reason = Some(reason);
        if self.attempts_made < self.options.max_attempts {
            match self.options.backoff {
                Some(backoff) => {
                    let delay = backoff.delay(self.attempts_made).as_millis();
                    self.status = JobStatus::Delayed;
                    self.process_after = Some(offset(now, delay.try_into().unwrap_or(u64::MAX)));
                }
                None => self.status = JobStatus::Waiting,
            }
        } else {
            self.status = JobStatus::Failed;
            self.finished_at = Some(now);
        }
    }

    fn mark_retried(&mut self) {
        self.status = JobStatus::Waiting;
        self.attempts_made = 0;
        self.failed_reason = None;
        self.finished_at = None;
        self.process_after = None;
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(&self, queue: &str, job: NewJob) -> Result<JobRecord, BrokerError> {
        let now = Utc::now();
        self.write_queue(queue, |state| {
            let record = self.new_record(queue, job, now);
            state.jobs.push(record.clone());
            record
        })
    }

    async fn enqueue_bulk(
        &self,
        queue: &str,
        jobs: Vec<NewJob>,
    ) -> Result<Vec<JobRecord>, BrokerError> {
        let now = Utc::now();
        self.write_queue(queue, |state| {
            jobs.into_iter()
                .map(|job| {
                    let record = self.new_record(queue, job, now);
                    state.jobs.push(record.clone());
                    record
                })
                .collect()
        })
    }

    async fn job(&self, queue: &str, id: JobId) -> Result<Option<JobRecord>, BrokerError> {
        self.read_queue(queue, |state| {
            state.jobs.iter().find(|job| job.id == id).cloned()
        })
    }

    async fn jobs(
        &self,
        queue: &str,
        statuses: &[JobStatus],
        range: JobRange,
    ) -> Result<Vec<JobRecord>, BrokerError> {
        let matching = self.read_queue(queue, |state| {
            state
                .jobs
                .iter()
                .rev()
                .filter(|job| statuses.is_empty() || statuses.contains(&job.status))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        Ok(range.apply(matching))
    }

    async fn remove(&self, queue: &str, id: JobId) -> Result<bool, BrokerError> {
        self.write_queue(queue, |state| state.remove(id))
    }

    async fn retry(&self, queue: &str, id: JobId) -> Result<bool, BrokerError> {
        self.write_queue(queue, |state| match state.find_mut(id) {
            Some(job) if job.status == JobStatus::Failed => {
                job.mark_retried();
                true
            }
            _ => false,
        })
    }

    async fn promote(&self, queue: &str, id: JobId) -> Result<bool, BrokerError> {
        self.write_queue(queue, |state| match state.find_mut(id) {
            Some(job) if job.status == JobStatus::Delayed => {
                job.status = JobStatus::Waiting;
                job.process_after = None;
                true
            }
            _ => false,
        })
    }

    async fn pause(&self, queue: &str) -> Result<(), BrokerError> {
        self.write_queue(queue, |state| state.paused = true)
    }

    async fn resume(&self, queue: &str) -> Result<(), BrokerError> {
        self.write_queue(queue, |state| state.paused = false)
    }

    async fn clean(
        &self,
        queue: &str,
        grace: Duration,
        status: JobStatus,
        limit: Option<usize>,
    ) -> Result<Vec<JobId>, BrokerError> {
        let cutoff = TimeDelta::from_std(grace)
            .ok()
            .and_then(|grace| Utc::now().checked_sub_signed(grace));
        self.write_queue(queue, |state| {
            let Some(cutoff) = cutoff else {
                return Vec::new();
            };
            let mut candidates = state
                .jobs
                .iter()
                .filter(|job| job.status == status && job.age_reference() <= cutoff)
                .map(|job| (job.age_reference(), job.id))
                .collect::<Vec<_>>();
            candidates.sort();
            let removed = candidates
                .into_iter()
                .take(limit.unwrap_or(usize::MAX))
                .map(|(_, id)| id)
                .collect::<Vec<_>>();
            state.jobs.retain(|job| !removed.contains(&job.id));
            removed
        })
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats, BrokerError> {
        self.read_queue(queue, |state| {
            let mut stats = QueueStats::empty(queue);
            stats.paused = state.paused;
            for job in &state.jobs {
                match job.status {
                    JobStatus::Waiting => stats.waiting += 1,
                    JobStatus::Active => stats.active += 1,
                    JobStatus::Completed => stats.completed += 1,
                    JobStatus::Failed => stats.failed += 1,
                    JobStatus::Delayed => stats.delayed += 1,
                }
            }
            stats
        })
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<JobRecord>, BrokerError> {
        let now = Utc::now();
        self.write_queue(queue, |state| {
            if state.paused {
                return None;
            }
            state.promote_due(now);
            let next = state
                .jobs
                .iter_mut()
                .filter(|job| job.status == JobStatus::Waiting)
                .min_by_key(|job| (job.options.priority, job.id))?;
            next.mark_active(now);
            Some(next.clone())
        })
    }

    async fn ack_completed(&self, queue: &str, id: JobId) -> Result<bool, BrokerError> {
        let now = Utc::now();
        self.write_queue(queue, |state| {
            let Some(job) = state
                .find_mut(id)
                .filter(|job| job.status == JobStatus::Active)
            else {
                return false;
            };
            job.mark_completed(now);
            if job.options.remove_on_complete {
                state.remove(id);
            }
            true
        })
    }

    async fn ack_failed(
        &self,
        queue: &str,
        id: JobId,
        reason: String,
    ) -> Result<bool, BrokerError> {
        let now = Utc::now();
        self.write_queue(queue, |state| {
            let Some(job) = state
                .find_mut(id)
                .filter(|job| job.status == JobStatus::Active)
            else {
                return false;
            };
            job.mark_failed_attempt(reason, now);
            if job.status == JobStatus::Failed && job.options.remove_on_fail {
                state.remove(id);
            }
            true
        })
    }
}

#[cfg(test)]
pub(super) mod test {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{backoff::Backoff, broker_test_suite, job::builder::JobBuilder};

    const QUEUE: &str = "queue";

    broker_test_suite!(for: InMemoryBroker::with_queues([QUEUE]));

    #[tokio::test]
    async fn dequeue_respects_priority_then_insertion_order() {
        let broker = InMemoryBroker::with_queues([QUEUE]);
        let low = broker
            .enqueue(QUEUE, JobBuilder::new("low").with_priority(5).build())
            .await
            .unwrap();
        let first = broker
            .enqueue(QUEUE, JobBuilder::new("first").with_priority(1).build())
            .await
            .unwrap();
        let second = broker
            .enqueue(QUEUE, JobBuilder::new("second").with_priority(1).build())
            .await
            .unwrap();

        let order = [
            broker.dequeue(QUEUE).await.unwrap().unwrap().id,
            broker.dequeue(QUEUE).await.unwrap().unwrap().id,
            broker.dequeue(QUEUE).await.unwrap().unwrap().id,
        ];
        assert_eq!(order, [first.id, second.id, low.id]);
        assert_matches!(broker.dequeue(QUEUE).await, Ok(None));
    }

    #[tokio::test]
    async fn dequeue_marks_job_active() {
        let broker = InMemoryBroker::with_queues([QUEUE]);
        broker
            .enqueue(QUEUE, JobBuilder::new("job").build())
            .await
            .unwrap();

        let job = broker.dequeue(QUEUE).await.unwrap().unwrap();

        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.attempts_made, 1);
        assert!(job.processed_at.is_some());
    }

    #[tokio::test]
    async fn paused_queue_does_not_hand_out_jobs() {
        let broker = InMemoryBroker::with_queues([QUEUE]);
        broker
            .enqueue(QUEUE, JobBuilder::new("job").build())
            .await
            .unwrap();
        broker.pause(QUEUE).await.unwrap();

        assert_matches!(broker.dequeue(QUEUE).await, Ok(None));

        broker.resume(QUEUE).await.unwrap();
        assert_matches!(broker.dequeue(QUEUE).await, Ok(Some(_)));
    }

    #[tokio::test]
    async fn failed_attempt_with_backoff_is_delayed() {
        let broker = InMemoryBroker::with_queues([QUEUE]);
        let record = broker
            .enqueue(
                QUEUE,
                JobBuilder::new("job")
                    .with_max_attempts(2)
                    .with_backoff(Backoff::fixed(60_000))
                    .build(),
            )
            .await
            .unwrap();
        broker.dequeue(QUEUE).await.unwrap().unwrap();

        assert!(broker
            .ack_failed(QUEUE, record.id, "boom".to_owned())
            .await
            .unwrap());

        let job = broker.job(QUEUE, record.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Delayed);
        assert_eq!(job.failed_reason.as_deref(), Some("boom"));
        assert!(job.process_after.unwrap() > Utc::now());
        assert_matches!(broker.dequeue(QUEUE).await, Ok(None));
    }

    #[tokio::test]
    async fn failed_attempt_without_backoff_is_waiting() {
        let broker = InMemoryBroker::with_queues([QUEUE]);
        let record = broker
            .enqueue(
                QUEUE,
                JobBuilder::new("job")
                    .with_max_attempts(2)
                    .without_backoff()
                    .build(),
            )
            .await
            .unwrap();
        broker.dequeue(QUEUE).await.unwrap().unwrap();
        broker
            .ack_failed(QUEUE, record.id, "boom".to_owned())
            .await
            .unwrap();

        let job = broker.dequeue(QUEUE).await.unwrap().unwrap();
        assert_eq!(job.id, record.id);
        assert_eq!(job.attempts_made, 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_the_job() {
        let broker = InMemoryBroker::with_queues([QUEUE]);
        let record = broker
            .enqueue(QUEUE, JobBuilder::new("job").with_max_attempts(1).build())
            .await
            .unwrap();
        broker.dequeue(QUEUE).await.unwrap().unwrap();
        broker
            .ack_failed(QUEUE, record.id, "boom".to_owned())
            .await
            .unwrap();

        let job = broker.job(QUEUE, record.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn remove_on_complete() {
        let broker = InMemoryBroker::with_queues([QUEUE]);
        let record = broker
            .enqueue(
                QUEUE,
                JobBuilder::new("job").remove_on_complete(true).build(),
            )
            .await
            .unwrap();
        broker.dequeue(QUEUE).await.unwrap().unwrap();

        assert!(broker.ack_completed(QUEUE, record.id).await.unwrap());
        assert_matches!(broker.job(QUEUE, record.id).await, Ok(None));
    }

    #[tokio::test]
    async fn ack_requires_active_job() {
        let broker = InMemoryBroker::with_queues([QUEUE]);
        let record = broker
            .enqueue(QUEUE, JobBuilder::new("job").build())
            .await
            .unwrap();

        assert_matches!(broker.ack_completed(QUEUE, record.id).await, Ok(false));
        assert_matches!(
            broker.ack_failed(QUEUE, record.id, "boom".to_owned()).await,
            Ok(false)
        );
    }

    #[tokio::test]
    async fn offline_broker_is_unavailable() {
        let broker = InMemoryBroker::with_queues([QUEUE]);
        broker.set_offline(true);

        assert_matches!(broker.stats(QUEUE).await, Err(BrokerError::Unavailable(_)));
        assert_matches!(
            broker.enqueue(QUEUE, JobBuilder::new("job").build()).await,
            Err(BrokerError::Unavailable(_))
        );

        broker.set_offline(false);
        assert_matches!(broker.stats(QUEUE).await, Ok(_));
    }

    #[tokio::test]
    async fn badstate_errors() {
        let broker = InMemoryBroker::with_queues([QUEUE]);
        tokio::task::spawn({
            let broker = broker.clone();
            async move {
                let _guard = broker.queues.write();
                panic!()
            }
        })
        .await
        .unwrap_err();

        assert_matches!(broker.stats(QUEUE).await, Err(BrokerError::BadState));
        assert_matches!(
            broker.enqueue(QUEUE, JobBuilder::new("job").build()).await,
            Err(BrokerError::BadState)
        );
        assert_matches!(broker.declare("other"), Err(BrokerError::BadState));
    }
}
