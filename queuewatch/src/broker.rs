//! The contract this crate expects from the external job queue broker.
//!
//! The broker owns durable job state. Everything in this crate is a monitoring and control layer
//! over the primitives exposed by [`Broker`]: enqueueing, lookups by id and status, lifecycle
//! transitions, pausing, cleaning and point-in-time statistics.
//!
//! [`memory::InMemoryBroker`] is a correct (but not optimized) implementation for tests and
//! demos. Implementors of other brokers can run the shared conformance tests with
//! [`crate::broker_test_suite`].
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{JobId, JobRecord, JobStatus, NewJob};

pub mod memory;
#[doc(hidden)]
pub mod testing;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    async fn enqueue(&self, queue: &str, job: NewJob) -> Result<JobRecord, BrokerError>;
    async fn enqueue_bulk(
        &self,
        queue: &str,
        jobs: Vec<NewJob>,
    ) -> Result<Vec<JobRecord>, BrokerError>;
    async fn job(&self, queue: &str, id: JobId) -> Result<Option<JobRecord>, BrokerError>;
    async fn jobs(
        &self,
        queue: &str,
        statuses: &[JobStatus],
        range: JobRange,
    ) -> Result<Vec<JobRecord>, BrokerError>;
    /// Returns `false` when no job with the given id exists.
    async fn remove(&self, queue: &str, id: JobId) -> Result<bool, BrokerError>;
    /// Moves a failed job back to waiting. Returns `false` when the job is not in the failed
    /// state.
    async fn retry(&self, queue: &str, id: JobId) -> Result<bool, BrokerError>;
    /// Moves a delayed job to waiting immediately. Returns `false` when the job is not delayed.
    async fn promote(&self, queue: &str, id: JobId) -> Result<bool, BrokerError>;
    async fn pause(&self, queue: &str) -> Result<(), BrokerError>;
    async fn resume(&self, queue: &str) -> Result<(), BrokerError>;
    /// Removes up to `limit` jobs in the given status older than `grace`, returning their ids.
    async fn clean(
        &self,
        queue: &str,
        grace: Duration,
        status: JobStatus,
        limit: Option<usize>,
    ) -> Result<Vec<JobId>, BrokerError>;
    async fn stats(&self, queue: &str) -> Result<QueueStats, BrokerError>;
    /// Hands the next waiting job to a worker, marking it active. Returns `None` when the queue
    /// is paused or has nothing ready.
    async fn dequeue(&self, queue: &str) -> Result<Option<JobRecord>, BrokerError>;
    /// Acknowledges an active job as completed. Returns `false` when the job is not active.
    async fn ack_completed(&self, queue: &str, id: JobId) -> Result<bool, BrokerError>;
    /// Acknowledges an active job as failed. The broker either schedules a retry or moves the
    /// job to failed once its attempts are exhausted. Returns `false` when the job is not active.
    async fn ack_failed(&self, queue: &str, id: JobId, reason: String)
        -> Result<bool, BrokerError>;
}

/// A point-in-time snapshot of a queue's job counts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub name: String,
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: bool,
}

impl QueueStats {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// All jobs known to the broker for this queue.
    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed + self.delayed
    }
}

/// An index range over the jobs matching a listing, `end` inclusive.
///
/// The default range covers every matching job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobRange {
    pub start: usize,
    pub end: Option<usize>,
}

impl JobRange {
    pub const fn new(start: usize, end: Option<usize>) -> Self {
        Self { start, end }
    }

    pub(crate) fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let take = match self.end {
            Some(end) if end < self.start => 0,
            Some(end) => (end - self.start).saturating_add(1),
            None => usize::MAX,
        };
        items.into_iter().skip(self.start).take(take).collect()
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
    #[error("Queue {0} is not known to the broker")]
    UnknownQueue(String),
    #[error("Error encoding or decoding data")]
    EncodeDecodeError(#[from] serde_json::Error),
    #[error("System in bad state")]
    BadState,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stats_total() {
        let stats = QueueStats {
            name: "email".to_owned(),
            waiting: 1,
            active: 2,
            completed: 3,
            failed: 4,
            delayed: 5,
            paused: true,
        };
        assert_eq!(stats.total(), 15);
    }

    #[test]
    fn range_apply() {
        let items = vec![0, 1, 2, 3, 4];
        assert_eq!(JobRange::default().apply(items.clone()), items);
        assert_eq!(JobRange::new(1, Some(2)).apply(items.clone()), vec![1, 2]);
        assert_eq!(JobRange::new(3, None).apply(items.clone()), vec![3, 4]);
        assert_eq!(JobRange::new(3, Some(1)).apply(items.clone()), Vec::<i32>::new());
        assert_eq!(JobRange::new(0, Some(usize::MAX)).apply(items.clone()), items);
        assert_eq!(JobRange::new(2, Some(usize::MAX)).apply(items), vec![2, 3, 4]);
    }
}
