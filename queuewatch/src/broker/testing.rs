//! Test suite for ensuring a correct implementation of a broker.
//!
//! Every test expects the broker under test to have a declared, empty queue named [`QUEUE`].
use std::time::Duration;

use crate::job::{builder::JobBuilder, JobRecord};

use super::*;

pub const QUEUE: &str = "queue";

/// Create test suite for a [`Broker`] implementation.
///
/// For broker implementors, it is useful to include this as part of your test suites.
///
/// # Example
///
/// ```
/// use queuewatch::broker_test_suite;
/// use queuewatch::broker::{memory::InMemoryBroker, testing::QUEUE};
/// broker_test_suite!(for: InMemoryBroker::with_queues([QUEUE]));
/// ```
///
/// If you using a different async test attribute you can configure the macro to use that
/// instead:
///
/// ```ignore
/// broker_test_suite!(
///     attr: my_runtime::test,
///     args: (),
///     broker: RedisBroker::connect(url).await.unwrap()
/// );
/// ```
#[macro_export]
macro_rules! broker_test_suite {
    (for: $broker:expr) => {
        $crate::broker_test_suite!(attr: tokio::test, args: (), broker: $broker);
    };
    (attr: $attr:meta, args: $args:tt, broker: $broker:expr) => {
        #[$attr]
        async fn enqueue $args {
          let broker = $broker;
          $crate::broker::testing::enqueue(broker).await;
        }
        #[$attr]
        async fn enqueue_delayed $args {
          let broker = $broker;
          $crate::broker::testing::enqueue_delayed(broker).await;
        }
        #[$attr]
        async fn enqueue_bulk $args {
          let broker = $broker;
          $crate::broker::testing::enqueue_bulk(broker).await;
        }
        #[$attr]
        async fn enqueue_unknown_queue $args {
          let broker = $broker;
          $crate::broker::testing::enqueue_unknown_queue(broker).await;
        }
        #[$attr]
        async fn job_not_found $args {
          let broker = $broker;
          $crate::broker::testing::job_not_found(broker).await;
        }
        #[$attr]
        async fn jobs_by_status $args {
          let broker = $broker;
          $crate::broker::testing::jobs_by_status(broker).await;
        }
        #[$attr]
        async fn jobs_in_range $args {
          let broker = $broker;
          $crate::broker::testing::jobs_in_range(broker).await;
        }
        #[$attr]
        async fn remove $args {
          let broker = $broker;
          $crate::broker::testing::remove(broker).await;
        }
        #[$attr]
        async fn remove_not_found $args {
          let broker = $broker;
          $crate::broker::testing::remove_not_found(broker).await;
        }
        #[$attr]
        async fn retry_failed $args {
          let broker = $broker;
          $crate::broker::testing::retry_failed(broker).await;
        }
        #[$attr]
        async fn retry_not_failed $args {
          let broker = $broker;
          $crate::broker::testing::retry_not_failed(broker).await;
        }
        #[$attr]
        async fn promote_delayed $args {
          let broker = $broker;
          $crate::broker::testing::promote_delayed(broker).await;
        }
        #[$attr]
        async fn promote_not_delayed $args {
          let broker = $broker;
          $crate::broker::testing::promote_not_delayed(broker).await;
        }
        #[$attr]
        async fn pause_and_resume $args {
          let broker = $broker;
          $crate::broker::testing::pause_and_resume(broker).await;
        }
        #[$attr]
        async fn clean_without_matching_jobs $args {
          let broker = $broker;
          $crate::broker::testing::clean_without_matching_jobs(broker).await;
        }
        #[$attr]
        async fn clean_respects_grace_and_limit $args {
          let broker = $broker;
          $crate::broker::testing::clean_respects_grace_and_limit(broker).await;
        }
        #[$attr]
        async fn stats $args {
          let broker = $broker;
          $crate::broker::testing::stats(broker).await;
        }
    };
}

/// Helpers for driving jobs through their lifecycle in tests.
#[async_trait]
pub trait BrokerTesting: Broker {
    async fn enqueue_named(&self, name: &str) -> JobRecord {
        self.enqueue(QUEUE, JobBuilder::new(name).build())
            .await
            .unwrap()
    }

    /// Runs the next waiting job to completion.
    async fn complete_next(&self) -> JobRecord {
        let job = self.dequeue(QUEUE).await.unwrap().unwrap();
        assert!(self.ack_completed(QUEUE, job.id).await.unwrap());
        self.job(QUEUE, job.id).await.unwrap().unwrap()
    }

    /// Runs the next waiting job until it fails permanently.
    async fn fail_next(&self) -> JobRecord {
        let job = self.dequeue(QUEUE).await.unwrap().unwrap();
        let mut id = job.id;
        loop {
            assert!(self
                .ack_failed(QUEUE, id, "Error Message".to_owned())
                .await
                .unwrap());
            let job = self.job(QUEUE, id).await.unwrap().unwrap();
            if job.status == JobStatus::Failed {
                return job;
            }
            self.promote(QUEUE, id).await.unwrap();
            id = self.dequeue(QUEUE).await.unwrap().unwrap().id;
        }
    }
}

impl<T: Broker> BrokerTesting for T {}

#[doc(hidden)]
pub async fn enqueue(broker: impl BrokerTesting) {
    let job1 = broker.enqueue_named("job").await;
    let job2 = broker.enqueue_named("job").await;

    assert_ne!(job1.id, job2.id);
    assert_eq!(job1.status, JobStatus::Waiting);
    assert_eq!(job1.queue, QUEUE);
    assert_eq!(broker.job(QUEUE, job1.id).await.unwrap(), Some(job1));
    assert!(broker.job(QUEUE, job2.id).await.unwrap().is_some());
}

#[doc(hidden)]
pub async fn enqueue_delayed(broker: impl BrokerTesting) {
    let job = broker
        .enqueue(QUEUE, JobBuilder::new("job").with_delay_ms(60_000).build())
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Delayed);
    assert!(broker.dequeue(QUEUE).await.unwrap().is_none());
}

#[doc(hidden)]
pub async fn enqueue_bulk(broker: impl BrokerTesting) {
    let jobs = broker
        .enqueue_bulk(
            QUEUE,
            vec![
                JobBuilder::new("first").build(),
                JobBuilder::new("second").build(),
            ],
        )
        .await
        .unwrap();

    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].name, "first");
    assert_eq!(jobs[1].name, "second");
    assert_eq!(broker.stats(QUEUE).await.unwrap().waiting, 2);
}

#[doc(hidden)]
pub async fn enqueue_unknown_queue(broker: impl BrokerTesting) {
    assert!(matches!(
        broker
            .enqueue("not-a-queue", JobBuilder::new("job").build())
            .await,
        Err(BrokerError::UnknownQueue(_))
    ));
}

#[doc(hidden)]
pub async fn job_not_found(broker: impl BrokerTesting) {
    assert!(matches!(broker.job(QUEUE, 4242.into()).await, Ok(None)));
}

#[doc(hidden)]
pub async fn jobs_by_status(broker: impl BrokerTesting) {
    broker.enqueue_named("complete").await;
    let waiting = broker.enqueue_named("waiting").await;
    let completed = broker.complete_next().await;

    let jobs = broker
        .jobs(QUEUE, &[JobStatus::Completed], JobRange::default())
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, completed.id);

    let jobs = broker
        .jobs(QUEUE, &[JobStatus::Waiting], JobRange::default())
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, waiting.id);

    let jobs = broker
        .jobs(QUEUE, &[], JobRange::default())
        .await
        .unwrap();
    assert_eq!(jobs.len(), 2);
}

#[doc(hidden)]
pub async fn jobs_in_range(broker: impl BrokerTesting) {
    for _ in 0..5 {
        broker.enqueue_named("job").await;
    }

    let jobs = broker
        .jobs(QUEUE, &[JobStatus::Waiting], JobRange::new(1, Some(2)))
        .await
        .unwrap();
    assert_eq!(jobs.len(), 2);

    let jobs = broker
        .jobs(QUEUE, &[JobStatus::Waiting], JobRange::new(4, None))
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
}

#[doc(hidden)]
pub async fn remove(broker: impl BrokerTesting) {
    let job = broker.enqueue_named("job").await;

    assert!(broker.remove(QUEUE, job.id).await.unwrap());
    assert!(broker.job(QUEUE, job.id).await.unwrap().is_none());
}

#[doc(hidden)]
pub async fn remove_not_found(broker: impl BrokerTesting) {
    assert!(!broker.remove(QUEUE, 4242.into()).await.unwrap());
}

#[doc(hidden)]
pub async fn retry_failed(broker: impl BrokerTesting) {
    broker.enqueue_named("job").await;
    let failed = broker.fail_next().await;

    assert!(broker.retry(QUEUE, failed.id).await.unwrap());

    let job = broker.job(QUEUE, failed.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
    assert_eq!(job.failed_reason, None);
}

#[doc(hidden)]
pub async fn retry_not_failed(broker: impl BrokerTesting) {
    let job = broker.enqueue_named("job").await;

    assert!(!broker.retry(QUEUE, job.id).await.unwrap());
    assert!(!broker.retry(QUEUE, 4242.into()).await.unwrap());
    assert_eq!(
        broker.job(QUEUE, job.id).await.unwrap().unwrap().status,
        JobStatus::Waiting
    );
}

#[doc(hidden)]
pub async fn promote_delayed(broker: impl BrokerTesting) {
    let job = broker
        .enqueue(QUEUE, JobBuilder::new("job").with_delay_ms(60_000).build())
        .await
        .unwrap();

    assert!(broker.promote(QUEUE, job.id).await.unwrap());
    assert_eq!(broker.dequeue(QUEUE).await.unwrap().unwrap().id, job.id);
}

#[doc(hidden)]
pub async fn promote_not_delayed(broker: impl BrokerTesting) {
    let job = broker.enqueue_named("job").await;

    assert!(!broker.promote(QUEUE, job.id).await.unwrap());
}

#[doc(hidden)]
pub async fn pause_and_resume(broker: impl BrokerTesting) {
    broker.pause(QUEUE).await.unwrap();
    assert!(broker.stats(QUEUE).await.unwrap().paused);

    broker.resume(QUEUE).await.unwrap();
    assert!(!broker.stats(QUEUE).await.unwrap().paused);
}

#[doc(hidden)]
pub async fn clean_without_matching_jobs(broker: impl BrokerTesting) {
    broker.enqueue_named("job").await;

    let removed = broker
        .clean(
            QUEUE,
            Duration::from_millis(3_600_000),
            JobStatus::Completed,
            Some(100),
        )
        .await
        .unwrap();

    assert!(removed.is_empty());
    assert_eq!(broker.stats(QUEUE).await.unwrap().waiting, 1);
}

#[doc(hidden)]
pub async fn clean_respects_grace_and_limit(broker: impl BrokerTesting) {
    for _ in 0..3 {
        broker.enqueue_named("job").await;
        broker.complete_next().await;
    }

    let removed = broker
        .clean(QUEUE, Duration::from_secs(3600), JobStatus::Completed, None)
        .await
        .unwrap();
    assert!(removed.is_empty());

    let removed = broker
        .clean(QUEUE, Duration::ZERO, JobStatus::Completed, Some(2))
        .await
        .unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(broker.stats(QUEUE).await.unwrap().completed, 1);
}

#[doc(hidden)]
pub async fn stats(broker: impl BrokerTesting) {
    broker.enqueue_named("complete").await;
    broker.enqueue_named("fail").await;
    broker.enqueue_named("active").await;
    broker.enqueue_named("waiting").await;
    broker
        .enqueue(QUEUE, JobBuilder::new("delayed").with_delay_ms(60_000).build())
        .await
        .unwrap();
    broker.complete_next().await;
    broker.fail_next().await;
    broker.dequeue(QUEUE).await.unwrap().unwrap();

    let stats = broker.stats(QUEUE).await.unwrap();
    assert_eq!(
        stats,
        QueueStats {
            name: QUEUE.to_owned(),
            waiting: 1,
            active: 1,
            completed: 1,
            failed: 1,
            delayed: 1,
            paused: false,
        }
    );
    assert_eq!(stats.total(), 5);
}
