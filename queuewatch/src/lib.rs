//! A monitoring and control layer over an external job queue broker.
//!
//! `queuewatch` does not store jobs itself. It wraps a [`broker::Broker`] with:
//!
//! - typed per-queue gateways for enqueueing and administering jobs ([`gateway`]),
//! - bounded in-memory job execution metrics ([`metrics`]),
//! - threshold based health scoring and recommendations ([`health`]),
//! - a background monitoring loop raising and clearing alerts ([`monitor`], [`alert`]),
//! - a composite dashboard report and transport agnostic admin handlers ([`dashboard`],
//!   [`admin`]).
//!
//! [`QueueWatch`] wires all of these together from a broker and a [`config::QueueWatchConfig`].
//!
//! # Example
//!
//! ```
//! # use std::sync::Arc;
//! # use queuewatch::prelude::*;
//! # use queuewatch::broker::memory::InMemoryBroker;
//! # tokio_test_block_on(async {
//! let broker = Arc::new(InMemoryBroker::with_queues(["email"]));
//! let watch = QueueWatch::new(broker, QueueWatchConfig::new().with_queues(["email"]));
//!
//! let email = watch.gateway("email").unwrap();
//! JobBuilder::new("send_welcome_email")
//!     .with_payload(serde_json::json!({ "user_id": 7 }))
//!     .enqueue(email)
//!     .await
//!     .unwrap();
//! watch.record(JobMetric::success("email", "send_welcome_email", 120));
//!
//! let snapshot = watch.snapshot().await;
//! assert_eq!(snapshot.overview.total_jobs, 1);
//! assert_eq!(snapshot.overview.system_status, HealthStatus::Healthy);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```
use std::sync::Arc;

use thiserror::Error;

pub mod admin;
pub mod alert;
pub mod backoff;
pub mod broker;
pub mod config;
pub mod dashboard;
pub mod gateway;
pub mod health;
pub mod job;
pub mod metrics;
pub mod monitor;
pub mod prelude;
pub mod registry;

use admin::Admin;
use alert::AlertStore;
use broker::{Broker, BrokerError};
use config::QueueWatchConfig;
use dashboard::{DashboardAggregator, DashboardSnapshot};
use gateway::JobQueueGateway;
use health::{HealthEvaluator, SystemHealth};
use job::ValidationError;
use metrics::{JobMetric, MetricsRecorder};
use monitor::MonitoringLoop;
use registry::QueueRegistry;

pub type Result<T> = std::result::Result<T, QueueWatchError>;

#[derive(Debug, Error)]
pub enum QueueWatchError {
    #[error("Queue {queue} unavailable during {operation}: {source}")]
    QueueUnavailable {
        queue: String,
        operation: &'static str,
        source: BrokerError,
    },
    #[error("Queue {0} is not registered")]
    UnknownQueue(String),
    #[error("Cannot register the gateway for queue {gateway} as {name}")]
    QueueNameMismatch { name: String, gateway: String },
    #[error("Invalid job: {0}")]
    Validation(#[from] ValidationError),
    #[error("Failed to gracefully shut down")]
    GracefulShutdownFailed,
}

/// The assembled monitoring and control layer for one process.
///
/// Every component is built once here and handed its collaborators explicitly. The registry is
/// fixed after construction, the metrics recorder and alert store are shared handles.
pub struct QueueWatch {
    config: QueueWatchConfig,
    registry: Arc<QueueRegistry>,
    recorder: MetricsRecorder,
    alerts: AlertStore,
    monitor: MonitoringLoop,
    dashboard: DashboardAggregator,
}

impl QueueWatch {
    pub fn new(broker: Arc<dyn Broker>, config: QueueWatchConfig) -> Self {
        let registry = Arc::new(QueueRegistry::from_names(broker, config.queues.iter().cloned()));
        let recorder = MetricsRecorder::new(config.metrics_capacity, config.metrics_queue_capacity);
        let alerts = AlertStore::new(config.alert_ttl);
        let evaluator = HealthEvaluator::new(config.thresholds, config.metrics_window);

        let monitor = MonitoringLoop::new(
            registry.clone(),
            recorder.clone(),
            alerts.clone(),
            evaluator.clone(),
            config.queue_timeout,
        );
        let dashboard = DashboardAggregator::new(
            registry.clone(),
            recorder.clone(),
            alerts.clone(),
            evaluator,
            config.queue_timeout,
        )
        .with_recent_activity(config.recent_activity);

        tracing::debug!(queues = ?registry.names(), "Initialised queuewatch");
        Self {
            config,
            registry,
            recorder,
            alerts,
            monitor,
            dashboard,
        }
    }

    /// Starts the monitoring loop on the configured interval. Returns `false` when it is
    /// already running.
    pub fn start_monitoring(&self) -> bool {
        self.monitor.start(self.config.monitor_interval)
    }

    pub async fn stop_monitoring(&self) -> Result<()> {
        self.monitor.stop().await
    }

    pub async fn graceful_shutdown(self) -> Result<()> {
        tracing::debug!("Shutting down queuewatch");
        self.monitor.stop().await
    }

    /// Records the outcome of a job. Metrics for queues that are not registered are kept in the
    /// global log only and never contribute to health scoring.
    pub fn record(&self, metric: JobMetric) {
        if self.registry.contains(&metric.queue) {
            self.recorder.record(metric);
        } else {
            tracing::warn!(
                queue = %metric.queue,
                "Recorded metric for unregistered queue {}",
                metric.queue
            );
            self.recorder.record_global(metric);
        }
    }

    pub fn gateway(&self, queue: &str) -> Result<&JobQueueGateway> {
        self.registry
            .get(queue)
            .ok_or_else(|| QueueWatchError::UnknownQueue(queue.to_owned()))
    }

    /// Evaluates every queue now, updating alerts exactly as a monitoring tick does.
    pub async fn health(&self) -> SystemHealth {
        self.monitor.tick().await
    }

    pub async fn snapshot(&self) -> DashboardSnapshot {
        self.dashboard.snapshot().await
    }

    pub fn admin(&self) -> Admin {
        Admin::new(self.dashboard.clone())
    }

    pub fn config(&self) -> &QueueWatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.recorder
    }

    pub fn alerts(&self) -> &AlertStore {
        &self.alerts
    }

    pub fn monitor(&self) -> &MonitoringLoop {
        &self.monitor
    }

    pub fn dashboard(&self) -> &DashboardAggregator {
        &self.dashboard
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::{
        alert::{AlertKind, AlertSeverity},
        broker::memory::InMemoryBroker,
        health::HealthStatus,
        job::{builder::JobBuilder, JobStatus},
    };

    fn watch(queues: &[&str]) -> (InMemoryBroker, QueueWatch) {
        let broker = InMemoryBroker::with_queues(queues.iter().copied());
        let watch = QueueWatch::new(
            Arc::new(broker.clone()),
            QueueWatchConfig::new().with_queues(queues.iter().copied()),
        );
        (broker, watch)
    }

    #[tokio::test]
    async fn email_queue_with_high_error_rate() {
        let (broker, watch) = watch(&["email"]);
        let email = watch.gateway("email").unwrap();
        for _ in 0..11 {
            JobBuilder::new("welcome").enqueue(email).await.unwrap();
        }
        broker.dequeue("email").await.unwrap();
        for _ in 0..8 {
            watch.record(JobMetric::success("email", "welcome", 150));
        }
        for _ in 0..2 {
            watch.record(JobMetric::failure("email", "welcome", 150, "smtp timeout"));
        }

        let system = watch.health().await;

        let health = system.queue("email").unwrap();
        assert_eq!(health.waiting, 10);
        assert_eq!(health.error_rate, 20.0);
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(system.status, HealthStatus::Unhealthy);
        let alert = watch.alerts().get("email", AlertKind::ErrorRate).unwrap();
        assert_eq!(alert.severity, AlertSeverity::High);
    }

    #[tokio::test]
    async fn clean_empty_completed_set() {
        let (_, watch) = watch(&["email"]);

        let removed = watch
            .gateway("email")
            .unwrap()
            .clean(Duration::from_millis(3_600_000), JobStatus::Completed, Some(100))
            .await
            .unwrap();

        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn total_jobs_sums_registered_queues() {
        let (_, watch) = watch(&["email", "reports", "sms"]);
        for (queue, count) in [("email", 2), ("reports", 3), ("sms", 0)] {
            let gateway = watch.gateway(queue).unwrap();
            for _ in 0..count {
                JobBuilder::new("job").enqueue(gateway).await.unwrap();
            }
        }

        let snapshot = watch.snapshot().await;

        let sum: u64 = snapshot
            .queues
            .iter()
            .map(|queue| queue.stats.as_ref().unwrap().total())
            .sum();
        assert_eq!(snapshot.overview.total_jobs, 5);
        assert_eq!(snapshot.overview.total_jobs, sum);
    }

    #[tokio::test]
    async fn metrics_for_unregistered_queue_are_kept_but_not_scored() {
        let (_, watch) = watch(&["email"]);

        for _ in 0..5 {
            watch.record(JobMetric::failure("sms", "send", 10, "carrier down"));
        }

        assert_eq!(watch.metrics().len(), 5);
        assert!(watch.metrics().recent_for("sms", 10).is_empty());
        assert_eq!(watch.metrics().counters("sms").processed(), 0);
        let system = watch.health().await;
        assert_eq!(system.queues.len(), 1);
        assert_eq!(system.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn unknown_gateway() {
        let (_, watch) = watch(&["email"]);

        assert_matches!(watch.gateway("sms"), Err(QueueWatchError::UnknownQueue(_)));
    }

    #[tokio::test]
    async fn monitoring_lifecycle() {
        let (_, watch) = watch(&["email"]);

        assert!(watch.start_monitoring());
        assert!(!watch.start_monitoring());
        watch.stop_monitoring().await.unwrap();
        assert!(!watch.monitor().is_running());

        assert!(watch.start_monitoring());
        watch.graceful_shutdown().await.unwrap();
    }
}
