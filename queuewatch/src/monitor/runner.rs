use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use futures::future::join_all;
use tracing::instrument;

use crate::{
    alert::{Alert, AlertKind, AlertSeverity, AlertStore},
    gateway::JobQueueGateway,
    health::{Breach, BreachLevel, Dimension, HealthEvaluator, HealthStatus, QueueHealth, SystemHealth},
    metrics::MetricsRecorder,
    registry::QueueRegistry,
};

use super::fetch_stats;

const DIMENSIONS: [Dimension; 3] = [
    Dimension::QueueSize,
    Dimension::ErrorRate,
    Dimension::ProcessingTime,
];

/// Runs one monitoring pass over every registered queue.
pub(crate) struct MonitorRunner {
    registry: Arc<QueueRegistry>,
    recorder: MetricsRecorder,
    alerts: AlertStore,
    evaluator: HealthEvaluator,
    queue_timeout: Duration,
    ticks: AtomicU64,
    last_status: Mutex<HashMap<String, HealthStatus>>,
}

impl MonitorRunner {
    pub fn new(
        registry: Arc<QueueRegistry>,
        recorder: MetricsRecorder,
        alerts: AlertStore,
        evaluator: HealthEvaluator,
        queue_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            recorder,
            alerts,
            evaluator,
            queue_timeout,
            ticks: AtomicU64::new(0),
            last_status: Default::default(),
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    #[instrument(skip(self), fields(queues = self.registry.len()))]
    pub async fn tick(&self) -> SystemHealth {
        let queues = join_all(
            self.registry
                .iter()
                .map(|(name, gateway)| self.evaluate_queue(name, gateway)),
        )
        .await;
        self.alerts.purge_expired();
        let system = self.evaluator.aggregate(queues);
        let tick = self.ticks.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(
            tick,
            status = %system.status,
            score = system.score,
            "Monitoring tick complete"
        );
        system
    }

    async fn evaluate_queue(&self, name: &str, gateway: &JobQueueGateway) -> QueueHealth {
        let health = match fetch_stats(gateway, self.queue_timeout).await {
            Ok(stats) => {
                let health = self.evaluator.evaluate(&stats, &self.recorder);
                self.reconcile(&health);
                health
            }
            Err(err) => {
                tracing::error!(queue = %name, ?err, "Failed to monitor queue {name}: {err}");
                self.alerts.raise(Alert::new(
                    name,
                    AlertKind::MonitoringFailed,
                    AlertSeverity::Critical,
                    format!("Monitoring failed for queue {name}: {err}"),
                ));
                self.evaluator.unreachable(name, &err)
            }
        };
        self.record_transition(&health);
        health
    }

    /// Brings the stored alerts of one queue in line with its latest evaluation.
    fn reconcile(&self, health: &QueueHealth) {
        let queue = health.queue.as_str();
        self.alerts.clear(queue, Some(AlertKind::MonitoringFailed));

        for dimension in DIMENSIONS {
            let kind = AlertKind::from(dimension);
            match health.breach(dimension) {
                Some(breach) => self.refresh(Alert::new(
                    queue,
                    kind,
                    AlertSeverity::from(breach.level),
                    breach_message(queue, breach),
                )),
                None => {
                    self.alerts.clear(queue, Some(kind));
                }
            }
        }

        if health.is_stalled() {
            self.refresh(Alert::new(
                queue,
                AlertKind::QueuePaused,
                AlertSeverity::Low,
                format!("Queue {queue} is paused with {} jobs waiting", health.waiting),
            ));
        } else {
            self.alerts.clear(queue, Some(AlertKind::QueuePaused));
        }
    }

    /// Raises `alert` unless the same condition is already active. An alert whose severity is
    /// unchanged keeps its original `raised_at` and only takes the new message.
    fn refresh(&self, alert: Alert) {
        match self.alerts.get(&alert.queue, alert.kind) {
            Some(current) if current.severity == alert.severity => {
                if current.message != alert.message {
                    self.alerts.raise(alert.raised_at(current.raised_at));
                }
            }
            _ => {
                self.alerts.raise(alert);
            }
        }
    }

    fn record_transition(&self, health: &QueueHealth) {
        let previous = self
            .last_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(health.queue.clone(), health.status);
        let queue = health.queue.as_str();
        let status = health.status;
        match previous {
            Some(previous) if status > previous => tracing::warn!(
                %queue,
                %previous,
                %status,
                score = health.score,
                "Queue {queue} degraded from {previous} to {status}"
            ),
            Some(previous) if status < previous => tracing::info!(
                %queue,
                %previous,
                %status,
                score = health.score,
                "Queue {queue} recovered from {previous} to {status}"
            ),
            None if status != HealthStatus::Healthy => tracing::warn!(
                %queue,
                %status,
                score = health.score,
                "Queue {queue} is {status}"
            ),
            _ => {}
        }
    }
}

fn breach_message(queue: &str, breach: &Breach) -> String {
    let level = match breach.level {
        BreachLevel::Warning => "warning",
        BreachLevel::Critical => "critical",
    };
    match breach.dimension {
        Dimension::QueueSize => format!(
            "Queue {queue} has {} jobs waiting ({level} threshold {})",
            breach.value, breach.threshold
        ),
        Dimension::ErrorRate => format!(
            "Queue {queue} error rate is {:.1}% ({level} threshold {:.1}%)",
            breach.value, breach.threshold
        ),
        Dimension::ProcessingTime => format!(
            "Queue {queue} average processing time is {}ms ({level} threshold {}ms)",
            breach.value.round(),
            breach.threshold
        ),
    }
}
