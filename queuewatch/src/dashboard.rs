//! A composite, always fresh report over every registered queue plus the administrative
//! operations a dashboard exposes.
use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::{
    alert::{Alert, AlertStore},
    broker::QueueStats,
    gateway::JobQueueGateway,
    health::{HealthEvaluator, HealthStatus, QueueHealth},
    job::{JobHandle, JobId, JobOptions, JobStatus},
    metrics::{JobMetric, MetricsRecorder, QueueCounters},
    monitor::fetch_stats,
    registry::QueueRegistry,
    QueueWatchError, Result,
};

pub const DEFAULT_RECENT_ACTIVITY: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub overview: Overview,
    pub queues: Vec<QueueSnapshot>,
    pub alerts: Vec<Alert>,
    pub recent_activity: Vec<JobMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub system_status: HealthStatus,
    pub total_queues: usize,
    pub total_jobs: u64,
    pub total_active_jobs: u64,
    pub overall_health_score: u8,
}

/// One queue in a [`DashboardSnapshot`]. `stats` is `None` and `error` set when the broker could
/// not be reached for this queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub name: String,
    pub stats: Option<QueueStats>,
    pub health: QueueHealth,
    pub counters: QueueCounters,
    pub error: Option<String>,
}

/// The detailed status of a single queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub stats: QueueStats,
    pub health: QueueHealth,
    pub counters: QueueCounters,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone)]
pub struct DashboardAggregator {
    registry: Arc<QueueRegistry>,
    recorder: MetricsRecorder,
    alerts: AlertStore,
    evaluator: HealthEvaluator,
    queue_timeout: Duration,
    recent_activity: usize,
}

impl DashboardAggregator {
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
            recent_activity: DEFAULT_RECENT_ACTIVITY,
        }
    }

    /// How many recent metrics a snapshot includes.
    pub fn with_recent_activity(mut self, recent_activity: usize) -> Self {
        self.recent_activity = recent_activity;
        self
    }

    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    fn gateway(&self, queue: &str) -> Result<&JobQueueGateway> {
        self.registry
            .get(queue)
            .ok_or_else(|| QueueWatchError::UnknownQueue(queue.to_owned()))
    }

    async fn queue_snapshot(&self, gateway: &JobQueueGateway) -> QueueSnapshot {
        let name = gateway.name();
        let counters = self.recorder.counters(name);
        match fetch_stats(gateway, self.queue_timeout).await {
            Ok(stats) => QueueSnapshot {
                name: name.to_owned(),
                health: self.evaluator.evaluate(&stats, &self.recorder),
                stats: Some(stats),
                counters,
                error: None,
            },
            Err(err) => {
                tracing::warn!(queue = %name, ?err, "Dashboard could not fetch stats for {name}: {err}");
                QueueSnapshot {
                    name: name.to_owned(),
                    stats: None,
                    health: self.evaluator.unreachable(name, &err),
                    counters,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Builds a fresh report. A queue that cannot be reached is reported as unhealthy instead of
    /// failing the whole snapshot.
    pub async fn snapshot(&self) -> DashboardSnapshot {
        let queues = join_all(
            self.registry
                .iter()
                .map(|(_, gateway)| self.queue_snapshot(gateway)),
        )
        .await;

        let system = self
            .evaluator
            .aggregate(queues.iter().map(|queue| queue.health.clone()).collect());
        let overview = Overview {
            system_status: system.status,
            total_queues: queues.len(),
            total_jobs: queues
                .iter()
                .filter_map(|queue| queue.stats.as_ref())
                .map(QueueStats::total)
                .sum(),
            total_active_jobs: queues
                .iter()
                .filter_map(|queue| queue.stats.as_ref())
                .map(|stats| stats.active)
                .sum(),
            overall_health_score: system.score,
        };

        DashboardSnapshot {
            generated_at: Utc::now(),
            overview,
            queues,
            alerts: self.alerts.active(),
            recent_activity: self.recorder.recent(self.recent_activity),
        }
    }

    pub async fn queue_status(&self, queue: &str) -> Result<QueueStatus> {
        let gateway = self.gateway(queue)?;
        let stats = gateway.stats().await?;
        Ok(QueueStatus {
            health: self.evaluator.evaluate(&stats, &self.recorder),
            counters: self.recorder.counters(queue),
            alerts: self.alerts.for_queue(queue),
            stats,
        })
    }

    pub async fn add_job(
        &self,
        queue: &str,
        name: impl Into<String>,
        data: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobHandle> {
        self.gateway(queue)?
            .enqueue(name.into(), data, options)
            .await
    }

    pub async fn retry_job(&self, queue: &str, id: JobId) -> Result<bool> {
        self.gateway(queue)?.retry(id).await
    }

    pub async fn promote_job(&self, queue: &str, id: JobId) -> Result<bool> {
        self.gateway(queue)?.promote(id).await
    }

    pub async fn remove_job(&self, queue: &str, id: JobId) -> Result<bool> {
        self.gateway(queue)?.remove(id).await
    }

    pub async fn pause_queue(&self, queue: &str) -> Result<()> {
        self.gateway(queue)?.pause().await
    }

    pub async fn resume_queue(&self, queue: &str) -> Result<()> {
        self.gateway(queue)?.resume().await
    }

    pub async fn clean_queue(
        &self,
        queue: &str,
        grace: Duration,
        status: JobStatus,
        limit: Option<usize>,
    ) -> Result<Vec<JobId>> {
        self.gateway(queue)?.clean(grace, status, limit).await
    }
}
