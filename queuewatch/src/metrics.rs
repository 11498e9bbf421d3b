//! In-memory job execution metrics.
//!
//! Workers report the outcome of each job as a [`JobMetric`]. The [`MetricsRecorder`] keeps a
//! bounded log of the most recent metrics across all queues, a smaller bounded log per queue
//! and lifetime counters per queue. Time windows are applied on read, so eviction is purely by
//! count.
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5 * 60);

/// The outcome of a single job execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetric {
    pub queue: String,
    pub job_name: String,
    pub duration_ms: u64,
    pub success: bool,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl JobMetric {
    pub fn success(queue: impl Into<String>, job_name: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            queue: queue.into(),
            job_name: job_name.into(),
            duration_ms,
            success: true,
            attempts: 1,
            error_message: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn failure(
        queue: impl Into<String>,
        job_name: impl Into<String>,
        duration_ms: u64,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error_message: Some(error_message.into()),
            ..Self::success(queue, job_name, duration_ms)
        }
    }

    pub fn with_attempts(self, attempts: u32) -> Self {
        Self { attempts, ..self }
    }

    pub fn recorded_at(self, recorded_at: DateTime<Utc>) -> Self {
        Self {
            recorded_at,
            ..self
        }
    }
}

/// Which metrics a read should consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsWindow {
    AllTime,
    Last(Duration),
}

impl Default for MetricsWindow {
    fn default() -> Self {
        Self::Last(DEFAULT_WINDOW)
    }
}

impl MetricsWindow {
    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::AllTime => None,
            Self::Last(duration) => Some(
                TimeDelta::from_std(*duration)
                    .ok()
                    .and_then(|delta| now.checked_sub_signed(delta))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
            ),
        }
    }
}

/// Aggregates over the metrics of one queue inside a [`MetricsWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowSummary {
    pub total: usize,
    pub failed: usize,
    /// Percentage of failed jobs, `0.0` when the window is empty.
    pub error_rate: f64,
    /// Mean duration in milliseconds, `0.0` when the window is empty.
    pub avg_processing_ms: f64,
}

impl WindowSummary {
    fn from_metrics<'a>(metrics: impl Iterator<Item = &'a JobMetric>) -> Self {
        let (total, failed, duration) = metrics.fold((0usize, 0usize, 0u64), |(t, f, d), m| {
            (t + 1, f + usize::from(!m.success), d.saturating_add(m.duration_ms))
        });
        if total == 0 {
            return Self::default();
        }
        Self {
            total,
            failed,
            error_rate: failed as f64 / total as f64 * 100.0,
            avg_processing_ms: duration as f64 / total as f64,
        }
    }
}

/// Lifetime counters for one queue, unaffected by log eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueCounters {
    pub completed: u64,
    pub failed: u64,
    pub total_duration_ms: u64,
}

impl QueueCounters {
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    pub fn avg_duration_ms(&self) -> f64 {
        match self.processed() {
            0 => 0.0,
            processed => self.total_duration_ms as f64 / processed as f64,
        }
    }
}

#[derive(Debug)]
struct Inner {
    capacity: usize,
    queue_capacity: usize,
    log: VecDeque<JobMetric>,
    per_queue: HashMap<String, VecDeque<JobMetric>>,
    counters: HashMap<String, QueueCounters>,
}

/// A cheap to clone handle onto shared, bounded metric storage.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    inner: Arc<RwLock<Inner>>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_QUEUE_CAPACITY)
    }
}

impl MetricsRecorder {
    /// `capacity` bounds the global log and `queue_capacity` each per-queue log. The oldest
    /// metric is evicted first.
    pub fn new(capacity: usize, queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                capacity,
                queue_capacity,
                log: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                per_queue: HashMap::new(),
                counters: HashMap::new(),
            })),
        }
    }

    // Every mutation is a single push or pop so a poisoned lock never guards partial state.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, metric: JobMetric) {
        tracing::trace!(
            queue = %metric.queue,
            job_name = %metric.job_name,
            success = metric.success,
            duration_ms = metric.duration_ms,
            "Recording job metric"
        );
        let mut inner = self.write();
        let Inner {
            capacity,
            queue_capacity,
            log,
            per_queue,
            counters,
        } = &mut *inner;

        let counter = counters.entry(metric.queue.clone()).or_default();
        if metric.success {
            counter.completed += 1;
        } else {
            counter.failed += 1;
        }
        counter.total_duration_ms = counter.total_duration_ms.saturating_add(metric.duration_ms);

        let queue_log = per_queue.entry(metric.queue.clone()).or_default();
        push_bounded(queue_log, metric.clone(), *queue_capacity);

        push_bounded(log, metric, *capacity);
    }

    /// Records a metric in the global log only, without per-queue history or counters.
    ///
    /// Per-queue state is kept for every queue name passed to [`MetricsRecorder::record`] and is
    /// never pruned, so metrics for queues outside a fixed set belong here.
    pub fn record_global(&self, metric: JobMetric) {
        tracing::trace!(
            queue = %metric.queue,
            job_name = %metric.job_name,
            success = metric.success,
            "Recording job metric in the global log"
        );
        let mut inner = self.write();
        let capacity = inner.capacity;
        push_bounded(&mut inner.log, metric, capacity);
    }

    /// The most recent metrics across all queues, newest first.
    pub fn recent(&self, limit: usize) -> Vec<JobMetric> {
        self.read().log.iter().rev().take(limit).cloned().collect()
    }

    /// The most recent metrics of one queue, newest first.
    pub fn recent_for(&self, queue: &str, limit: usize) -> Vec<JobMetric> {
        self.read()
            .per_queue
            .get(queue)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Percentage of failed jobs across all queues inside `window`.
    pub fn error_rate(&self, window: MetricsWindow) -> f64 {
        let cutoff = window.cutoff(Utc::now());
        let inner = self.read();
        WindowSummary::from_metrics(in_window(inner.log.iter(), cutoff)).error_rate
    }

    pub fn summary(&self, queue: &str, window: MetricsWindow) -> WindowSummary {
        let cutoff = window.cutoff(Utc::now());
        let inner = self.read();
        inner
            .per_queue
            .get(queue)
            .map(|log| WindowSummary::from_metrics(in_window(log.iter(), cutoff)))
            .unwrap_or_default()
    }

    pub fn counters(&self, queue: &str) -> QueueCounters {
        self.read().counters.get(queue).copied().unwrap_or_default()
    }

    /// Number of metrics in the global log.
    pub fn len(&self) -> usize {
        self.read().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().log.is_empty()
    }
}

fn push_bounded(log: &mut VecDeque<JobMetric>, metric: JobMetric, capacity: usize) {
    log.push_back(metric);
    while log.len() > capacity {
        log.pop_front();
    }
}

fn in_window<'a>(
    metrics: impl Iterator<Item = &'a JobMetric>,
    cutoff: Option<DateTime<Utc>>,
) -> impl Iterator<Item = &'a JobMetric> {
    metrics.filter(move |metric| cutoff.map_or(true, |cutoff| metric.recorded_at >= cutoff))
}
