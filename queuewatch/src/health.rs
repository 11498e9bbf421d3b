//! Threshold based health classification of queues.
//!
//! A queue is judged along three dimensions: the number of waiting jobs, the error rate and the
//! average processing time of its recent jobs. Each dimension is compared against a critical and
//! a warning threshold, critical first, and contributes at most one [`Breach`]:
//!
//! - any critical breach makes the queue [`HealthStatus::Unhealthy`],
//! - otherwise any warning breach makes it [`HealthStatus::Warning`],
//! - otherwise it is [`HealthStatus::Healthy`].
//!
//! The score starts at 100 and loses [`CRITICAL_PENALTY`] per critical breach and
//! [`WARNING_PENALTY`] per warning breach, never dropping below 0.
//!
//! Classification is a pure function of the queue stats, the metrics window and the thresholds.
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    broker::QueueStats,
    metrics::{MetricsRecorder, MetricsWindow, WindowSummary},
};

pub const CRITICAL_PENALTY: u8 = 40;
pub const WARNING_PENALTY: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub queue_size_warning: u64,
    pub queue_size_critical: u64,
    /// Percent.
    pub error_rate_warning: f64,
    /// Percent.
    pub error_rate_critical: f64,
    pub processing_time_warning_ms: u64,
    pub processing_time_critical_ms: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            queue_size_warning: 100,
            queue_size_critical: 500,
            error_rate_warning: 5.0,
            error_rate_critical: 15.0,
            processing_time_warning_ms: 30_000,
            processing_time_critical_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Unhealthy,
}

impl Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    QueueSize,
    ErrorRate,
    ProcessingTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachLevel {
    Warning,
    Critical,
}

/// A threshold crossed by one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breach {
    pub dimension: Dimension,
    pub level: BreachLevel,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueHealth {
    pub queue: String,
    pub status: HealthStatus,
    pub score: u8,
    pub error_rate: f64,
    pub avg_processing_ms: f64,
    pub waiting: u64,
    pub paused: bool,
    pub breaches: Vec<Breach>,
    pub recommendations: Vec<String>,
    /// Set when the queue could not be evaluated at all.
    pub error: Option<String>,
}

impl QueueHealth {
    pub fn breach(&self, dimension: Dimension) -> Option<&Breach> {
        self.breaches.iter().find(|breach| breach.dimension == dimension)
    }

    /// A paused queue with a backlog. Informational only, it does not change the status.
    pub fn is_stalled(&self) -> bool {
        self.paused && self.waiting > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub score: u8,
    pub queues: Vec<QueueHealth>,
    pub recommendations: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl SystemHealth {
    pub fn queue(&self, name: &str) -> Option<&QueueHealth> {
        self.queues.iter().find(|health| health.queue == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthEvaluator {
    thresholds: HealthThresholds,
    window: MetricsWindow,
}

impl HealthEvaluator {
    pub fn new(thresholds: HealthThresholds, window: MetricsWindow) -> Self {
        Self { thresholds, window }
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    pub fn window(&self) -> MetricsWindow {
        self.window
    }

    /// Classifies a queue from its live stats and the metrics recorded for it in the window.
    pub fn evaluate(&self, stats: &QueueStats, recorder: &MetricsRecorder) -> QueueHealth {
        self.classify(stats, &recorder.summary(&stats.name, self.window))
    }

    pub fn classify(&self, stats: &QueueStats, summary: &WindowSummary) -> QueueHealth {
        let t = &self.thresholds;
        let breaches: Vec<Breach> = [
            check(
                Dimension::QueueSize,
                stats.waiting as f64,
                t.queue_size_warning as f64,
                t.queue_size_critical as f64,
            ),
            check(
                Dimension::ErrorRate,
                summary.error_rate,
                t.error_rate_warning,
                t.error_rate_critical,
            ),
            check(
                Dimension::ProcessingTime,
                summary.avg_processing_ms,
                t.processing_time_warning_ms as f64,
                t.processing_time_critical_ms as f64,
            ),
        ]
        .into_iter()
        .flatten()
        .collect();

        let status = match breaches.iter().map(|breach| breach.level).max() {
            Some(BreachLevel::Critical) => HealthStatus::Unhealthy,
            Some(BreachLevel::Warning) => HealthStatus::Warning,
            None => HealthStatus::Healthy,
        };
        let penalty: u32 = breaches
            .iter()
            .map(|breach| match breach.level {
                BreachLevel::Critical => u32::from(CRITICAL_PENALTY),
                BreachLevel::Warning => u32::from(WARNING_PENALTY),
            })
            .sum();
        let score = 100u32.saturating_sub(penalty) as u8;

        let mut recommendations: Vec<String> = breaches
            .iter()
            .map(|breach| recommendation(&stats.name, breach, stats, summary))
            .collect();
        if stats.paused && stats.waiting > 0 {
            recommendations.push(format!(
                "Queue {} is paused with {} jobs waiting; resume it to drain the backlog",
                stats.name, stats.waiting
            ));
        }

        QueueHealth {
            queue: stats.name.clone(),
            status,
            score,
            error_rate: summary.error_rate,
            avg_processing_ms: summary.avg_processing_ms,
            waiting: stats.waiting,
            paused: stats.paused,
            breaches,
            recommendations,
            error: None,
        }
    }

    /// The health of a queue whose stats could not be fetched.
    pub fn unreachable(&self, queue: &str, error: impl Display) -> QueueHealth {
        QueueHealth {
            queue: queue.to_owned(),
            status: HealthStatus::Unhealthy,
            score: 0,
            error_rate: 0.0,
            avg_processing_ms: 0.0,
            waiting: 0,
            paused: false,
            breaches: Vec::new(),
            recommendations: vec![format!(
                "Check broker connectivity for queue {queue}: {error}"
            )],
            error: Some(error.to_string()),
        }
    }

    /// Combines per-queue results: the worst status wins and the score is the rounded mean.
    pub fn aggregate(&self, queues: Vec<QueueHealth>) -> SystemHealth {
        let status = queues
            .iter()
            .map(|health| health.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        let score = match queues.len() {
            0 => 100,
            len => {
                let total: u32 = queues.iter().map(|health| u32::from(health.score)).sum();
                (f64::from(total) / len as f64).round() as u8
            }
        };
        let recommendations = queues
            .iter()
            .flat_map(|health| health.recommendations.iter().cloned())
            .collect();
        SystemHealth {
            status,
            score,
            queues,
            recommendations,
            evaluated_at: Utc::now(),
        }
    }
}

fn check(dimension: Dimension, value: f64, warning: f64, critical: f64) -> Option<Breach> {
    let (level, threshold) = if value >= critical {
        (BreachLevel::Critical, critical)
    } else if value >= warning {
        (BreachLevel::Warning, warning)
    } else {
        return None;
    };
    Some(Breach {
        dimension,
        level,
        value,
        threshold,
    })
}

fn recommendation(
    queue: &str,
    breach: &Breach,
    stats: &QueueStats,
    summary: &WindowSummary,
) -> String {
    match breach.dimension {
        Dimension::QueueSize => format!(
            "Increase worker concurrency for queue {queue}: {} jobs waiting",
            stats.waiting
        ),
        Dimension::ErrorRate => format!(
            "Investigate failing jobs in queue {queue}: error rate {:.1}%",
            summary.error_rate
        ),
        Dimension::ProcessingTime => format!(
            "Optimise job processing for queue {queue}: average processing time {}ms",
            summary.avg_processing_ms.round()
        ),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metrics::JobMetric;

    fn stats(waiting: u64) -> QueueStats {
        QueueStats {
            waiting,
            ..QueueStats::empty("email")
        }
    }

    fn summary(error_rate: f64, avg_processing_ms: f64) -> WindowSummary {
        WindowSummary {
            total: 10,
            failed: (error_rate / 10.0) as usize,
            error_rate,
            avg_processing_ms,
        }
    }

    #[test]
    fn healthy() {
        let health = HealthEvaluator::default().classify(&stats(10), &WindowSummary::default());

        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.score, 100);
        assert!(health.breaches.is_empty());
        assert!(health.recommendations.is_empty());
    }

    #[test]
    fn critical_queue_size_is_unhealthy_regardless_of_error_rate() {
        let evaluator = HealthEvaluator::default();

        for error_rate in [0.0, 50.0] {
            let health = evaluator.classify(&stats(600), &summary(error_rate, 100.0));
            assert_eq!(health.status, HealthStatus::Unhealthy);
            assert_eq!(
                health.breach(Dimension::QueueSize).unwrap().level,
                BreachLevel::Critical
            );
        }
    }

    #[test]
    fn critical_error_rate_alone_is_unhealthy() {
        let health = HealthEvaluator::default().classify(&stats(50), &summary(20.0, 100.0));

        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.score, 60);
        assert_eq!(
            health.recommendations,
            vec!["Investigate failing jobs in queue email: error rate 20.0%"]
        );
    }

    #[test]
    fn thresholds_are_inclusive() {
        let health = HealthEvaluator::default().classify(&stats(100), &summary(5.0, 30_000.0));

        assert_eq!(health.status, HealthStatus::Warning);
        assert_eq!(health.breaches.len(), 3);
        assert_eq!(health.score, 55);
    }

    #[test]
    fn score_is_floored_at_zero() {
        let health = HealthEvaluator::default().classify(&stats(500), &summary(15.0, 60_000.0));

        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.score, 0);
        assert_eq!(health.recommendations.len(), 3);
        assert_eq!(
            health.recommendations[2],
            "Optimise job processing for queue email: average processing time 60000ms"
        );
    }

    #[test]
    fn paused_backlog_recommends_resume_without_changing_status() {
        let stats = QueueStats {
            paused: true,
            ..stats(3)
        };
        let health = HealthEvaluator::default().classify(&stats, &WindowSummary::default());

        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.is_stalled());
        assert_eq!(
            health.recommendations,
            vec!["Queue email is paused with 3 jobs waiting; resume it to drain the backlog"]
        );
    }

    #[test]
    fn custom_thresholds() {
        let evaluator = HealthEvaluator::new(
            HealthThresholds {
                queue_size_warning: 1,
                queue_size_critical: 2,
                ..Default::default()
            },
            MetricsWindow::AllTime,
        );

        assert_eq!(
            evaluator.classify(&stats(1), &WindowSummary::default()).status,
            HealthStatus::Warning
        );
    }

    #[test]
    fn evaluate_uses_recorded_metrics() {
        let recorder = MetricsRecorder::default();
        for _ in 0..8 {
            recorder.record(JobMetric::success("email", "welcome", 200));
        }
        for _ in 0..2 {
            recorder.record(JobMetric::failure("email", "welcome", 200, "bounced"));
        }
        let stats = QueueStats {
            waiting: 10,
            active: 1,
            ..QueueStats::empty("email")
        };

        let health = HealthEvaluator::default().evaluate(&stats, &recorder);

        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.error_rate, 20.0);
        assert_eq!(health.avg_processing_ms, 200.0);
    }

    #[test]
    fn unreachable() {
        let health = HealthEvaluator::default().unreachable("email", "connection refused");

        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.score, 0);
        assert_eq!(health.error.as_deref(), Some("connection refused"));
        assert_eq!(
            health.recommendations,
            vec!["Check broker connectivity for queue email: connection refused"]
        );
    }

    #[test]
    fn aggregate_takes_worst_status_and_mean_score() {
        let evaluator = HealthEvaluator::default();
        let healthy = evaluator.classify(&stats(0), &WindowSummary::default());
        let warning = evaluator.classify(&stats(150), &WindowSummary::default());
        let unhealthy = evaluator.unreachable("reports", "timed out");

        let system = evaluator.aggregate(vec![healthy, warning, unhealthy]);

        assert_eq!(system.status, HealthStatus::Unhealthy);
        // (100 + 85 + 0) / 3
        assert_eq!(system.score, 62);
        assert_eq!(system.recommendations.len(), 2);
    }

    #[test]
    fn aggregate_without_queues() {
        let system = HealthEvaluator::default().aggregate(Vec::new());

        assert_eq!(system.status, HealthStatus::Healthy);
        assert_eq!(system.score, 100);
    }

    #[test]
    fn status_ordering() {
        assert!(HealthStatus::Healthy < HealthStatus::Warning);
        assert!(HealthStatus::Warning < HealthStatus::Unhealthy);
    }
}
