//! Active alerts raised by the monitoring loop.
use std::{
    collections::HashMap,
    fmt::Display,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::health::{BreachLevel, Dimension};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<BreachLevel> for AlertSeverity {
    fn from(level: BreachLevel) -> Self {
        match level {
            BreachLevel::Warning => Self::Medium,
            BreachLevel::Critical => Self::High,
        }
    }
}

impl Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    QueueSize,
    ErrorRate,
    ProcessingTime,
    QueuePaused,
    MonitoringFailed,
}

impl From<Dimension> for AlertKind {
    fn from(dimension: Dimension) -> Self {
        match dimension {
            Dimension::QueueSize => Self::QueueSize,
            Dimension::ErrorRate => Self::ErrorRate,
            Dimension::ProcessingTime => Self::ProcessingTime,
        }
    }
}

impl Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueSize => write!(f, "queue_size"),
            Self::ErrorRate => write!(f, "error_rate"),
            Self::ProcessingTime => write!(f, "processing_time"),
            Self::QueuePaused => write!(f, "queue_paused"),
            Self::MonitoringFailed => write!(f, "monitoring_failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub queue: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        queue: impl Into<String>,
        kind: AlertKind,
        severity: AlertSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            kind,
            severity,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }

    pub fn raised_at(self, raised_at: DateTime<Utc>) -> Self {
        Self { raised_at, ..self }
    }
}

/// Active alerts keyed by queue and kind. Raising an alert replaces any alert of the same kind
/// for that queue.
///
/// With a TTL configured, alerts older than the TTL are hidden from every read and dropped by
/// [`AlertStore::purge_expired`]. Without one, alerts stay until they are cleared.
#[derive(Debug, Clone, Default)]
pub struct AlertStore {
    alerts: Arc<RwLock<HashMap<String, HashMap<AlertKind, Alert>>>>,
    ttl: Option<Duration>,
}

impl AlertStore {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            alerts: Default::default(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, HashMap<AlertKind, Alert>>> {
        self.alerts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, HashMap<AlertKind, Alert>>> {
        self.alerts.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.ttl.map(|ttl| {
            TimeDelta::from_std(ttl)
                .ok()
                .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        })
    }

    /// Stores the alert, returning the one it replaced.
    pub fn raise(&self, alert: Alert) -> Option<Alert> {
        tracing::debug!(
            queue = %alert.queue,
            kind = %alert.kind,
            severity = %alert.severity,
            "Raising alert: {}",
            alert.message
        );
        self.write()
            .entry(alert.queue.clone())
            .or_default()
            .insert(alert.kind, alert)
    }

    /// Clears one kind of alert for a queue, or all of them when `kind` is `None`. Returns the
    /// number of alerts removed.
    pub fn clear(&self, queue: &str, kind: Option<AlertKind>) -> usize {
        let mut alerts = self.write();
        let removed = match kind {
            Some(kind) => {
                let removed = alerts
                    .get_mut(queue)
                    .and_then(|queue_alerts| queue_alerts.remove(&kind))
                    .map_or(0, |_| 1);
                if alerts.get(queue).is_some_and(HashMap::is_empty) {
                    alerts.remove(queue);
                }
                removed
            }
            None => alerts.remove(queue).map_or(0, |queue_alerts| queue_alerts.len()),
        };
        if removed > 0 {
            tracing::debug!(%queue, ?kind, removed, "Cleared alerts");
        }
        removed
    }

    /// All live alerts, most severe first and newest first within a severity.
    pub fn active(&self) -> Vec<Alert> {
        let cutoff = self.cutoff();
        let mut active: Vec<Alert> = self
            .read()
            .values()
            .flat_map(HashMap::values)
            .filter(|alert| is_live(alert, cutoff))
            .cloned()
            .collect();
        sort(&mut active);
        active
    }

    pub fn for_queue(&self, queue: &str) -> Vec<Alert> {
        let cutoff = self.cutoff();
        let mut alerts: Vec<Alert> = self
            .read()
            .get(queue)
            .into_iter()
            .flat_map(HashMap::values)
            .filter(|alert| is_live(alert, cutoff))
            .cloned()
            .collect();
        sort(&mut alerts);
        alerts
    }

    pub fn get(&self, queue: &str, kind: AlertKind) -> Option<Alert> {
        let cutoff = self.cutoff();
        self.read()
            .get(queue)
            .and_then(|alerts| alerts.get(&kind))
            .filter(|alert| is_live(alert, cutoff))
            .cloned()
    }

    /// Drops every alert older than the TTL. A no-op without a TTL.
    pub fn purge_expired(&self) -> usize {
        let Some(cutoff) = self.cutoff() else {
            return 0;
        };
        let mut alerts = self.write();
        let mut purged = 0;
        for queue_alerts in alerts.values_mut() {
            let before = queue_alerts.len();
            queue_alerts.retain(|_, alert| alert.raised_at > cutoff);
            purged += before - queue_alerts.len();
        }
        alerts.retain(|_, queue_alerts| !queue_alerts.is_empty());
        if purged > 0 {
            tracing::debug!(purged, "Purged expired alerts");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_live(alert: &Alert, cutoff: Option<DateTime<Utc>>) -> bool {
    cutoff.map_or(true, |cutoff| alert.raised_at > cutoff)
}

fn sort(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.raised_at.cmp(&a.raised_at))
    });
}
