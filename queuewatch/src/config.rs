//! Configuration for [`crate::QueueWatch`].
//!
//! Configuration is either built in code with the `with_*` methods or loaded once at startup
//! from `QUEUEWATCH_*` environment variables with [`QueueWatchConfig::from_env`]. Unset
//! variables keep their defaults.
//!
//! | Variable                                  | Default   |
//! |-------------------------------------------|-----------|
//! | `QUEUEWATCH_QUEUES` (comma separated)     | `default` |
//! | `QUEUEWATCH_MONITOR_INTERVAL_MS`          | `30000`   |
//! | `QUEUEWATCH_QUEUE_TIMEOUT_MS`             | `5000`    |
//! | `QUEUEWATCH_QUEUE_SIZE_WARNING`           | `100`     |
//! | `QUEUEWATCH_QUEUE_SIZE_CRITICAL`          | `500`     |
//! | `QUEUEWATCH_ERROR_RATE_WARNING` (%)       | `5`       |
//! | `QUEUEWATCH_ERROR_RATE_CRITICAL` (%)      | `15`      |
//! | `QUEUEWATCH_PROCESSING_TIME_WARNING_MS`   | `30000`   |
//! | `QUEUEWATCH_PROCESSING_TIME_CRITICAL_MS`  | `60000`   |
//! | `QUEUEWATCH_METRICS_CAPACITY`             | `1000`    |
//! | `QUEUEWATCH_METRICS_QUEUE_CAPACITY`       | `50`      |
//! | `QUEUEWATCH_METRICS_WINDOW_MS` (0 = all)  | `300000`  |
//! | `QUEUEWATCH_ALERT_TTL_MS` (0 = never)     | unset     |
//! | `QUEUEWATCH_RECENT_ACTIVITY`              | `20`      |
//!
//! # Example
//!
//! ```
//! # use queuewatch::config::QueueWatchConfig;
//! # use std::time::Duration;
//! let config = QueueWatchConfig::new()
//!     .with_queues(["email", "reports"])
//!     .with_monitor_interval(Duration::from_secs(10));
//!
//! assert!(config.validate().is_ok());
//! ```
use std::{fmt::Display, str::FromStr, time::Duration};

use thiserror::Error;

use crate::{
    dashboard::DEFAULT_RECENT_ACTIVITY,
    health::HealthThresholds,
    metrics::{MetricsWindow, DEFAULT_CAPACITY, DEFAULT_QUEUE_CAPACITY},
    monitor::DEFAULT_QUEUE_TIMEOUT,
};

pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_QUEUE: &str = "default";

const QUEUES: &str = "QUEUEWATCH_QUEUES";
const MONITOR_INTERVAL_MS: &str = "QUEUEWATCH_MONITOR_INTERVAL_MS";
const QUEUE_TIMEOUT_MS: &str = "QUEUEWATCH_QUEUE_TIMEOUT_MS";
const QUEUE_SIZE_WARNING: &str = "QUEUEWATCH_QUEUE_SIZE_WARNING";
const QUEUE_SIZE_CRITICAL: &str = "QUEUEWATCH_QUEUE_SIZE_CRITICAL";
const ERROR_RATE_WARNING: &str = "QUEUEWATCH_ERROR_RATE_WARNING";
const ERROR_RATE_CRITICAL: &str = "QUEUEWATCH_ERROR_RATE_CRITICAL";
const PROCESSING_TIME_WARNING_MS: &str = "QUEUEWATCH_PROCESSING_TIME_WARNING_MS";
const PROCESSING_TIME_CRITICAL_MS: &str = "QUEUEWATCH_PROCESSING_TIME_CRITICAL_MS";
const METRICS_CAPACITY: &str = "QUEUEWATCH_METRICS_CAPACITY";
const METRICS_QUEUE_CAPACITY: &str = "QUEUEWATCH_METRICS_QUEUE_CAPACITY";
const METRICS_WINDOW_MS: &str = "QUEUEWATCH_METRICS_WINDOW_MS";
const ALERT_TTL_MS: &str = "QUEUEWATCH_ALERT_TTL_MS";
const RECENT_ACTIVITY: &str = "QUEUEWATCH_RECENT_ACTIVITY";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: impl Display, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueWatchConfig {
    pub queues: Vec<String>,
    pub monitor_interval: Duration,
    /// Upper bound on fetching the stats of a single queue.
    pub queue_timeout: Duration,
    pub thresholds: HealthThresholds,
    pub metrics_capacity: usize,
    pub metrics_queue_capacity: usize,
    pub metrics_window: MetricsWindow,
    /// Alerts older than this are dropped. `None` keeps alerts until they are cleared.
    pub alert_ttl: Option<Duration>,
    pub recent_activity: usize,
}

impl Default for QueueWatchConfig {
    fn default() -> Self {
        Self {
            queues: vec![DEFAULT_QUEUE.to_owned()],
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            thresholds: HealthThresholds::default(),
            metrics_capacity: DEFAULT_CAPACITY,
            metrics_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            metrics_window: MetricsWindow::default(),
            alert_ttl: None,
            recent_activity: DEFAULT_RECENT_ACTIVITY,
        }
    }
}

impl QueueWatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_metrics_capacity(mut self, capacity: usize, queue_capacity: usize) -> Self {
        self.metrics_capacity = capacity;
        self.metrics_queue_capacity = queue_capacity;
        self
    }

    pub fn with_metrics_window(mut self, window: MetricsWindow) -> Self {
        self.metrics_window = window;
        self
    }

    pub fn with_alert_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.alert_ttl = ttl;
        self
    }

    pub fn with_recent_activity(mut self, recent_activity: usize) -> Self {
        self.recent_activity = recent_activity;
        self
    }

    /// Loads the configuration from `QUEUEWATCH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration from any key/value source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        if let Some(queues) = get(QUEUES) {
            config.queues = queues
                .split(',')
                .map(str::trim)
                .filter(|queue| !queue.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(ms) = parse::<u64>(get(MONITOR_INTERVAL_MS), MONITOR_INTERVAL_MS)? {
            config.monitor_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(get(QUEUE_TIMEOUT_MS), QUEUE_TIMEOUT_MS)? {
            config.queue_timeout = Duration::from_millis(ms);
        }

        let thresholds = &mut config.thresholds;
        if let Some(value) = parse(get(QUEUE_SIZE_WARNING), QUEUE_SIZE_WARNING)? {
            thresholds.queue_size_warning = value;
        }
        if let Some(value) = parse(get(QUEUE_SIZE_CRITICAL), QUEUE_SIZE_CRITICAL)? {
            thresholds.queue_size_critical = value;
        }
        if let Some(value) = parse(get(ERROR_RATE_WARNING), ERROR_RATE_WARNING)? {
            thresholds.error_rate_warning = value;
        }
        if let Some(value) = parse(get(ERROR_RATE_CRITICAL), ERROR_RATE_CRITICAL)? {
            thresholds.error_rate_critical = value;
        }
        if let Some(value) = parse(get(PROCESSING_TIME_WARNING_MS), PROCESSING_TIME_WARNING_MS)? {
            thresholds.processing_time_warning_ms = value;
        }
        if let Some(value) = parse(get(PROCESSING_TIME_CRITICAL_MS), PROCESSING_TIME_CRITICAL_MS)? {
            thresholds.processing_time_critical_ms = value;
        }

        if let Some(value) = parse(get(METRICS_CAPACITY), METRICS_CAPACITY)? {
            config.metrics_capacity = value;
        }
        if let Some(value) = parse(get(METRICS_QUEUE_CAPACITY), METRICS_QUEUE_CAPACITY)? {
            config.metrics_queue_capacity = value;
        }
        if let Some(ms) = parse::<u64>(get(METRICS_WINDOW_MS), METRICS_WINDOW_MS)? {
            config.metrics_window = match ms {
                0 => MetricsWindow::AllTime,
                ms => MetricsWindow::Last(Duration::from_millis(ms)),
            };
        }
        if let Some(ms) = parse::<u64>(get(ALERT_TTL_MS), ALERT_TTL_MS)? {
            config.alert_ttl = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(value) = parse(get(RECENT_ACTIVITY), RECENT_ACTIVITY)? {
            config.recent_activity = value;
        }

        config.validate()?;
        tracing::debug!(?config, "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(queue) = self.queues.iter().find(|queue| queue.trim().is_empty()) {
            return Err(ConfigError::invalid(QUEUES, queue, "queue names must not be empty"));
        }
        if self.monitor_interval.is_zero() {
            return Err(ConfigError::invalid(MONITOR_INTERVAL_MS, 0, "must be positive"));
        }
        if self.queue_timeout.is_zero() {
            return Err(ConfigError::invalid(QUEUE_TIMEOUT_MS, 0, "must be positive"));
        }

        let t = &self.thresholds;
        if t.queue_size_warning > t.queue_size_critical {
            return Err(ConfigError::invalid(
                QUEUE_SIZE_WARNING,
                t.queue_size_warning,
                format!("must not exceed the critical threshold {}", t.queue_size_critical),
            ));
        }
        for (key, rate) in [
            (ERROR_RATE_WARNING, t.error_rate_warning),
            (ERROR_RATE_CRITICAL, t.error_rate_critical),
        ] {
            if !(0.0..=100.0).contains(&rate) {
                return Err(ConfigError::invalid(key, rate, "must be a percentage between 0 and 100"));
            }
        }
        if t.error_rate_warning > t.error_rate_critical {
            return Err(ConfigError::invalid(
                ERROR_RATE_WARNING,
                t.error_rate_warning,
                format!("must not exceed the critical threshold {}", t.error_rate_critical),
            ));
        }
        if t.processing_time_warning_ms > t.processing_time_critical_ms {
            return Err(ConfigError::invalid(
                PROCESSING_TIME_WARNING_MS,
                t.processing_time_warning_ms,
                format!(
                    "must not exceed the critical threshold {}",
                    t.processing_time_critical_ms
                ),
            ));
        }

        if self.metrics_capacity == 0 {
            return Err(ConfigError::invalid(METRICS_CAPACITY, 0, "must be positive"));
        }
        if self.metrics_queue_capacity == 0 {
            return Err(ConfigError::invalid(METRICS_QUEUE_CAPACITY, 0, "must be positive"));
        }
        Ok(())
    }
}

fn parse<T>(value: Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .map(|value| {
            value
                .parse()
                .map_err(|err: T::Err| ConfigError::invalid(key, &value, err.to_string()))
        })
        .transpose()
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<QueueWatchConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        QueueWatchConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config, QueueWatchConfig::default());
        assert_eq!(config.queues, vec!["default"]);
        assert_eq!(config.monitor_interval, Duration::from_secs(30));
        assert_eq!(config.queue_timeout, Duration::from_secs(5));
        assert_eq!(config.thresholds.queue_size_critical, 500);
        assert_eq!(config.metrics_capacity, 1000);
        assert_eq!(config.metrics_queue_capacity, 50);
        assert_eq!(
            config.metrics_window,
            MetricsWindow::Last(Duration::from_secs(300))
        );
        assert_eq!(config.alert_ttl, None);
        assert_eq!(config.recent_activity, 20);
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("QUEUEWATCH_QUEUES", " email, reports ,,"),
            ("QUEUEWATCH_MONITOR_INTERVAL_MS", "1000"),
            ("QUEUEWATCH_QUEUE_SIZE_WARNING", "10"),
            ("QUEUEWATCH_ERROR_RATE_CRITICAL", "25.5"),
            ("QUEUEWATCH_METRICS_WINDOW_MS", "0"),
            ("QUEUEWATCH_ALERT_TTL_MS", "60000"),
            ("QUEUEWATCH_RECENT_ACTIVITY", "5"),
        ])
        .unwrap();

        assert_eq!(config.queues, vec!["email", "reports"]);
        assert_eq!(config.monitor_interval, Duration::from_secs(1));
        assert_eq!(config.thresholds.queue_size_warning, 10);
        assert_eq!(config.thresholds.error_rate_critical, 25.5);
        assert_eq!(config.metrics_window, MetricsWindow::AllTime);
        assert_eq!(config.alert_ttl, Some(Duration::from_secs(60)));
        assert_eq!(config.recent_activity, 5);
    }

    #[test]
    fn zero_alert_ttl_means_never() {
        let config = load(&[("QUEUEWATCH_ALERT_TTL_MS", "0")]).unwrap();

        assert_eq!(config.alert_ttl, None);
    }

    #[test]
    fn blank_values_are_unset() {
        let config = load(&[("QUEUEWATCH_MONITOR_INTERVAL_MS", "  ")]).unwrap();

        assert_eq!(config.monitor_interval, DEFAULT_MONITOR_INTERVAL);
    }

    #[test]
    fn unparsable_value() {
        assert_matches!(
            load(&[("QUEUEWATCH_QUEUE_SIZE_CRITICAL", "lots")]),
            Err(ConfigError::Invalid { key: "QUEUEWATCH_QUEUE_SIZE_CRITICAL", value, .. }) if value == "lots"
        );
    }

    #[test]
    fn warning_above_critical() {
        assert_matches!(
            load(&[("QUEUEWATCH_QUEUE_SIZE_WARNING", "600")]),
            Err(ConfigError::Invalid {
                key: "QUEUEWATCH_QUEUE_SIZE_WARNING",
                ..
            })
        );
        assert_matches!(
            load(&[("QUEUEWATCH_PROCESSING_TIME_CRITICAL_MS", "1000")]),
            Err(ConfigError::Invalid {
                key: "QUEUEWATCH_PROCESSING_TIME_WARNING_MS",
                ..
            })
        );
    }

    #[test]
    fn error_rate_must_be_a_percentage() {
        assert_matches!(
            load(&[("QUEUEWATCH_ERROR_RATE_CRITICAL", "150")]),
            Err(ConfigError::Invalid {
                key: "QUEUEWATCH_ERROR_RATE_CRITICAL",
                ..
            })
        );
    }

    #[test]
    fn zero_interval_rejected() {
        assert_matches!(
            load(&[("QUEUEWATCH_MONITOR_INTERVAL_MS", "0")]),
            Err(ConfigError::Invalid {
                key: "QUEUEWATCH_MONITOR_INTERVAL_MS",
                ..
            })
        );
    }

    #[test]
    fn builder() {
        let config = QueueWatchConfig::new()
            .with_queues(["email"])
            .with_metrics_capacity(10, 0);

        assert_matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "QUEUEWATCH_METRICS_QUEUE_CAPACITY",
                ..
            })
        );
    }
}
