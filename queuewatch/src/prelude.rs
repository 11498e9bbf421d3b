//! The purpose of this module is to alleviate the need to import many of the `queuewatch` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use queuewatch::prelude::*;
//! ```
pub use crate::admin::{Admin, AdminFailure};
pub use crate::alert::{Alert, AlertKind, AlertSeverity, AlertStore};
pub use crate::backoff::Backoff;
pub use crate::broker::{Broker, BrokerError, JobRange, QueueStats};
pub use crate::config::QueueWatchConfig;
pub use crate::dashboard::{DashboardAggregator, DashboardSnapshot};
pub use crate::gateway::JobQueueGateway;
pub use crate::health::{HealthStatus, HealthThresholds, QueueHealth, SystemHealth};
pub use crate::job::builder::JobBuilder;
pub use crate::job::{JobHandle, JobId, JobOptions, JobStatus};
pub use crate::metrics::{JobMetric, MetricsRecorder, MetricsWindow};
pub use crate::{QueueWatch, QueueWatchError};
