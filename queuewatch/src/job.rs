//! Job types shared between the gateway and the broker.
//!
//! A job is owned by the broker once it has been enqueued. This crate only ever holds transient
//! copies of [`JobRecord`]s returned by the broker, together with the outcome metrics recorded
//! in [`crate::metrics::MetricsRecorder`].
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::Backoff;

pub mod builder;

/// The largest priority accepted by the broker.
pub const MAX_PRIORITY: u32 = 2_097_152;

#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<JobId> for u64 {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Delayed => "delayed",
        };
        f.write_str(status)
    }
}

/// Per job options passed through to the broker.
///
/// Options usually arrive as JSON through the admin surface, so every field has a default and
/// numeric fields are signed: negative values are representable and rejected by
/// [`JobOptions::validate`] before anything reaches the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    pub priority: u32,
    pub max_attempts: u32,
    pub timeout_ms: Option<i64>,
    pub delay_ms: i64,
    pub backoff: Option<Backoff>,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            max_attempts: 3,
            timeout_ms: None,
            delay_ms: 0,
            backoff: Some(Backoff::exponential(2000)),
            remove_on_complete: false,
            remove_on_fail: false,
            tags: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }
}

impl JobOptions {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::MaxAttempts);
        }
        if let Some(timeout) = self.timeout_ms.filter(|timeout| *timeout <= 0) {
            return Err(ValidationError::Timeout(timeout));
        }
        if self.delay_ms < 0 {
            return Err(ValidationError::Delay(self.delay_ms));
        }
        if self.priority > MAX_PRIORITY {
            return Err(ValidationError::Priority(self.priority));
        }
        if let Some(backoff) = &self.backoff {
            backoff.validate()?;
        }
        Ok(())
    }
}

/// A request to enqueue a single job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub options: JobOptions,
}

impl NewJob {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            options: JobOptions::default(),
        }
    }

    pub fn with_options(self, options: JobOptions) -> Self {
        Self { options, ..self }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        self.options.validate()
    }
}

/// A job as reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub options: JobOptions,
    pub status: JobStatus,
    pub attempts_made: u32,
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub process_after: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id,
            queue: self.queue.clone(),
            name: self.name.clone(),
        }
    }

    /// The instant used when deciding whether a job is old enough to be cleaned.
    pub fn age_reference(&self) -> DateTime<Utc> {
        self.finished_at
            .or(self.processed_at)
            .unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: JobId,
    pub queue: String,
    pub name: String,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Job name must not be empty")]
    EmptyName,
    #[error("Max attempts must be at least 1")]
    MaxAttempts,
    #[error("Timeout must be positive, got {0}ms")]
    Timeout(i64),
    #[error("Delay must not be negative, got {0}ms")]
    Delay(i64),
    #[error("Priority must be at most 2097152, got {0}")]
    Priority(u32),
    #[error("Backoff delay must not be negative, got {0}ms")]
    BackoffDelay(i64),
    #[error("Backoff jitter must be between 0 and 1, got {0}")]
    BackoffJitter(f64),
}
