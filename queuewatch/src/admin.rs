//! Transport agnostic handlers for the administrative surface.
//!
//! An HTTP layer mounts these handlers as it sees fit, for example:
//!
//! | Route                     | Handler              |
//! |---------------------------|----------------------|
//! | `GET /queue/status`       | [`Admin::status`]    |
//! | `GET /queue/dashboard`    | [`Admin::dashboard`] |
//! | `POST /queue/job`         | [`Admin::add_job`]   |
//!
//! Requests are plain serde types and every failure is an [`AdminFailure`], a structured payload
//! naming the queue and operation that failed.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    dashboard::{DashboardAggregator, DashboardSnapshot, QueueStatus},
    job::{JobHandle, JobId, JobOptions, JobStatus},
    QueueWatchError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusQuery {
    pub queue: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddJobRequest {
    pub queue: String,
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub options: Option<JobOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobActionRequest {
    pub queue: String,
    pub job_id: JobId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueActionRequest {
    pub queue: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanRequest {
    pub queue: String,
    pub grace_ms: u64,
    pub status: JobStatus,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobActionResponse {
    pub queue: String,
    pub job_id: JobId,
    /// `false` when the job does not exist or is not in a state the action applies to.
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanResponse {
    pub queue: String,
    pub removed: Vec<JobId>,
}

/// The failure payload returned by every handler.
///
/// `error` is a stable machine readable code: `unavailable`, `unknown_queue`,
/// `validation_error` or `internal_error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminFailure {
    pub error: String,
    pub message: String,
    pub queue: Option<String>,
    pub operation: String,
}

impl AdminFailure {
    fn new(err: QueueWatchError, operation: &'static str, queue: Option<&str>) -> Self {
        let code = match &err {
            QueueWatchError::QueueUnavailable { .. } => "unavailable",
            QueueWatchError::UnknownQueue(_) => "unknown_queue",
            QueueWatchError::Validation(_) => "validation_error",
            QueueWatchError::QueueNameMismatch { .. } | QueueWatchError::GracefulShutdownFailed => {
                "internal_error"
            }
        };
        tracing::warn!(?err, operation, queue, code, "Admin request failed: {err}");
        Self {
            error: code.to_owned(),
            message: err.to_string(),
            queue: queue.map(str::to_owned),
            operation: operation.to_owned(),
        }
    }

    /// The HTTP status a transport would typically answer with.
    pub fn status_code(&self) -> u16 {
        match self.error.as_str() {
            "unknown_queue" => 404,
            "validation_error" => 400,
            "unavailable" => 503,
            _ => 500,
        }
    }
}

type AdminResult<T> = Result<T, AdminFailure>;

#[derive(Debug, Clone)]
pub struct Admin {
    dashboard: DashboardAggregator,
}

impl Admin {
    pub fn new(dashboard: DashboardAggregator) -> Self {
        Self { dashboard }
    }

    pub async fn status(&self, query: StatusQuery) -> AdminResult<QueueStatus> {
        self.dashboard
            .queue_status(&query.queue)
            .await
            .map_err(|err| AdminFailure::new(err, "status", Some(&query.queue)))
    }

    pub async fn dashboard(&self) -> AdminResult<DashboardSnapshot> {
        Ok(self.dashboard.snapshot().await)
    }

    pub async fn add_job(&self, request: AddJobRequest) -> AdminResult<JobHandle> {
        self.dashboard
            .add_job(
                &request.queue,
                request.name,
                request.data,
                request.options.unwrap_or_default(),
            )
            .await
            .map_err(|err| AdminFailure::new(err, "add_job", Some(&request.queue)))
    }

    pub async fn retry(&self, request: JobActionRequest) -> AdminResult<JobActionResponse> {
        let applied = self
            .dashboard
            .retry_job(&request.queue, request.job_id)
            .await
            .map_err(|err| AdminFailure::new(err, "retry", Some(&request.queue)))?;
        Ok(JobActionResponse {
            queue: request.queue,
            job_id: request.job_id,
            applied,
        })
    }

    pub async fn promote(&self, request: JobActionRequest) -> AdminResult<JobActionResponse> {
        let applied = self
            .dashboard
            .promote_job(&request.queue, request.job_id)
            .await
            .map_err(|err| AdminFailure::new(err, "promote", Some(&request.queue)))?;
        Ok(JobActionResponse {
            queue: request.queue,
            job_id: request.job_id,
            applied,
        })
    }

    pub async fn remove(&self, request: JobActionRequest) -> AdminResult<JobActionResponse> {
        let applied = self
            .dashboard
            .remove_job(&request.queue, request.job_id)
            .await
            .map_err(|err| AdminFailure::new(err, "remove", Some(&request.queue)))?;
        Ok(JobActionResponse {
            queue: request.queue,
            job_id: request.job_id,
            applied,
        })
    }

    pub async fn pause(&self, request: QueueActionRequest) -> AdminResult<()> {
        self.dashboard
            .pause_queue(&request.queue)
            .await
            .map_err(|err| AdminFailure::new(err, "pause", Some(&request.queue)))
    }

    pub async fn resume(&self, request: QueueActionRequest) -> AdminResult<()> {
        self.dashboard
            .resume_queue(&request.queue)
            .await
            .map_err(|err| AdminFailure::new(err, "resume", Some(&request.queue)))
    }

    pub async fn clean(&self, request: CleanRequest) -> AdminResult<CleanResponse> {
        let removed = self
            .dashboard
            .clean_queue(
                &request.queue,
                Duration::from_millis(request.grace_ms),
                request.status,
                request.limit,
            )
            .await
            .map_err(|err| AdminFailure::new(err, "clean", Some(&request.queue)))?;
        Ok(CleanResponse {
            queue: request.queue,
            removed,
        })
    }
}
