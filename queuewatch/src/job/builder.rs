use serde::Serialize;

use crate::{backoff::Backoff, gateway::JobQueueGateway};

use super::{JobHandle, JobOptions, NewJob};

/// Builder for a [`NewJob`].
///
/// # Example
///
/// ```
/// # use queuewatch::job::builder::JobBuilder;
/// # use queuewatch::backoff::Backoff;
/// let job = JobBuilder::new("send_welcome_email")
///     .with_payload(serde_json::json!({ "user_id": 7 }))
///     .with_max_attempts(5)
///     .with_backoff(Backoff::fixed(1000))
///     .with_tags(vec!["onboarding"])
///     .build();
///
/// assert_eq!(job.options.max_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct JobBuilder {
    name: String,
    payload: serde_json::Value,
    options: JobOptions,
}

impl JobBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: serde_json::Value::Null,
            options: JobOptions::default(),
        }
    }

    pub fn with_payload(self, payload: serde_json::Value) -> Self {
        Self { payload, ..self }
    }

    /// Serializes any data into the job payload.
    pub fn with_data<D: Serialize>(self, data: &D) -> Result<Self, serde_json::Error> {
        Ok(Self {
            payload: serde_json::to_value(data)?,
            ..self
        })
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.options.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.options.max_attempts = max_attempts;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.options.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: i64) -> Self {
        self.options.delay_ms = delay_ms;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.options.backoff = Some(backoff);
        self
    }

    pub fn without_backoff(mut self) -> Self {
        self.options.backoff = None;
        self
    }

    pub fn remove_on_complete(mut self, remove: bool) -> Self {
        self.options.remove_on_complete = remove;
        self
    }

    pub fn remove_on_fail(mut self, remove: bool) -> Self {
        self.options.remove_on_fail = remove;
        self
    }

    pub fn with_tags(mut self, tags: Vec<impl Into<String>>) -> Self {
        self.options.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.options.metadata = metadata;
        self
    }

    pub fn build(self) -> NewJob {
        NewJob {
            name: self.name,
            payload: self.payload,
            options: self.options,
        }
    }

    pub async fn enqueue(self, gateway: &JobQueueGateway) -> crate::Result<JobHandle> {
        let job = self.build();
        gateway.enqueue(job.name, job.payload, job.options).await
    }
}
