//! The background task that periodically evaluates every registered queue.
//!
//! Each tick fetches fresh stats for all queues concurrently, each fetch bounded by the queue
//! timeout, classifies them with the [`HealthEvaluator`] and reconciles the [`AlertStore`]:
//!
//! - a breached dimension raises its alert, or updates it when the severity or message changed,
//! - a dimension that is no longer breached has its alert cleared,
//! - a paused queue with waiting jobs raises a low severity `queue_paused` alert,
//! - a queue that could not be reached is reported unhealthy with a critical `monitoring_failed`
//!   alert, cleared again on the next successful tick.
//!
//! A failing queue never aborts the tick for the others.
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use thiserror::Error;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    alert::AlertStore,
    broker::QueueStats,
    gateway::JobQueueGateway,
    health::{HealthEvaluator, SystemHealth},
    metrics::MetricsRecorder,
    registry::QueueRegistry,
    QueueWatchError,
};

pub(crate) mod runner;

use runner::MonitorRunner;

pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a queue could not be evaluated during a tick. Logged and turned into an alert, never
/// returned from the tick itself.
#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Broker(#[from] QueueWatchError),
    #[error("Stats for queue {queue} did not arrive within {after:?}")]
    TimedOut { queue: String, after: Duration },
}

/// Fetches stats for one queue, giving up after `timeout`.
pub(crate) async fn fetch_stats(
    gateway: &JobQueueGateway,
    timeout: Duration,
) -> Result<QueueStats, TickError> {
    match tokio::time::timeout(timeout, gateway.stats()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TickError::TimedOut {
            queue: gateway.name().to_owned(),
            after: timeout,
        }),
    }
}

struct Running {
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A cancellable periodic task driving health evaluation.
pub struct MonitoringLoop {
    runner: Arc<MonitorRunner>,
    running: Mutex<Option<Running>>,
}

impl MonitoringLoop {
    pub fn new(
        registry: Arc<QueueRegistry>,
        recorder: MetricsRecorder,
        alerts: AlertStore,
        evaluator: HealthEvaluator,
        queue_timeout: Duration,
    ) -> Self {
        Self {
            runner: Arc::new(MonitorRunner::new(
                registry,
                recorder,
                alerts,
                evaluator,
                queue_timeout,
            )),
            running: Mutex::new(None),
        }
    }

    /// Spawns the loop, ticking immediately and then every `interval`.
    ///
    /// Returns `false` without doing anything when the loop is already running. Must be called
    /// from within a tokio runtime.
    pub fn start(&self, interval: Duration) -> bool {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            tracing::debug!("Monitoring loop already running");
            return false;
        }
        let interval = if interval.is_zero() {
            tracing::warn!("Monitoring interval of zero requested, using 1ms");
            Duration::from_millis(1)
        } else {
            interval
        };

        let cancellation_token = CancellationToken::new();
        let handle = tokio::spawn({
            let runner = self.runner.clone();
            let cancellation_token = cancellation_token.clone();
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = cancellation_token.cancelled() => {
                            tracing::debug!("Shutting down the monitoring loop");
                            break;
                        },
                        _ = ticker.tick() => {
                            runner.tick().await;
                        }
                    }
                }
            }
        });
        tracing::info!(?interval, "Started monitoring loop");
        *running = Some(Running {
            cancellation_token,
            handle,
        });
        true
    }

    /// Stops the loop and waits for it to finish, so no tick runs once this returns. A no-op
    /// when the loop is not running.
    pub async fn stop(&self) -> Result<(), QueueWatchError> {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Running {
            cancellation_token,
            handle,
        }) = running
        else {
            return Ok(());
        };
        cancellation_token.cancel();
        handle.await.map_err(|err| {
            tracing::error!(?err, "Monitoring loop did not shut down cleanly: {err}");
            QueueWatchError::GracefulShutdownFailed
        })?;
        tracing::info!("Stopped monitoring loop");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Runs a single evaluation now, independently of the background task.
    pub async fn tick(&self) -> SystemHealth {
        self.runner.tick().await
    }

    /// Number of completed ticks, whether background or on demand.
    pub fn tick_count(&self) -> u64 {
        self.runner.tick_count()
    }
}

impl Drop for MonitoringLoop {
    fn drop(&mut self) {
        if let Some(running) = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            running.cancellation_token.cancel();
        }
    }
}
