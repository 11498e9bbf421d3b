use std::{sync::Arc, time::Duration};

use queuewatch::{
    broker::{memory::InMemoryBroker, Broker},
    prelude::*,
};
use rand::Rng;
use tokio::time::Instant;

const QUEUES: &str = "QUEUEWATCH_QUEUES";
const MONITOR_INTERVAL_MS: &str = "QUEUEWATCH_MONITOR_INTERVAL_MS";
const DEMO_QUEUES: [&str; 2] = ["email", "reports"];
const JOBS_PER_QUEUE: usize = 60;
const RUN_FOR: Duration = Duration::from_secs(3);

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut config = QueueWatchConfig::from_env()?;
    if std::env::var(QUEUES).is_err() {
        config = config.with_queues(DEMO_QUEUES);
    }
    if std::env::var(MONITOR_INTERVAL_MS).is_err() {
        config = config.with_monitor_interval(Duration::from_millis(500));
    }

    let broker = InMemoryBroker::with_queues(config.queues.iter().cloned());
    let watch = Arc::new(QueueWatch::new(Arc::new(broker.clone()), config));

    for queue in watch.registry().names() {
        let gateway = watch.gateway(&queue)?;
        for n in 0..JOBS_PER_QUEUE {
            let priority = rand::thread_rng().gen_range(0..5);
            JobBuilder::new(format!("{queue}_job"))
                .with_payload(serde_json::json!({ "n": n }))
                .with_priority(priority)
                .with_backoff(Backoff::fixed(50))
                .enqueue(gateway)
                .await?;
        }
    }

    watch.start_monitoring();

    let deadline = Instant::now() + RUN_FOR;
    let workers: Vec<_> = watch
        .registry()
        .names()
        .into_iter()
        .enumerate()
        .map(|(i, queue)| {
            // Later queues fail more often so the dashboard shows some variety.
            let failure_rate = (0.05 + 0.15 * i as f64).min(0.9);
            tokio::spawn(work(
                broker.clone(),
                watch.clone(),
                queue,
                failure_rate,
                deadline,
            ))
        })
        .collect();
    for worker in workers {
        worker.await?;
    }

    let snapshot = watch.snapshot().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    match Arc::try_unwrap(watch) {
        Ok(watch) => watch.graceful_shutdown().await?,
        Err(watch) => watch.stop_monitoring().await?,
    }
    Ok(())
}

/// Pulls jobs off one queue until the deadline, reporting every outcome.
async fn work(
    broker: InMemoryBroker,
    watch: Arc<QueueWatch>,
    queue: String,
    failure_rate: f64,
    deadline: Instant,
) {
    while Instant::now() < deadline {
        let job = match broker.dequeue(&queue).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::time::sleep(Duration::from_millis(25)).await;
                continue;
            }
            Err(err) => {
                tracing::error!(?err, %queue, "Worker failed to dequeue: {err}");
                return;
            }
        };

        let duration_ms = rand::thread_rng().gen_range(5..40);
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        let failed = rand::thread_rng().gen_bool(failure_rate);

        let metric = if failed {
            if let Err(err) = broker
                .ack_failed(&queue, job.id, "simulated failure".to_owned())
                .await
            {
                tracing::error!(?err, %queue, job_id = %job.id, "Failed to ack job: {err}");
            }
            JobMetric::failure(&queue, &job.name, duration_ms, "simulated failure")
        } else {
            if let Err(err) = broker.ack_completed(&queue, job.id).await {
                tracing::error!(?err, %queue, job_id = %job.id, "Failed to ack job: {err}");
            }
            JobMetric::success(&queue, &job.name, duration_ms)
        };
        watch.record(metric.with_attempts(job.attempts_made));
    }
}
