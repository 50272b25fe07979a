//! The generic worker loop.
//!
//! - pending entries of this consumer are drained first on startup
//! - new entries are read with BLOCK, raced only against shutdown, so a job
//!   that has started always finishes before the worker returns
//! - up to `max_concurrent_jobs` jobs of a batch run at once
//! - abandoned entries of other consumers are claimed periodically

use crate::config::WorkerConfig;
use crate::consumer::{Batch, StreamConsumer};
use crate::dlq::DlqManager;
use crate::error::StreamError;
use crate::event::StreamEvent;
use crate::metrics::StreamMetrics;
use crate::registry::{StreamJob, StreamProcessor};
use redis::aio::ConnectionManager;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const MAX_RECONNECT_BACKOFF_SECS: u64 = 30;

struct JobContext<J: StreamJob, P: StreamProcessor<J>> {
    consumer: StreamConsumer,
    dlq: DlqManager,
    processor: Arc<P>,
    metrics: StreamMetrics,
    _job: PhantomData<fn() -> J>,
}

pub struct StreamWorker<J: StreamJob, P: StreamProcessor<J>> {
    ctx: Arc<JobContext<J, P>>,
    config: WorkerConfig,
    semaphore: Arc<Semaphore>,
}

/// Resolves once the flag is true or the sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

impl<J: StreamJob, P: StreamProcessor<J>> StreamWorker<J, P> {
    pub fn new(redis: ConnectionManager, processor: P, config: WorkerConfig) -> Self {
        Self::with_arc_processor(redis, Arc::new(processor), config)
    }

    pub fn with_arc_processor(redis: ConnectionManager, processor: Arc<P>, config: WorkerConfig) -> Self {
        let ctx = JobContext {
            consumer: StreamConsumer::new(redis.clone(), config.clone()),
            dlq: DlqManager::new(redis, config.dlq_stream.clone()),
            metrics: StreamMetrics::new(config.stream_name.clone(), processor.name()),
            processor,
            _job: PhantomData,
        };

        Self {
            ctx: Arc::new(ctx),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config,
        }
    }

    /// Consumer handle for health reporting
    pub fn consumer(&self) -> StreamConsumer {
        self.ctx.consumer.clone()
    }

    /// Run until the shutdown flag flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StreamError> {
        info!(
            consumer_id = %self.config.consumer_id,
            stream = %self.config.stream_name,
            group = %self.config.consumer_group,
            processor = %self.ctx.processor.name(),
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Starting stream worker"
        );

        self.ctx.consumer.init_consumer_group().await?;
        self.drain_own_pending(&shutdown).await;

        let claim_interval = Duration::from_millis(self.config.claim_interval_ms);
        let mut last_claim = Instant::now();
        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let read = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                read = self.ctx.consumer.read_new::<J>(self.config.batch_size) => read,
            };

            match read {
                Ok(batch) => {
                    if consecutive_errors > 0 {
                        info!(consecutive_errors, "Stream connection recovered");
                        consecutive_errors = 0;
                    }
                    self.process_batch(batch, &shutdown).await;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let backoff = 2u64
                        .pow(consecutive_errors.min(5))
                        .min(MAX_RECONNECT_BACKOFF_SECS);
                    warn!(error = %e, consecutive_errors, backoff_secs = backoff, "Stream read failed, backing off");

                    tokio::select! {
                        _ = wait_for_shutdown(&mut shutdown) => break,
                        _ = tokio::time::sleep(Duration::from_secs(backoff)) => {}
                    }
                    continue;
                }
            }

            if last_claim.elapsed() >= claim_interval {
                last_claim = Instant::now();
                match self.ctx.consumer.claim_abandoned::<J>(self.config.batch_size).await {
                    Ok(batch) if !batch.is_empty() => {
                        self.ctx.metrics.entries_claimed(batch.len());
                        self.process_batch(batch, &shutdown).await;
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "Claiming abandoned entries failed"),
                }
            }
        }

        info!(stream = %self.config.stream_name, "Stream worker stopped");
        Ok(())
    }

    async fn drain_own_pending(&self, shutdown: &watch::Receiver<bool>) {
        let mut last_head: Option<String> = None;

        while !*shutdown.borrow() {
            let batch = match self.ctx.consumer.read_pending::<J>(self.config.batch_size).await {
                Ok(batch) if batch.is_empty() => return,
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "Reading pending entries failed");
                    return;
                }
            };

            // Entries that could not be acknowledged come back at the head.
            let head = batch
                .events
                .first()
                .map(|e| e.stream_id.clone())
                .or_else(|| batch.malformed.first().map(|m| m.stream_id.clone()));
            if head.is_some() && head == last_head {
                warn!(stream_id = ?head, "Pending entries are not draining, continuing with new entries");
                return;
            }
            last_head = head;

            info!(count = batch.len(), "Recovering pending entries");
            self.process_batch(batch, shutdown).await;
        }
    }

    async fn process_batch(&self, batch: Batch<J>, shutdown: &watch::Receiver<bool>) {
        for entry in &batch.malformed {
            match self.ctx.dlq.move_malformed(entry).await {
                Ok(_) => {
                    self.ctx.metrics.job_dead_lettered();
                    if let Err(e) = self.ctx.consumer.ack(&entry.stream_id).await {
                        error!(error = %e, stream_id = %entry.stream_id, "Failed to ack malformed entry");
                    }
                }
                Err(e) => error!(error = %e, stream_id = %entry.stream_id, "Failed to dead-letter malformed entry"),
            }
        }

        let mut tasks = JoinSet::new();
        for event in batch.events {
            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let ctx = Arc::clone(&self.ctx);
            let shutdown = shutdown.clone();

            tasks.spawn(async move {
                handle_event(&ctx, event, shutdown).await;
                drop(permit);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Job task panicked");
            }
        }
    }
}

async fn handle_event<J: StreamJob, P: StreamProcessor<J>>(
    ctx: &JobContext<J, P>,
    event: StreamEvent<J>,
    mut shutdown: watch::Receiver<bool>,
) {
    let StreamEvent { stream_id, job, .. } = event;
    let job_id = job.job_id();
    ctx.metrics.job_received();

    let start = Instant::now();
    let err = match ctx.processor.process(&job).await {
        Ok(()) => {
            ctx.metrics.job_processed(start.elapsed());
            if let Err(e) = ctx.consumer.ack(&stream_id).await {
                error!(error = %e, stream_id = %stream_id, job_id = %job_id, "Failed to ack processed job");
            }
            return;
        }
        Err(err) => err,
    };

    let category = err.category();
    ctx.metrics.job_failed(category.as_str());
    let retry_count = job.retry_count();

    if err.should_retry(retry_count, job.max_retries()) {
        let delay = Duration::from_millis(err.backoff_delay_ms(retry_count));
        warn!(
            job_id = %job_id,
            error = %err,
            category = category.as_str(),
            retry_count,
            delay_ms = delay.as_millis() as u64,
            "Job failed, retrying"
        );

        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => {
                info!(job_id = %job_id, "Shutdown during backoff, entry stays pending");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        match ctx.consumer.requeue(&stream_id, &job.with_retry()).await {
            Ok(_) => ctx.metrics.job_retried(),
            Err(e) => error!(error = %e, job_id = %job_id, "Failed to re-enqueue job"),
        }
        return;
    }

    error!(
        job_id = %job_id,
        error = %err,
        category = category.as_str(),
        retry_count,
        "Job failed permanently, moving to DLQ"
    );

    if let Err(e) = ctx.dlq.move_to_dlq(&job, &err, &stream_id).await {
        error!(error = %e, job_id = %job_id, "Failed to dead-letter job, entry stays pending");
        return;
    }
    ctx.metrics.job_dead_lettered();
    ctx.processor.on_dead_letter(&job, &err).await;

    if let Err(e) = ctx.consumer.ack(&stream_id).await {
        error!(error = %e, job_id = %job_id, "Failed to ack dead-lettered job");
    }
}
