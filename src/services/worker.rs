use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::models::job::{JobRecord, TaskMessage};
use crate::models::transform::TransformOutcome;
use crate::services::broker::Delivery;
use crate::services::imaging::{self, TransformError};
use crate::services::queue::{JobQueue, QueueError};
use crate::services::storage::Storage;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub heartbeat_ttl: Duration,
}

/// Executes transform jobs reserved from the queue.
#[derive(Clone)]
pub struct Worker {
    queue: JobQueue,
    storage: Arc<Storage>,
    config: Arc<WorkerConfig>,
    /// Deliveries whose processing failed and that could not be handed back yet
    stranded: Arc<Mutex<Vec<Delivery>>>,
}

impl Worker {
    pub fn new(queue: JobQueue, storage: Arc<Storage>, config: WorkerConfig) -> Self {
        Self {
            queue,
            storage,
            config: Arc::new(config),
            stranded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.worker_id
    }

    /// Spawn the heartbeat task and `concurrency` job loops.
    pub fn start(self) -> JoinSet<()> {
        let mut tasks = JoinSet::new();

        let heartbeat = self.clone();
        tasks.spawn(async move { heartbeat.heartbeat_loop().await });

        for slot in 0..self.config.concurrency.max(1) {
            let worker = self.clone();
            tasks.spawn(async move { worker.job_loop(slot).await });
        }

        tracing::info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency.max(1),
            "Worker started"
        );
        tasks
    }

    async fn heartbeat_loop(&self) {
        let interval = (self.config.heartbeat_ttl / 3).max(Duration::from_millis(100));
        loop {
            if let Err(e) = self.queue.heartbeat(self.id(), self.config.heartbeat_ttl).await {
                tracing::error!(worker_id = %self.id(), error = %e, "Failed to refresh heartbeat");
            }
            sleep(interval).await;
        }
    }

    async fn job_loop(&self, slot: usize) {
        loop {
            match self.run_once().await {
                Ok(true) => {
                    tracing::debug!(slot, "Job processed, checking for next job");
                }
                Ok(false) => {
                    tracing::trace!(slot, "No jobs available, sleeping");
                    self.recover_orphans().await;
                    sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    tracing::error!(slot, error = %e, "Error processing job, will retry");
                    sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    /// Requeue jobs held by workers whose heartbeat expired.
    pub async fn recover_orphans(&self) -> usize {
        match self.queue.requeue_orphans().await {
            Ok(0) => 0,
            Ok(n) => {
                tracing::warn!(worker_id = %self.id(), requeued = n, "Requeued jobs from dead workers");
                n
            }
            Err(e) => {
                tracing::error!(error = %e, "Orphan recovery failed");
                0
            }
        }
    }

    /// Process the next job from the queue.
    /// Returns Ok(true) if a job was processed, Ok(false) if no job available.
    ///
    /// A broker failure while handling a job puts the message back on the
    /// queue instead of leaving it reserved behind a live heartbeat.
    pub async fn run_once(&self) -> Result<bool, QueueError> {
        self.queue
            .heartbeat(self.id(), self.config.heartbeat_ttl)
            .await?;
        self.return_stranded().await?;

        let delivery = match self.queue.reserve(self.id()).await? {
            Some(d) => d,
            None => return Ok(false),
        };

        let handled = match self.process(&delivery).await {
            // acknowledge only once the final state is recorded
            Ok(()) => self.queue.ack(self.id(), &delivery).await,
            Err(e) => Err(e),
        };

        if let Err(e) = handled {
            tracing::error!(
                task_id = %delivery.message.id,
                error = %e,
                "Job handling interrupted, returning it to the queue"
            );
            if let Err(requeue_err) = self.queue.requeue(self.id(), &delivery).await {
                tracing::error!(task_id = %delivery.message.id, error = %requeue_err, "Requeue failed, will retry");
                self.stranded_list().push(delivery);
            }
            return Err(e);
        }
        Ok(true)
    }

    /// Retry handing back deliveries an earlier broker failure left reserved.
    async fn return_stranded(&self) -> Result<(), QueueError> {
        let stranded = std::mem::take(&mut *self.stranded_list());

        let mut remaining = stranded.into_iter();
        while let Some(delivery) = remaining.next() {
            if let Err(e) = self.queue.requeue(self.id(), &delivery).await {
                let mut list = self.stranded_list();
                list.push(delivery);
                list.extend(remaining);
                return Err(e);
            }
            tracing::info!(task_id = %delivery.message.id, "Returned stranded job to the queue");
        }
        Ok(())
    }

    fn stranded_list(&self) -> std::sync::MutexGuard<'_, Vec<Delivery>> {
        // the list holds plain data, a poisoned lock is still usable
        self.stranded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn process(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let message = &delivery.message;
        let kind = message.transform.kind();

        tracing::info!(
            task_id = %message.id,
            transform = %kind,
            input = %message.input,
            "Processing transform job"
        );

        let mut record = self
            .queue
            .record(&message.id)
            .await?
            .unwrap_or_else(|| JobRecord::pending(&message.id, &kind.task_name()));
        record.mark_started();
        self.queue.update(&record).await?;

        let start = Instant::now();
        let result = self.execute(message).await;
        let elapsed = start.elapsed();

        metrics::histogram!("image_job_processing_seconds", "transform" => kind.to_string())
            .record(elapsed.as_secs_f64());

        match result {
            Ok(()) => {
                let outcome = TransformOutcome::completed(&message.input, &message.output, &message.transform);
                record.mark_succeeded(serde_json::to_value(&outcome)?);
                metrics::counter!("image_jobs_completed_total", "transform" => kind.to_string())
                    .increment(1);
                tracing::info!(
                    task_id = %message.id,
                    output = %message.output,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job completed successfully"
                );
            }
            Err(e) => {
                record.mark_failed(format!("Failed to apply {} to image file {}: {}", kind, message.input, e));
                metrics::counter!("image_jobs_failed_total", "transform" => kind.to_string())
                    .increment(1);
                tracing::warn!(task_id = %message.id, error = %e, "Job failed");
            }
        }

        self.queue.update(&record).await
    }

    /// Run the transform on the blocking pool.
    async fn execute(&self, message: &TaskMessage) -> Result<(), TransformError> {
        let storage = Arc::clone(&self.storage);
        let message = message.clone();

        tokio::task::spawn_blocking(move || {
            imaging::apply(&storage, &message.input, &message.output, &message.transform)
        })
        .await
        .map_err(|e| TransformError::Aborted(e.to_string()))?
    }
}
