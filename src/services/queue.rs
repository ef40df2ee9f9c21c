use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{Job, JobRecord, JobStatusView, TaskMessage};
use crate::models::transform::Transform;
use crate::services::broker::{Broker, Delivery};

/// Job queue adapter: submits transform jobs and projects their state.
#[derive(Clone)]
pub struct JobQueue {
    broker: Arc<dyn Broker>,
    result_ttl: Duration,
}

impl JobQueue {
    pub fn new(broker: Arc<dyn Broker>, result_ttl: Duration) -> Self {
        Self { broker, result_ttl }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Enqueue a transform job. The PENDING record is written before the
    /// message is published so a worker never sees a job without a record.
    pub async fn submit(
        &self,
        input: &str,
        output: &str,
        transform: Transform,
    ) -> Result<Job, QueueError> {
        let job = Job {
            id: Uuid::new_v4().to_string(),
            name: transform.kind().task_name(),
        };

        self.broker
            .store_record(&JobRecord::pending(&job.id, &job.name), self.result_ttl)
            .await?;
        self.broker
            .publish(&TaskMessage {
                id: job.id.clone(),
                input: input.to_string(),
                output: output.to_string(),
                transform,
            })
            .await?;

        metrics::counter!("image_jobs_submitted_total", "transform" => transform.kind().to_string())
            .increment(1);
        tracing::info!(task_id = %job.id, task_name = %job.name, input = %input, "Job submitted");

        Ok(job)
    }

    /// Current state of a job, or `None` if the result backend has no record
    /// of the id (never submitted or expired).
    pub async fn status_of(&self, task_id: &str) -> Result<Option<JobStatusView>, QueueError> {
        Ok(self
            .broker
            .load_record(task_id)
            .await?
            .map(|record| JobStatusView::from(&record)))
    }

    pub async fn record(&self, task_id: &str) -> Result<Option<JobRecord>, QueueError> {
        self.broker.load_record(task_id).await
    }

    pub async fn update(&self, record: &JobRecord) -> Result<(), QueueError> {
        self.broker.store_record(record, self.result_ttl).await
    }

    pub async fn reserve(&self, worker_id: &str) -> Result<Option<Delivery>, QueueError> {
        self.broker.reserve(worker_id).await
    }

    pub async fn ack(&self, worker_id: &str, delivery: &Delivery) -> Result<(), QueueError> {
        self.broker.ack(worker_id, delivery).await
    }

    pub async fn requeue(&self, worker_id: &str, delivery: &Delivery) -> Result<(), QueueError> {
        self.broker.requeue(worker_id, delivery).await
    }

    pub async fn heartbeat(&self, worker_id: &str, ttl: Duration) -> Result<(), QueueError> {
        self.broker.heartbeat(worker_id, ttl).await
    }

    pub async fn requeue_orphans(&self) -> Result<usize, QueueError> {
        self.broker.requeue_orphans().await
    }

    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        self.broker.queue_depth().await
    }

    pub async fn health_check(&self) -> Result<(), QueueError> {
        self.broker.ping().await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}
