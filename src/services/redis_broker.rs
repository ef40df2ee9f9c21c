use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use crate::models::job::{JobRecord, TaskMessage};
use crate::services::broker::{Broker, Delivery};
use crate::services::queue::QueueError;

const QUEUE_KEY: &str = "imgproc:queue";
const WORKERS_KEY: &str = "imgproc:workers";

fn processing_key(worker_id: &str) -> String {
    format!("imgproc:processing:{}", worker_id)
}

fn heartbeat_key(worker_id: &str) -> String {
    format!("imgproc:worker:{}", worker_id)
}

fn record_key(task_id: &str) -> String {
    format!("imgproc:job:{}", task_id)
}

/// Redis-backed broker: pending list, per-worker reservation lists and
/// expiring job records.
pub struct RedisBroker {
    client: redis::Client,
}

impl RedisBroker {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, message: &TaskMessage) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(message)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    async fn reserve(&self, worker_id: &str) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn().await?;
        // register before taking anything so orphan recovery can find the list
        conn.sadd::<_, _, ()>(WORKERS_KEY, worker_id).await?;

        let payload: Option<String> = conn.rpoplpush(QUEUE_KEY, processing_key(worker_id)).await?;
        let Some(payload) = payload else {
            return Ok(None);
        };

        match Delivery::from_payload(payload.clone()) {
            Ok(delivery) => Ok(Some(delivery)),
            Err(e) => {
                tracing::error!(worker_id = %worker_id, error = %e, "Discarding undecodable job message");
                conn.lrem::<_, _, ()>(processing_key(worker_id), 1, &payload)
                    .await?;
                Err(e)
            }
        }
    }

    async fn ack(&self, worker_id: &str, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        conn.lrem::<_, _, ()>(processing_key(worker_id), 1, &delivery.payload)
            .await?;
        Ok(())
    }

    async fn requeue(&self, worker_id: &str, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        // RPUSH puts the message at the end RPOPLPUSH takes from
        redis::pipe()
            .atomic()
            .lrem(processing_key(worker_id), 1, &delivery.payload)
            .ignore()
            .rpush(QUEUE_KEY, &delivery.payload)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn heartbeat(&self, worker_id: &str, ttl: Duration) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        conn.sadd::<_, _, ()>(WORKERS_KEY, worker_id).await?;
        conn.set_ex::<_, _, ()>(heartbeat_key(worker_id), "alive", ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn requeue_orphans(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn().await?;
        let workers: Vec<String> = conn.smembers(WORKERS_KEY).await?;
        let mut requeued = 0;

        for worker in workers {
            let alive: bool = conn.exists(heartbeat_key(&worker)).await?;
            if alive {
                continue;
            }

            loop {
                let moved: Option<String> = conn.rpoplpush(processing_key(&worker), QUEUE_KEY).await?;
                if moved.is_none() {
                    break;
                }
                requeued += 1;
            }
            conn.srem::<_, _, ()>(WORKERS_KEY, &worker).await?;
            tracing::warn!(worker_id = %worker, "Recovered jobs from unresponsive worker");
        }

        Ok(requeued)
    }

    async fn store_record(&self, record: &JobRecord, ttl: Duration) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(record)?;
        conn.set_ex::<_, _, ()>(record_key(&record.task_id), payload, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn load_record(&self, task_id: &str) -> Result<Option<JobRecord>, QueueError> {
        let mut conn = self.conn().await?;
        let payload: Option<String> = conn.get(record_key(task_id)).await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(QueueError::Serialize))
            .transpose()
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
