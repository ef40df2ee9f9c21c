//! Message broker and result backend abstraction.
//!
//! A job message stays owned by the worker that reserved it until that worker
//! acknowledges it, which it only does after the job's final state has been
//! recorded. Messages held by a worker whose heartbeat lapsed are put back on
//! the pending queue by [`Broker::requeue_orphans`].

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::job::{JobRecord, TaskMessage};
use crate::services::queue::QueueError;

/// A reserved message. `payload` is the exact serialized form used for
/// acknowledgement.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: TaskMessage,
    pub payload: String,
}

impl Delivery {
    pub fn from_payload(payload: String) -> Result<Self, QueueError> {
        let message = serde_json::from_str(&payload)?;
        Ok(Self { message, payload })
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a message to the pending queue.
    async fn publish(&self, message: &TaskMessage) -> Result<(), QueueError>;

    /// Move the oldest pending message into `worker_id`'s reservation list.
    /// A message that cannot be decoded is discarded and reported as an error.
    async fn reserve(&self, worker_id: &str) -> Result<Option<Delivery>, QueueError>;

    /// Drop a reserved message once it has been fully handled.
    async fn ack(&self, worker_id: &str, delivery: &Delivery) -> Result<(), QueueError>;

    /// Give a reserved message back so that the next `reserve` picks it up again.
    async fn requeue(&self, worker_id: &str, delivery: &Delivery) -> Result<(), QueueError>;

    /// Mark `worker_id` alive for `ttl`.
    async fn heartbeat(&self, worker_id: &str, ttl: Duration) -> Result<(), QueueError>;

    /// Return messages reserved by dead workers to the pending queue.
    /// Returns how many messages were requeued.
    async fn requeue_orphans(&self) -> Result<usize, QueueError>;

    /// Write a job record that expires after `ttl`.
    async fn store_record(&self, record: &JobRecord, ttl: Duration) -> Result<(), QueueError>;

    async fn load_record(&self, task_id: &str) -> Result<Option<JobRecord>, QueueError>;

    /// Number of messages waiting to be reserved.
    async fn queue_depth(&self) -> Result<u64, QueueError>;

    /// Connectivity check for health endpoints.
    async fn ping(&self) -> Result<(), QueueError>;
}

#[derive(Default)]
struct MemoryState {
    pending: VecDeque<String>,
    reserved: HashMap<String, Vec<String>>,
    heartbeats: HashMap<String, Instant>,
    records: HashMap<String, (JobRecord, Instant)>,
}

/// In-process broker with the same reservation and expiry semantics as the
/// Redis broker. Only usable when the API and the workers share a process.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<MemoryState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Unavailable("memory broker state poisoned".to_string()))
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, message: &TaskMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_string(message)?;
        self.lock()?.pending.push_back(payload);
        Ok(())
    }

    async fn reserve(&self, worker_id: &str) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.lock()?;
        let Some(payload) = state.pending.pop_front() else {
            return Ok(None);
        };

        let delivery = Delivery::from_payload(payload).map_err(|e| {
            tracing::error!(worker_id = %worker_id, error = %e, "Discarding undecodable job message");
            e
        })?;
        state
            .reserved
            .entry(worker_id.to_string())
            .or_default()
            .push(delivery.payload.clone());

        Ok(Some(delivery))
    }

    async fn ack(&self, worker_id: &str, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if let Some(list) = state.reserved.get_mut(worker_id) {
            if let Some(pos) = list.iter().position(|p| *p == delivery.payload) {
                list.remove(pos);
            }
        }
        Ok(())
    }

    async fn requeue(&self, worker_id: &str, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if let Some(list) = state.reserved.get_mut(worker_id) {
            if let Some(pos) = list.iter().position(|p| *p == delivery.payload) {
                list.remove(pos);
            }
        }
        state.pending.push_front(delivery.payload.clone());
        Ok(())
    }

    async fn heartbeat(&self, worker_id: &str, ttl: Duration) -> Result<(), QueueError> {
        self.lock()?
            .heartbeats
            .insert(worker_id.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn requeue_orphans(&self) -> Result<usize, QueueError> {
        let mut state = self.lock()?;
        let now = Instant::now();
        let dead: Vec<String> = state
            .reserved
            .keys()
            .filter(|w| state.heartbeats.get(*w).map_or(true, |deadline| *deadline <= now))
            .cloned()
            .collect();

        let mut requeued = 0;
        for worker in dead {
            state.heartbeats.remove(&worker);
            if let Some(messages) = state.reserved.remove(&worker) {
                requeued += messages.len();
                // oldest reservation goes back to the front
                for payload in messages.into_iter().rev() {
                    state.pending.push_front(payload);
                }
            }
        }
        Ok(requeued)
    }

    async fn store_record(&self, record: &JobRecord, ttl: Duration) -> Result<(), QueueError> {
        self.lock()?
            .records
            .insert(record.task_id.clone(), (record.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn load_record(&self, task_id: &str) -> Result<Option<JobRecord>, QueueError> {
        let mut state = self.lock()?;
        let expired = match state.records.get(task_id) {
            Some((_, expires)) => *expires <= Instant::now(),
            None => return Ok(None),
        };
        if expired {
            state.records.remove(task_id);
            return Ok(None);
        }
        Ok(state.records.get(task_id).map(|(record, _)| record.clone()))
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        Ok(self.lock()?.pending.len() as u64)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.lock().map(|_| ())
    }
}
