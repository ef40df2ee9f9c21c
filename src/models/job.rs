use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::models::transform::Transform;

/// State of a transform job as tracked by the broker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Started,
    Success,
    Failure,
}

impl JobState {
    pub fn is_ready(self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }
}

/// Job record persisted in the result backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub task_id: String,
    pub name: String,
    pub status: JobState,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn pending(task_id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.to_string(),
            name: name.to_string(),
            status: JobState::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_started(&mut self) {
        self.status = JobState::Started;
        self.updated_at = Utc::now();
    }

    pub fn mark_succeeded(&mut self, result: serde_json::Value) {
        self.status = JobState::Success;
        self.result = Some(result);
        self.error = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = JobState::Failure;
        self.result = None;
        self.error = Some(error);
        self.updated_at = Utc::now();
    }
}

/// Handle returned to the submitter of a job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub name: String,
}

/// Read-only projection of a job record served by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusView {
    pub task_id: String,
    pub status: String,
    pub ready: bool,
    pub successful: bool,
    pub result: Option<serde_json::Value>,
}

impl JobStatusView {
    /// View for an id the result backend has no record of.
    pub fn unknown(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: "UNKNOWN".to_string(),
            ready: false,
            successful: false,
            result: None,
        }
    }
}

impl From<&JobRecord> for JobStatusView {
    fn from(record: &JobRecord) -> Self {
        let result = match record.status {
            JobState::Success => record.result.clone(),
            JobState::Failure => record.error.clone().map(serde_json::Value::String),
            JobState::Pending | JobState::Started => None,
        };

        Self {
            task_id: record.task_id.clone(),
            status: record.status.to_string(),
            ready: record.status.is_ready(),
            successful: record.status == JobState::Success,
            result,
        }
    }
}

/// Message carried by the broker queue from the API to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: String,
    pub input: String,
    pub output: String,
    #[serde(flatten)]
    pub transform: Transform,
}
