use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Ignored by worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Data root holding the `raw/` and `processed/` directories
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Broker connection string: `redis://...` or `memory://`
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// Origins allowed by the CORS policy (comma-separated in the environment)
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// How long job records live in the result backend
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,

    /// Maximum accepted request body size
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Worker identity. A random one is generated when unset.
    pub worker_id: Option<String>,

    /// Number of concurrent job loops per worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// A worker whose heartbeat is older than this is considered dead
    #[serde(default = "default_heartbeat_ttl_secs")]
    pub heartbeat_ttl_secs: u64,

    /// Prometheus scrape address of a worker process
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_broker_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:8000".to_string()]
}

fn default_result_ttl_secs() -> u64 {
    86_400
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_ttl_secs() -> u64 {
    30
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9100".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// True when jobs live in process memory and must be executed in-process.
    pub fn uses_memory_broker(&self) -> bool {
        self.broker_url.starts_with("memory://")
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_secs)
    }

    pub fn worker_id(&self) -> String {
        self.worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4().simple()))
    }
}
