use image_worker_api::{
    config::AppConfig,
    routes::metrics::describe_metrics,
    services::{
        queue::JobQueue,
        redis_broker::RedisBroker,
        storage::Storage,
        worker::{Worker, WorkerConfig},
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting image transform worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    if config.uses_memory_broker() {
        tracing::error!("BROKER_URL=memory:// runs workers inside the API process; nothing to do here");
        std::process::exit(2);
    }

    // Job counters and timings are recorded in this process
    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("WORKER_METRICS_ADDR must be a socket address");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    describe_metrics();
    tracing::info!(%metrics_addr, "Prometheus exporter listening");

    tracing::info!(data_dir = %config.data_dir.display(), "Preparing storage directories");
    let storage = Arc::new(
        Storage::init(&config.data_dir)
            .await
            .expect("Failed to create storage directories"),
    );

    tracing::info!("Connecting to Redis broker");
    let broker = RedisBroker::new(&config.broker_url).expect("Failed to initialize Redis broker");
    let queue = JobQueue::new(Arc::new(broker), config.result_ttl());

    queue
        .health_check()
        .await
        .expect("Failed to reach Redis broker");

    let worker = Worker::new(
        queue,
        storage,
        WorkerConfig {
            worker_id: config.worker_id(),
            concurrency: config.worker_concurrency,
            poll_interval: config.poll_interval(),
            heartbeat_ttl: config.heartbeat_ttl(),
        },
    );

    // Jobs left behind by a crashed worker go back to the queue first
    worker.recover_orphans().await;

    tracing::info!(worker_id = %worker.id(), "Worker ready, starting job processing loop");

    let mut tasks = worker.start();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping worker");
        }
        Some(result) = tasks.join_next() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task exited unexpectedly");
            }
        }
    }

    // In-flight jobs stay reserved and are requeued once the heartbeat lapses
    tasks.abort_all();
}
