use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use image_worker_api::app_state::AppState;
use image_worker_api::config::AppConfig;
use image_worker_api::routes::{self, metrics::MetricsState};
use image_worker_api::services::{
    broker::{Broker, MemoryBroker},
    cleanup::CleanupQueue,
    queue::JobQueue,
    redis_broker::RedisBroker,
    storage::Storage,
    worker::{Worker, WorkerConfig},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing image-worker-api server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    routes::metrics::describe_metrics();

    tracing::info!(data_dir = %config.data_dir.display(), "Preparing storage directories");
    let storage = Arc::new(
        Storage::init(&config.data_dir)
            .await
            .expect("Failed to create storage directories"),
    );

    let broker: Arc<dyn Broker> = if config.uses_memory_broker() {
        tracing::warn!("Using in-memory broker; jobs run inside the API process");
        Arc::new(MemoryBroker::new())
    } else {
        tracing::info!("Connecting to Redis broker");
        Arc::new(RedisBroker::new(&config.broker_url).expect("Failed to initialize Redis broker"))
    };
    let queue = JobQueue::new(broker, config.result_ttl());

    let (cleanup, _cleanup_task) = CleanupQueue::start(Arc::clone(&storage));

    // An in-memory broker cannot be reached by a separate worker process
    let _inline_workers = config.uses_memory_broker().then(|| {
        Worker::new(
            queue.clone(),
            Arc::clone(&storage),
            WorkerConfig {
                worker_id: config.worker_id(),
                concurrency: config.worker_concurrency,
                poll_interval: config.poll_interval(),
                heartbeat_ttl: config.heartbeat_ttl(),
            },
        )
        .start()
    });

    // Create shared application state
    let state = AppState::new(storage, queue.clone(), cleanup);

    let metrics_state = MetricsState {
        handle: prometheus_handle,
        queue,
    };

    // Build API routes
    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(metrics_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(routes::cors_layer(&config.cors_origins))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes));

    tracing::info!("Starting image-worker-api on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
