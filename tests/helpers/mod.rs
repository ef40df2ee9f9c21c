//! In-process test harness: router, in-memory broker and a worker sharing a
//! temporary data directory.

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use tower_http::limit::RequestBodyLimitLayer;

use image_worker_api::app_state::AppState;
use image_worker_api::routes;
use image_worker_api::services::{
    broker::MemoryBroker,
    cleanup::CleanupQueue,
    queue::JobQueue,
    storage::Storage,
    worker::{Worker, WorkerConfig},
};

const BOUNDARY: &str = "image-worker-test-boundary";

/// The only origin the test router's CORS policy admits
pub const ALLOWED_ORIGIN: &str = "http://localhost:8000";

/// One part of a multipart/form-data body
pub enum Part {
    File {
        name: &'static str,
        filename: &'static str,
        content_type: &'static str,
        data: Vec<u8>,
    },
    Text {
        name: &'static str,
        value: String,
    },
}

impl Part {
    pub fn image(filename: &'static str, content_type: &'static str, data: Vec<u8>) -> Self {
        Part::File {
            name: "image",
            filename,
            content_type,
            data,
        }
    }

    pub fn text(name: &'static str, value: impl ToString) -> Self {
        Part::Text {
            name,
            value: value.to_string(),
        }
    }
}

/// Encode parts as a multipart/form-data body, returning (content type, body)
pub fn multipart_body(parts: Vec<Part>) -> (String, Vec<u8>) {
    let mut body = Vec::new();

    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File {
                name,
                filename,
                content_type,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        name, filename, content_type
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&data);
                body.extend_from_slice(b"\r\n");
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                        name, value
                    )
                    .as_bytes(),
                );
            }
        }
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}

pub struct TestApp {
    pub router: Router,
    pub queue: JobQueue,
    pub broker: Arc<MemoryBroker>,
    pub storage: Arc<Storage>,
    pub worker: Worker,
    dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(None).await
    }

    /// Router that rejects request bodies above `limit` bytes, as the server does
    pub async fn with_upload_limit(limit: usize) -> Self {
        Self::build(Some(limit)).await
    }

    async fn build(upload_limit: Option<usize>) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let storage = Arc::new(Storage::init(dir.path()).await.expect("init storage"));
        let broker = Arc::new(MemoryBroker::new());
        let queue = JobQueue::new(broker.clone(), Duration::from_secs(300));
        let (cleanup, _) = CleanupQueue::start(Arc::clone(&storage));

        let worker = Worker::new(
            queue.clone(),
            Arc::clone(&storage),
            WorkerConfig {
                worker_id: "test-worker".to_string(),
                concurrency: 1,
                poll_interval: Duration::from_millis(10),
                heartbeat_ttl: Duration::from_secs(30),
            },
        );

        let state = AppState::new(Arc::clone(&storage), queue.clone(), cleanup);

        let mut router = routes::router(state).layer(routes::cors_layer(&[ALLOWED_ORIGIN.to_string()]));
        if let Some(limit) = upload_limit {
            router = router
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(limit));
        }

        Self {
            router,
            queue,
            broker,
            storage,
            worker,
            dir,
        }
    }

    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// POST a multipart upload and decode the JSON reply
    pub async fn upload(&self, uri: &str, parts: Vec<Part>) -> (StatusCode, Value) {
        let (content_type, body) = multipart_body(parts);
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .expect("build request");
        let response = self.request(request).await;
        let status = response.status();
        (status, json_body(response).await)
    }

    /// Like [`TestApp::upload`], but the body arrives in `chunk_size` pieces
    /// the way a network client delivers it
    pub async fn upload_streamed(&self, uri: &str, parts: Vec<Part>, chunk_size: usize) -> (StatusCode, Value) {
        let (content_type, body) = multipart_body(parts);
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
            body.chunks(chunk_size).map(|c| Ok(c.to_vec())).collect();
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from_stream(futures::stream::iter(chunks)))
            .expect("build request");
        let response = self.request(request).await;
        let status = response.status();
        (status, json_body(response).await)
    }

    pub async fn get(&self, uri: &str) -> Response {
        let request = Request::get(uri).body(Body::empty()).expect("build request");
        self.request(request).await
    }

    pub async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let response = self.get(uri).await;
        let status = response.status();
        (status, json_body(response).await)
    }

    /// Let the worker drain the queue; returns the number of jobs processed
    pub async fn run_jobs(&self) -> usize {
        let mut processed = 0;
        while self.worker.run_once().await.expect("worker run") {
            processed += 1;
        }
        processed
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.dir.path().join("raw")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.dir.path().join("processed")
    }

    pub fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body")
        .to_vec()
}

pub async fn json_body(response: Response) -> Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// Poll until `path` disappears (cleanup runs after the response)
pub async fn wait_until_removed(path: &Path) -> bool {
    for _ in 0..100 {
        if !path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
