pub mod health;
pub mod metrics;
pub mod tasks;
pub mod transform;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::app_state::AppState;

/// API routes: the four transform uploads, status polling, download and health.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/grayscale", post(transform::grayscale))
        .route("/sepia", post(transform::sepia))
        .route("/resize", post(transform::resize))
        .route("/crop", post(transform::crop))
        .route("/task-status/{task_id}", get(tasks::task_status))
        .route("/download-result/{task_id}", get(tasks::download_result))
        .with_state(state)
}

/// CORS policy: the configured origins, any method and header, credentials allowed.
///
/// Methods and headers mirror the request because wildcards cannot be
/// combined with credentials.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
