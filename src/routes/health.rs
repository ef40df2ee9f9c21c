use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub broker: ComponentHealth,
    pub storage: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn ok(latency_ms: u64) -> Self {
        Self {
            status: "ok".to_string(),
            latency_ms: Some(latency_ms),
        }
    }

    fn error() -> Self {
        Self {
            status: "error".to_string(),
            latency_ms: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health — broker connectivity and data directory status.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let broker_start = std::time::Instant::now();
    let broker_check = match state.queue.health_check().await {
        Ok(_) => ComponentHealth::ok(broker_start.elapsed().as_millis() as u64),
        Err(e) => {
            tracing::warn!(error = %e, "Broker health check failed");
            ComponentHealth::error()
        }
    };

    let storage_start = std::time::Instant::now();
    let storage_check = if state.storage.is_ready().await {
        ComponentHealth::ok(storage_start.elapsed().as_millis() as u64)
    } else {
        tracing::warn!("Storage directories missing");
        ComponentHealth::error()
    };

    let all_healthy = broker_check.is_ok() && storage_check.is_ok();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            broker: broker_check,
            storage: storage_check,
        },
    };

    (status_code, Json(response))
}
