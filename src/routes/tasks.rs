use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::job::{JobState, JobStatusView};
use crate::services::storage::{is_plain_filename, StorageError};

/// GET /task-status/{task_id} — current state of a job.
pub async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<(StatusCode, Json<JobStatusView>), ApiError> {
    match state.queue.status_of(&task_id).await? {
        Some(view) => Ok((StatusCode::OK, Json(view))),
        None => {
            tracing::debug!(task_id = %task_id, "Status requested for unknown task");
            Ok((StatusCode::NOT_FOUND, Json(JobStatusView::unknown(&task_id))))
        }
    }
}

/// GET /download-result/{task_id} — stream the processed file once the job
/// has succeeded, then delete both of its files.
pub async fn download_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let record = match state.queue.record(&task_id).await? {
        Some(record) => record,
        None => {
            return Ok(message(
                StatusCode::NOT_FOUND,
                json!({ "message": format!("Unknown task id: {}", task_id) }),
            ))
        }
    };

    match record.status {
        JobState::Pending | JobState::Started => Ok(message(
            StatusCode::ACCEPTED,
            json!({ "message": "Processing is still in progress. Check status later." }),
        )),
        JobState::Failure => {
            tracing::warn!(task_id = %task_id, error = ?record.error, "Download requested for failed task");
            Ok(message(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "message": "Task failed to process image.",
                    "error": record.error.unwrap_or_default(),
                }),
            ))
        }
        JobState::Success => deliver(&state, &task_id, record.result.as_ref()).await,
    }
}

async fn deliver(state: &AppState, task_id: &str, result: Option<&Value>) -> Result<Response, ApiError> {
    let output = filename_field(result, "output");
    let input = filename_field(result, "input");

    let (output, input) = match (output, input) {
        (Some(output), Some(input)) => (output, input),
        (output, _) => {
            let missing = if output.is_none() { "output" } else { "input" };
            tracing::error!(task_id = %task_id, missing, "Task result is missing a filename");
            return Ok(message(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "message": format!("Task succeeded, but {} filename is missing from result.", missing)
                }),
            ));
        }
    };

    if !is_plain_filename(output) || !is_plain_filename(input) {
        tracing::error!(task_id = %task_id, output = %output, input = %input, "Task result names a path");
        return Ok(message(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "message": "Task result contains an invalid filename." }),
        ));
    }

    let path = state.storage.processed_path(output);
    let is_file = tokio::fs::metadata(&path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        tracing::error!(task_id = %task_id, output = %output, "Processed file not found on disk");
        return Ok(message(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "message": format!("Processed file not found on disk: {}", output) }),
        ));
    }

    let file = tokio::fs::File::open(&path).await.map_err(StorageError::from)?;

    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", output),
        ),
    ];

    // files are removed only once the last chunk has been handed over
    let body = Body::from_stream(state.cleanup.on_complete(ReaderStream::new(file), input, output));

    tracing::info!(task_id = %task_id, output = %output, "Streaming processed file");

    Ok((StatusCode::OK, headers, body).into_response())
}

fn filename_field<'a>(result: Option<&'a Value>, key: &str) -> Option<&'a str> {
    result
        .and_then(|r| r.get(key))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
}

fn message(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}
