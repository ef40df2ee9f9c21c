use axum::extract::{Multipart, State};
use axum::Json;
use garde::Validate;
use std::collections::HashMap;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::submission::{ResizeForm, SubmissionResponse};
use crate::models::transform::{CropBox, Transform, TransformKind};
use crate::services::storage::Storage;

const IMAGE_FIELD: &str = "image";
const ALLOWED_CONTENT_TYPES: [&str; 2] = ["image/jpeg", "image/png"];

/// POST /grayscale — convert an image to grayscale.
pub async fn grayscale(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SubmissionResponse>, ApiError> {
    submit(&state, multipart, TransformKind::Grayscale).await
}

/// POST /sepia — apply a sepia tone.
pub async fn sepia(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SubmissionResponse>, ApiError> {
    submit(&state, multipart, TransformKind::Sepia).await
}

/// POST /resize — resize to exact `width` x `height`.
pub async fn resize(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SubmissionResponse>, ApiError> {
    submit(&state, multipart, TransformKind::Resize).await
}

/// POST /crop — crop to the `left`, `top`, `right`, `bottom` box.
pub async fn crop(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SubmissionResponse>, ApiError> {
    submit(&state, multipart, TransformKind::Crop).await
}

struct SavedUpload {
    original_filename: String,
    input: String,
    output: String,
}

/// Shared pipeline: validate, save, dispatch, respond.
async fn submit(
    state: &AppState,
    multipart: Multipart,
    kind: TransformKind,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let mut saved = None;
    let received = receive_upload(&state.storage, multipart, kind, &mut saved).await;

    let dispatched = match received {
        Ok(transform) => match saved.as_ref() {
            Some(upload) => state
                .queue
                .submit(&upload.input, &upload.output, transform)
                .await
                .map(|job| (job, transform))
                .map_err(ApiError::from),
            None => Err(ApiError::Unprocessable("Field 'image' is required.".to_string())),
        },
        Err(e) => Err(e),
    };

    let (job, transform) = match dispatched {
        Ok(dispatched) => dispatched,
        Err(e) => {
            if let Some(upload) = saved.as_ref() {
                state.storage.discard_raw(&upload.input).await;
            }
            return Err(e);
        }
    };

    // `saved` is always set once a job exists
    let original_filename = saved.map(|u| u.original_filename).unwrap_or_default();

    Ok(Json(SubmissionResponse {
        status_url: format!("/task-status/{}", job.id),
        task_id: job.id,
        original_filename,
        task_name: job.name,
        details: transform.details(),
    }))
}

/// Read the multipart body, streaming the image to the raw directory.
/// Parameters that arrive before the image are checked before any byte is
/// written; the rest are checked once the body has been read.
async fn receive_upload(
    storage: &Storage,
    mut multipart: Multipart,
    kind: TransformKind,
    saved: &mut Option<SavedUpload>,
) -> Result<Transform, ApiError> {
    let mut params: HashMap<String, String> = HashMap::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);

        match name.as_deref() {
            Some(IMAGE_FIELD) if saved.is_none() => {
                check_content_type(field.content_type())?;
                if kind.form_fields().iter().all(|f| params.contains_key(*f)) {
                    parse_transform(kind, &params)?;
                }

                let original_filename = field.file_name().unwrap_or_default().to_string();
                let (input, output) = Storage::generate_filenames(&original_filename, kind);
                storage.save_upload(field, &input).await?;

                tracing::debug!(input = %input, original = %original_filename, "Upload stored");
                *saved = Some(SavedUpload {
                    original_filename,
                    input,
                    output,
                });
            }
            Some(param) if kind.form_fields().contains(&param) => {
                let value = field.text().await?;
                params.insert(param.to_string(), value);
            }
            _ => {}
        }
    }

    if saved.is_none() {
        return Err(ApiError::Unprocessable("Field 'image' is required.".to_string()));
    }
    parse_transform(kind, &params)
}

fn check_content_type(content_type: Option<&str>) -> Result<(), ApiError> {
    match content_type {
        Some(ct) if ALLOWED_CONTENT_TYPES.contains(&ct) => Ok(()),
        other => Err(ApiError::UnsupportedMediaType(
            other.unwrap_or("unknown").to_string(),
        )),
    }
}

fn parse_transform(kind: TransformKind, params: &HashMap<String, String>) -> Result<Transform, ApiError> {
    match kind {
        TransformKind::Grayscale => Ok(Transform::Grayscale),
        TransformKind::Sepia => Ok(Transform::Sepia),
        TransformKind::Resize => {
            let form = ResizeForm {
                width: int_field(params, "width")?,
                height: int_field(params, "height")?,
            };
            form.validate()
                .map_err(|report| ApiError::Unprocessable(report.to_string()))?;
            Ok(Transform::Resize {
                width: form.width,
                height: form.height,
            })
        }
        TransformKind::Crop => {
            let crop_box = CropBox::new(
                int_field(params, "left")?,
                int_field(params, "top")?,
                int_field(params, "right")?,
                int_field(params, "bottom")?,
            );
            crop_box
                .check()
                .map_err(|e| ApiError::Unprocessable(e.to_string()))?;
            Ok(Transform::Crop(crop_box))
        }
    }
}

fn int_field(params: &HashMap<String, String>, name: &str) -> Result<u32, ApiError> {
    let raw = params
        .get(name)
        .ok_or_else(|| ApiError::Unprocessable(format!("Field '{}' is required.", name)))?;
    raw.trim().parse::<u32>().map_err(|_| {
        ApiError::Unprocessable(format!("Field '{}' must be a non-negative integer.", name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_content_type_allow_list() {
        assert!(check_content_type(Some("image/png")).is_ok());
        assert!(check_content_type(Some("image/jpeg")).is_ok());
        assert!(matches!(
            check_content_type(Some("image/gif")),
            Err(ApiError::UnsupportedMediaType(ct)) if ct == "image/gif"
        ));
        assert!(check_content_type(None).is_err());
    }

    #[test]
    fn test_resize_out_of_range() {
        let err = parse_transform(TransformKind::Resize, &params(&[("width", "8"), ("height", "100")]))
            .unwrap_err();
        assert!(matches!(err, ApiError::Unprocessable(_)));
    }

    #[test]
    fn test_negative_coordinate_rejected() {
        let p = params(&[("left", "-1"), ("top", "0"), ("right", "10"), ("bottom", "10")]);
        let err = parse_transform(TransformKind::Crop, &p).unwrap_err();
        assert!(err.to_string().contains("'left'"));
    }

    #[test]
    fn test_crop_box_parsed() {
        let p = params(&[("left", "10"), ("top", "10"), ("right", "100"), ("bottom", "100")]);
        assert_eq!(
            parse_transform(TransformKind::Crop, &p).unwrap(),
            Transform::Crop(CropBox::new(10, 10, 100, 100))
        );
    }
}
