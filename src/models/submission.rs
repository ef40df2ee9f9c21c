use garde::Validate;
use serde::Serialize;

use crate::models::transform::TransformDetails;

/// Response after submitting an image for transformation.
#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub task_id: String,
    pub status_url: String,
    pub original_filename: String,
    pub task_name: String,
    #[serde(flatten)]
    pub details: TransformDetails,
}

/// Target dimensions submitted to `/resize`.
#[derive(Debug, Clone, Copy, Validate)]
pub struct ResizeForm {
    #[garde(range(min = 16, max = 4096))]
    pub width: u32,

    #[garde(range(min = 16, max = 4096))]
    pub height: u32,
}
