use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The four supported image transformations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransformKind {
    Grayscale,
    Sepia,
    Resize,
    Crop,
}

impl TransformKind {
    /// Registered task name reported back to clients as `task_name`.
    pub fn task_name(self) -> String {
        format!("image_worker.{}", self)
    }

    /// Integer form fields the upload endpoint expects alongside the image.
    pub fn form_fields(self) -> &'static [&'static str] {
        match self {
            TransformKind::Grayscale | TransformKind::Sepia => &[],
            TransformKind::Resize => &["width", "height"],
            TransformKind::Crop => &["left", "top", "right", "bottom"],
        }
    }
}

/// Largest width or height a crop box may span. The output is allocated at
/// the full box size, even where the box lies outside the source image.
pub const MAX_CROP_SIDE: u32 = 8192;

/// Rectangular region in pixel coordinates. Left/top are inclusive,
/// right/bottom exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CropBox {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Checks that the box has a positive area, naming the first inequality
    /// that does not hold.
    pub fn check(&self) -> Result<(), &'static str> {
        if self.right <= self.left {
            return Err("Crop area is invalid: 'right' coordinate must be greater than 'left'.");
        }
        if self.bottom <= self.top {
            return Err("Crop area is invalid: 'bottom' coordinate must be greater than 'top'.");
        }
        if self.width() > MAX_CROP_SIDE || self.height() > MAX_CROP_SIDE {
            return Err("Crop area is invalid: width and height must not exceed 8192 pixels.");
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn as_tuple(&self) -> (u32, u32, u32, u32) {
        (self.left, self.top, self.right, self.bottom)
    }
}

/// Parameters of a single transform job, tagged by transform type on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Transform {
    Grayscale,
    Sepia,
    Resize { width: u32, height: u32 },
    Crop(CropBox),
}

impl Transform {
    pub fn kind(&self) -> TransformKind {
        match self {
            Transform::Grayscale => TransformKind::Grayscale,
            Transform::Sepia => TransformKind::Sepia,
            Transform::Resize { .. } => TransformKind::Resize,
            Transform::Crop(_) => TransformKind::Crop,
        }
    }

    /// Transform-specific fields shared by the submission envelope and the
    /// job result payload.
    pub fn details(&self) -> TransformDetails {
        match *self {
            Transform::Grayscale => TransformDetails::Grayscale {},
            Transform::Sepia => TransformDetails::Sepia { effect: "sepia" },
            Transform::Resize { width, height } => TransformDetails::Resize {
                size: format!("{}x{}", width, height),
            },
            Transform::Crop(crop_box) => TransformDetails::Crop {
                crop_box: crop_box.as_tuple(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TransformDetails {
    Grayscale {},
    Sepia { effect: &'static str },
    Resize { size: String },
    Crop { crop_box: (u32, u32, u32, u32) },
}

/// Result payload stored for a successful job.
#[derive(Debug, Clone, Serialize)]
pub struct TransformOutcome {
    pub status: &'static str,
    pub input: String,
    pub output: String,
    #[serde(flatten)]
    pub details: TransformDetails,
}

impl TransformOutcome {
    pub fn completed(input: &str, output: &str, transform: &Transform) -> Self {
        Self {
            status: "COMPLETED",
            input: input.to_string(),
            output: output.to_string(),
            details: transform.details(),
        }
    }
}
