//! Image transformations applied by workers.
//!
//! Every function reads one file from the raw directory and writes one file
//! to the processed directory. Failures are logged and returned as
//! [`TransformError`]; the caller decides what a failure means for the job.

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage};
use std::path::Path;

use crate::models::transform::{CropBox, Transform};
use crate::services::storage::{is_plain_filename, Storage};

/// Solid canvas colour the grayscale image is toned towards.
const SEPIA_TONE: Rgb<u8> = Rgb([255, 200, 150]);

/// Weight of the sepia canvas in the blend; the grayscale image gets the rest.
const SEPIA_CANVAS_WEIGHT: f32 = 0.6;

/// Run `transform` from `input_name` (raw area) to `output_name` (processed area).
pub fn apply(
    storage: &Storage,
    input_name: &str,
    output_name: &str,
    transform: &Transform,
) -> Result<(), TransformError> {
    let result = match *transform {
        Transform::Grayscale => grayscale(storage, input_name, output_name),
        Transform::Sepia => sepia(storage, input_name, output_name),
        Transform::Resize { width, height } => resize(storage, input_name, output_name, width, height),
        Transform::Crop(crop_box) => crop(storage, input_name, output_name, crop_box),
    };

    if let Err(ref e) = result {
        tracing::error!(
            transform = %transform.kind(),
            input = %input_name,
            error = %e,
            "Image transformation failed"
        );
    }
    result
}

/// Convert to single-channel luminance, keeping the container format of the output name.
pub fn grayscale(storage: &Storage, input_name: &str, output_name: &str) -> Result<(), TransformError> {
    let img = load(storage, input_name)?;
    let gray = DynamicImage::ImageLuma8(img.to_luma8());
    save(&gray, &output_path(storage, output_name)?, None)
}

/// Resize to exactly `width` x `height`; aspect ratio is not preserved.
pub fn resize(
    storage: &Storage,
    input_name: &str,
    output_name: &str,
    width: u32,
    height: u32,
) -> Result<(), TransformError> {
    let img = load(storage, input_name)?;
    let resized = img.resize_exact(width, height, FilterType::Lanczos3);
    save(&resized, &output_path(storage, output_name)?, None)
}

/// Tone a grayscale version of the image towards a warm solid canvas and
/// save it as JPEG whatever the output extension says.
pub fn sepia(storage: &Storage, input_name: &str, output_name: &str) -> Result<(), TransformError> {
    let img = load(storage, input_name)?;
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let luma = rgb.to_luma8();

    let toned = RgbImage::from_fn(luma.width(), luma.height(), |x, y| {
        let gray = luma.get_pixel(x, y).0[0];
        Rgb(SEPIA_TONE.0.map(|canvas| blend(canvas, gray)))
    });

    save(
        &DynamicImage::ImageRgb8(toned),
        &output_path(storage, output_name)?,
        Some(ImageFormat::Jpeg),
    )
}

/// Extract `crop_box` from the image forced to RGB. Regions outside the
/// source come out black, so the output is always exactly box-sized.
pub fn crop(
    storage: &Storage,
    input_name: &str,
    output_name: &str,
    crop_box: CropBox,
) -> Result<(), TransformError> {
    crop_box.check().map_err(|e| TransformError::InvalidParameters(e.to_string()))?;

    let rgb = load(storage, input_name)?.to_rgb8();
    let mut region = RgbImage::new(crop_box.width(), crop_box.height());
    imageops::replace(
        &mut region,
        &rgb,
        -i64::from(crop_box.left),
        -i64::from(crop_box.top),
    );

    save(
        &DynamicImage::ImageRgb8(region),
        &output_path(storage, output_name)?,
        None,
    )
}

fn blend(canvas: u8, gray: u8) -> u8 {
    let value = SEPIA_CANVAS_WEIGHT * f32::from(canvas) + (1.0 - SEPIA_CANVAS_WEIGHT) * f32::from(gray);
    value.round().clamp(0.0, 255.0) as u8
}

fn load(storage: &Storage, input_name: &str) -> Result<DynamicImage, TransformError> {
    if !is_plain_filename(input_name) {
        return Err(TransformError::InvalidParameters(format!(
            "input name is not a plain filename: {}",
            input_name
        )));
    }
    let path = storage.raw_path(input_name);

    let reader = ImageReader::open(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => TransformError::NotFound(path.display().to_string()),
        _ => TransformError::Io(e),
    })?;
    let reader = reader.with_guessed_format().map_err(TransformError::Io)?;
    Ok(reader.decode()?)
}

fn output_path(storage: &Storage, output_name: &str) -> Result<std::path::PathBuf, TransformError> {
    if !is_plain_filename(output_name) {
        return Err(TransformError::InvalidParameters(format!(
            "output name is not a plain filename: {}",
            output_name
        )));
    }
    Ok(storage.processed_path(output_name))
}

fn save(img: &DynamicImage, path: &Path, format: Option<ImageFormat>) -> Result<(), TransformError> {
    match format {
        Some(format) => img.save_with_format(path, format)?,
        None => img.save(path)?,
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid transform parameters: {0}")]
    InvalidParameters(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error processing image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Transform task aborted: {0}")]
    Aborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;
    use tempfile::TempDir;

    fn storage_with_image(name: &str, width: u32, height: u32, format: ImageFormat) -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("raw")).unwrap();
        std::fs::create_dir_all(dir.path().join("processed")).unwrap();
        let storage = Storage::new(dir.path());

        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        DynamicImage::ImageRgb8(img)
            .save_with_format(storage.raw_path(name), format)
            .unwrap();
        (dir, storage)
    }

    #[test]
    fn test_resize_exact_dimensions() {
        let (_dir, storage) = storage_with_image("a_raw.png", 64, 64, ImageFormat::Png);
        resize(&storage, "a_raw.png", "a_resize.png", 100, 50).unwrap();

        let out = image::open(storage.processed_path("a_resize.png")).unwrap();
        assert_eq!(out.dimensions(), (100, 50));
    }

    #[test]
    fn test_crop_uses_box_semantics() {
        let (_dir, storage) = storage_with_image("b_raw.jpg", 120, 120, ImageFormat::Jpeg);
        crop(&storage, "b_raw.jpg", "b_crop.jpg", CropBox::new(10, 10, 100, 100)).unwrap();

        let out = image::open(storage.processed_path("b_crop.jpg")).unwrap();
        assert_eq!(out.dimensions(), (90, 90));
    }

    #[test]
    fn test_crop_beyond_bounds_keeps_box_size() {
        let (_dir, storage) = storage_with_image("c_raw.png", 20, 20, ImageFormat::Png);
        crop(&storage, "c_raw.png", "c_crop.png", CropBox::new(10, 10, 40, 30)).unwrap();

        let out = image::open(storage.processed_path("c_crop.png")).unwrap().to_rgb8();
        assert_eq!(out.dimensions(), (30, 20));
        assert_eq!(out.get_pixel(0, 0), &Rgb([10, 10, 128]));
        assert_eq!(out.get_pixel(29, 19), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_oversized_crop_is_refused_before_allocation() {
        let (_dir, storage) = storage_with_image("h_raw.png", 8, 8, ImageFormat::Png);
        let err = crop(&storage, "h_raw.png", "h_crop.png", CropBox::new(0, 0, 60_000, 60_000)).unwrap_err();

        assert!(matches!(err, TransformError::InvalidParameters(_)));
        assert!(!storage.processed_path("h_crop.png").exists());
    }

    #[test]
    fn test_grayscale_is_single_channel() {
        let (_dir, storage) = storage_with_image("d_raw.png", 8, 8, ImageFormat::Png);
        grayscale(&storage, "d_raw.png", "d_grayscale.png").unwrap();

        let out = image::open(storage.processed_path("d_grayscale.png")).unwrap();
        assert!(matches!(out, DynamicImage::ImageLuma8(_)));
    }

    #[test]
    fn test_sepia_always_writes_jpeg() {
        let (_dir, storage) = storage_with_image("e_raw.png", 8, 8, ImageFormat::Png);
        sepia(&storage, "e_raw.png", "e_sepia.png").unwrap();

        let bytes = std::fs::read(storage.processed_path("e_sepia.png")).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_sepia_blend_weights() {
        assert_eq!(blend(255, 0), 153);
        assert_eq!(blend(0, 255), 102);
        assert_eq!(blend(200, 200), 200);
    }

    #[test]
    fn test_missing_input_is_not_found() {
        let (_dir, storage) = storage_with_image("f_raw.png", 8, 8, ImageFormat::Png);
        let err = apply(&storage, "missing_raw.png", "missing_grayscale.png", &Transform::Grayscale)
            .unwrap_err();
        assert!(matches!(err, TransformError::NotFound(_)));
    }

    #[test]
    fn test_undecodable_input_fails() {
        let (_dir, storage) = storage_with_image("g_raw.png", 8, 8, ImageFormat::Png);
        std::fs::write(storage.raw_path("junk_raw.png"), b"not an image").unwrap();
        let err = apply(&storage, "junk_raw.png", "junk_sepia.png", &Transform::Sepia).unwrap_err();
        assert!(matches!(err, TransformError::Image(_)));
    }
}
