use axum::body::Bytes;
use futures::{Stream, StreamExt};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::models::transform::TransformKind;

const RAW_DIR: &str = "raw";
const PROCESSED_DIR: &str = "processed";

/// Local filesystem storage for raw uploads and processed outputs.
#[derive(Debug, Clone)]
pub struct Storage {
    raw_dir: PathBuf,
    processed_dir: PathBuf,
}

impl Storage {
    /// Build storage rooted at `data_dir` without touching the filesystem.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let root = data_dir.as_ref();
        Self {
            raw_dir: root.join(RAW_DIR),
            processed_dir: root.join(PROCESSED_DIR),
        }
    }

    /// Create both directories if absent and resolve the root to an absolute path.
    pub async fn init(data_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = data_dir.as_ref();
        fs::create_dir_all(root.join(RAW_DIR)).await?;
        fs::create_dir_all(root.join(PROCESSED_DIR)).await?;
        let root = fs::canonicalize(root).await?;

        tracing::info!(data_dir = %root.display(), "Storage directories ready");
        Ok(Self::new(root))
    }

    /// Input and output names sharing one fresh identifier:
    /// `{id}_raw{ext}` and `{id}_{kind}{ext}`.
    pub fn generate_filenames(original_filename: &str, kind: TransformKind) -> (String, String) {
        let extension = Path::new(original_filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let unique_id = Uuid::new_v4();

        (
            format!("{}_raw{}", unique_id, extension),
            format!("{}_{}{}", unique_id, kind, extension),
        )
    }

    pub fn raw_path(&self, filename: &str) -> PathBuf {
        self.raw_dir.join(filename)
    }

    pub fn processed_path(&self, filename: &str) -> PathBuf {
        self.processed_dir.join(filename)
    }

    /// Copy an upload stream chunk by chunk into the raw directory.
    /// A partially written file is removed when the stream or the disk fails.
    pub async fn save_upload<S, E>(&self, stream: S, input_name: &str) -> Result<PathBuf, StorageError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let path = self.raw_path(input_name);

        match write_stream(&path, stream).await {
            Ok(bytes) => {
                tracing::debug!(path = %path.display(), size_bytes = bytes, "Upload saved");
                Ok(path)
            }
            Err(e) => {
                let _ = fs::remove_file(&path).await;
                Err(e)
            }
        }
    }

    /// Remove a raw upload that will never be processed.
    pub async fn discard_raw(&self, input_name: &str) {
        remove_logged(&self.raw_path(input_name), "raw").await;
    }

    /// Delete both files of a job. Each removal is attempted independently and
    /// failures are only logged.
    pub async fn cleanup(&self, input_name: &str, output_name: &str) {
        if is_plain_filename(input_name) {
            remove_logged(&self.raw_path(input_name), "raw").await;
        } else {
            tracing::error!(file = %input_name, "Refusing to clean up RAW file with a path component");
        }
        if is_plain_filename(output_name) {
            remove_logged(&self.processed_path(output_name), "processed").await;
        } else {
            tracing::error!(file = %output_name, "Refusing to clean up PROCESSED file with a path component");
        }
    }

    /// Both storage directories exist (for health checks).
    pub async fn is_ready(&self) -> bool {
        let raw = fs::metadata(&self.raw_dir).await.map(|m| m.is_dir());
        let processed = fs::metadata(&self.processed_dir).await.map(|m| m.is_dir());
        matches!((raw, processed), (Ok(true), Ok(true)))
    }
}

/// True when `name` is a single normal path component, i.e. it cannot escape
/// the directory it is joined onto.
pub fn is_plain_filename(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

async fn write_stream<S, E>(path: &Path, stream: S) -> Result<u64, StorageError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    futures::pin_mut!(stream);
    let mut file = fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| StorageError::Upload(Box::new(e)))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    Ok(written)
}

async fn remove_logged(path: &Path, area: &str) {
    match fs::remove_file(path).await {
        Ok(()) => tracing::info!(area, file = %path.display(), "Cleaned up file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(area, file = %path.display(), "File already gone")
        }
        Err(e) => tracing::error!(area, file = %path.display(), error = %e, "Failed to clean up file"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// The client's upload stream broke off; the source tells why.
    #[error("Upload stream failed: {0}")]
    Upload(#[source] Box<dyn std::error::Error + Send + Sync>),
}
