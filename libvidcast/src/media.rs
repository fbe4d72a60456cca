//! Best-effort media preprocessing before upload
//!
//! A preprocessor never fails an upload: when it cannot produce a smaller
//! file the original bytes are used unchanged.

use async_trait::async_trait;
use bytes::Bytes;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::MediaConfig;

#[async_trait]
pub trait MediaPreprocessor: Send + Sync {
    /// Transform `data` for upload, falling back to the input on failure
    async fn process(&self, file_name: &str, data: Bytes) -> Bytes;

    fn name(&self) -> &str;
}

/// Uploads the file as given
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

#[async_trait]
impl MediaPreprocessor for Passthrough {
    async fn process(&self, _file_name: &str, data: Bytes) -> Bytes {
        data
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

#[derive(Error, Debug)]
enum CompressError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ffmpeg exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Re-encodes uploads to H.264/AAC MP4 with ffmpeg
pub struct FfmpegCompressor {
    ffmpeg_path: String,
    crf: u8,
}

impl FfmpegCompressor {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            crf: 28,
        }
    }

    /// Constant rate factor passed to libx264; higher is smaller
    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf.min(51);
        self
    }

    async fn compress(&self, data: &[u8]) -> Result<Bytes, CompressError> {
        let input = tempfile::NamedTempFile::new()?;
        tokio::fs::write(input.path(), data).await?;
        let output = tempfile::Builder::new().suffix(".mp4").tempfile()?;

        let crf = self.crf.to_string();
        let result = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .arg("-i")
            .arg(input.path())
            .args(["-c:v", "libx264", "-preset", "veryfast", "-crf", &crf])
            .args(["-c:a", "aac", "-b:a", "128k"])
            .args(["-movflags", "+faststart"])
            .arg(output.path())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !result.status.success() {
            return Err(CompressError::Failed {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        Ok(Bytes::from(tokio::fs::read(output.path()).await?))
    }
}

#[async_trait]
impl MediaPreprocessor for FfmpegCompressor {
    async fn process(&self, file_name: &str, data: Bytes) -> Bytes {
        debug!(file = file_name, size = data.len(), "Compressing with ffmpeg");

        match self.compress(&data).await {
            Ok(compressed) if !compressed.is_empty() && compressed.len() < data.len() => {
                info!(
                    file = file_name,
                    original = data.len(),
                    compressed = compressed.len(),
                    "Compressed upload"
                );
                compressed
            }
            Ok(_) => {
                debug!(file = file_name, "Compression did not shrink the file, keeping original");
                data
            }
            Err(e) => {
                warn!(file = file_name, error = %e, "Compression failed, uploading original");
                data
            }
        }
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Preprocessor selected by the `[media]` section
pub fn create_preprocessor(config: &MediaConfig) -> Arc<dyn MediaPreprocessor> {
    match config.ffmpeg_path.as_deref().map(str::trim) {
        Some(path) if !path.is_empty() => Arc::new(FfmpegCompressor::new(path)),
        _ => Arc::new(Passthrough),
    }
}
