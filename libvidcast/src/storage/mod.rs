//! Temporary public storage for uploaded media
//!
//! Platforms pull the video from a public URL, so every upload is first put
//! into an [`ObjectStorage`] backend. Objects are removed once a platform has
//! taken the media, or in bulk with [`sweep_storage`].

mod blob;
mod local;
mod memory;

pub use blob::BlobStorage;
pub use local::LocalObjectStorage;
pub use memory::MemoryObjectStorage;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{expand_path, StorageConfig};
use crate::error::{Result, StorageError};

/// One page of stored object URLs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub urls: Vec<String>,
    /// Pass back to `list` for the next page; `None` on the last page
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `data` under `name` and return its public URL
    async fn put(&self, name: &str, data: Bytes) -> std::result::Result<String, StorageError>;

    /// Remove the object behind a URL returned by `put`
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` when the object is already gone.
    async fn delete(&self, url: &str) -> std::result::Result<(), StorageError>;

    /// List stored objects page by page
    async fn list(&self, cursor: Option<&str>) -> std::result::Result<ListPage, StorageError>;

    fn backend_name(&self) -> &str;
}

/// Build the storage backend named in the configuration
pub fn create_storage(config: &StorageConfig) -> Result<Arc<dyn ObjectStorage>> {
    match config {
        StorageConfig::Local {
            path,
            public_base_url,
        } => {
            let storage = LocalObjectStorage::new(expand_path(path), public_base_url.clone())?;
            Ok(Arc::new(storage))
        }
        StorageConfig::Blob { base_url, token } => {
            let storage = BlobStorage::new(base_url.clone(), token.clone())?;
            Ok(Arc::new(storage))
        }
    }
}

/// Reject names that could escape the storage namespace
pub(crate) fn validate_object_name(name: &str) -> std::result::Result<(), StorageError> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.starts_with('.')
        || name.contains("..")
    {
        return Err(StorageError::InvalidReference(format!(
            "invalid object name: '{}'",
            name
        )));
    }
    Ok(())
}

/// Unique object name for an uploaded file, keeping a readable suffix
pub fn object_name_for(file_name: &str) -> String {
    let sanitized: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_start_matches('.').replace("..", "_");
    let sanitized = if sanitized.is_empty() {
        "video.mp4".to_string()
    } else {
        sanitized
    };
    format!("{}-{}", uuid::Uuid::new_v4(), sanitized)
}

/// Counts from a bulk cleanup
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub listed: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Delete every stored object, one page at a time
///
/// Individual delete failures are counted and logged but do not stop the
/// sweep. With `dry_run` nothing is deleted.
pub async fn sweep_storage(storage: &dyn ObjectStorage, dry_run: bool) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let mut cursor: Option<String> = None;

    loop {
        let page = storage.list(cursor.as_deref()).await?;
        debug!(
            backend = storage.backend_name(),
            count = page.urls.len(),
            "Listed storage page"
        );

        for url in &page.urls {
            report.listed += 1;
            if dry_run {
                info!(url = %url, "Would delete");
                continue;
            }
            match storage.delete(url).await {
                Ok(()) => report.deleted += 1,
                Err(StorageError::NotFound(_)) => {
                    debug!(url = %url, "Already deleted");
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to delete stored object");
                    report.failed += 1;
                }
            }
        }

        match page.next_cursor {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            Some(_) => {
                warn!(backend = storage.backend_name(), "Storage returned a repeated cursor, stopping sweep");
                break;
            }
            None => break,
        }
    }

    Ok(report)
}
