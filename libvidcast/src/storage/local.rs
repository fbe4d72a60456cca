use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use super::{validate_object_name, ListPage, ObjectStorage};
use crate::error::StorageError;

const DEFAULT_PAGE_SIZE: usize = 100;

/// Directory published by a static file server
///
/// An object named `x.mp4` lives at `<base_path>/x.mp4` and is reachable at
/// `<public_base_url>/x.mp4`.
pub struct LocalObjectStorage {
    base_path: PathBuf,
    public_base_url: String,
    page_size: usize,
}

impl LocalObjectStorage {
    pub fn new<P: AsRef<Path>>(
        base_path: P,
        public_base_url: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.public_base_url, name)
    }

    fn name_from_url<'a>(&self, url: &'a str) -> Result<&'a str, StorageError> {
        let name = url
            .strip_prefix(self.public_base_url.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                StorageError::InvalidReference(format!("URL is not served by this storage: {}", url))
            })?;
        validate_object_name(name)?;
        Ok(name)
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn put(&self, name: &str, data: Bytes) -> Result<String, StorageError> {
        validate_object_name(name)?;
        tokio::fs::write(self.base_path.join(name), &data).await?;
        Ok(self.url_for(name))
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        let name = self.name_from_url(url)?;
        match tokio::fs::remove_file(self.base_path.join(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(url.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, cursor: Option<&str>) -> Result<ListPage, StorageError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if cursor.map_or(true, |c| name > c) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        let has_more = names.len() > self.page_size;
        names.truncate(self.page_size);
        let next_cursor = if has_more { names.last().cloned() } else { None };

        Ok(ListPage {
            urls: names.iter().map(|n| self.url_for(n)).collect(),
            next_cursor,
        })
    }

    fn backend_name(&self) -> &str {
        "local"
    }
}
