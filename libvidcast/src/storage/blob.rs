use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{validate_object_name, ListPage, ObjectStorage};
use crate::error::StorageError;

/// HTTP blob service client
///
/// - `PUT {base}/{name}` stores an object and answers `{"url": ...}`
/// - `POST {base}/delete` with `{"urls": [...]}` removes objects
/// - `GET {base}?cursor=` answers `{"blobs": [{"url": ...}], "cursor", "hasMore"}`
pub struct BlobStorage {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    blobs: Vec<BlobEntry>,
    cursor: Option<String>,
    #[serde(rename = "hasMore", default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct BlobEntry {
    url: String,
}

impl BlobStorage {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| StorageError::Backend(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

async fn backend_error(response: reqwest::Response, operation: &str) -> StorageError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    StorageError::Backend(format!("blob {} failed: {} - {}", operation, status, body))
}

fn transport_error(error: reqwest::Error, operation: &str) -> StorageError {
    StorageError::Backend(format!("blob {} request failed: {}", operation, error))
}

#[async_trait]
impl ObjectStorage for BlobStorage {
    async fn put(&self, name: &str, data: Bytes) -> Result<String, StorageError> {
        validate_object_name(name)?;

        let response = self
            .client
            .put(format!("{}/{}", self.base_url, name))
            .header("Authorization", self.auth())
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| transport_error(e, "put"))?;

        if !response.status().is_success() {
            return Err(backend_error(response, "put").await);
        }

        let body: PutResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Backend(format!("invalid put response: {}", e)))?;
        Ok(body.url)
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        let response = self
            .client
            .post(format!("{}/delete", self.base_url))
            .header("Authorization", self.auth())
            .json(&json!({ "urls": [url] }))
            .send()
            .await
            .map_err(|e| transport_error(e, "delete"))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(url.to_string())),
            _ => Err(backend_error(response, "delete").await),
        }
    }

    async fn list(&self, cursor: Option<&str>) -> Result<ListPage, StorageError> {
        let mut request = self
            .client
            .get(&self.base_url)
            .header("Authorization", self.auth());
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, "list"))?;
        if !response.status().is_success() {
            return Err(backend_error(response, "list").await);
        }

        let body: ListResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Backend(format!("invalid list response: {}", e)))?;

        Ok(ListPage {
            urls: body.blobs.into_iter().map(|b| b.url).collect(),
            next_cursor: if body.has_more { body.cursor } else { None },
        })
    }

    fn backend_name(&self) -> &str {
        "blob"
    }
}
