//! YouTube Data API adapter
//!
//! YouTube has no server-side pull: `submit` downloads the media and pushes it
//! through a resumable upload session, so the job is finished (or failed) as
//! soon as `submit` returns. There is no polling phase.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info};

use super::http::{api_client, classify_failure, json_body, missing_field, string_field, transfer_client};
use super::{check_length, require_media_url, PlatformAdapter, PlatformResult};
use crate::config::YouTubeConfig;
use crate::error::PlatformError;
use crate::types::{
    JobHandle, Platform, PlatformAccount, PublishStatus, RefreshedToken, StatusReport,
    SubmitReceipt, VideoMetadata,
};

const TITLE_LIMIT: usize = 100;
const DESCRIPTION_LIMIT: usize = 5000;

pub struct YouTubeAdapter {
    api: Client,
    transfer: Client,
    config: YouTubeConfig,
}

impl YouTubeAdapter {
    pub fn new(config: &YouTubeConfig) -> PlatformResult<Self> {
        Ok(Self {
            api: api_client()?,
            transfer: transfer_client()?,
            config: YouTubeConfig {
                upload_base_url: config.upload_base_url.trim_end_matches('/').to_string(),
                ..config.clone()
            },
        })
    }

    fn validate(metadata: &VideoMetadata) -> PlatformResult<()> {
        if metadata.title.trim().is_empty() {
            return Err(PlatformError::Validation("YouTube requires a title".to_string()));
        }
        check_length("title", &metadata.title, TITLE_LIMIT)?;
        check_length("description", &metadata.caption, DESCRIPTION_LIMIT)?;
        Ok(())
    }

    async fn download(&self, media_url: &str) -> PlatformResult<bytes::Bytes> {
        let response = self.transfer.get(media_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Remote {
                status: status.as_u16(),
                body: format!("could not fetch media from {}: {}", media_url, body),
            });
        }
        Ok(response.bytes().await?)
    }

    /// Open a resumable upload session and return its URL
    async fn start_session(
        &self,
        access_token: &str,
        metadata: &VideoMetadata,
        content_length: usize,
    ) -> PlatformResult<String> {
        let url = format!(
            "{}/upload/youtube/v3/videos?uploadType=resumable&part=snippet,status",
            self.config.upload_base_url
        );
        let body = json!({
            "snippet": {
                "title": metadata.title,
                "description": metadata.caption,
                "categoryId": self.config.category_id,
            },
            "status": {
                "privacyStatus": self.config.privacy_status,
                "selfDeclaredMadeForKids": false,
            }
        });

        let response = self
            .api
            .post(&url)
            .bearer_auth(access_token)
            .header("X-Upload-Content-Length", content_length.to_string())
            .header("X-Upload-Content-Type", "video/*")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(classify_failure(status, body));
        }

        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| PlatformError::Remote {
                status: status.as_u16(),
                body: "resumable upload response has no Location header".to_string(),
            })
    }
}

#[async_trait]
impl PlatformAdapter for YouTubeAdapter {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    fn is_poll_based(&self) -> bool {
        false
    }

    async fn submit(
        &self,
        access_token: &str,
        media_url: &str,
        metadata: &VideoMetadata,
        _platform_user_id: Option<&str>,
    ) -> PlatformResult<SubmitReceipt> {
        require_media_url(media_url)?;
        Self::validate(metadata)?;

        let media = self.download(media_url).await?;
        debug!(size = media.len(), "Fetched media for YouTube upload");

        let session_url = self.start_session(access_token, metadata, media.len()).await?;

        let response = self
            .transfer
            .put(&session_url)
            .bearer_auth(access_token)
            .header("Content-Type", "video/*")
            .body(media)
            .send()
            .await?;
        let video = json_body(response).await?;

        let video_id = string_field(&video, "id").ok_or_else(|| missing_field("id", &video))?;
        let upload_status = video["status"]["uploadStatus"]
            .as_str()
            .unwrap_or("uploaded")
            .to_string();

        if matches!(upload_status.as_str(), "failed" | "rejected" | "deleted") {
            let reason = video["status"]["rejectionReason"]
                .as_str()
                .or_else(|| video["status"]["failureReason"].as_str())
                .unwrap_or(upload_status.as_str());
            return Ok(SubmitReceipt {
                job: JobHandle::new(video_id),
                status: PublishStatus::Failed,
                detail: Some(format!("{}: {}", reason, video)),
            });
        }

        info!(video_id = %video_id, upload_status = %upload_status, "YouTube upload complete");
        Ok(SubmitReceipt {
            job: JobHandle::new(video_id.clone()),
            status: PublishStatus::Success,
            detail: Some(video_id),
        })
    }

    async fn poll_status(
        &self,
        _access_token: &str,
        _job: &JobHandle,
    ) -> PlatformResult<StatusReport> {
        Err(PlatformError::Unsupported(
            "YouTube uploads complete during submit".to_string(),
        ))
    }

    async fn refresh_token(&self, account: &PlatformAccount) -> PlatformResult<RefreshedToken> {
        let refresh_token = account.refresh_token.as_deref().ok_or_else(|| {
            PlatformError::Unsupported("YouTube account has no refresh token".to_string())
        })?;

        let response = self
            .api
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        let token = json_body(response).await?;

        let access_token = string_field(&token, "access_token")
            .ok_or_else(|| missing_field("access_token", &token))?;
        let expires_at = token["expires_in"]
            .as_i64()
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

        Ok(RefreshedToken {
            access_token,
            refresh_token: string_field(&token, "refresh_token"),
            expires_at,
        })
    }
}
