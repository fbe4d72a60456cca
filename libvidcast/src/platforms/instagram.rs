//! Instagram Graph API adapter (Reels)
//!
//! Publishing is two-phase. `submit` creates a media container that Instagram
//! fills by pulling the video URL. Once the container reports `FINISHED`, a
//! separate `media_publish` call makes the reel public; only that call counts
//! as success. The publish call is sent at most once per container unless the
//! token was rejected.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::http::{api_client, json_body, missing_field, string_field};
use super::{check_length, require_media_url, PlatformAdapter, PlatformResult};
use crate::config::InstagramConfig;
use crate::error::PlatformError;
use crate::types::{
    JobHandle, Platform, PlatformAccount, PublishStatus, RefreshedToken, StatusReport,
    SubmitReceipt, VideoMetadata,
};

const CAPTION_LIMIT: usize = 2200;

pub struct InstagramAdapter {
    client: Client,
    graph_base_url: String,
    refresh_base_url: String,
}

impl InstagramAdapter {
    pub fn new(config: &InstagramConfig) -> PlatformResult<Self> {
        Ok(Self {
            client: api_client()?,
            graph_base_url: config.graph_base_url.trim_end_matches('/').to_string(),
            refresh_base_url: config.refresh_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Professional account id of the token owner
    async fn resolve_user_id(&self, access_token: &str) -> PlatformResult<String> {
        let response = self
            .client
            .get(format!("{}/me", self.graph_base_url))
            .query(&[("fields", "user_id,username")])
            .bearer_auth(access_token)
            .send()
            .await?;
        let me = json_body(response).await?;

        string_field(&me, "user_id")
            .or_else(|| string_field(&me, "id"))
            .ok_or_else(|| missing_field("user_id", &me))
    }

    async fn publish_container(
        &self,
        access_token: &str,
        owner_id: &str,
        container_id: &str,
    ) -> PlatformResult<String> {
        let response = self
            .client
            .post(format!("{}/{}/media_publish", self.graph_base_url, owner_id))
            .bearer_auth(access_token)
            .json(&json!({ "creation_id": container_id }))
            .send()
            .await?;
        let published = json_body(response).await?;

        string_field(&published, "id").ok_or_else(|| missing_field("id", &published))
    }
}

fn failure_detail(container: &Value) -> String {
    match container["status"].as_str() {
        Some(status) if !status.is_empty() => format!("{} ({})", status, container),
        _ => container.to_string(),
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn is_poll_based(&self) -> bool {
        true
    }

    async fn submit(
        &self,
        access_token: &str,
        media_url: &str,
        metadata: &VideoMetadata,
        platform_user_id: Option<&str>,
    ) -> PlatformResult<SubmitReceipt> {
        require_media_url(media_url)?;
        let caption = metadata.caption_or_title();
        check_length("caption", caption, CAPTION_LIMIT)?;

        let owner_id = match platform_user_id.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => self.resolve_user_id(access_token).await?,
        };

        let response = self
            .client
            .post(format!("{}/{}/media", self.graph_base_url, owner_id))
            .bearer_auth(access_token)
            .json(&json!({
                "media_type": "REELS",
                "video_url": media_url,
                "caption": caption,
            }))
            .send()
            .await?;
        let container = json_body(response).await?;

        let container_id =
            string_field(&container, "id").ok_or_else(|| missing_field("id", &container))?;
        debug!(container_id = %container_id, owner_id = %owner_id, "Created Instagram container");

        Ok(SubmitReceipt {
            job: JobHandle::new(container_id).with_owner(owner_id),
            status: PublishStatus::Submitted,
            detail: None,
        })
    }

    async fn poll_status(
        &self,
        access_token: &str,
        job: &JobHandle,
    ) -> PlatformResult<StatusReport> {
        let owner_id = job.owner_id.as_deref().ok_or_else(|| {
            PlatformError::Validation("Instagram job has no owner account id".to_string())
        })?;

        let response = self
            .client
            .get(format!("{}/{}", self.graph_base_url, job.external_job_id))
            .query(&[("fields", "status_code,status")])
            .bearer_auth(access_token)
            .send()
            .await?;
        let container = json_body(response).await?;

        let raw = container["status_code"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        match raw.as_str() {
            "FINISHED" => {
                match self
                    .publish_container(access_token, owner_id, &job.external_job_id)
                    .await
                {
                    Ok(media_id) => {
                        info!(container_id = %job.external_job_id, media_id = %media_id, "Published Instagram reel");
                        Ok(StatusReport::new(PublishStatus::Success, raw).with_detail(media_id))
                    }
                    // A rejected token means nothing was published
                    Err(e) if e.is_auth() => Err(e),
                    // The publish may have gone through; sending it again could post a duplicate
                    Err(e) if e.is_transient() => {
                        warn!(container_id = %job.external_job_id, error = %e, "Instagram publish call got no answer");
                        Ok(StatusReport::new(PublishStatus::Failed, raw).with_detail(format!(
                            "media_publish got no answer ({}), check the account before retrying",
                            e
                        )))
                    }
                    Err(e) => Err(e),
                }
            }
            "PUBLISHED" => Ok(StatusReport::new(PublishStatus::Success, raw)),
            "ERROR" | "EXPIRED" => Ok(StatusReport::new(PublishStatus::Failed, raw)
                .with_detail(failure_detail(&container))),
            _ => Ok(StatusReport::new(PublishStatus::Processing, raw)),
        }
    }

    async fn refresh_token(&self, account: &PlatformAccount) -> PlatformResult<RefreshedToken> {
        // Long-lived tokens refresh themselves; the token goes in the query string
        let response = self
            .client
            .get(format!("{}/refresh_access_token", self.refresh_base_url))
            .query(&[
                ("grant_type", "ig_refresh_token"),
                ("access_token", account.access_token.as_str()),
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
            refresh_token: None,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn adapter(server: &mockito::Server) -> InstagramAdapter {
        InstagramAdapter::new(&InstagramConfig {
            enabled: true,
            graph_base_url: format!("{}/v21.0", server.url()),
            refresh_base_url: server.url(),
        })
        .unwrap()
    }

    fn job() -> JobHandle {
        JobHandle::new("c-1").with_owner("1789")
    }

    #[tokio::test]
    async fn test_submit_creates_reels_container() {
        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/v21.0/1789/media")
            .match_header("authorization", "Bearer ig-token")
            .match_body(Matcher::Json(json!({
                "media_type": "REELS",
                "video_url": "https://media.example.com/a.mp4",
                "caption": "Hello reels",
            })))
            .with_status(200)
            .with_body(r#"{"id":"c-1"}"#)
            .create_async()
            .await;

        let receipt = adapter(&server)
            .submit(
                "ig-token",
                "https://media.example.com/a.mp4",
                &VideoMetadata::new("Title", "Hello reels"),
                Some("1789"),
            )
            .await
            .unwrap();

        assert_eq!(receipt.status, PublishStatus::Submitted);
        assert_eq!(receipt.job, job());
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_resolves_missing_user_id() {
        let mut server = mockito::Server::new_async().await;
        let me = server
            .mock("GET", "/v21.0/me")
            .match_query(Matcher::UrlEncoded("fields".into(), "user_id,username".into()))
            .with_status(200)
            .with_body(r#"{"user_id":"555","username":"creator"}"#)
            .create_async()
            .await;
        let _create = server
            .mock("POST", "/v21.0/555/media")
            .with_status(200)
            .with_body(r#"{"id":"c-9"}"#)
            .create_async()
            .await;

        let receipt = adapter(&server)
            .submit("t", "https://m/a.mp4", &VideoMetadata::new("Title", ""), None)
            .await
            .unwrap();
        assert_eq!(receipt.job.owner_id.as_deref(), Some("555"));
        me.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_oauth_error_is_authentication() {
        let mut server = mockito::Server::new_async().await;
        let _create = server
            .mock("POST", "/v21.0/1789/media")
            .with_status(400)
            .with_body(r#"{"error":{"message":"Session has expired","type":"OAuthException","code":190}}"#)
            .create_async()
            .await;

        let err = adapter(&server)
            .submit("t", "https://m/a.mp4", &VideoMetadata::new("T", ""), Some("1789"))
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_submit_rejects_long_caption() {
        let server = mockito::Server::new_async().await;
        let err = adapter(&server)
            .submit(
                "t",
                "https://m/a.mp4",
                &VideoMetadata::new("T", "c".repeat(2201)),
                Some("1789"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Validation(_)));
    }

    #[tokio::test]
    async fn test_in_progress_is_processing() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/v21.0/c-1")
            .match_query(Matcher::UrlEncoded("fields".into(), "status_code,status".into()))
            .with_status(200)
            .with_body(r#"{"status_code":"IN_PROGRESS","id":"c-1"}"#)
            .create_async()
            .await;
        let publish = server
            .mock("POST", "/v21.0/1789/media_publish")
            .expect(0)
            .create_async()
            .await;

        let report = adapter(&server).poll_status("t", &job()).await.unwrap();
        assert_eq!(report.status, PublishStatus::Processing);
        assert_eq!(report.raw_status, "IN_PROGRESS");
        publish.assert_async().await;
    }

    #[tokio::test]
    async fn test_finished_publishes_container() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/v21.0/c-1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status_code":"FINISHED","id":"c-1"}"#)
            .create_async()
            .await;
        let publish = server
            .mock("POST", "/v21.0/1789/media_publish")
            .match_body(Matcher::Json(json!({"creation_id": "c-1"})))
            .with_status(200)
            .with_body(r#"{"id":"media-42"}"#)
            .expect(1)
            .create_async()
            .await;

        let report = adapter(&server).poll_status("t", &job()).await.unwrap();
        assert_eq!(report.status, PublishStatus::Success);
        assert_eq!(report.detail.as_deref(), Some("media-42"));
        publish.assert_async().await;
    }

    #[tokio::test]
    async fn test_finished_without_successful_publish_is_not_success() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/v21.0/c-1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status_code":"FINISHED"}"#)
            .create_async()
            .await;
        let _publish = server
            .mock("POST", "/v21.0/1789/media_publish")
            .with_status(400)
            .with_body(r#"{"error":{"message":"Media ID is not available","code":9007}}"#)
            .create_async()
            .await;

        let err = adapter(&server).poll_status("t", &job()).await.unwrap_err();
        assert!(matches!(err, PlatformError::Remote { status: 400, .. }));
        assert!(err.raw_detail().unwrap().contains("9007"));
    }

    #[tokio::test]
    async fn test_already_published_container_is_success_without_publishing() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/v21.0/c-1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status_code":"PUBLISHED"}"#)
            .create_async()
            .await;
        let publish = server
            .mock("POST", "/v21.0/1789/media_publish")
            .expect(0)
            .create_async()
            .await;

        let report = adapter(&server).poll_status("t", &job()).await.unwrap();
        assert_eq!(report.status, PublishStatus::Success);
        assert_eq!(report.raw_status, "PUBLISHED");
        publish.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_and_expired_are_failed() {
        for raw in ["ERROR", "EXPIRED"] {
            let mut server = mockito::Server::new_async().await;
            let _status = server
                .mock("GET", "/v21.0/c-1")
                .match_query(Matcher::Any)
                .with_status(200)
                .with_body(format!(
                    r#"{{"status_code":"{}","status":"Error: video format unsupported"}}"#,
                    raw
                ))
                .create_async()
                .await;

            let report = adapter(&server).poll_status("t", &job()).await.unwrap();
            assert_eq!(report.status, PublishStatus::Failed);
            assert_eq!(report.raw_status, raw);
            assert!(report
                .detail
                .unwrap()
                .starts_with("Error: video format unsupported"));
        }
    }

    #[tokio::test]
    async fn test_refresh_uses_query_string_token() {
        let mut server = mockito::Server::new_async().await;
        let refresh = server
            .mock("GET", "/refresh_access_token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "ig_refresh_token".into()),
                Matcher::UrlEncoded("access_token".into(), "ig-old".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"ig-new","token_type":"bearer","expires_in":5184000}"#)
            .create_async()
            .await;

        let account = PlatformAccount {
            id: 3,
            user_id: "u".to_string(),
            platform: Platform::Instagram,
            access_token: "ig-old".to_string(),
            refresh_token: None,
            expires_at: None,
            platform_user_id: Some("1789".to_string()),
        };
        let refreshed = adapter(&server).refresh_token(&account).await.unwrap();
        assert_eq!(refreshed.access_token, "ig-new");
        assert_eq!(refreshed.refresh_token, None);
        assert!(refreshed.expires_at.is_some());
        refresh.assert_async().await;
    }
}
