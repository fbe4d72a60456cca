//! TikTok Content Posting API adapter
//!
//! Videos are pulled from the media URL and delivered to the creator's TikTok
//! inbox. Success here means the hand-off completed; the creator still posts
//! the video from the app.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::http::{api_client, classify_failure, json_body, missing_field, string_field};
use super::{check_length, require_media_url, PlatformAdapter, PlatformResult};
use crate::config::TikTokConfig;
use crate::error::PlatformError;
use crate::types::{
    JobHandle, Platform, PlatformAccount, PublishStatus, RefreshedToken, StatusReport,
    SubmitReceipt, VideoMetadata,
};

const TITLE_LIMIT: usize = 2200;

pub struct TikTokAdapter {
    client: Client,
    client_key: String,
    client_secret: String,
    api_base_url: String,
}

impl TikTokAdapter {
    pub fn new(config: &TikTokConfig) -> PlatformResult<Self> {
        Ok(Self {
            client: api_client()?,
            client_key: config.client_key.clone(),
            client_secret: config.client_secret.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// POST a JSON request and unwrap the `{data, error}` envelope
    async fn call(&self, access_token: &str, path: &str, body: Value) -> PlatformResult<Value> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base_url, path))
            .bearer_auth(access_token)
            .header("Content-Type", "application/json; charset=UTF-8")
            .json(&body)
            .send()
            .await?;
        let envelope = json_body(response).await?;
        check_envelope(envelope)
    }
}

/// TikTok answers 200 with `error.code != "ok"` for some failures
fn check_envelope(envelope: Value) -> PlatformResult<Value> {
    match envelope["error"]["code"].as_str() {
        None | Some("ok") => Ok(envelope),
        Some(_) => Err(classify_failure(reqwest::StatusCode::OK, envelope.to_string())),
    }
}

fn published_post_id(envelope: &Value) -> Option<String> {
    // Field name is misspelled in the API
    match envelope["data"]["publicaly_available_post_id"].get(0)? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Canonical status for a raw TikTok publish status
///
/// `SEND_TO_USER_INBOX` and `PUBLISH_COMPLETE` are the names the Content
/// Posting API uses for the inbox hand-off, so they count as success along
/// with `PUBLISH_SUCCESSFUL`. Everything not listed is still processing.
pub fn classify_status(raw: &str) -> PublishStatus {
    match raw {
        "PUBLISH_SUCCESSFUL" | "PUBLISHED" | "PUBLISH_COMPLETE" | "SEND_TO_USER_INBOX" => {
            PublishStatus::Success
        }
        "PUBLISH_FAILED" | "FAILED" => PublishStatus::Failed,
        // UPLOAD_SUCCESSFUL still needs the creator to act in the app
        _ => PublishStatus::Processing,
    }
}

#[async_trait]
impl PlatformAdapter for TikTokAdapter {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    fn is_poll_based(&self) -> bool {
        true
    }

    async fn submit(
        &self,
        access_token: &str,
        media_url: &str,
        metadata: &VideoMetadata,
        _platform_user_id: Option<&str>,
    ) -> PlatformResult<SubmitReceipt> {
        require_media_url(media_url)?;
        let title = metadata.caption_or_title();
        check_length("title", title, TITLE_LIMIT)?;

        let envelope = self
            .call(
                access_token,
                "/v2/post/publish/inbox/video/init/",
                json!({
                    "post_info": { "title": title },
                    "source_info": {
                        "source": "PULL_FROM_URL",
                        "video_url": media_url,
                    }
                }),
            )
            .await?;

        let publish_id = string_field(&envelope["data"], "publish_id")
            .ok_or_else(|| missing_field("data.publish_id", &envelope))?;
        debug!(publish_id = %publish_id, "Initialized TikTok inbox upload");

        Ok(SubmitReceipt {
            job: JobHandle::new(publish_id),
            status: PublishStatus::Submitted,
            detail: None,
        })
    }

    async fn poll_status(
        &self,
        access_token: &str,
        job: &JobHandle,
    ) -> PlatformResult<StatusReport> {
        let envelope = self
            .call(
                access_token,
                "/v2/post/publish/status/fetch/",
                json!({ "publish_id": job.external_job_id }),
            )
            .await?;

        let raw = envelope["data"]["status"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let status = classify_status(&raw);

        let report = StatusReport::new(status, raw);
        Ok(match status {
            PublishStatus::Failed => report.with_detail(envelope.to_string()),
            PublishStatus::Success => match published_post_id(&envelope) {
                Some(id) => report.with_detail(id),
                None => report,
            },
            _ => report,
        })
    }

    async fn refresh_token(&self, account: &PlatformAccount) -> PlatformResult<RefreshedToken> {
        let refresh_token = account.refresh_token.as_deref().ok_or_else(|| {
            PlatformError::Unsupported("TikTok account has no refresh token".to_string())
        })?;

        let response = self
            .client
            .post(format!("{}/v2/oauth/token/", self.api_base_url))
            .form(&[
                ("client_key", self.client_key.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;
        let token = json_body(response).await?;

        if let Some(error) = token["error"].as_str().filter(|e| !e.is_empty()) {
            return Err(PlatformError::Authentication(format!(
                "{}: {}",
                error, token
            )));
        }

        let access_token = string_field(&token, "access_token")
            .ok_or_else(|| missing_field("access_token", &token))?;
        let expires_at = token["expires_in"]
            .as_i64()
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

        // The consumed refresh token is dead; the new one must replace it
        Ok(RefreshedToken {
            access_token,
            refresh_token: string_field(&token, "refresh_token"),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn adapter(server: &mockito::Server) -> TikTokAdapter {
        TikTokAdapter::new(&TikTokConfig {
            enabled: true,
            client_key: "ck".to_string(),
            client_secret: "cs".to_string(),
            api_base_url: server.url(),
        })
        .unwrap()
    }

    async fn status_server(body: &str) -> (mockito::ServerGuard, mockito::Mock) {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/post/publish/status/fetch/")
            .match_body(Matcher::Json(json!({"publish_id": "v_pub_1"})))
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;
        (server, mock)
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status("PUBLISH_SUCCESSFUL"), PublishStatus::Success);
        assert_eq!(classify_status("PUBLISHED"), PublishStatus::Success);
        assert_eq!(classify_status("SEND_TO_USER_INBOX"), PublishStatus::Success);
        assert_eq!(classify_status("PUBLISH_COMPLETE"), PublishStatus::Success);
        assert_eq!(classify_status("PUBLISH_FAILED"), PublishStatus::Failed);
        assert_eq!(classify_status("FAILED"), PublishStatus::Failed);
        assert_eq!(classify_status("UPLOAD_SUCCESSFUL"), PublishStatus::Processing);
        assert_eq!(classify_status("PROCESSING_UPLOAD"), PublishStatus::Processing);
        assert_eq!(classify_status("PROCESSING_DOWNLOAD"), PublishStatus::Processing);
        assert_eq!(classify_status("SOMETHING_NEW"), PublishStatus::Processing);
    }

    #[tokio::test]
    async fn test_submit_pull_from_url() {
        let mut server = mockito::Server::new_async().await;
        let init = server
            .mock("POST", "/v2/post/publish/inbox/video/init/")
            .match_header("authorization", "Bearer act.1")
            .match_body(Matcher::PartialJson(json!({
                "source_info": {
                    "source": "PULL_FROM_URL",
                    "video_url": "https://media.example.com/a.mp4"
                }
            })))
            .with_status(200)
            .with_body(r#"{"data":{"publish_id":"v_pub_1"},"error":{"code":"ok","message":"","log_id":"1"}}"#)
            .create_async()
            .await;

        let receipt = adapter(&server)
            .submit(
                "act.1",
                "https://media.example.com/a.mp4",
                &VideoMetadata::new("Title", ""),
                None,
            )
            .await
            .unwrap();
        assert_eq!(receipt.job.external_job_id, "v_pub_1");
        assert_eq!(receipt.status, PublishStatus::Submitted);
        init.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_invalid_token() {
        let mut server = mockito::Server::new_async().await;
        let _init = server
            .mock("POST", "/v2/post/publish/inbox/video/init/")
            .with_status(401)
            .with_body(r#"{"error":{"code":"access_token_invalid","message":"invalid"}}"#)
            .create_async()
            .await;

        let err = adapter(&server)
            .submit("bad", "https://m/a.mp4", &VideoMetadata::new("T", ""), None)
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_submit_remote_error_keeps_payload() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"{"data":{},"error":{"code":"spam_risk_too_many_pending_share","message":"too many","log_id":"9"}}"#;
        let _init = server
            .mock("POST", "/v2/post/publish/inbox/video/init/")
            .with_status(403)
            .with_body(body)
            .create_async()
            .await;

        let err = adapter(&server)
            .submit("t", "https://m/a.mp4", &VideoMetadata::new("T", ""), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PlatformError::Remote {
                status: 403,
                body: body.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_submit_missing_url() {
        let server = mockito::Server::new_async().await;
        let err = adapter(&server)
            .submit("t", "", &VideoMetadata::new("T", ""), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Validation(_)));
    }

    #[tokio::test]
    async fn test_publish_successful_and_published_are_equivalent() {
        for raw in ["PUBLISH_SUCCESSFUL", "PUBLISHED"] {
            let (server, _mock) = status_server(&format!(
                r#"{{"data":{{"status":"{}"}},"error":{{"code":"ok"}}}}"#,
                raw
            ))
            .await;
            let report = adapter(&server)
                .poll_status("t", &JobHandle::new("v_pub_1"))
                .await
                .unwrap();
            assert_eq!(report.status, PublishStatus::Success);
            assert_eq!(report.raw_status, raw);
        }
    }

    #[tokio::test]
    async fn test_publish_failed_keeps_raw_payload() {
        let body = r#"{"data":{"status":"PUBLISH_FAILED","fail_reason":"file_format_check_failed"},"error":{"code":"ok"}}"#;
        let (server, _mock) = status_server(body).await;

        let report = adapter(&server)
            .poll_status("t", &JobHandle::new("v_pub_1"))
            .await
            .unwrap();
        assert_eq!(report.status, PublishStatus::Failed);
        assert!(report
            .detail
            .unwrap()
            .contains("file_format_check_failed"));
    }

    #[tokio::test]
    async fn test_upload_successful_is_still_processing() {
        let (server, _mock) =
            status_server(r#"{"data":{"status":"UPLOAD_SUCCESSFUL"},"error":{"code":"ok"}}"#)
                .await;
        let report = adapter(&server)
            .poll_status("t", &JobHandle::new("v_pub_1"))
            .await
            .unwrap();
        assert_eq!(report.status, PublishStatus::Processing);
    }

    #[tokio::test]
    async fn test_error_envelope_on_200() {
        let (server, _mock) = status_server(
            r#"{"data":{},"error":{"code":"access_token_invalid","message":"expired"}}"#,
        )
        .await;
        let err = adapter(&server)
            .poll_status("t", &JobHandle::new("v_pub_1"))
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_refresh_rotates_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/v2/oauth/token/")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("client_key".into(), "ck".into()),
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "rft.1".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"act.2","expires_in":86400,"refresh_token":"rft.2","refresh_expires_in":31536000,"open_id":"o1","scope":"video.upload","token_type":"Bearer"}"#)
            .create_async()
            .await;

        let account = PlatformAccount {
            id: 2,
            user_id: "u".to_string(),
            platform: Platform::TikTok,
            access_token: "act.1".to_string(),
            refresh_token: Some("rft.1".to_string()),
            expires_at: None,
            platform_user_id: None,
        };
        let refreshed = adapter(&server).refresh_token(&account).await.unwrap();
        assert_eq!(refreshed.access_token, "act.2");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("rft.2"));
        token.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_error_body_is_authentication() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("POST", "/v2/oauth/token/")
            .with_status(200)
            .with_body(r#"{"error":"invalid_grant","error_description":"Refresh token is invalid or expired."}"#)
            .create_async()
            .await;

        let account = PlatformAccount {
            id: 2,
            user_id: "u".to_string(),
            platform: Platform::TikTok,
            access_token: "act.1".to_string(),
            refresh_token: Some("rft.used".to_string()),
            expires_at: None,
            platform_user_id: None,
        };
        let err = adapter(&server).refresh_token(&account).await.unwrap_err();
        assert!(err.is_auth());
    }
}
