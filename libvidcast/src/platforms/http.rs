//! Shared HTTP plumbing for the platform adapters

use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

use super::PlatformResult;
use crate::error::PlatformError;

/// Client for JSON API calls
pub(crate) fn api_client() -> PlatformResult<Client> {
    build_client(Duration::from_secs(30))
}

/// Client for media transfers, which can take minutes
pub(crate) fn transfer_client() -> PlatformResult<Client> {
    build_client(Duration::from_secs(3600))
}

fn build_client(timeout: Duration) -> PlatformResult<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .timeout(timeout)
        .build()
        .map_err(|e| PlatformError::Network(format!("failed to build HTTP client: {}", e)))
}

/// Classify a failed response
///
/// HTTP 401 and the platforms' invalid-token error codes become
/// `Authentication`; everything else is `Remote` with the raw body.
pub(crate) fn classify_failure(status: StatusCode, body: String) -> PlatformError {
    if status == StatusCode::UNAUTHORIZED || is_invalid_token_body(&body) {
        return PlatformError::Authentication(body);
    }
    PlatformError::Remote {
        status: status.as_u16(),
        body,
    }
}

fn is_invalid_token_body(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    let error = &value["error"];

    // Graph API: {"error": {"code": 190, "type": "OAuthException"}}
    if error["code"].as_i64() == Some(190) {
        return true;
    }
    // TikTok: {"error": {"code": "access_token_invalid"}}
    if matches!(
        error["code"].as_str(),
        Some("access_token_invalid" | "access_token_expired" | "scope_not_authorized")
    ) {
        return true;
    }
    // OAuth token endpoints: {"error": "invalid_grant"}
    matches!(error.as_str(), Some("invalid_grant" | "invalid_token"))
}

/// Read a JSON body, classifying non-2xx responses
pub(crate) async fn json_body(response: Response) -> PlatformResult<Value> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(classify_failure(status, body));
    }

    serde_json::from_str(&body).map_err(|e| PlatformError::Remote {
        status: status.as_u16(),
        body: format!("invalid JSON ({}): {}", e, body),
    })
}

/// String field of a JSON object, accepting numeric ids too
pub(crate) fn string_field(value: &Value, field: &str) -> Option<String> {
    match &value[field] {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Remote error for a 2xx response that lacks an expected field
pub(crate) fn missing_field(field: &str, payload: &Value) -> PlatformError {
    PlatformError::Remote {
        status: 200,
        body: format!("response has no '{}': {}", field, payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_is_authentication() {
        let err = classify_failure(StatusCode::UNAUTHORIZED, "expired".to_string());
        assert_eq!(err, PlatformError::Authentication("expired".to_string()));
    }

    #[test]
    fn test_graph_oauth_code_is_authentication() {
        let body = r#"{"error":{"message":"Error validating access token","type":"OAuthException","code":190}}"#;
        let err = classify_failure(StatusCode::BAD_REQUEST, body.to_string());
        assert!(err.is_auth());
    }

    #[test]
    fn test_tiktok_invalid_token_is_authentication() {
        let body = r#"{"data":{},"error":{"code":"access_token_invalid","message":"The access token is invalid or not found in the request.","log_id":"2024"}}"#;
        let err = classify_failure(StatusCode::BAD_REQUEST, body.to_string());
        assert!(err.is_auth());
    }

    #[test]
    fn test_oauth_invalid_grant_is_authentication() {
        let body = r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#;
        assert!(classify_failure(StatusCode::BAD_REQUEST, body.to_string()).is_auth());
    }

    #[test]
    fn test_other_failures_keep_raw_body() {
        let body = r#"{"error":{"code":"spam_risk_too_many_posts"}}"#;
        let err = classify_failure(StatusCode::FORBIDDEN, body.to_string());
        assert_eq!(
            err,
            PlatformError::Remote {
                status: 403,
                body: body.to_string()
            }
        );

        let err = classify_failure(StatusCode::BAD_GATEWAY, "<html>".to_string());
        assert_eq!(err.raw_detail(), Some("<html>"));
    }

    #[test]
    fn test_string_field() {
        let value = serde_json::json!({"id": "17890", "user_id": 123, "empty": ""});
        assert_eq!(string_field(&value, "id").as_deref(), Some("17890"));
        assert_eq!(string_field(&value, "user_id").as_deref(), Some("123"));
        assert_eq!(string_field(&value, "empty"), None);
        assert_eq!(string_field(&value, "missing"), None);
    }
}
