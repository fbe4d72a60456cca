//! Core types for Vidcast

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Video platforms Vidcast can publish to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    YouTube,
    Instagram,
    TikTok,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::YouTube, Platform::Instagram, Platform::TikTok];

    /// Lowercase identifier used in config files, the database and the CLI
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::YouTube => "youtube",
            Platform::Instagram => "instagram",
            Platform::TikTok => "tiktok",
        }
    }

    /// Human-readable name for banners
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::YouTube => "YouTube",
            Platform::Instagram => "Instagram",
            Platform::TikTok => "TikTok",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "youtube" | "yt" => Ok(Platform::YouTube),
            "instagram" | "ig" => Ok(Platform::Instagram),
            "tiktok" | "tt" => Ok(Platform::TikTok),
            other => Err(format!(
                "Unknown platform: '{}'. Valid options: youtube, instagram, tiktok",
                other
            )),
        }
    }
}

/// Parse a comma-separated platform list, dropping duplicates
pub fn parse_platform_list(input: &str) -> Result<BTreeSet<Platform>, String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Platform::from_str)
        .collect()
}

/// Stored OAuth credentials for one (user, platform) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformAccount {
    pub id: i64,
    pub user_id: String,
    pub platform: Platform,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Platform-side account id (Instagram professional account id)
    pub platform_user_id: Option<String>,
}

impl PlatformAccount {
    /// Whether the access token expires within `buffer` of `now`
    ///
    /// Accounts without a stored expiry are treated as valid.
    pub fn expires_within(&self, now: DateTime<Utc>, buffer: chrono::Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - buffer <= now,
            None => false,
        }
    }
}

/// Title and caption shared across platforms
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub caption: String,
}

impl VideoMetadata {
    pub fn new(title: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            caption: caption.into(),
        }
    }

    /// Caption text to use where a platform has a single text field
    pub fn caption_or_title(&self) -> &str {
        if self.caption.trim().is_empty() {
            &self.title
        } else {
            &self.caption
        }
    }
}

/// Canonical publish status shared by every platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Submitted,
    Processing,
    Success,
    Failed,
}

impl PublishStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PublishStatus::Success | PublishStatus::Failed)
    }
}

impl fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishStatus::Submitted => write!(f, "submitted"),
            PublishStatus::Processing => write!(f, "processing"),
            PublishStatus::Success => write!(f, "success"),
            PublishStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot move {platform} publish {job_id} from {from} to {to}")]
pub struct InvalidTransition {
    pub platform: Platform,
    pub job_id: String,
    pub from: PublishStatus,
    pub to: PublishStatus,
}

/// Publish state of one platform within one upload
///
/// Created only once a submit succeeded, so the external job id never changes
/// for the lifetime of the value. Re-submitting means building a new state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformPublishState {
    platform: Platform,
    external_job_id: String,
    status: PublishStatus,
    last_error: Option<String>,
}

impl PlatformPublishState {
    pub fn submitted(platform: Platform, external_job_id: impl Into<String>) -> Self {
        Self {
            platform,
            external_job_id: external_job_id.into(),
            status: PublishStatus::Submitted,
            last_error: None,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn external_job_id(&self) -> &str {
        &self.external_job_id
    }

    pub fn status(&self) -> PublishStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`; terminal states accept no further transitions
    pub fn advance(&mut self, next: PublishStatus) -> Result<(), InvalidTransition> {
        if self.status.is_terminal() || next == PublishStatus::Submitted {
            return Err(InvalidTransition {
                platform: self.platform,
                job_id: self.external_job_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Terminalize as failed, recording the error
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.advance(PublishStatus::Failed)?;
        self.last_error = Some(error.into());
        Ok(())
    }
}

/// Handle to a platform-side publish job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    /// Container id, publish id or video id
    pub external_job_id: String,
    /// Platform account that owns the job, where follow-up calls need it
    pub owner_id: Option<String>,
}

impl JobHandle {
    pub fn new(external_job_id: impl Into<String>) -> Self {
        Self {
            external_job_id: external_job_id.into(),
            owner_id: None,
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }
}

/// Result of a successful submit call
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReceipt {
    pub job: JobHandle,
    /// `Submitted` for poll-based platforms, `Success` when the upload
    /// completed synchronously
    pub status: PublishStatus,
    pub detail: Option<String>,
}

/// Canonical classification of one poll
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: PublishStatus,
    /// Raw platform status code, kept for logs
    pub raw_status: String,
    /// Platform diagnostic payload or published id
    pub detail: Option<String>,
}

impl StatusReport {
    pub fn new(status: PublishStatus, raw_status: impl Into<String>) -> Self {
        Self {
            status,
            raw_status: raw_status.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Tokens returned by a refresh exchange
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Present when the platform rotated the refresh token
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One upload fanned out to several platforms
///
/// Lives only as long as the session that drives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    pub id: String,
    pub source_media_url: String,
    pub metadata: VideoMetadata,
    pub target_platforms: BTreeSet<Platform>,
    pub per_platform_state: BTreeMap<Platform, PlatformPublishState>,
}

impl UploadJob {
    pub fn new(
        source_media_url: impl Into<String>,
        metadata: VideoMetadata,
        target_platforms: BTreeSet<Platform>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_media_url: source_media_url.into(),
            metadata,
            target_platforms,
            per_platform_state: BTreeMap::new(),
        }
    }

    /// Whether a publish is still outstanding for `platform`
    pub fn has_active_job(&self, platform: Platform) -> bool {
        self.per_platform_state
            .get(&platform)
            .is_some_and(|state| !state.is_terminal())
    }
}
