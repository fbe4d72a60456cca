//! Platform abstraction and implementations
//!
//! Each platform has its own publish protocol and status vocabulary. The
//! [`PlatformAdapter`] trait hides those behind one canonical contract:
//! submit a job, poll it into a [`PublishStatus`], refresh tokens.
//!
//! # Examples
//!
//! ```no_run
//! use libvidcast::config::TikTokConfig;
//! use libvidcast::platforms::{tiktok::TikTokAdapter, PlatformAdapter};
//! use libvidcast::types::{JobHandle, VideoMetadata};
//!
//! # async fn example() -> Result<(), libvidcast::PlatformError> {
//! let config = TikTokConfig {
//!     enabled: true,
//!     client_key: "client-key".to_string(),
//!     client_secret: "client-secret".to_string(),
//!     api_base_url: "https://open.tiktokapis.com".to_string(),
//! };
//! let adapter = TikTokAdapter::new(&config)?;
//!
//! let metadata = VideoMetadata::new("Launch day", "");
//! let receipt = adapter
//!     .submit("act.token", "https://media.example.com/clip.mp4", &metadata, None)
//!     .await?;
//!
//! let report = adapter.poll_status("act.token", &receipt.job).await?;
//! println!("{} ({})", report.status, report.raw_status);
//! # Ok(())
//! # }
//! ```
//!
//! [`PublishStatus`]: crate::types::PublishStatus

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{PlatformError, Result};
use crate::types::{
    JobHandle, Platform, PlatformAccount, RefreshedToken, StatusReport, SubmitReceipt,
    VideoMetadata,
};

pub(crate) mod http;
pub mod instagram;
pub mod tiktok;
pub mod youtube;

// Mock adapter is available for all builds (not just tests) to support integration tests
pub mod mock;

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Adapters for the enabled platforms, keyed by platform
pub type AdapterRegistry = BTreeMap<Platform, Arc<dyn PlatformAdapter>>;

/// Per-platform publish protocol
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Whether a submitted job has to be polled to reach a terminal state
    ///
    /// Adapters returning `false` finish the whole upload inside `submit`.
    fn is_poll_based(&self) -> bool;

    /// Start a publish job for the media at `media_url`
    ///
    /// `platform_user_id` is the platform-side account id when the token
    /// store knows it.
    ///
    /// # Errors
    ///
    /// - `PlatformError::Authentication` if the token is rejected
    /// - `PlatformError::Validation` if required fields are missing
    /// - `PlatformError::Remote` for any other non-2xx response, carrying the raw body
    async fn submit(
        &self,
        access_token: &str,
        media_url: &str,
        metadata: &VideoMetadata,
        platform_user_id: Option<&str>,
    ) -> PlatformResult<SubmitReceipt>;

    /// Classify the current state of a submitted job
    async fn poll_status(&self, access_token: &str, job: &JobHandle)
        -> PlatformResult<StatusReport>;

    /// Exchange stored credentials for a new access token
    ///
    /// Returns `PlatformError::Unsupported` when the account holds nothing
    /// to refresh with.
    async fn refresh_token(&self, account: &PlatformAccount) -> PlatformResult<RefreshedToken>;
}

/// Build adapters for every platform enabled in `config`
pub fn create_adapters(config: &Config) -> Result<AdapterRegistry> {
    let mut adapters: AdapterRegistry = BTreeMap::new();

    if let Some(yt) = config.youtube.as_ref().filter(|c| c.enabled) {
        adapters.insert(Platform::YouTube, Arc::new(youtube::YouTubeAdapter::new(yt)?));
    }
    if let Some(ig) = config.instagram.as_ref().filter(|c| c.enabled) {
        adapters.insert(
            Platform::Instagram,
            Arc::new(instagram::InstagramAdapter::new(ig)?),
        );
    }
    if let Some(tt) = config.tiktok.as_ref().filter(|c| c.enabled) {
        adapters.insert(Platform::TikTok, Arc::new(tiktok::TikTokAdapter::new(tt)?));
    }

    Ok(adapters)
}

pub(crate) fn require_media_url(media_url: &str) -> PlatformResult<()> {
    if media_url.trim().is_empty() {
        return Err(PlatformError::Validation("media URL is required".to_string()));
    }
    Ok(())
}

pub(crate) fn check_length(field: &str, value: &str, max: usize) -> PlatformResult<()> {
    let length = value.chars().count();
    if length > max {
        return Err(PlatformError::Validation(format!(
            "{} is {} characters, limit is {}",
            field, length, max
        )));
    }
    Ok(())
}
