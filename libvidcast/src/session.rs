//! Upload sessions
//!
//! An [`UploadSession`] stores one video in temporary public storage, then
//! fans out to one [`PublishOrchestrator`] per selected and connected
//! platform. Orchestrators run concurrently on the calling task and never
//! share mutable state, so one platform's failure cannot change another's
//! outcome.

use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Result, VidcastError};
use crate::events::{EventBus, PublishEvent};
use crate::media::{create_preprocessor, MediaPreprocessor, Passthrough};
use crate::orchestrator::{CleanupGuard, PollPolicy, PublishOrchestrator, PublishOutcome};
use crate::platforms::{create_adapters, AdapterRegistry, PlatformAdapter};
use crate::storage::{create_storage, object_name_for, ObjectStorage};
use crate::tokens::TokenStore;
use crate::types::{Platform, UploadJob, VideoMetadata};

/// One video to publish
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub data: Bytes,
    pub metadata: VideoMetadata,
    pub platforms: BTreeSet<Platform>,
    pub user_id: String,
}

impl UploadRequest {
    pub fn new(
        file_name: impl Into<String>,
        data: impl Into<Bytes>,
        metadata: VideoMetadata,
        platforms: BTreeSet<Platform>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
            metadata,
            platforms,
            user_id: user_id.into(),
        }
    }

    /// Read the video from disk
    pub async fn from_path(
        path: &Path,
        metadata: VideoMetadata,
        platforms: BTreeSet<Platform>,
        user_id: impl Into<String>,
    ) -> Result<Self> {
        let data = tokio::fs::read(path).await.map_err(|e| {
            VidcastError::InvalidInput(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("video.mp4");

        Ok(Self::new(file_name, data, metadata, platforms, user_id))
    }
}

/// A selected platform that was not attempted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedPlatform {
    pub platform: Platform,
    pub reason: String,
}

/// Per-platform results of one session
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// The fanned-out upload; `None` when no platform could be attempted
    pub job: Option<UploadJob>,
    pub outcomes: Vec<PublishOutcome>,
    pub skipped: Vec<SkippedPlatform>,
    /// Whether the temporary media was deleted
    pub media_deleted: bool,
}

impl SessionReport {
    /// At least one platform was attempted
    pub fn attempted(&self) -> bool {
        !self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> Vec<Platform> {
        self.outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.platform)
            .collect()
    }

    pub fn failed(&self) -> Vec<Platform> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.platform)
            .collect()
    }

    pub fn outcome(&self, platform: Platform) -> Option<&PublishOutcome> {
        self.outcomes.iter().find(|o| o.platform == platform)
    }

    /// One banner per selected platform, attempted ones first
    pub fn banners(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .map(PublishOutcome::banner)
            .chain(
                self.skipped
                    .iter()
                    .map(|s| format!("{}: skipped: {}", s.platform.display_name(), s.reason)),
            )
            .collect()
    }

    /// Exit status for command-line callers
    ///
    /// 0 when every attempted platform succeeded, 2 when every failure needs
    /// a reconnect, 3 when nothing could be attempted, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if !self.attempted() {
            return 3;
        }
        let failures: Vec<&PublishOutcome> =
            self.outcomes.iter().filter(|o| !o.is_success()).collect();
        if failures.is_empty() {
            0
        } else if failures.iter().all(|o| o.needs_reconnect()) {
            2
        } else {
            1
        }
    }
}

/// Coordinates one upload across platforms
pub struct UploadSession {
    adapters: AdapterRegistry,
    store: Arc<dyn TokenStore>,
    storage: Arc<dyn ObjectStorage>,
    policy: PollPolicy,
    preprocessor: Arc<dyn MediaPreprocessor>,
    events: EventBus,
    cancel: CancellationToken,
}

impl UploadSession {
    pub fn new(
        adapters: AdapterRegistry,
        store: Arc<dyn TokenStore>,
        storage: Arc<dyn ObjectStorage>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            adapters,
            store,
            storage,
            policy,
            preprocessor: Arc::new(Passthrough),
            events: EventBus::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Build adapters, storage, polling policy and preprocessing from config
    pub fn from_config(config: &Config, store: Arc<dyn TokenStore>) -> Result<Self> {
        let adapters = create_adapters(config)?;
        let storage = create_storage(&config.storage)?;
        let policy = PollPolicy::from(&config.publish);

        Ok(Self::new(adapters, store, storage, policy)
            .with_preprocessor(create_preprocessor(&config.media)))
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn MediaPreprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Store the video and publish it to every runnable platform
    ///
    /// Platform failures end up in the report; only invalid requests and
    /// storage or token store failures before the fan-out return an error.
    pub async fn run(&self, request: UploadRequest) -> Result<SessionReport> {
        if request.platforms.is_empty() {
            return Err(VidcastError::InvalidInput(
                "No platforms selected".to_string(),
            ));
        }
        if request.data.is_empty() {
            return Err(VidcastError::InvalidInput(format!(
                "Video file {} is empty",
                request.file_name
            )));
        }

        let (runnable, skipped) = self.select(&request).await?;
        for skip in &skipped {
            warn!(platform = %skip.platform, reason = %skip.reason, "Skipping platform");
        }
        if runnable.is_empty() {
            return Ok(SessionReport {
                job: None,
                outcomes: Vec::new(),
                skipped,
                media_deleted: false,
            });
        }

        let data = self
            .preprocessor
            .process(&request.file_name, request.data)
            .await;
        let media_url = self
            .storage
            .put(&object_name_for(&request.file_name), data)
            .await?;

        let platforms: BTreeSet<Platform> = runnable.iter().map(|a| a.platform()).collect();
        let mut job = UploadJob::new(media_url, request.metadata, platforms);
        info!(
            job_id = %job.id,
            media_url = %job.source_media_url,
            platforms = ?job.target_platforms,
            "Upload stored, starting publish"
        );
        self.events.emit(PublishEvent::SessionStarted {
            job_id: job.id.clone(),
            media_url: job.source_media_url.clone(),
            platforms: job.target_platforms.iter().copied().collect(),
        });

        let guard = CleanupGuard::new(job.source_media_url.clone(), runnable.len());
        let orchestrators: Vec<PublishOrchestrator> = runnable
            .into_iter()
            .map(|adapter| {
                PublishOrchestrator::new(
                    adapter,
                    self.store.clone(),
                    self.storage.clone(),
                    self.policy.clone(),
                )
                .with_events(self.events.clone())
                .with_cancellation(self.cancel.clone())
            })
            .collect();

        let outcomes = join_all(
            orchestrators
                .iter()
                .map(|o| o.run(&job, &request.user_id, &guard)),
        )
        .await;

        for outcome in &outcomes {
            if let Some(state) = &outcome.state {
                job.per_platform_state.insert(outcome.platform, state.clone());
            }
        }

        let report = SessionReport {
            job: Some(job),
            outcomes,
            skipped,
            media_deleted: guard.is_released(),
        };
        let job_id = report.job.as_ref().map(|j| j.id.clone()).unwrap_or_default();
        info!(
            job_id = %job_id,
            succeeded = ?report.succeeded(),
            failed = ?report.failed(),
            "Upload session finished"
        );
        self.events.emit(PublishEvent::SessionCompleted {
            job_id,
            succeeded: report.succeeded(),
            failed: report.failed(),
        });

        Ok(report)
    }

    /// Split the selection into adapters to run and platforms to skip
    async fn select(
        &self,
        request: &UploadRequest,
    ) -> Result<(Vec<Arc<dyn PlatformAdapter>>, Vec<SkippedPlatform>)> {
        let mut runnable = Vec::new();
        let mut skipped = Vec::new();

        for &platform in &request.platforms {
            let Some(adapter) = self.adapters.get(&platform) else {
                skipped.push(SkippedPlatform {
                    platform,
                    reason: "not enabled in configuration".to_string(),
                });
                continue;
            };

            if self.store.find(&request.user_id, platform).await?.is_some() {
                runnable.push(adapter.clone());
            } else {
                skipped.push(SkippedPlatform {
                    platform,
                    reason: format!("not connected (run `vid-accounts set {}`)", platform),
                });
            }
        }

        Ok((runnable, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::platforms::mock::MockAdapter;
    use crate::storage::MemoryObjectStorage;
    use crate::tokens::{MemoryTokenStore, NewAccount};
    use crate::types::{PublishStatus, StatusReport};
    use std::time::Duration;

    fn policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts: 5,
            refresh_buffer: Duration::from_secs(300),
        }
    }

    async fn store_with(platforms: &[Platform]) -> Arc<MemoryTokenStore> {
        let store = Arc::new(MemoryTokenStore::new());
        for &platform in platforms {
            store
                .save(NewAccount {
                    user_id: "u".to_string(),
                    platform,
                    access_token: format!("{}-token", platform),
                    refresh_token: Some("rt".to_string()),
                    expires_at: None,
                    platform_user_id: None,
                })
                .await
                .unwrap();
        }
        store
    }

    fn request(platforms: &[Platform]) -> UploadRequest {
        UploadRequest::new(
            "clip.mp4",
            Bytes::from_static(b"video-bytes"),
            VideoMetadata::new("Title", "Caption"),
            platforms.iter().copied().collect(),
            "u",
        )
    }

    #[tokio::test]
    async fn test_rejects_empty_selection() {
        let session = UploadSession::new(
            AdapterRegistry::new(),
            Arc::new(MemoryTokenStore::new()),
            Arc::new(MemoryObjectStorage::new()),
            policy(),
        );
        let err = session.run(request(&[])).await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_rejects_empty_file() {
        let session = UploadSession::new(
            AdapterRegistry::new(),
            Arc::new(MemoryTokenStore::new()),
            Arc::new(MemoryObjectStorage::new()),
            policy(),
        );
        let mut req = request(&[Platform::YouTube]);
        req.data = Bytes::new();
        assert!(matches!(
            session.run(req).await,
            Err(VidcastError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_unconnected_platforms_are_skipped_without_upload() {
        let mut adapters = AdapterRegistry::new();
        adapters.insert(
            Platform::YouTube,
            Arc::new(MockAdapter::one_step(Platform::YouTube)) as Arc<dyn PlatformAdapter>,
        );
        let storage = Arc::new(MemoryObjectStorage::new());
        let session = UploadSession::new(
            adapters,
            Arc::new(MemoryTokenStore::new()),
            storage.clone(),
            policy(),
        );

        let report = session
            .run(request(&[Platform::YouTube, Platform::TikTok]))
            .await
            .unwrap();

        assert!(!report.attempted());
        assert!(report.job.is_none());
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.exit_code(), 3);
        assert_eq!(storage.object_count(), 0);
        assert!(report.banners()[1].contains("not enabled"));
    }

    #[tokio::test]
    async fn test_platforms_are_independent() {
        let youtube = Arc::new(MockAdapter::one_step(Platform::YouTube));
        let tiktok = Arc::new(MockAdapter::submit_failure(
            Platform::TikTok,
            PlatformError::Remote {
                status: 403,
                body: "spam_risk".to_string(),
            },
        ));
        let instagram = Arc::new(MockAdapter::polling(
            Platform::Instagram,
            vec![
                StatusReport::new(PublishStatus::Processing, "IN_PROGRESS"),
                StatusReport::new(PublishStatus::Success, "FINISHED").with_detail("ig-media"),
            ],
        ));

        let mut adapters = AdapterRegistry::new();
        adapters.insert(Platform::YouTube, youtube.clone() as Arc<dyn PlatformAdapter>);
        adapters.insert(Platform::TikTok, tiktok.clone() as Arc<dyn PlatformAdapter>);
        adapters.insert(Platform::Instagram, instagram.clone() as Arc<dyn PlatformAdapter>);

        let storage = Arc::new(MemoryObjectStorage::new());
        let session = UploadSession::new(
            adapters,
            store_with(&Platform::ALL).await,
            storage.clone(),
            policy(),
        );
        let mut events = session.events().subscribe();

        let report = session.run(request(&Platform::ALL)).await.unwrap();

        assert_eq!(report.succeeded(), vec![Platform::YouTube, Platform::Instagram]);
        assert_eq!(report.failed(), vec![Platform::TikTok]);
        assert_eq!(report.exit_code(), 1);
        assert!(report.media_deleted);

        let job = report.job.as_ref().unwrap();
        assert_eq!(storage.delete_calls(&job.source_media_url), 1);
        assert_eq!(
            job.per_platform_state[&Platform::Instagram].status(),
            PublishStatus::Success
        );
        assert!(!job.per_platform_state.contains_key(&Platform::TikTok));

        // Every adapter pulled the same stored media
        assert_eq!(youtube.submitted_urls(), vec![job.source_media_url.clone()]);
        assert_eq!(instagram.submitted_urls(), vec![job.source_media_url.clone()]);

        let first = events.recv().await.unwrap();
        assert!(matches!(first, PublishEvent::SessionStarted { .. }));
    }

    #[tokio::test]
    async fn test_failed_session_keeps_media() {
        let mut adapters = AdapterRegistry::new();
        adapters.insert(
            Platform::TikTok,
            Arc::new(MockAdapter::polling(
                Platform::TikTok,
                vec![StatusReport::new(PublishStatus::Failed, "PUBLISH_FAILED")],
            )) as Arc<dyn PlatformAdapter>,
        );
        let storage = Arc::new(MemoryObjectStorage::new());
        let session = UploadSession::new(
            adapters,
            store_with(&[Platform::TikTok]).await,
            storage.clone(),
            policy(),
        );

        let report = session.run(request(&[Platform::TikTok])).await.unwrap();

        assert_eq!(report.failed(), vec![Platform::TikTok]);
        assert!(!report.media_deleted);
        assert_eq!(storage.object_count(), 1);
    }
}
