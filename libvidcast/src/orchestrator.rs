//! Publish orchestration for one platform
//!
//! A [`PublishOrchestrator`] drives one (upload, platform) pair through
//! `idle -> submitted -> processing* -> success | failed`:
//!
//! 1. Look up the account; refresh its token first if it is about to expire.
//! 2. Submit. A rejected token gets exactly one refresh and one retry.
//! 3. Poll poll-based platforms at a fixed interval, up to a bounded number
//!    of attempts.
//! 4. Settle the shared [`CleanupGuard`], which deletes the temporary media
//!    once a platform succeeded and every platform is done with it.
//!
//! Every path ends in a terminal [`PublishOutcome`]; errors never escape.

use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PublishConfig;
use crate::error::{PlatformError, StorageError, VidcastError};
use crate::events::{EventBus, PublishEvent, RefreshReason};
use crate::platforms::PlatformAdapter;
use crate::storage::ObjectStorage;
use crate::tokens::{refresh_and_store, token_needs_refresh, TokenStore};
use crate::types::{
    JobHandle, Platform, PlatformAccount, PlatformPublishState, PublishStatus, SubmitReceipt,
    UploadJob,
};

/// Polling and refresh timing
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Tokens expiring within this window are refreshed before use
    pub refresh_buffer: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&PublishConfig::default())
    }
}

impl From<&PublishConfig> for PollPolicy {
    fn from(config: &PublishConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_attempts: config.max_poll_attempts.max(1),
            refresh_buffer: config.refresh_buffer(),
        }
    }
}

/// Why a platform publish ended in `failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No account stored for the platform
    NotConnected,
    Authentication,
    Validation,
    Remote,
    /// Still processing when polling gave up
    Timeout,
    Network,
    Unsupported,
    Cancelled,
    /// Token store or other local failure
    Internal,
}

impl From<&PlatformError> for FailureKind {
    fn from(error: &PlatformError) -> Self {
        match error {
            PlatformError::Authentication(_) => FailureKind::Authentication,
            PlatformError::Validation(_) => FailureKind::Validation,
            PlatformError::Remote { .. } => FailureKind::Remote,
            PlatformError::Timeout(_) => FailureKind::Timeout,
            PlatformError::Network(_) => FailureKind::Network,
            PlatformError::Unsupported(_) => FailureKind::Unsupported,
        }
    }
}

/// Terminal result of one platform publish
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub platform: Platform,
    /// `Success` or `Failed`
    pub status: PublishStatus,
    pub external_job_id: Option<String>,
    /// Published video or media id, when the platform returned one
    pub detail: Option<String>,
    pub failure: Option<FailureKind>,
    pub reason: Option<String>,
    /// Raw platform diagnostic payload
    pub raw_detail: Option<String>,
    #[serde(skip)]
    pub state: Option<PlatformPublishState>,
}

impl PublishOutcome {
    fn succeeded(state: PlatformPublishState, detail: Option<String>) -> Self {
        Self {
            platform: state.platform(),
            status: PublishStatus::Success,
            external_job_id: Some(state.external_job_id().to_string()),
            detail,
            failure: None,
            reason: None,
            raw_detail: None,
            state: Some(state),
        }
    }

    fn failed(
        platform: Platform,
        state: Option<PlatformPublishState>,
        kind: FailureKind,
        reason: impl Into<String>,
        raw_detail: Option<String>,
    ) -> Self {
        let reason = reason.into();
        let mut state = state;
        if let Some(state) = state.as_mut().filter(|s| !s.is_terminal()) {
            let _ = state.fail(reason.clone());
        }

        Self {
            platform,
            status: PublishStatus::Failed,
            external_job_id: state.as_ref().map(|s| s.external_job_id().to_string()),
            detail: None,
            failure: Some(kind),
            reason: Some(reason),
            raw_detail,
            state,
        }
    }

    fn from_error(
        platform: Platform,
        state: Option<PlatformPublishState>,
        error: &PlatformError,
    ) -> Self {
        let reason = match error {
            PlatformError::Remote { status, .. } => {
                format!("{} returned HTTP {}", platform.display_name(), status)
            }
            other => other.to_string(),
        };
        Self::failed(
            platform,
            state,
            FailureKind::from(error),
            reason,
            error.raw_detail().map(str::to_string),
        )
    }

    pub fn is_success(&self) -> bool {
        self.status == PublishStatus::Success
    }

    /// Whether the user has to reconnect the account before retrying
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self.failure,
            Some(FailureKind::Authentication | FailureKind::NotConnected)
        )
    }

    /// One-line, user-facing summary
    pub fn banner(&self) -> String {
        let name = self.platform.display_name();

        if self.is_success() {
            return match (self.platform, &self.detail) {
                (Platform::TikTok, _) => {
                    format!("{}: handed off to TikTok inbox, finish posting in the app", name)
                }
                (_, Some(id)) => format!("{}: published ({})", name, id),
                (_, None) => format!("{}: published", name),
            };
        }

        let mut line = format!(
            "{}: failed: {}",
            name,
            self.reason.as_deref().unwrap_or("unknown error")
        );
        if let Some(raw) = self.raw_detail.as_deref().filter(|r| !r.is_empty()) {
            line.push_str(" - ");
            line.push_str(raw);
        }
        if self.needs_reconnect() {
            line.push_str(&format!(
                " (reconnect with `vid-accounts set {}`)",
                self.platform
            ));
        } else if self.failure == Some(FailureKind::Timeout) {
            line.push_str(" (still processing, check later)");
        }
        line
    }
}

/// Deletes the temporary media of one upload at most once
///
/// Every orchestrator of the upload settles the guard exactly once. The
/// object is deleted when at least one of them succeeded and none is still
/// using the media. Failed uploads leave the object in place.
#[derive(Debug)]
pub struct CleanupGuard {
    media_url: String,
    outstanding: AtomicUsize,
    succeeded: AtomicBool,
    released: AtomicBool,
}

impl CleanupGuard {
    pub fn new(media_url: impl Into<String>, participants: usize) -> Self {
        Self {
            media_url: media_url.into(),
            outstanding: AtomicUsize::new(participants.max(1)),
            succeeded: AtomicBool::new(false),
            released: AtomicBool::new(false),
        }
    }

    pub fn media_url(&self) -> &str {
        &self.media_url
    }

    /// Whether the delete has been issued
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Record that one participant reached a terminal state
    ///
    /// Returns `Some(deleted)` from the call that issued the delete and
    /// `None` from every other call. Delete errors are logged, never returned.
    pub async fn settle(&self, succeeded: bool, storage: &dyn ObjectStorage) -> Option<bool> {
        if succeeded {
            self.succeeded.store(true, Ordering::SeqCst);
        }

        let previous = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or_else(|n| n);
        if previous > 1 || !self.succeeded.load(Ordering::SeqCst) {
            return None;
        }
        if self.released.swap(true, Ordering::SeqCst) {
            return None;
        }

        match storage.delete(&self.media_url).await {
            Ok(()) => {
                info!(url = %self.media_url, "Deleted temporary media");
                Some(true)
            }
            Err(StorageError::NotFound(_)) => {
                debug!(url = %self.media_url, "Temporary media already deleted");
                Some(false)
            }
            Err(e) => {
                warn!(url = %self.media_url, error = %e, "Failed to delete temporary media");
                Some(false)
            }
        }
    }
}

/// Drives one platform adapter from submit to a terminal state
pub struct PublishOrchestrator {
    adapter: Arc<dyn PlatformAdapter>,
    store: Arc<dyn TokenStore>,
    storage: Arc<dyn ObjectStorage>,
    policy: PollPolicy,
    events: EventBus,
    cancel: CancellationToken,
}

impl PublishOrchestrator {
    pub fn new(
        adapter: Arc<dyn PlatformAdapter>,
        store: Arc<dyn TokenStore>,
        storage: Arc<dyn ObjectStorage>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            adapter,
            store,
            storage,
            policy,
            events: EventBus::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn platform(&self) -> Platform {
        self.adapter.platform()
    }

    /// Publish `job` as the only platform using its media
    pub async fn publish(&self, job: &UploadJob, user_id: &str) -> PublishOutcome {
        let guard = CleanupGuard::new(job.source_media_url.clone(), 1);
        self.run(job, user_id, &guard).await
    }

    /// Publish `job`, sharing its media cleanup with other platforms
    pub async fn run(&self, job: &UploadJob, user_id: &str, guard: &CleanupGuard) -> PublishOutcome {
        let platform = self.platform();
        let outcome = self.drive(job, user_id).await;

        if outcome.is_success() {
            info!(
                platform = %platform,
                job_id = %job.id,
                external_id = ?outcome.external_job_id,
                "Publish succeeded"
            );
        } else {
            warn!(
                platform = %platform,
                job_id = %job.id,
                failure = ?outcome.failure,
                reason = ?outcome.reason,
                "Publish failed"
            );
        }
        self.events.emit(PublishEvent::Terminalized {
            job_id: job.id.clone(),
            platform,
            status: outcome.status,
            detail: outcome.reason.clone().or_else(|| outcome.detail.clone()),
        });

        if let Some(deleted) = guard.settle(outcome.is_success(), self.storage.as_ref()).await {
            self.events.emit(PublishEvent::CleanupFinished {
                job_id: job.id.clone(),
                media_url: guard.media_url().to_string(),
                deleted,
            });
        }

        outcome
    }

    async fn drive(&self, job: &UploadJob, user_id: &str) -> PublishOutcome {
        let platform = self.platform();

        if job.has_active_job(platform) {
            return PublishOutcome::failed(
                platform,
                None,
                FailureKind::Validation,
                "a publish is already in progress for this upload",
                None,
            );
        }

        let account = match self.store.find(user_id, platform).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                return PublishOutcome::failed(
                    platform,
                    None,
                    FailureKind::NotConnected,
                    format!("no {} account connected", platform.display_name()),
                    None,
                )
            }
            Err(e) => {
                return PublishOutcome::failed(
                    platform,
                    None,
                    FailureKind::Internal,
                    format!("token store lookup failed: {}", e),
                    None,
                )
            }
        };

        let mut run = Run {
            orchestrator: self,
            job,
            platform,
            account,
            refresh_used: false,
        };

        run.refresh_if_expiring().await;

        let receipt = match run.submit().await {
            Ok(receipt) => receipt,
            Err(outcome) => return outcome,
        };
        let mut state = PlatformPublishState::submitted(platform, &receipt.job.external_job_id);
        debug!(
            platform = %platform,
            job_id = %job.id,
            external_id = %receipt.job.external_job_id,
            status = %receipt.status,
            "Submitted"
        );

        match receipt.status {
            PublishStatus::Success => {
                let _ = state.advance(PublishStatus::Success);
                return PublishOutcome::succeeded(state, receipt.detail);
            }
            PublishStatus::Failed => {
                return PublishOutcome::failed(
                    platform,
                    Some(state),
                    FailureKind::Remote,
                    format!("{} rejected the upload", platform.display_name()),
                    receipt.detail,
                );
            }
            PublishStatus::Submitted | PublishStatus::Processing => {}
        }

        if !self.adapter.is_poll_based() {
            return PublishOutcome::failed(
                platform,
                Some(state),
                FailureKind::Unsupported,
                "submit did not finish and the platform cannot be polled",
                None,
            );
        }

        run.poll(state, &receipt.job).await
    }

    async fn cancellable<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            output = future => Some(output),
        }
    }
}

/// Mutable state of one orchestrator run
struct Run<'a> {
    orchestrator: &'a PublishOrchestrator,
    job: &'a UploadJob,
    platform: Platform,
    account: PlatformAccount,
    /// The single reactive refresh allowed after a rejected token
    refresh_used: bool,
}

impl Run<'_> {
    fn cancelled(&self, state: Option<PlatformPublishState>) -> PublishOutcome {
        info!(platform = %self.platform, job_id = %self.job.id, "Publish cancelled");
        PublishOutcome::failed(
            self.platform,
            state,
            FailureKind::Cancelled,
            "cancelled before completion",
            None,
        )
    }

    async fn refresh(&mut self, reason: RefreshReason) -> Result<(), VidcastError> {
        let o = self.orchestrator;
        let result = refresh_and_store(o.adapter.as_ref(), o.store.as_ref(), &self.account).await;

        o.events.emit(PublishEvent::TokenRefreshed {
            job_id: self.job.id.clone(),
            platform: self.platform,
            reason,
            success: result.is_ok(),
        });

        let updated = result?;
        self.account = updated;
        Ok(())
    }

    async fn refresh_if_expiring(&mut self) {
        let buffer = self.orchestrator.policy.refresh_buffer;
        if !token_needs_refresh(&self.account, Utc::now(), buffer) {
            return;
        }

        info!(
            platform = %self.platform,
            job_id = %self.job.id,
            expires_at = ?self.account.expires_at,
            "Access token expiring, refreshing before submit"
        );
        if let Err(e) = self.refresh(RefreshReason::Expiring).await {
            warn!(
                platform = %self.platform,
                job_id = %self.job.id,
                error = %e,
                "Proactive refresh failed, using stored token"
            );
        }
    }

    /// One reactive refresh after the platform rejected the token
    async fn refresh_after_rejection(&mut self, rejection: &PlatformError) -> Result<(), PublishOutcome> {
        self.refresh_used = true;
        warn!(
            platform = %self.platform,
            job_id = %self.job.id,
            error = %rejection,
            "Access token rejected, refreshing"
        );

        self.refresh(RefreshReason::Rejected).await.map_err(|e| {
            PublishOutcome::failed(
                self.platform,
                None,
                FailureKind::Authentication,
                format!("access token rejected and refresh failed: {}", e),
                e.as_platform().and_then(|p| p.raw_detail()).map(str::to_string),
            )
        })
    }

    async fn submit(&mut self) -> Result<SubmitReceipt, PublishOutcome> {
        let o = self.orchestrator;
        let mut attempt = 1;

        loop {
            info!(
                platform = %self.platform,
                job_id = %self.job.id,
                attempt,
                "Submitting publish job"
            );
            o.events.emit(PublishEvent::SubmitAttempted {
                job_id: self.job.id.clone(),
                platform: self.platform,
                attempt,
            });

            let result = o
                .cancellable(o.adapter.submit(
                    &self.account.access_token,
                    &self.job.source_media_url,
                    &self.job.metadata,
                    self.account.platform_user_id.as_deref(),
                ))
                .await;

            match result {
                None => return Err(self.cancelled(None)),
                Some(Ok(receipt)) => return Ok(receipt),
                Some(Err(e)) if e.is_auth() && !self.refresh_used => {
                    self.refresh_after_rejection(&e).await?;
                    attempt += 1;
                }
                Some(Err(e)) => return Err(PublishOutcome::from_error(self.platform, None, &e)),
            }
        }
    }

    async fn poll(&mut self, mut state: PlatformPublishState, handle: &JobHandle) -> PublishOutcome {
        let o = self.orchestrator;
        let max_attempts = o.policy.max_attempts;

        for attempt in 1..=max_attempts {
            if o.cancellable(tokio::time::sleep(o.policy.interval)).await.is_none() {
                return self.cancelled(Some(state));
            }

            let result = match o
                .cancellable(o.adapter.poll_status(&self.account.access_token, handle))
                .await
            {
                Some(result) => result,
                None => return self.cancelled(Some(state)),
            };

            let report = match result {
                Ok(report) => report,
                Err(e) if e.is_transient() => {
                    warn!(
                        platform = %self.platform,
                        job_id = %self.job.id,
                        attempt,
                        error = %e,
                        "Status check failed, will retry"
                    );
                    continue;
                }
                Err(e) if e.is_auth() && !self.refresh_used => {
                    if let Err(outcome) = self.refresh_after_rejection(&e).await {
                        return PublishOutcome::failed(
                            self.platform,
                            Some(state),
                            FailureKind::Authentication,
                            outcome.reason.unwrap_or_default(),
                            outcome.raw_detail,
                        );
                    }
                    continue;
                }
                Err(e) => return PublishOutcome::from_error(self.platform, Some(state), &e),
            };

            let next = match report.status {
                PublishStatus::Submitted => PublishStatus::Processing,
                other => other,
            };
            debug!(
                platform = %self.platform,
                job_id = %self.job.id,
                attempt,
                status = %next,
                raw_status = %report.raw_status,
                "Polled publish status"
            );
            o.events.emit(PublishEvent::Polled {
                job_id: self.job.id.clone(),
                platform: self.platform,
                attempt,
                status: next,
                raw_status: report.raw_status.clone(),
            });

            match next {
                PublishStatus::Success => {
                    let _ = state.advance(PublishStatus::Success);
                    return PublishOutcome::succeeded(state, report.detail);
                }
                PublishStatus::Failed => {
                    return PublishOutcome::failed(
                        self.platform,
                        Some(state),
                        FailureKind::Remote,
                        format!(
                            "{} reported {}",
                            self.platform.display_name(),
                            report.raw_status
                        ),
                        report.detail,
                    );
                }
                _ => {
                    let _ = state.advance(next);
                }
            }
        }

        PublishOutcome::from_error(
            self.platform,
            Some(state),
            &PlatformError::Timeout(format!(
                "still processing after {} status checks",
                max_attempts
            )),
        )
    }
}
