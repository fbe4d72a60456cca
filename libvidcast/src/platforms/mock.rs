//! Mock adapter for testing
//!
//! Scripted submit, poll and refresh results with call counters, so the
//! orchestrator and upload session can be exercised without network access.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use super::{PlatformAdapter, PlatformResult};
use crate::error::PlatformError;
use crate::types::{
    JobHandle, Platform, PlatformAccount, PublishStatus, RefreshedToken, StatusReport,
    SubmitReceipt, VideoMetadata,
};

/// Configuration for mock adapter behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub platform: Platform,

    /// Whether submitted jobs are polled
    pub poll_based: bool,

    /// Results of successive submit calls; the last one repeats
    pub submit_results: Vec<PlatformResult<SubmitReceipt>>,

    /// Results of successive polls; the last one repeats
    pub poll_results: Vec<PlatformResult<StatusReport>>,

    pub refresh_result: PlatformResult<RefreshedToken>,

    /// Delay before every call completes (simulates network latency)
    pub delay: Duration,

    pub submit_call_count: Arc<Mutex<usize>>,
    pub poll_call_count: Arc<Mutex<usize>>,
    pub refresh_call_count: Arc<Mutex<usize>>,

    /// Access tokens passed to submit, in call order
    pub submitted_tokens: Arc<Mutex<Vec<String>>>,

    /// Media URLs passed to submit, in call order
    pub submitted_urls: Arc<Mutex<Vec<String>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            platform: Platform::YouTube,
            poll_based: true,
            submit_results: Vec::new(),
            poll_results: Vec::new(),
            refresh_result: Ok(RefreshedToken {
                access_token: "refreshed-token".to_string(),
                refresh_token: None,
                expires_at: None,
            }),
            delay: Duration::from_millis(0),
            submit_call_count: Arc::new(Mutex::new(0)),
            poll_call_count: Arc::new(Mutex::new(0)),
            refresh_call_count: Arc::new(Mutex::new(0)),
            submitted_tokens: Arc::new(Mutex::new(Vec::new())),
            submitted_urls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pick the scripted result for the `call`-th invocation (zero based)
fn scripted<T: Clone>(results: &[T], call: usize) -> Option<T> {
    if results.is_empty() {
        return None;
    }
    Some(results[call.min(results.len() - 1)].clone())
}

fn bump(counter: &Mutex<usize>) -> usize {
    let mut count = lock(counter);
    let call = *count;
    *count += 1;
    call
}

/// Mock platform adapter
pub struct MockAdapter {
    config: MockConfig,
}

impl MockAdapter {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Adapter whose submit finishes the upload, like YouTube
    pub fn one_step(platform: Platform) -> Self {
        Self::new(MockConfig {
            platform,
            poll_based: false,
            submit_results: vec![Ok(SubmitReceipt {
                job: JobHandle::new("mock-video"),
                status: PublishStatus::Success,
                detail: Some("mock-video".to_string()),
            })],
            ..Default::default()
        })
    }

    /// Poll-based adapter that walks through `statuses`
    pub fn polling(platform: Platform, statuses: Vec<StatusReport>) -> Self {
        Self::new(MockConfig {
            platform,
            poll_results: statuses.into_iter().map(Ok).collect(),
            ..Default::default()
        })
    }

    /// Adapter whose submit always fails with `error`
    pub fn submit_failure(platform: Platform, error: PlatformError) -> Self {
        Self::new(MockConfig {
            platform,
            submit_results: vec![Err(error)],
            ..Default::default()
        })
    }

    pub fn submit_call_count(&self) -> usize {
        *lock(&self.config.submit_call_count)
    }

    pub fn poll_call_count(&self) -> usize {
        *lock(&self.config.poll_call_count)
    }

    pub fn refresh_call_count(&self) -> usize {
        *lock(&self.config.refresh_call_count)
    }

    pub fn submitted_tokens(&self) -> Vec<String> {
        lock(&self.config.submitted_tokens).clone()
    }

    pub fn submitted_urls(&self) -> Vec<String> {
        lock(&self.config.submitted_urls).clone()
    }

    async fn simulate_latency(&self) {
        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.config.platform
    }

    fn is_poll_based(&self) -> bool {
        self.config.poll_based
    }

    async fn submit(
        &self,
        access_token: &str,
        media_url: &str,
        _metadata: &VideoMetadata,
        _platform_user_id: Option<&str>,
    ) -> PlatformResult<SubmitReceipt> {
        let call = bump(&self.config.submit_call_count);
        lock(&self.config.submitted_tokens).push(access_token.to_string());
        lock(&self.config.submitted_urls).push(media_url.to_string());
        self.simulate_latency().await;

        scripted(&self.config.submit_results, call).unwrap_or_else(|| {
            Ok(SubmitReceipt {
                job: JobHandle::new(format!("mock-job-{}", call + 1)),
                status: PublishStatus::Submitted,
                detail: None,
            })
        })
    }

    async fn poll_status(
        &self,
        _access_token: &str,
        _job: &JobHandle,
    ) -> PlatformResult<StatusReport> {
        let call = bump(&self.config.poll_call_count);
        self.simulate_latency().await;

        scripted(&self.config.poll_results, call)
            .unwrap_or_else(|| Ok(StatusReport::new(PublishStatus::Success, "DONE")))
    }

    async fn refresh_token(&self, _account: &PlatformAccount) -> PlatformResult<RefreshedToken> {
        bump(&self.config.refresh_call_count);
        self.simulate_latency().await;
        self.config.refresh_result.clone()
    }
}
