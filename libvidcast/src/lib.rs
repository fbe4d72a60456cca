//! Vidcast - publish one video to many platforms
//!
//! This library uploads a video to temporary public storage and drives the
//! asynchronous publish APIs of YouTube, Instagram and TikTok until every
//! selected platform reaches a terminal state.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod media;
pub mod orchestrator;
pub mod platforms;
pub mod session;
pub mod storage;
pub mod tokens;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{PlatformError, Result, VidcastError};
pub use orchestrator::{CleanupGuard, FailureKind, PollPolicy, PublishOrchestrator, PublishOutcome};
pub use session::{SessionReport, UploadRequest, UploadSession};
pub use tokens::{SqliteTokenStore, TokenStore};
pub use types::{Platform, PlatformAccount, PublishStatus, UploadJob, VideoMetadata};
