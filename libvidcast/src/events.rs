//! Progress events for publish sessions
//!
//! The event bus wraps a `tokio::sync::broadcast` channel so any number of
//! subscribers (CLI progress output, JSON streams, tests) can follow an upload
//! without slowing it down. Emitting with no subscribers drops the event.
//!
//! ```
//! use libvidcast::events::{EventBus, PublishEvent};
//! use libvidcast::Platform;
//!
//! # async fn example() {
//! let bus = EventBus::new(64);
//! let mut receiver = bus.subscribe();
//!
//! bus.emit(PublishEvent::SubmitAttempted {
//!     job_id: "job-1".to_string(),
//!     platform: Platform::TikTok,
//!     attempt: 1,
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("{:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{Platform, PublishStatus};

pub type EventReceiver = broadcast::Receiver<PublishEvent>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PublishEvent>,
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer; lagging subscribers lose the
    /// oldest events first
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: PublishEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}

/// Why an access token was refreshed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    /// Stored expiry falls inside the safety buffer
    Expiring,
    /// The platform rejected the token
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublishEvent {
    SessionStarted {
        job_id: String,
        media_url: String,
        platforms: Vec<Platform>,
    },

    SubmitAttempted {
        job_id: String,
        platform: Platform,
        attempt: u32,
    },

    TokenRefreshed {
        job_id: String,
        platform: Platform,
        reason: RefreshReason,
        success: bool,
    },

    Polled {
        job_id: String,
        platform: Platform,
        attempt: u32,
        status: PublishStatus,
        raw_status: String,
    },

    Terminalized {
        job_id: String,
        platform: Platform,
        status: PublishStatus,
        detail: Option<String>,
    },

    CleanupFinished {
        job_id: String,
        media_url: String,
        deleted: bool,
    },

    SessionCompleted {
        job_id: String,
        succeeded: Vec<Platform>,
        failed: Vec<Platform>,
    },
}
