//! Token store contract and refresh glue
//!
//! The token store owns every [`PlatformAccount`]. The publish path only
//! looks accounts up and writes refreshed tokens back; connecting and
//! disconnecting happen through `save` and `delete`.
//!
//! Updates are last-write-wins on a single record. Two refreshes racing for
//! the same account leave whichever finished last.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::Result;
use crate::platforms::PlatformAdapter;
use crate::types::{Platform, PlatformAccount};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryTokenStore;
pub use sqlite::SqliteTokenStore;

/// Fields written by a token refresh
#[derive(Debug, Clone, PartialEq)]
pub struct TokenUpdate {
    pub access_token: String,
    /// `None` keeps the stored refresh token
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A freshly connected account
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub user_id: String,
    pub platform: Platform,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub platform_user_id: Option<String>,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Look up the account for (user, platform)
    async fn find(&self, user_id: &str, platform: Platform) -> Result<Option<PlatformAccount>>;

    /// Overwrite the token fields of one account and return the new record
    ///
    /// # Errors
    ///
    /// Returns `DbError::AccountNotFound` if no account has this id.
    async fn update(&self, account_id: i64, update: TokenUpdate) -> Result<PlatformAccount>;

    /// Remove the account for (user, platform); returns whether one existed
    async fn delete(&self, user_id: &str, platform: Platform) -> Result<bool>;

    /// Insert or replace the account for (user, platform)
    async fn save(&self, account: NewAccount) -> Result<PlatformAccount>;

    /// All accounts of a user, ordered by platform
    async fn list(&self, user_id: &str) -> Result<Vec<PlatformAccount>>;
}

/// Whether `account` should be refreshed before use
pub fn token_needs_refresh(
    account: &PlatformAccount,
    now: DateTime<Utc>,
    buffer: std::time::Duration,
) -> bool {
    let buffer = chrono::Duration::from_std(buffer).unwrap_or_else(|_| chrono::Duration::zero());
    account.expires_within(now, buffer)
}

/// Exchange the stored refresh credentials and persist the result
///
/// A rotated refresh token replaces the stored one; otherwise the stored
/// refresh token is kept.
pub async fn refresh_and_store(
    adapter: &dyn PlatformAdapter,
    store: &dyn TokenStore,
    account: &PlatformAccount,
) -> Result<PlatformAccount> {
    debug!(
        platform = %account.platform,
        account_id = account.id,
        "Refreshing access token"
    );

    let refreshed = adapter.refresh_token(account).await?;
    let rotated = refreshed.refresh_token.is_some();

    let updated = store
        .update(
            account.id,
            TokenUpdate {
                access_token: refreshed.access_token,
                refresh_token: refreshed.refresh_token,
                expires_at: refreshed.expires_at,
            },
        )
        .await?;

    info!(
        platform = %account.platform,
        account_id = account.id,
        rotated,
        expires_at = ?updated.expires_at,
        "Access token refreshed"
    );

    Ok(updated)
}
