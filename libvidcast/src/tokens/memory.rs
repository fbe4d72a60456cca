//! In-memory token store for tests and embedding

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{NewAccount, TokenStore, TokenUpdate};
use crate::error::{DbError, Result};
use crate::types::{Platform, PlatformAccount};

#[derive(Default)]
pub struct MemoryTokenStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    accounts: BTreeMap<(String, Platform), PlatformAccount>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave a half-written map
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn find(&self, user_id: &str, platform: Platform) -> Result<Option<PlatformAccount>> {
        let inner = self.lock();
        Ok(inner.accounts.get(&(user_id.to_string(), platform)).cloned())
    }

    async fn update(&self, account_id: i64, update: TokenUpdate) -> Result<PlatformAccount> {
        let mut inner = self.lock();
        let account = inner
            .accounts
            .values_mut()
            .find(|a| a.id == account_id)
            .ok_or_else(|| DbError::AccountNotFound(account_id.to_string()))?;

        account.access_token = update.access_token;
        if let Some(refresh_token) = update.refresh_token {
            account.refresh_token = Some(refresh_token);
        }
        account.expires_at = update.expires_at;
        Ok(account.clone())
    }

    async fn delete(&self, user_id: &str, platform: Platform) -> Result<bool> {
        let mut inner = self.lock();
        Ok(inner
            .accounts
            .remove(&(user_id.to_string(), platform))
            .is_some())
    }

    async fn save(&self, account: NewAccount) -> Result<PlatformAccount> {
        let mut inner = self.lock();
        let key = (account.user_id.clone(), account.platform);
        let id = match inner.accounts.get(&key) {
            Some(existing) => existing.id,
            None => {
                inner.next_id += 1;
                inner.next_id
            }
        };

        let stored = PlatformAccount {
            id,
            user_id: account.user_id,
            platform: account.platform,
            access_token: account.access_token,
            refresh_token: account.refresh_token,
            expires_at: account.expires_at,
            platform_user_id: account.platform_user_id,
        };
        inner.accounts.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<PlatformAccount>> {
        let inner = self.lock();
        Ok(inner
            .accounts
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|(_, account)| account.clone())
            .collect())
    }
}
