//! SQLite-backed token store

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;

use super::{NewAccount, TokenStore, TokenUpdate};
use crate::error::{DbError, Result};
use crate::types::{Platform, PlatformAccount};

#[derive(Clone)]
pub struct SqliteTokenStore {
    pool: SqlitePool,
}

impl SqliteTokenStore {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        // mode=rwc creates the file when missing
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));
        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running migrations on it
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    async fn get_by_id(&self, account_id: i64) -> Result<Option<PlatformAccount>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, platform, access_token, refresh_token, expires_at, platform_user_id
            FROM platform_accounts WHERE id = ?
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| account_from_row(&r)).transpose()
    }
}

fn account_from_row(row: &SqliteRow) -> Result<PlatformAccount> {
    let platform: String = row.get("platform");
    let platform = platform.parse::<Platform>().map_err(|e| {
        DbError::SqlxError(sqlx::Error::Decode(e.into()))
    })?;
    let expires_at: Option<i64> = row.get("expires_at");

    Ok(PlatformAccount {
        id: row.get("id"),
        user_id: row.get("user_id"),
        platform,
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        expires_at: expires_at.and_then(timestamp_to_datetime),
        platform_user_id: row.get("platform_user_id"),
    })
}

fn timestamp_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn find(&self, user_id: &str, platform: Platform) -> Result<Option<PlatformAccount>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, platform, access_token, refresh_token, expires_at, platform_user_id
            FROM platform_accounts WHERE user_id = ? AND platform = ?
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| account_from_row(&r)).transpose()
    }

    async fn update(&self, account_id: i64, update: TokenUpdate) -> Result<PlatformAccount> {
        let now = Utc::now().timestamp();

        // Single statement: concurrent refreshes are last-write-wins
        let result = sqlx::query(
            r#"
            UPDATE platform_accounts
            SET access_token = ?,
                refresh_token = COALESCE(?, refresh_token),
                expires_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.access_token)
        .bind(&update.refresh_token)
        .bind(update.expires_at.map(|t| t.timestamp()))
        .bind(now)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(DbError::AccountNotFound(account_id.to_string()).into());
        }

        self.get_by_id(account_id)
            .await?
            .ok_or_else(|| DbError::AccountNotFound(account_id.to_string()).into())
    }

    async fn delete(&self, user_id: &str, platform: Platform) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM platform_accounts WHERE user_id = ? AND platform = ?
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    async fn save(&self, account: NewAccount) -> Result<PlatformAccount> {
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO platform_accounts
                (user_id, platform, access_token, refresh_token, expires_at, platform_user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, platform) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                platform_user_id = excluded.platform_user_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&account.user_id)
        .bind(account.platform.as_str())
        .bind(&account.access_token)
        .bind(&account.refresh_token)
        .bind(account.expires_at.map(|t| t.timestamp()))
        .bind(&account.platform_user_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        self.find(&account.user_id, account.platform)
            .await?
            .ok_or_else(|| DbError::AccountNotFound(account.user_id.clone()).into())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<PlatformAccount>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, platform, access_token, refresh_token, expires_at, platform_user_id
            FROM platform_accounts WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let mut accounts = rows
            .iter()
            .map(account_from_row)
            .collect::<Result<Vec<_>>>()?;
        accounts.sort_by_key(|a| a.platform);
        Ok(accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup_store() -> (SqliteTokenStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("accounts.db");
        let store = SqliteTokenStore::new(db_path.to_str().unwrap())
            .await
            .unwrap();
        (store, temp_dir)
    }

    fn tiktok_account() -> NewAccount {
        NewAccount {
            user_id: "alice".to_string(),
            platform: Platform::TikTok,
            access_token: "act.1".to_string(),
            refresh_token: Some("rft.1".to_string()),
            expires_at: Some(Utc.timestamp_opt(1_900_000_000, 0).unwrap()),
            platform_user_id: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let (store, _temp_dir) = setup_store().await;

        let saved = store.save(tiktok_account()).await.unwrap();
        assert!(saved.id > 0);
        assert_eq!(saved.platform, Platform::TikTok);
        assert_eq!(saved.expires_at.unwrap().timestamp(), 1_900_000_000);

        let found = store.find("alice", Platform::TikTok).await.unwrap().unwrap();
        assert_eq!(found, saved);
        assert!(store
            .find("alice", Platform::YouTube)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_overwrites_rotated_refresh_token() {
        let (store, _temp_dir) = setup_store().await;
        let saved = store.save(tiktok_account()).await.unwrap();

        let updated = store
            .update(
                saved.id,
                TokenUpdate {
                    access_token: "act.2".to_string(),
                    refresh_token: Some("rft.2".to_string()),
                    expires_at: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.access_token, "act.2");
        assert_eq!(updated.refresh_token.as_deref(), Some("rft.2"));
        assert_eq!(updated.expires_at, None);
    }

    #[tokio::test]
    async fn test_update_without_refresh_token_keeps_existing() {
        let (store, _temp_dir) = setup_store().await;
        let saved = store.save(tiktok_account()).await.unwrap();

        let updated = store
            .update(
                saved.id,
                TokenUpdate {
                    access_token: "act.3".to_string(),
                    refresh_token: None,
                    expires_at: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.refresh_token.as_deref(), Some("rft.1"));
    }

    #[tokio::test]
    async fn test_update_missing_account() {
        let (store, _temp_dir) = setup_store().await;
        let err = store
            .update(
                42,
                TokenUpdate {
                    access_token: "x".to_string(),
                    refresh_token: None,
                    expires_at: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Account not found: 42"));
    }

    #[tokio::test]
    async fn test_save_upserts_per_user_and_platform() {
        let (store, _temp_dir) = setup_store().await;
        let first = store.save(tiktok_account()).await.unwrap();

        let mut reconnect = tiktok_account();
        reconnect.access_token = "act.reconnected".to_string();
        let second = store.save(reconnect).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.access_token, "act.reconnected");
        assert_eq!(store.list("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _temp_dir) = setup_store().await;
        store.save(tiktok_account()).await.unwrap();

        assert!(store.delete("alice", Platform::TikTok).await.unwrap());
        assert!(!store.delete("alice", Platform::TikTok).await.unwrap());
        assert!(store.find("alice", Platform::TikTok).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_sorted_by_platform() {
        let (store, _temp_dir) = setup_store().await;
        store.save(tiktok_account()).await.unwrap();
        store
            .save(NewAccount {
                user_id: "alice".to_string(),
                platform: Platform::YouTube,
                access_token: "ya29".to_string(),
                refresh_token: Some("1//g".to_string()),
                expires_at: None,
                platform_user_id: None,
            })
            .await
            .unwrap();

        let accounts = store.list("alice").await.unwrap();
        let platforms: Vec<Platform> = accounts.iter().map(|a| a.platform).collect();
        assert_eq!(platforms, vec![Platform::YouTube, Platform::TikTok]);
        assert!(store.list("bob").await.unwrap().is_empty());
    }
}
