//! Configuration management for Vidcast
//!
//! Secrets and endpoints are read here once and handed to each adapter as
//! its own config struct.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::types::Platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub youtube: Option<YouTubeConfig>,
    pub instagram: Option<InstagramConfig>,
    pub tiktok: Option<TikTokConfig>,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Temporary public storage for uploaded media
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Directory exposed by a static file server at `public_base_url`
    Local {
        path: String,
        public_base_url: String,
    },
    /// HTTP blob service
    Blob { base_url: String, token: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YouTubeConfig {
    pub enabled: bool,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_privacy_status")]
    pub privacy_status: String,
    #[serde(default = "default_category_id")]
    pub category_id: String,
    #[serde(default = "default_youtube_upload_url")]
    pub upload_base_url: String,
    #[serde(default = "default_google_token_url")]
    pub token_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstagramConfig {
    pub enabled: bool,
    #[serde(default = "default_instagram_graph_url")]
    pub graph_base_url: String,
    #[serde(default = "default_instagram_refresh_url")]
    pub refresh_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TikTokConfig {
    pub enabled: bool,
    pub client_key: String,
    pub client_secret: String,
    #[serde(default = "default_tiktok_api_url")]
    pub api_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_refresh_buffer_secs")]
    pub refresh_buffer_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
            refresh_buffer_secs: default_refresh_buffer_secs(),
        }
    }
}

impl PublishConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.refresh_buffer_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Compress uploads with ffmpeg before storing them
    pub ffmpeg_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default = "default_user")]
    pub user: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            platforms: Vec::new(),
            user: default_user(),
        }
    }
}

fn default_privacy_status() -> String {
    "unlisted".to_string()
}

fn default_category_id() -> String {
    "22".to_string()
}

fn default_youtube_upload_url() -> String {
    "https://www.googleapis.com".to_string()
}

fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_instagram_graph_url() -> String {
    "https://graph.instagram.com/v21.0".to_string()
}

fn default_instagram_refresh_url() -> String {
    "https://graph.instagram.com".to_string()
}

fn default_tiktok_api_url() -> String {
    "https://open.tiktokapis.com".to_string()
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_max_poll_attempts() -> u32 {
    90
}

fn default_refresh_buffer_secs() -> u64 {
    300
}

fn default_user() -> String {
    "default".to_string()
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.publish.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "publish.poll_interval_secs".to_string(),
                message: "must be at least 1 second".to_string(),
            }
            .into());
        }
        if self.publish.max_poll_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "publish.max_poll_attempts".to_string(),
                message: "must be at least 1".to_string(),
            }
            .into());
        }
        if let Some(yt) = self.youtube.as_ref().filter(|c| c.enabled) {
            if yt.client_id.trim().is_empty() {
                return Err(ConfigError::MissingField("youtube.client_id".to_string()).into());
            }
        }
        if let Some(tt) = self.tiktok.as_ref().filter(|c| c.enabled) {
            if tt.client_key.trim().is_empty() {
                return Err(ConfigError::MissingField("tiktok.client_key".to_string()).into());
            }
        }
        for name in &self.defaults.platforms {
            name.parse::<Platform>().map_err(|message| ConfigError::InvalidValue {
                field: "defaults.platforms".to_string(),
                message,
            })?;
        }
        Ok(())
    }

    /// Platforms enabled in this configuration
    pub fn enabled_platforms(&self) -> Vec<Platform> {
        let mut platforms = Vec::new();
        if self.youtube.as_ref().is_some_and(|c| c.enabled) {
            platforms.push(Platform::YouTube);
        }
        if self.instagram.as_ref().is_some_and(|c| c.enabled) {
            platforms.push(Platform::Instagram);
        }
        if self.tiktok.as_ref().is_some_and(|c| c.enabled) {
            platforms.push(Platform::TikTok);
        }
        platforms
    }

    /// Default platform selection, falling back to every enabled platform
    pub fn default_platforms(&self) -> Vec<Platform> {
        let configured: Vec<Platform> = self
            .defaults
            .platforms
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        if configured.is_empty() {
            self.enabled_platforms()
        } else {
            configured
        }
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/vidcast/accounts.db".to_string(),
            },
            storage: StorageConfig::Local {
                path: "~/.local/share/vidcast/media".to_string(),
                public_base_url: "http://localhost:8080/media".to_string(),
            },
            youtube: None,
            instagram: Some(InstagramConfig {
                enabled: true,
                graph_base_url: default_instagram_graph_url(),
                refresh_base_url: default_instagram_refresh_url(),
            }),
            tiktok: None,
            publish: PublishConfig::default(),
            media: MediaConfig::default(),
            defaults: DefaultsConfig::default(),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("VIDCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("vidcast").join("config.toml"))
}

/// Expand `~` in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}
