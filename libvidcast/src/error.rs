//! Error types for Vidcast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VidcastError>;

#[derive(Error, Debug)]
pub enum VidcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl VidcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            VidcastError::InvalidInput(_) => 3,
            VidcastError::Platform(PlatformError::Authentication(_)) => 2,
            VidcastError::Platform(_) => 1,
            VidcastError::Config(_) => 1,
            VidcastError::Database(_) => 1,
            VidcastError::Storage(_) => 1,
        }
    }

    /// The platform error carried by this error, if any
    pub fn as_platform(&self) -> Option<&PlatformError> {
        match self {
            VidcastError::Platform(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Account not found: {0}")]
    AccountNotFound(String),
}

/// Failures of the temporary object storage
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object reference: {0}")]
    InvalidReference(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Platform-side failures, classified for the orchestrator
///
/// `Remote` keeps the raw response body so it can be shown next to the
/// failure for diagnosis.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Remote error (HTTP {status}): {body}")]
    Remote { status: u16, body: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl PlatformError {
    pub fn is_auth(&self) -> bool {
        matches!(self, PlatformError::Authentication(_))
    }

    /// Transport failures that say nothing about the remote job itself
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Network(_))
    }

    /// Raw diagnostic payload returned by the platform, when there is one
    pub fn raw_detail(&self) -> Option<&str> {
        match self {
            PlatformError::Remote { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            PlatformError::Network(format!("request timed out: {}", error))
        } else if error.is_decode() {
            PlatformError::Remote {
                status: error.status().map(|s| s.as_u16()).unwrap_or(200),
                body: format!("undecodable response: {}", error),
            }
        } else {
            PlatformError::Network(error.to_string())
        }
    }
}
