//! Core error types for calsync-core.
//!
//! One thiserror enum per concern. Session-level sync errors live in
//! [`crate::sync::types`] next to the report they travel with.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for calsync-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// OAuth-related errors
    #[error("OAuth error: {0}")]
    OAuth(#[from] OAuthError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A stored value could not be decoded back into a record
    #[error("Corrupt row for event '{id}': {message}")]
    CorruptRow { id: String, message: String },

    /// Row addressed by local id does not exist
    #[error("Event not found: {0}")]
    NotFound(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// OAuth-specific errors.
#[derive(Error, Debug)]
pub enum OAuthError {
    /// Client id / secret / redirect uri not set
    #[error("OAuth client not configured: set client_id, client_secret and redirect_uri")]
    ClientNotConfigured,

    /// No scopes configured for the consent URL
    #[error("No OAuth scopes configured")]
    NoScopes,

    /// Nothing persisted yet
    #[error("No stored credential; run the authorization flow first")]
    NoCredential,

    /// Authorization code was empty
    #[error("Authorization code required")]
    MissingCode,

    /// Refresh requested without a refresh token
    #[error("Refresh token required")]
    MissingRefreshToken,

    /// Remote rejected the authorization code
    #[error("Authorization code rejected: {0}")]
    InvalidGrant(String),

    /// Refresh failed and the stored access token is no longer usable
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Access token expired and no refresh token is stored
    #[error("Access token expired and no refresh token available")]
    TokenExpired,

    /// Token endpoint answered with a non-success status
    #[error("Token request failed: {status} {body}")]
    TokenEndpoint { status: u16, body: String },

    /// Network or protocol failure talking to the token endpoint
    #[error("Token request error: {0}")]
    Network(#[from] reqwest::Error),

    /// Credential could not be persisted or loaded
    #[error("Credential store error: {0}")]
    Store(#[from] CredentialStoreError),
}

/// Errors raised by credential persistence backends.
#[derive(Error, Debug)]
pub enum CredentialStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed credential record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Invalid time range
    #[error("Invalid time range: end ({end}) is before start ({start})")]
    InvalidTimeRange { start: String, end: String },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _msg) => {
                if inner.code == rusqlite::ErrorCode::DatabaseLocked
                    || inner.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}
