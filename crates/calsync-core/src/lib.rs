//! # calsync Core Library
//!
//! Two-way synchronization between a local SQLite calendar and Google
//! Calendar. Everything is available through the standalone `calsync` CLI,
//! which is a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Auth**: OAuth2 token lifecycle with pluggable credential storage
//!   (owner-only JSON file or OS keyring)
//! - **Storage**: SQLite event store with per-row sync state, and TOML-based
//!   configuration
//! - **Sync**: incremental pull with continuation tokens, non-destructive
//!   merge, and etag-guarded push
//!
//! ## Key Components
//!
//! - [`TokenManager`]: access-token acquisition and refresh
//! - [`EventStore`]: local events and the sync cursor
//! - [`SyncEngine`]: one sync session against a [`RemoteCalendar`]
//! - [`Config`]: application configuration management

pub mod auth;
pub mod error;
pub mod events;
pub mod storage;
pub mod sync;

pub use auth::{CredentialStore, TokenManager};
pub use error::{
    ConfigError, CoreError, CredentialStoreError, DatabaseError, OAuthError, ValidationError,
};
pub use events::{CalendarEvent, EventContent, EventTiming, Recurrence, RemoteLink, SyncStatus};
pub use storage::{Config, EventStore};
pub use sync::{
    GoogleCalendarClient, RemoteCalendar, SyncEngine, SyncError, SyncFailure, SyncReport,
};
