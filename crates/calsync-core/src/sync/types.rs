//! Session results and errors for calendar synchronization.

use serde::Serialize;

use super::calendar_client::RemoteError;
use crate::error::{DatabaseError, OAuthError};

/// What applying one remote item did to the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PullOutcome {
    Created { local_id: String },
    Updated { local_id: String },
    /// Local content kept; the row is (or stays) in `conflict`.
    Conflict { local_id: String },
    /// A remote cancellation; `purged` is false when there was no local row.
    Removed { remote_id: String, purged: bool },
    Failed { remote_id: String, message: String },
}

/// What pushing one local row did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PushOutcome {
    Created { local_id: String, remote_id: String },
    Updated { local_id: String },
    /// The remote item had disappeared and was created again.
    Recreated { local_id: String, remote_id: String },
    Deleted { local_id: String },
    /// The remote etag moved on; the row is now in `conflict`.
    ConflictSkipped { local_id: String },
    Failed { local_id: String, message: String },
}

/// Summary of one sync session. Returned on success and attached to failures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub calendar_id: String,
    pub full_sync: bool,
    pub pulled: usize,
    pub pushed: usize,
    pub deleted: usize,
    pub conflicts: usize,
    pub errors: usize,
    /// Continuation token recorded by this session, if any.
    pub sync_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub pull_outcomes: Vec<PullOutcome>,
    pub push_outcomes: Vec<PushOutcome>,
}

impl SyncReport {
    pub fn new(calendar_id: &str) -> Self {
        Self {
            calendar_id: calendar_id.to_string(),
            ..Self::default()
        }
    }

    pub fn record_pull(&mut self, outcome: PullOutcome) {
        match &outcome {
            PullOutcome::Created { .. } | PullOutcome::Updated { .. } => self.pulled += 1,
            PullOutcome::Conflict { .. } => self.conflicts += 1,
            PullOutcome::Removed { .. } => self.deleted += 1,
            PullOutcome::Failed { message, .. } => {
                self.errors += 1;
                self.error_message = Some(message.clone());
            }
        }
        self.pull_outcomes.push(outcome);
    }

    pub fn record_push(&mut self, outcome: PushOutcome) {
        match &outcome {
            PushOutcome::Created { .. }
            | PushOutcome::Updated { .. }
            | PushOutcome::Recreated { .. }
            | PushOutcome::Deleted { .. } => self.pushed += 1,
            PushOutcome::ConflictSkipped { .. } => self.conflicts += 1,
            PushOutcome::Failed { message, .. } => {
                self.errors += 1;
                self.error_message = Some(message.clone());
            }
        }
        self.push_outcomes.push(outcome);
    }
}

/// Session-level failure.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Credential unavailable: {0}")]
    Credential(#[from] OAuthError),

    #[error("Remote calendar error: {0}")]
    Remote(#[source] RemoteError),

    #[error("Local store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("Sync token rejected again after a full resync")]
    SyncTokenExpired,
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Credential(e) => SyncError::Credential(e),
            RemoteError::TokenExpired => SyncError::SyncTokenExpired,
            other => SyncError::Remote(other),
        }
    }
}

/// A failed session together with everything it did before failing.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SyncFailure {
    pub report: SyncReport,
    #[source]
    pub error: SyncError,
}

impl SyncFailure {
    pub fn new(mut report: SyncReport, error: SyncError) -> Self {
        report.error_message = Some(error.to_string());
        Self { report, error }
    }
}
