//! Sync engine for bidirectional calendar synchronization.
//!
//! One session pulls remote changes since the stored continuation token,
//! applies them without overwriting un-pushed local edits, records the new
//! token, then pushes local creates, edits and deletes one row at a time.
//!
//! Every step commits on its own, so an interrupted session leaves the store
//! consistent and the next session picks up from the last recorded token.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::calendar_client::{EventDelta, RemoteCalendar, RemoteError};
use super::event_codec::{
    content_from_remote, local_id_for_remote, remote_link, to_remote, CodecError, RemoteEvent,
};
use super::types::{PullOutcome, PushOutcome, SyncError, SyncFailure, SyncReport};
use crate::error::DatabaseError;
use crate::events::{CalendarEvent, SyncStatus};
use crate::storage::EventStore;

/// `sync_state` key holding the continuation token for a calendar.
pub fn cursor_key(calendar_id: &str) -> String {
    format!("sync_token:{calendar_id}")
}

/// Failure applying a single remote item; counted, never fatal.
#[derive(Debug, thiserror::Error)]
pub(super) enum ItemError {
    #[error(transparent)]
    Store(#[from] DatabaseError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("local id '{0}' is already used by an unrelated event")]
    IdCollision(String),
}

/// How an acknowledged write is reported.
#[derive(Clone, Copy)]
enum Acknowledged {
    Created,
    Updated,
    Recreated,
}

/// Sync engine for one local store and one remote calendar service.
pub struct SyncEngine<R: RemoteCalendar> {
    remote: R,
    store: Arc<EventStore>,
}

impl<R: RemoteCalendar> SyncEngine<R> {
    pub fn new(remote: R, store: Arc<EventStore>) -> Self {
        Self { remote, store }
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Run a full session: pull, record the token, push.
    ///
    /// Dropping the returned future cancels the session; the stored token is
    /// only replaced once the whole pull phase has been applied.
    pub async fn run_session(&self, calendar_id: &str) -> Result<SyncReport, SyncFailure> {
        let mut report = SyncReport::new(calendar_id);

        if let Err(e) = self.pull_phase(calendar_id, &mut report).await {
            warn!(calendar_id, error = %e, "pull phase failed");
            return Err(SyncFailure::new(report, e));
        }
        if let Err(e) = self.push_phase(calendar_id, &mut report).await {
            warn!(calendar_id, error = %e, "push phase aborted");
            return Err(SyncFailure::new(report, e));
        }

        info!(
            calendar_id,
            full_sync = report.full_sync,
            pulled = report.pulled,
            pushed = report.pushed,
            deleted = report.deleted,
            conflicts = report.conflicts,
            errors = report.errors,
            "sync session finished"
        );
        Ok(report)
    }

    /// Push local changes without pulling. The stored token is untouched.
    pub async fn push_only(&self, calendar_id: &str) -> Result<SyncReport, SyncFailure> {
        let mut report = SyncReport::new(calendar_id);
        if let Err(e) = self.push_phase(calendar_id, &mut report).await {
            warn!(calendar_id, error = %e, "push phase aborted");
            return Err(SyncFailure::new(report, e));
        }
        info!(calendar_id, pushed = report.pushed, conflicts = report.conflicts, "push finished");
        Ok(report)
    }

    // === Pull ===

    async fn pull_phase(&self, calendar_id: &str, report: &mut SyncReport) -> Result<(), SyncError> {
        let key = cursor_key(calendar_id);
        let stored = self.store.get_cursor(&key)?;
        report.full_sync = stored.is_none();

        let delta = self.fetch_delta(calendar_id, stored.as_deref(), report).await?;
        debug!(calendar_id, items = delta.items.len(), "applying remote changes");

        for item in &delta.items {
            let outcome = self.apply_remote(calendar_id, item);
            match &outcome {
                PullOutcome::Conflict { local_id } => {
                    warn!(local_id = %local_id, "remote change kept out of locally edited event")
                }
                PullOutcome::Failed { remote_id, message } => {
                    warn!(remote_id = %remote_id, error = %message, "failed to apply remote event")
                }
                other => debug!(outcome = ?other, "applied remote event"),
            }
            report.record_pull(outcome);
        }

        if let Some(token) = &delta.next_sync_token {
            self.store.set_cursor(&key, token)?;
        }
        report.sync_token = delta.next_sync_token;
        info!(
            calendar_id,
            full_sync = report.full_sync,
            pulled = report.pulled,
            deleted = report.deleted,
            conflicts = report.conflicts,
            "pull phase finished"
        );
        Ok(())
    }

    /// List changes, falling back once to a full listing when the token expired.
    async fn fetch_delta(
        &self,
        calendar_id: &str,
        token: Option<&str>,
        report: &mut SyncReport,
    ) -> Result<EventDelta, SyncError> {
        match self.remote.list_delta(calendar_id, token).await {
            Err(RemoteError::TokenExpired) if token.is_some() => {
                warn!(calendar_id, "sync token expired, running full sync");
                report.full_sync = true;
                Ok(self.remote.list_delta(calendar_id, None).await?)
            }
            other => Ok(other?),
        }
    }

    fn apply_remote(&self, calendar_id: &str, item: &RemoteEvent) -> PullOutcome {
        let Some(remote_id) = item.id.as_deref().filter(|id| !id.is_empty()) else {
            return PullOutcome::Failed {
                remote_id: String::new(),
                message: "remote event without id".to_string(),
            };
        };
        self.apply_item(calendar_id, remote_id, item)
            .unwrap_or_else(|e| PullOutcome::Failed {
                remote_id: remote_id.to_string(),
                message: e.to_string(),
            })
    }

    fn apply_item(
        &self,
        calendar_id: &str,
        remote_id: &str,
        item: &RemoteEvent,
    ) -> Result<PullOutcome, ItemError> {
        let existing = self.store.find_by_remote_id(remote_id)?;
        let cancelled = item.is_cancelled();

        if let Some(local) = &existing {
            let keep_local = match local.sync_status {
                status if status.has_unpushed_edit() => true,
                SyncStatus::Conflict => true,
                // A remote edit collides with the local delete intent.
                SyncStatus::Deleted => !cancelled,
                _ => false,
            };
            if keep_local {
                // Cancelling an already conflicted event leaves it for the user.
                if !(cancelled && local.sync_status == SyncStatus::Conflict) {
                    self.store
                        .mark_conflict(&local.id, item.etag.as_deref(), item.updated_at())?;
                }
                return Ok(PullOutcome::Conflict {
                    local_id: local.id.clone(),
                });
            }
        }

        if cancelled {
            let purged = match &existing {
                Some(local) => {
                    self.store.purge(&local.id)?;
                    true
                }
                None => false,
            };
            return Ok(PullOutcome::Removed {
                remote_id: remote_id.to_string(),
                purged,
            });
        }

        let content = content_from_remote(item)?;
        let link = remote_link(item, calendar_id)?;
        let local_id = existing
            .as_ref()
            .map(|local| local.id.clone())
            .unwrap_or_else(|| local_id_for_remote(remote_id));

        if !self.store.upsert_synced(&local_id, &content, &link)? {
            return self.rejected_upsert(local_id, remote_id, item);
        }
        Ok(match existing {
            Some(_) => PullOutcome::Updated { local_id },
            None => PullOutcome::Created { local_id },
        })
    }

    /// The row for `local_id` was no longer `synced` at write time. If it is
    /// this remote event, a local edit landed after the lookup: conflict.
    pub(super) fn rejected_upsert(
        &self,
        local_id: String,
        remote_id: &str,
        item: &RemoteEvent,
    ) -> Result<PullOutcome, ItemError> {
        let same_event = self
            .store
            .get(&local_id)?
            .is_some_and(|row| row.remote_id.as_deref() == Some(remote_id));
        if !same_event {
            return Err(ItemError::IdCollision(local_id));
        }
        self.store
            .mark_conflict(&local_id, item.etag.as_deref(), item.updated_at())?;
        Ok(PullOutcome::Conflict { local_id })
    }

    // === Push ===

    async fn push_phase(&self, calendar_id: &str, report: &mut SyncReport) -> Result<(), SyncError> {
        let pending = self.store.pending_changes()?;
        debug!(calendar_id, pending = pending.len(), "pushing local changes");

        for event in &pending {
            let outcome = self.push_one(calendar_id, event).await?;
            match &outcome {
                PushOutcome::ConflictSkipped { local_id } => {
                    warn!(local_id = %local_id, "remote event changed since last sync, marked conflict")
                }
                PushOutcome::Failed { local_id, message } => {
                    warn!(local_id = %local_id, error = %message, "pushed event could not be recorded")
                }
                other => debug!(outcome = ?other, "pushed local event"),
            }
            report.record_push(outcome);
        }
        Ok(())
    }

    async fn push_one(
        &self,
        calendar_id: &str,
        event: &CalendarEvent,
    ) -> Result<PushOutcome, SyncError> {
        if event.sync_status == SyncStatus::Deleted {
            if let Some(remote_id) = &event.remote_id {
                match self.remote.delete(calendar_id, remote_id).await {
                    Ok(()) | Err(RemoteError::NotFound) | Err(RemoteError::Gone) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            return Ok(match self.store.purge(&event.id) {
                Ok(()) => PushOutcome::Deleted {
                    local_id: event.id.clone(),
                },
                Err(e) => failed(event, e),
            });
        }

        let body = to_remote(&event.content);
        let Some(remote_id) = &event.remote_id else {
            let created = self.remote.create(calendar_id, &body).await?;
            return Ok(self.acknowledge(calendar_id, event, &created, Acknowledged::Created));
        };

        match self
            .remote
            .update(calendar_id, remote_id, event.etag.as_deref(), &body)
            .await
        {
            Ok(updated) => Ok(self.acknowledge(calendar_id, event, &updated, Acknowledged::Updated)),
            Err(RemoteError::PreconditionFailed) => {
                Ok(match self.store.mark_push_conflict(&event.id, event.updated_at) {
                    Ok(flagged) => {
                        if !flagged {
                            debug!(local_id = %event.id, "event edited during push, retried next session");
                        }
                        PushOutcome::ConflictSkipped {
                            local_id: event.id.clone(),
                        }
                    }
                    Err(e) => failed(event, e),
                })
            }
            Err(RemoteError::NotFound) | Err(RemoteError::Gone) => {
                debug!(local_id = %event.id, remote_id = %remote_id, "remote event missing, recreating");
                let created = self.remote.create(calendar_id, &body).await?;
                Ok(self.acknowledge(calendar_id, event, &created, Acknowledged::Recreated))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Record the remote identity of a successful write.
    fn acknowledge(
        &self,
        calendar_id: &str,
        event: &CalendarEvent,
        remote: &RemoteEvent,
        kind: Acknowledged,
    ) -> PushOutcome {
        let link = match remote_link(remote, calendar_id) {
            Ok(link) => link,
            Err(e) => return failed(event, e),
        };
        match self.store.mark_synced(&event.id, &link, event.updated_at) {
            Ok(true) => {}
            Ok(false) => {
                debug!(local_id = %event.id, "event edited during push, left pending")
            }
            Err(e) => return failed(event, e),
        }
        let local_id = event.id.clone();
        match kind {
            Acknowledged::Created => PushOutcome::Created {
                local_id,
                remote_id: link.event_id,
            },
            Acknowledged::Updated => PushOutcome::Updated { local_id },
            Acknowledged::Recreated => PushOutcome::Recreated {
                local_id,
                remote_id: link.event_id,
            },
        }
    }
}

fn failed(event: &CalendarEvent, error: impl std::fmt::Display) -> PushOutcome {
    PushOutcome::Failed {
        local_id: event.id.clone(),
        message: error.to_string(),
    }
}
