//! Google Calendar synchronization layer.
//!
//! Provides bidirectional sync between the local SQLite event store and one
//! remote calendar, using incremental sync tokens and etag-guarded writes.

pub mod calendar_client;
pub mod event_codec;
pub mod sync_engine;
pub mod types;

#[cfg(test)]
mod calendar_client_tests;

pub use calendar_client::{
    EventDelta, GoogleCalendarClient, RemoteCalendar, RemoteError, GOOGLE_CALENDAR_API,
};
pub use event_codec::{CodecError, EventDateTime, RemoteEvent};
pub use sync_engine::{cursor_key, SyncEngine};
pub use types::{PullOutcome, PushOutcome, SyncError, SyncFailure, SyncReport};
