//! SQLite-backed local event store.
//!
//! Holds the authoritative local copy of every event together with its
//! sync state, plus the `sync_state` key/value table used for the
//! incremental sync cursor.
//!
//! All access goes through a single connection behind a mutex, so a user
//! edit and an in-flight sync session never interleave inside a statement.
//! Every mutation is a single-row statement keyed by local id.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{data_dir, migrations};
use crate::error::{CoreError, DatabaseError, ValidationError};
use crate::events::{
    CalendarEvent, EventContent, EventTiming, Recurrence, RemoteLink, SyncStatus,
};

const SELECT_COLUMNS: &str = "id, title, all_day, start, end, recurrence, recurrence_custom, \
     location, color, description, sync_status, google_event_id, google_calendar_id, \
     time_zone, google_etag, google_updated_at, updated_at, created_at";

const DEFAULT_TIME_ZONE: &str = "UTC";
const SEARCH_LIMIT_DEFAULT: usize = 100;
const SEARCH_LIMIT_MAX: usize = 200;

/// Columns exactly as stored, before decoding.
struct RawRow {
    id: String,
    title: String,
    all_day: bool,
    start: String,
    end: String,
    recurrence: String,
    recurrence_custom: Option<String>,
    location: Option<String>,
    color: Option<String>,
    description: Option<String>,
    sync_status: String,
    remote_id: Option<String>,
    remote_calendar_id: Option<String>,
    time_zone: Option<String>,
    etag: Option<String>,
    remote_updated_at: Option<String>,
    updated_at: String,
    created_at: String,
}

fn read_raw(row: &rusqlite::Row) -> Result<RawRow, rusqlite::Error> {
    Ok(RawRow {
        id: row.get(0)?,
        title: row.get(1)?,
        all_day: row.get::<_, i64>(2)? != 0,
        start: row.get(3)?,
        end: row.get(4)?,
        recurrence: row.get(5)?,
        recurrence_custom: row.get(6)?,
        location: row.get(7)?,
        color: row.get(8)?,
        description: row.get(9)?,
        sync_status: row.get(10)?,
        remote_id: row.get(11)?,
        remote_calendar_id: row.get(12)?,
        time_zone: row.get(13)?,
        etag: row.get(14)?,
        remote_updated_at: row.get(15)?,
        updated_at: row.get(16)?,
        created_at: row.get(17)?,
    })
}

/// Empty strings written by older builds read back as absent.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

impl RawRow {
    fn decode(self) -> Result<CalendarEvent, DatabaseError> {
        let corrupt = |message: String| DatabaseError::CorruptRow {
            id: self.id.clone(),
            message,
        };

        let timing = EventTiming::from_columns(self.all_day, &self.start, &self.end)
            .map_err(|e| corrupt(e.to_string()))?;
        let sync_status: SyncStatus = self
            .sync_status
            .parse()
            .map_err(|e: ValidationError| corrupt(e.to_string()))?;
        let updated_at = parse_timestamp(&self.updated_at)
            .ok_or_else(|| corrupt(format!("bad updated_at '{}'", self.updated_at)))?;
        let created_at = parse_timestamp(&self.created_at)
            .ok_or_else(|| corrupt(format!("bad created_at '{}'", self.created_at)))?;

        Ok(CalendarEvent {
            content: EventContent {
                title: self.title,
                timing,
                recurrence: Recurrence::from_columns(
                    &self.recurrence,
                    self.recurrence_custom.as_deref(),
                ),
                location: non_empty(self.location),
                description: non_empty(self.description),
                color: non_empty(self.color),
                time_zone: non_empty(self.time_zone),
            },
            sync_status,
            remote_id: non_empty(self.remote_id),
            remote_calendar_id: non_empty(self.remote_calendar_id),
            etag: non_empty(self.etag),
            remote_updated_at: self.remote_updated_at.as_deref().and_then(parse_timestamp),
            created_at,
            updated_at,
            id: self.id,
        })
    }
}

/// Local event store.
pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    /// Open the database at `~/.config/calsync/events.db`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_default() -> Result<Self, CoreError> {
        let path = data_dir()?.join("events.db");
        Ok(Self::open(&path)?)
    }

    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        // Reduce busy errors when the desktop process and the CLI share the file.
        if let Err(e) = conn.execute_batch("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;") {
            tracing::warn!(error = %e, "failed to set sqlite pragmas");
        }
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::Locked)
    }

    fn query_events(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<CalendarEvent>, DatabaseError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let raws = stmt
            .query_map(args, read_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawRow::decode).collect()
    }

    fn query_one(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<CalendarEvent>, DatabaseError> {
        let raw = {
            let conn = self.conn()?;
            conn.query_row(sql, args, read_raw).optional()?
        };
        raw.map(RawRow::decode).transpose()
    }

    // === User-facing mutations ===

    /// Insert a locally created event. `status` must be `local` or `new`.
    ///
    /// A missing id becomes `evt-<uuid>`; a missing time zone becomes UTC.
    pub fn insert(
        &self,
        id: Option<&str>,
        content: &EventContent,
        status: SyncStatus,
    ) -> Result<CalendarEvent, CoreError> {
        if !matches!(status, SyncStatus::Local | SyncStatus::New) {
            return Err(ValidationError::InvalidValue {
                field: "sync_status".into(),
                message: format!("new events start as local or new, not {status}"),
            }
            .into());
        }
        content.timing.validate()?;

        let id = match id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => format!("evt-{}", Uuid::new_v4()),
        };
        let mut content = content.clone();
        if content.time_zone.is_none() {
            content.time_zone = Some(DEFAULT_TIME_ZONE.to_string());
        }

        let (start, end) = content.timing.to_columns();
        let (recurrence, recurrence_custom) = content.recurrence.to_columns();
        let now = Utc::now().to_rfc3339();

        self.conn()?
            .execute(
                "INSERT INTO events (id, title, all_day, start, end, recurrence, recurrence_custom,
                    location, color, description, sync_status, time_zone, updated_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                params![
                    id,
                    content.title,
                    content.is_all_day(),
                    start,
                    end,
                    recurrence,
                    recurrence_custom,
                    content.location,
                    content.color,
                    content.description,
                    status.as_str(),
                    content.time_zone,
                    now,
                ],
            )
            .map_err(DatabaseError::from)?;

        self.get(&id)?
            .ok_or_else(|| DatabaseError::NotFound(id).into())
    }

    /// Replace an event's content.
    ///
    /// `synced` rows become `dirty`; re-saving a `conflict` row is the
    /// manual resolution path and also yields `dirty`. Remote linkage is kept.
    pub fn update_content(&self, id: &str, content: &EventContent) -> Result<CalendarEvent, CoreError> {
        content.timing.validate()?;
        let existing = self
            .get(id)?
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;

        let status = match existing.sync_status {
            SyncStatus::Synced | SyncStatus::Conflict => SyncStatus::Dirty,
            SyncStatus::Deleted => {
                return Err(ValidationError::InvalidValue {
                    field: "id".into(),
                    message: format!("event '{id}' is marked for deletion"),
                }
                .into())
            }
            other => other,
        };

        let time_zone = content
            .time_zone
            .clone()
            .or(existing.content.time_zone)
            .unwrap_or_else(|| DEFAULT_TIME_ZONE.to_string());
        let (start, end) = content.timing.to_columns();
        let (recurrence, recurrence_custom) = content.recurrence.to_columns();

        self.conn()?
            .execute(
                "UPDATE events SET title=?2, all_day=?3, start=?4, end=?5, recurrence=?6,
                    recurrence_custom=?7, location=?8, color=?9, description=?10,
                    sync_status=?11, time_zone=?12, updated_at=?13
                 WHERE id=?1",
                params![
                    id,
                    content.title,
                    content.is_all_day(),
                    start,
                    end,
                    recurrence,
                    recurrence_custom,
                    content.location,
                    content.color,
                    content.description,
                    status.as_str(),
                    time_zone,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(DatabaseError::from)?;

        self.get(id)?
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()).into())
    }

    /// Soft-delete: the push phase removes the remote copy and purges the row.
    pub fn mark_deleted(&self, id: &str) -> Result<(), DatabaseError> {
        let changed = self.conn()?.execute(
            "UPDATE events SET sync_status='deleted', updated_at=?2 WHERE id=?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound(id.to_string()));
        }
        Ok(())
    }

    // === Reads ===

    pub fn get(&self, id: &str) -> Result<Option<CalendarEvent>, DatabaseError> {
        self.query_one(
            &format!("SELECT {SELECT_COLUMNS} FROM events WHERE id = ?1"),
            &[&id],
        )
    }

    pub fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<CalendarEvent>, DatabaseError> {
        self.query_one(
            &format!("SELECT {SELECT_COLUMNS} FROM events WHERE google_event_id = ?1 LIMIT 1"),
            &[&remote_id],
        )
    }

    /// All rows, including ones marked for deletion.
    pub fn list(&self) -> Result<Vec<CalendarEvent>, DatabaseError> {
        self.query_events(
            &format!("SELECT {SELECT_COLUMNS} FROM events ORDER BY start ASC, id ASC"),
            &[],
        )
    }

    /// Rows the push phase must process, in insertion order.
    pub fn pending_changes(&self) -> Result<Vec<CalendarEvent>, DatabaseError> {
        self.query_events(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM events
                 WHERE sync_status IN ('new', 'dirty', 'local', 'deleted')
                 ORDER BY rowid ASC"
            ),
            &[],
        )
    }

    pub fn list_conflicts(&self) -> Result<Vec<CalendarEvent>, DatabaseError> {
        self.query_events(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM events WHERE sync_status = 'conflict' ORDER BY start ASC"
            ),
            &[],
        )
    }

    /// Case-insensitive search over title, description and location.
    ///
    /// Every whitespace-separated term must match. Rows marked for deletion
    /// are skipped; `limit` outside 1..=200 falls back to 100.
    pub fn search(
        &self,
        query: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CalendarEvent>, DatabaseError> {
        let limit = if (1..=SEARCH_LIMIT_MAX).contains(&limit) {
            limit
        } else {
            SEARCH_LIMIT_DEFAULT
        };
        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();

        let mut hits: Vec<CalendarEvent> = self
            .list()?
            .into_iter()
            .filter(|e| e.sync_status != SyncStatus::Deleted)
            .filter(|e| {
                let start = e.content.timing.starts_at();
                from.map_or(true, |f| start >= f) && to.map_or(true, |t| start <= t)
            })
            .filter(|e| {
                let haystack = [
                    Some(e.content.title.as_str()),
                    e.content.description.as_deref(),
                    e.content.location.as_deref(),
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join("\n")
                .to_lowercase();
                terms.iter().all(|t| haystack.contains(t.as_str()))
            })
            .collect();
        hits.sort_by_key(|e| e.content.timing.starts_at());
        hits.truncate(limit);
        Ok(hits)
    }

    // === Sync-engine transitions ===

    /// Record a remote write against a row whose local content must be kept.
    pub fn mark_conflict(
        &self,
        id: &str,
        etag: Option<&str>,
        remote_updated_at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        self.conn()?.execute(
            "UPDATE events SET sync_status='conflict',
                google_etag=COALESCE(?2, google_etag),
                google_updated_at=COALESCE(?3, google_updated_at)
             WHERE id=?1",
            params![id, etag, remote_updated_at.map(|t| t.to_rfc3339())],
        )?;
        Ok(())
    }

    /// Write remote content into a row, creating it when absent.
    ///
    /// An existing row is only overwritten while it is `synced`; returns
    /// `false` when an existing row was left untouched for that reason.
    pub fn upsert_synced(
        &self,
        id: &str,
        content: &EventContent,
        link: &RemoteLink,
    ) -> Result<bool, DatabaseError> {
        let (start, end) = content.timing.to_columns();
        let (recurrence, recurrence_custom) = content.recurrence.to_columns();
        let now = Utc::now().to_rfc3339();

        let changed = self.conn()?.execute(
            "INSERT INTO events (id, title, all_day, start, end, recurrence, recurrence_custom,
                location, color, description, sync_status, google_event_id, google_calendar_id,
                time_zone, google_etag, google_updated_at, updated_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'synced', ?11, ?12, ?13, ?14, ?15, ?16, ?16)
             ON CONFLICT(id) DO UPDATE SET
                title=excluded.title,
                all_day=excluded.all_day,
                start=excluded.start,
                end=excluded.end,
                recurrence=excluded.recurrence,
                recurrence_custom=excluded.recurrence_custom,
                location=excluded.location,
                color=excluded.color,
                description=excluded.description,
                sync_status='synced',
                google_event_id=excluded.google_event_id,
                google_calendar_id=excluded.google_calendar_id,
                time_zone=excluded.time_zone,
                google_etag=excluded.google_etag,
                google_updated_at=excluded.google_updated_at,
                updated_at=excluded.updated_at
             WHERE events.sync_status = 'synced'",
            params![
                id,
                content.title,
                content.is_all_day(),
                start,
                end,
                recurrence,
                recurrence_custom,
                content.location,
                content.color,
                content.description,
                link.event_id,
                link.calendar_id,
                content.time_zone,
                link.etag,
                link.updated_at.map(|t| t.to_rfc3339()),
                now,
            ],
        )?;
        Ok(changed > 0)
    }

    /// A push was acknowledged: adopt the remote identity.
    ///
    /// `seen_updated_at` is the row's `updated_at` when the push read it. The
    /// row becomes `synced` only if it is unchanged since; otherwise the link
    /// is still stored and the newer edit stays pending (`dirty`, or `deleted`
    /// if the user deleted it meanwhile). Returns whether the row is `synced`.
    pub fn mark_synced(
        &self,
        id: &str,
        link: &RemoteLink,
        seen_updated_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let unchanged = unchanged_since(&tx, id, seen_updated_at)?;

        tx.execute(
            "UPDATE events SET google_event_id=?2, google_calendar_id=?3, google_etag=?4,
                google_updated_at=?5,
                sync_status=CASE
                    WHEN ?6 THEN 'synced'
                    WHEN sync_status='deleted' THEN 'deleted'
                    ELSE 'dirty'
                END
             WHERE id=?1",
            params![
                id,
                link.event_id,
                link.calendar_id,
                link.etag,
                link.updated_at.map(|t| t.to_rfc3339()),
                unchanged,
            ],
        )?;
        tx.commit()?;
        Ok(unchanged)
    }

    /// Flag a push rejected by the remote etag check as `conflict`, unless
    /// the row changed after the push read it. Returns whether it was flagged.
    pub fn mark_push_conflict(
        &self,
        id: &str,
        seen_updated_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        if !unchanged_since(&tx, id, seen_updated_at)? {
            return Ok(false);
        }
        tx.execute(
            "UPDATE events SET sync_status='conflict' WHERE id=?1",
            params![id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Hard delete.
    pub fn purge(&self, id: &str) -> Result<(), DatabaseError> {
        self.conn()?
            .execute("DELETE FROM events WHERE id = ?1", params![id])?;
        Ok(())
    }

    // === Session cursor ===

    pub fn get_cursor(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let value: Option<Option<String>> = self
            .conn()?
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten().filter(|v| !v.is_empty()))
    }

    pub fn set_cursor(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn()?.execute(
            "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn clear_cursor(&self, key: &str) -> Result<(), DatabaseError> {
        self.conn()?
            .execute("DELETE FROM sync_state WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// Whether a row still carries the `updated_at` a push read from it.
fn unchanged_since(
    conn: &Connection,
    id: &str,
    seen_updated_at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let current: Option<String> = conn
        .query_row(
            "SELECT updated_at FROM events WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let current = current.ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;
    Ok(parse_timestamp(&current) == Some(seen_updated_at))
}
