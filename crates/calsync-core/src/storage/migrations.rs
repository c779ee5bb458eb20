//! Database schema migrations for calsync.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    match conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    }) {
        Ok(v) => Ok(v),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration v1: local-only events table and the sync cursor table.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            id                TEXT PRIMARY KEY,
            title             TEXT NOT NULL,
            all_day           INTEGER NOT NULL DEFAULT 0,
            start             TEXT NOT NULL,
            end               TEXT NOT NULL,
            recurrence        TEXT NOT NULL DEFAULT 'none',
            recurrence_custom TEXT,
            location          TEXT,
            color             TEXT,
            description       TEXT,
            sync_status       TEXT NOT NULL DEFAULT 'local',
            updated_at        TEXT NOT NULL,
            created_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sync_state (
            key   TEXT PRIMARY KEY,
            value TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_events_start ON events(start);
        CREATE INDEX IF NOT EXISTS idx_events_sync_status ON events(sync_status);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: remote linkage columns.
///
/// Adds, when missing:
/// - google_event_id / google_calendar_id: remote identity
/// - time_zone: IANA zone of timed events
/// - google_etag / google_updated_at: remote concurrency tag and timestamp
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    for (column, definition) in [
        ("google_event_id", "TEXT"),
        ("google_calendar_id", "TEXT"),
        ("time_zone", "TEXT"),
        ("google_etag", "TEXT"),
        ("google_updated_at", "TEXT"),
    ] {
        let exists: bool = tx.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('events') WHERE name = ?1",
            [column],
            |row| row.get::<_, i32>(0),
        )? > 0;
        if !exists {
            tx.execute_batch(&format!(
                "ALTER TABLE events ADD COLUMN {column} {definition};"
            ))?;
        }
    }

    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_events_google_event_id ON events(google_event_id);",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('events')").unwrap();
        stmt.query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        let cols = column_names(&conn);
        assert!(cols.contains(&"google_etag".to_string()));
        assert!(cols.contains(&"time_zone".to_string()));
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_v2_tolerates_partially_upgraded_table() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        conn.execute_batch("ALTER TABLE events ADD COLUMN google_event_id TEXT;")
            .unwrap();

        migrate(&conn).unwrap();

        let cols = column_names(&conn);
        assert_eq!(cols.iter().filter(|c| *c == "google_event_id").count(), 1);
        assert!(cols.contains(&"google_updated_at".to_string()));
    }
}
