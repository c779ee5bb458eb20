//! Local calendar event record and its sync state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Per-record synchronization state.
///
/// `Local` and `New` both mean "created here, never pushed" and are treated
/// identically by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Local,
    New,
    Dirty,
    Synced,
    Deleted,
    Conflict,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Local => "local",
            SyncStatus::New => "new",
            SyncStatus::Dirty => "dirty",
            SyncStatus::Synced => "synced",
            SyncStatus::Deleted => "deleted",
            SyncStatus::Conflict => "conflict",
        }
    }

    /// The record carries a local edit the remote side has never acknowledged.
    pub fn has_unpushed_edit(&self) -> bool {
        matches!(self, SyncStatus::Local | SyncStatus::New | SyncStatus::Dirty)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(SyncStatus::Local),
            "new" => Ok(SyncStatus::New),
            "dirty" => Ok(SyncStatus::Dirty),
            "synced" => Ok(SyncStatus::Synced),
            "deleted" => Ok(SyncStatus::Deleted),
            "conflict" => Ok(SyncStatus::Conflict),
            other => Err(ValidationError::InvalidValue {
                field: "sync_status".to_string(),
                message: format!("unknown status '{other}'"),
            }),
        }
    }
}

/// When an event happens.
///
/// All-day events keep plain calendar dates so a re-read in another time
/// zone lands on the same day. The end date is exclusive, as on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventTiming {
    AllDay { start: NaiveDate, end: NaiveDate },
    Timed {
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    },
}

impl EventTiming {
    pub fn is_all_day(&self) -> bool {
        matches!(self, EventTiming::AllDay { .. })
    }

    /// Column encoding: `YYYY-MM-DD` for all-day, RFC 3339 otherwise.
    pub fn to_columns(&self) -> (String, String) {
        match self {
            EventTiming::AllDay { start, end } => (
                start.format("%Y-%m-%d").to_string(),
                end.format("%Y-%m-%d").to_string(),
            ),
            EventTiming::Timed { start, end } => (start.to_rfc3339(), end.to_rfc3339()),
        }
    }

    pub fn from_columns(all_day: bool, start: &str, end: &str) -> Result<Self, ValidationError> {
        if all_day {
            Ok(EventTiming::AllDay {
                start: parse_date("start", start)?,
                end: parse_date("end", end)?,
            })
        } else {
            Ok(EventTiming::Timed {
                start: parse_instant("start", start)?,
                end: parse_instant("end", end)?,
            })
        }
    }

    /// Start instant; all-day events start at midnight UTC.
    pub fn starts_at(&self) -> DateTime<Utc> {
        match self {
            EventTiming::AllDay { start, .. } => start.and_time(NaiveTime::MIN).and_utc(),
            EventTiming::Timed { start, .. } => start.with_timezone(&Utc),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let ordered = match self {
            EventTiming::AllDay { start, end } => end >= start,
            EventTiming::Timed { start, end } => end >= start,
        };
        if ordered {
            Ok(())
        } else {
            let (start, end) = self.to_columns();
            Err(ValidationError::InvalidTimeRange { start, end })
        }
    }
}

/// Accepts a bare date or the date part of a timestamp.
fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ValidationError> {
    let date_part = raw.split('T').next().unwrap_or_default();
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|e| ValidationError::InvalidValue {
        field: field.to_string(),
        message: format!("'{raw}': {e}"),
    })
}

fn parse_instant(field: &str, raw: &str) -> Result<DateTime<FixedOffset>, ValidationError> {
    DateTime::parse_from_rfc3339(raw).map_err(|e| ValidationError::InvalidValue {
        field: field.to_string(),
        message: format!("'{raw}': {e}"),
    })
}

/// Recurrence descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "rules", rename_all = "snake_case")]
pub enum Recurrence {
    #[default]
    None,
    /// A single named rule token (e.g. `RRULE:FREQ=WEEKLY`).
    Rule(String),
    /// Custom multi-line rule list.
    Custom(Vec<String>),
}

const RECURRENCE_NONE: &str = "none";
const RECURRENCE_CUSTOM: &str = "rrule";

impl Recurrence {
    /// Column pair `(recurrence, recurrence_custom)`.
    pub fn to_columns(&self) -> (String, Option<String>) {
        match self {
            Recurrence::None => (RECURRENCE_NONE.to_string(), None),
            Recurrence::Rule(token) => (token.clone(), None),
            Recurrence::Custom(rules) => (RECURRENCE_CUSTOM.to_string(), Some(rules.join("\n"))),
        }
    }

    pub fn from_columns(recurrence: &str, custom: Option<&str>) -> Self {
        match recurrence.trim() {
            "" | RECURRENCE_NONE => Recurrence::None,
            RECURRENCE_CUSTOM => {
                let rules = split_rules(custom.unwrap_or_default());
                if rules.is_empty() {
                    Recurrence::None
                } else {
                    Recurrence::Custom(rules)
                }
            }
            token => Recurrence::Rule(token.to_string()),
        }
    }

    /// Remote wire form: a list of rule lines, empty when not recurring.
    pub fn to_rule_lines(&self) -> Vec<String> {
        match self {
            Recurrence::None => Vec::new(),
            Recurrence::Rule(token) => vec![token.clone()],
            Recurrence::Custom(rules) => rules.iter().flat_map(|r| split_rules(r)).collect(),
        }
    }

    pub fn from_rule_lines(lines: &[String]) -> Self {
        let rules: Vec<String> = lines.iter().flat_map(|r| split_rules(r)).collect();
        if rules.is_empty() {
            Recurrence::None
        } else {
            Recurrence::Custom(rules)
        }
    }
}

fn split_rules(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// User-visible content of an event. Pull never touches this for records
/// that carry an un-pushed local edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContent {
    pub title: String,
    pub timing: EventTiming,
    #[serde(default)]
    pub recurrence: Recurrence,
    pub location: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    /// IANA zone name for timed events.
    pub time_zone: Option<String>,
}

impl EventContent {
    pub fn is_all_day(&self) -> bool {
        self.timing.is_all_day()
    }
}

/// Confirmed identity of a record on the remote side.
///
/// Constructed only from a successful remote response, so a `synced` row
/// always has an id and an etag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLink {
    pub event_id: String,
    pub calendar_id: String,
    pub etag: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A row of the local event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    #[serde(flatten)]
    pub content: EventContent,
    pub sync_status: SyncStatus,
    pub remote_id: Option<String>,
    pub remote_calendar_id: Option<String>,
    pub etag: Option<String>,
    pub remote_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CalendarEvent {
    pub fn title(&self) -> &str {
        &self.content.title
    }
}
