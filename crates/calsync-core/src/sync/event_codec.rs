//! Encoding/decoding between local event content and Google Calendar events.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{EventContent, EventTiming, Recurrence, RemoteLink};

const DEFAULT_TIME_ZONE: &str = "UTC";
const CANCELLED: &str = "cancelled";

/// Start or end of a Google event: `date` for all-day, `dateTime` otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

/// Google Calendar v3 event resource, limited to the synced fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<EventDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<EventDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

impl RemoteEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some(CANCELLED)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Decoding failures for a single remote item.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("remote event is missing {0}")]
    MissingField(&'static str),

    #[error("remote event has invalid {field} '{value}'")]
    InvalidTime { field: &'static str, value: String },
}

/// Google's fixed event palette.
pub fn is_valid_color(id: &str) -> bool {
    matches!(
        id,
        "1" | "2" | "3" | "4" | "5" | "6" | "7" | "8" | "9" | "10" | "11"
    )
}

/// Build the request body for create and update.
///
/// Text fields and recurrence are always present so a PATCH clears values
/// that were removed locally.
pub fn to_remote(content: &EventContent) -> RemoteEvent {
    let (start, end) = match &content.timing {
        EventTiming::AllDay { start, end } => (
            EventDateTime {
                date: Some(start.format("%Y-%m-%d").to_string()),
                ..EventDateTime::default()
            },
            EventDateTime {
                date: Some(end.format("%Y-%m-%d").to_string()),
                ..EventDateTime::default()
            },
        ),
        EventTiming::Timed { start, end } => {
            let zone = content
                .time_zone
                .as_deref()
                .map(str::trim)
                .filter(|z| !z.is_empty())
                .unwrap_or(DEFAULT_TIME_ZONE)
                .to_string();
            (
                EventDateTime {
                    date_time: Some(start.to_rfc3339()),
                    time_zone: Some(zone.clone()),
                    ..EventDateTime::default()
                },
                EventDateTime {
                    date_time: Some(end.to_rfc3339()),
                    time_zone: Some(zone),
                    ..EventDateTime::default()
                },
            )
        }
    };

    let color_id = content
        .color
        .as_deref()
        .map(str::trim)
        .filter(|c| is_valid_color(c))
        .map(String::from);

    RemoteEvent {
        summary: Some(content.title.clone()),
        description: Some(content.description.clone().unwrap_or_default()),
        location: Some(content.location.clone().unwrap_or_default()),
        color_id,
        start: Some(start),
        end: Some(end),
        recurrence: Some(content.recurrence.to_rule_lines()),
        ..RemoteEvent::default()
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn parse_date(field: &'static str, raw: &str) -> Result<NaiveDate, CodecError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| CodecError::InvalidTime {
        field,
        value: raw.to_string(),
    })
}

fn decode_timing(remote: &RemoteEvent) -> Result<EventTiming, CodecError> {
    let start = remote.start.as_ref().ok_or(CodecError::MissingField("start"))?;
    let end = remote.end.clone().unwrap_or_default();

    if let Some(date) = non_empty(&start.date) {
        let start_date = parse_date("start", &date)?;
        let end_date = match non_empty(&end.date) {
            Some(raw) => parse_date("end", &raw)?,
            None => start_date
                .checked_add_days(Days::new(1))
                .unwrap_or(start_date),
        };
        return Ok(EventTiming::AllDay {
            start: start_date,
            end: end_date,
        });
    }

    let raw_start = non_empty(&start.date_time).ok_or(CodecError::MissingField("start time"))?;
    let start_at = DateTime::parse_from_rfc3339(&raw_start).map_err(|_| CodecError::InvalidTime {
        field: "start",
        value: raw_start.clone(),
    })?;
    let end_at = match non_empty(&end.date_time) {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map_err(|_| CodecError::InvalidTime { field: "end", value: raw })?,
        None => start_at,
    };
    Ok(EventTiming::Timed {
        start: start_at,
        end: end_at,
    })
}

/// Local content for a live remote event.
pub fn content_from_remote(remote: &RemoteEvent) -> Result<EventContent, CodecError> {
    let timing = decode_timing(remote)?;
    let time_zone = remote
        .start
        .as_ref()
        .and_then(|s| non_empty(&s.time_zone));

    Ok(EventContent {
        title: remote.summary.clone().unwrap_or_default(),
        timing,
        recurrence: Recurrence::from_rule_lines(remote.recurrence.as_deref().unwrap_or_default()),
        location: non_empty(&remote.location),
        description: non_empty(&remote.description),
        color: non_empty(&remote.color_id),
        time_zone,
    })
}

/// Remote identity of an acknowledged event.
pub fn remote_link(remote: &RemoteEvent, calendar_id: &str) -> Result<RemoteLink, CodecError> {
    let event_id = non_empty(&remote.id).ok_or(CodecError::MissingField("id"))?;
    let etag = non_empty(&remote.etag).ok_or(CodecError::MissingField("etag"))?;
    Ok(RemoteLink {
        event_id,
        calendar_id: calendar_id.to_string(),
        etag,
        updated_at: remote.updated_at(),
    })
}

/// Local id for a row first seen on the remote side.
pub fn local_id_for_remote(remote_id: &str) -> String {
    format!("google-{remote_id}")
}
