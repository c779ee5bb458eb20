//! Google Calendar API client for sync operations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::event_codec::RemoteEvent;
use crate::auth::TokenManager;
use crate::error::OAuthError;

pub const GOOGLE_CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";

const PAGE_SIZE: &str = "2500";

/// Failures talking to the remote calendar.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Remote event not found")]
    NotFound,

    #[error("Remote event is gone")]
    Gone,

    #[error("Remote event changed since last sync (etag mismatch)")]
    PreconditionFailed,

    #[error("Sync token expired; a full sync is required")]
    TokenExpired,

    #[error("Request failed: {status} {body}")]
    RequestFailed { status: u16, body: String },

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Credential error: {0}")]
    Credential(#[from] OAuthError),

    #[error("Malformed response: {0}")]
    Decode(String),
}

/// All changes since a continuation token.
#[derive(Debug, Clone, Default)]
pub struct EventDelta {
    pub items: Vec<RemoteEvent>,
    /// Token for the next incremental listing, from the final page.
    pub next_sync_token: Option<String>,
}

/// Operations the sync engine needs from a remote calendar.
#[async_trait]
pub trait RemoteCalendar: Send + Sync {
    /// Changes since `sync_token`, or everything (including cancellations)
    /// when no token is given. Follows pagination to the last page.
    async fn list_delta(
        &self,
        calendar_id: &str,
        sync_token: Option<&str>,
    ) -> Result<EventDelta, RemoteError>;

    /// Live events overlapping a time window.
    async fn list_range(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<RemoteEvent>, RemoteError>;

    async fn create(&self, calendar_id: &str, event: &RemoteEvent)
        -> Result<RemoteEvent, RemoteError>;

    /// Partial update guarded by `If-Match` when an etag is given.
    async fn update(
        &self,
        calendar_id: &str,
        remote_id: &str,
        etag: Option<&str>,
        event: &RemoteEvent,
    ) -> Result<RemoteEvent, RemoteError>;

    /// Deleting an event that is already gone succeeds.
    async fn delete(&self, calendar_id: &str, remote_id: &str) -> Result<(), RemoteError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsPage {
    #[serde(default)]
    items: Vec<RemoteEvent>,
    next_page_token: Option<String>,
    next_sync_token: Option<String>,
}

/// Google Calendar v3 client.
pub struct GoogleCalendarClient {
    http: Client,
    base_url: String,
    tokens: Arc<TokenManager>,
}

impl GoogleCalendarClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(tokens: Arc<TokenManager>, timeout: Duration) -> Result<Self, RemoteError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: GOOGLE_CALENDAR_API.to_string(),
            tokens,
        })
    }

    /// Point the client at another API root (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        )
    }

    fn event_url(&self, calendar_id: &str, remote_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(remote_id)
        )
    }

    async fn authorized(&self, method: Method, url: &str) -> Result<RequestBuilder, RemoteError> {
        let credential = self.tokens.ensure_access_token().await?;
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(credential.access_token))
    }

    async fn fetch_pages(
        &self,
        calendar_id: &str,
        base_query: &[(&str, &str)],
        listing_delta: bool,
    ) -> Result<EventDelta, RemoteError> {
        let url = self.events_url(calendar_id);
        let mut delta = EventDelta::default();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.authorized(Method::GET, &url).await?.query(base_query);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let resp = request.send().await?;
            let status = resp.status();
            if status == StatusCode::GONE && listing_delta {
                return Err(RemoteError::TokenExpired);
            }
            let page: EventsPage = decode(ensure_success(resp).await?).await?;
            tracing::debug!(calendar_id, items = page.items.len(), "fetched events page");

            delta.items.extend(page.items);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => {
                    delta.next_sync_token = page.next_sync_token.filter(|t| !t.is_empty());
                    return Ok(delta);
                }
            }
        }
    }

    async fn write(
        &self,
        method: Method,
        url: &str,
        etag: Option<&str>,
        event: &RemoteEvent,
    ) -> Result<RemoteEvent, RemoteError> {
        let mut request = self.authorized(method, url).await?.json(event);
        if let Some(etag) = etag.filter(|e| !e.is_empty()) {
            request = request.header(reqwest::header::IF_MATCH, etag);
        }
        let resp = request.send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound),
            StatusCode::GONE => Err(RemoteError::Gone),
            StatusCode::PRECONDITION_FAILED => Err(RemoteError::PreconditionFailed),
            _ => decode(ensure_success(resp).await?).await,
        }
    }
}

async fn ensure_success(resp: Response) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(RemoteError::RequestFailed {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, RemoteError> {
    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))
}

#[async_trait]
impl RemoteCalendar for GoogleCalendarClient {
    async fn list_delta(
        &self,
        calendar_id: &str,
        sync_token: Option<&str>,
    ) -> Result<EventDelta, RemoteError> {
        match sync_token.filter(|t| !t.is_empty()) {
            Some(token) => {
                self.fetch_pages(calendar_id, &[("syncToken", token)], true)
                    .await
            }
            None => {
                self.fetch_pages(
                    calendar_id,
                    &[
                        ("singleEvents", "true"),
                        ("showDeleted", "true"),
                        ("maxResults", PAGE_SIZE),
                    ],
                    true,
                )
                .await
            }
        }
    }

    async fn list_range(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<RemoteEvent>, RemoteError> {
        let time_min = time_min.to_rfc3339_opts(SecondsFormat::Secs, true);
        let time_max = time_max.to_rfc3339_opts(SecondsFormat::Secs, true);
        let delta = self
            .fetch_pages(
                calendar_id,
                &[
                    ("singleEvents", "true"),
                    ("showDeleted", "false"),
                    ("maxResults", PAGE_SIZE),
                    ("timeMin", time_min.as_str()),
                    ("timeMax", time_max.as_str()),
                ],
                false,
            )
            .await?;
        Ok(delta.items)
    }

    async fn create(
        &self,
        calendar_id: &str,
        event: &RemoteEvent,
    ) -> Result<RemoteEvent, RemoteError> {
        self.write(Method::POST, &self.events_url(calendar_id), None, event)
            .await
    }

    async fn update(
        &self,
        calendar_id: &str,
        remote_id: &str,
        etag: Option<&str>,
        event: &RemoteEvent,
    ) -> Result<RemoteEvent, RemoteError> {
        self.write(
            Method::PATCH,
            &self.event_url(calendar_id, remote_id),
            etag,
            event,
        )
        .await
    }

    async fn delete(&self, calendar_id: &str, remote_id: &str) -> Result<(), RemoteError> {
        let resp = self
            .authorized(Method::DELETE, &self.event_url(calendar_id, remote_id))
            .await?
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(()),
            _ => ensure_success(resp).await.map(|_| ()),
        }
    }
}
