pub mod auth;
pub mod config;
pub mod events;
pub mod range;
pub mod sync;

use std::sync::Arc;

use calsync_core::auth::token_manager_for;
use calsync_core::{Config, GoogleCalendarClient};
use chrono::{DateTime, Utc};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Calendar client backed by the configured account's credentials.
pub fn calendar_client(config: &Config) -> Result<GoogleCalendarClient, Box<dyn std::error::Error>> {
    let tokens = Arc::new(token_manager_for(config)?);
    Ok(GoogleCalendarClient::new(tokens, config.sync.request_timeout())?)
}

pub fn parse_instant(flag: &str, raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("--{flag} '{raw}' is not RFC 3339: {e}"))
}
