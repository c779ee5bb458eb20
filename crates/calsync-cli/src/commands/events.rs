//! Local event management commands for CLI.

use clap::Subcommand;
use calsync_core::sync::event_codec::is_valid_color;
use calsync_core::{CalendarEvent, EventContent, EventStore, EventTiming, Recurrence, SyncStatus};

use super::{parse_instant, CliResult};

#[derive(Subcommand)]
pub enum EventsAction {
    /// List local events
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List events whose local and remote versions diverged
    Conflicts {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a local event; it is pushed on the next sync
    Add {
        /// Event title
        title: String,
        /// Start (RFC 3339, or YYYY-MM-DD with --all-day)
        #[arg(long)]
        start: String,
        /// End (RFC 3339, or YYYY-MM-DD with --all-day, exclusive)
        #[arg(long)]
        end: String,
        /// Date-only event
        #[arg(long)]
        all_day: bool,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Google color id, "1" to "11"
        #[arg(long)]
        color: Option<String>,
        /// IANA time zone (default UTC)
        #[arg(long)]
        time_zone: Option<String>,
        /// Recurrence rule line, repeatable (e.g. RRULE:FREQ=WEEKLY)
        #[arg(long = "rrule")]
        rrules: Vec<String>,
    },
    /// Delete an event; synced events are removed remotely on the next sync
    Delete {
        /// Event ID
        id: String,
    },
    /// Keep the local version of an event and push it on the next sync
    Resave {
        /// Event ID
        id: String,
    },
    /// Search titles, descriptions and locations
    Search {
        /// Search terms; all must match
        query: String,
        /// Only events starting at or after this instant
        #[arg(long)]
        from: Option<String>,
        /// Only events starting before this instant
        #[arg(long)]
        to: Option<String>,
        /// Maximum results (1-200)
        #[arg(long, default_value = "100")]
        limit: usize,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(action: EventsAction) -> CliResult {
    let store = EventStore::open_default()?;

    match action {
        EventsAction::List { json } => print_events(&store.list()?, json)?,
        EventsAction::Conflicts { json } => print_events(&store.list_conflicts()?, json)?,
        EventsAction::Add {
            title,
            start,
            end,
            all_day,
            location,
            description,
            color,
            time_zone,
            rrules,
        } => {
            if let Some(c) = &color {
                if !is_valid_color(c) {
                    return Err(format!("invalid color '{c}': expected \"1\" to \"11\"").into());
                }
            }
            let content = EventContent {
                title,
                timing: EventTiming::from_columns(all_day, &start, &end)?,
                recurrence: Recurrence::from_rule_lines(&rrules),
                location,
                description,
                color,
                time_zone,
            };
            let event = store.insert(None, &content, SyncStatus::New)?;
            println!("Event created: {}", event.id);
            println!("{}", serde_json::to_string_pretty(&event)?);
        }
        EventsAction::Delete { id } => {
            store.mark_deleted(&id)?;
            println!("Event deleted: {id}");
        }
        EventsAction::Resave { id } => {
            let event = store.get(&id)?.ok_or(format!("Event not found: {id}"))?;
            let event = store.update_content(&id, &event.content)?;
            println!("Event resaved: {} ({})", event.id, event.sync_status);
        }
        EventsAction::Search {
            query,
            from,
            to,
            limit,
            json,
        } => {
            let from = from.map(|raw| parse_instant("from", &raw)).transpose()?;
            let to = to.map(|raw| parse_instant("to", &raw)).transpose()?;
            print_events(&store.search(&query, from, to, limit)?, json)?;
        }
    }
    Ok(())
}

fn print_events(events: &[CalendarEvent], json: bool) -> CliResult {
    if json {
        println!("{}", serde_json::to_string_pretty(events)?);
        return Ok(());
    }
    if events.is_empty() {
        println!("No events.");
        return Ok(());
    }
    for event in events {
        let (start, _) = event.content.timing.to_columns();
        println!(
            "{:<40} {:<26} {:<8} {}",
            event.id,
            start,
            event.sync_status.as_str(),
            event.title()
        );
    }
    Ok(())
}
