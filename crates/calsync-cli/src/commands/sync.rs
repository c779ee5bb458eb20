//! Sync subcommand.
//!
//! Runs one session against the configured calendar. Ctrl-C drops the
//! session future; the stored sync token only moves after a completed pull.

use std::sync::Arc;

use clap::Args;
use calsync_core::sync::cursor_key;
use calsync_core::{Config, EventStore, SyncEngine, SyncReport};

use super::{calendar_client, CliResult};

#[derive(Args)]
pub struct SyncArgs {
    /// Calendar to sync (defaults to `sync.calendar_id`)
    #[arg(long)]
    calendar: Option<String>,
    /// Push local changes only
    #[arg(long, conflicts_with = "full")]
    push_only: bool,
    /// Discard the stored sync token and list everything
    #[arg(long)]
    full: bool,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

pub async fn run(args: SyncArgs) -> CliResult {
    let config = Config::load()?;
    let calendar = args
        .calendar
        .unwrap_or_else(|| config.sync.calendar_id.clone());

    let store = Arc::new(EventStore::open_default()?);
    if args.full {
        store.clear_cursor(&cursor_key(&calendar))?;
    }
    let engine = SyncEngine::new(calendar_client(&config)?, store);

    let session = async {
        if args.push_only {
            engine.push_only(&calendar).await
        } else {
            engine.run_session(&calendar).await
        }
    };

    let result = tokio::select! {
        result = session => result,
        _ = tokio::signal::ctrl_c() => {
            return Err("sync interrupted".into());
        }
    };

    match result {
        Ok(report) => print_report(&report, args.json),
        Err(failure) => {
            print_report(&failure.report, args.json)?;
            Err(failure.error.into())
        }
    }
}

fn print_report(report: &SyncReport, json: bool) -> CliResult {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let mode = if report.full_sync { "full" } else { "incremental" };
    println!("Calendar: {} ({mode})", report.calendar_id);
    println!(
        "pulled {}, pushed {}, deleted {}, conflicts {}, errors {}",
        report.pulled, report.pushed, report.deleted, report.conflicts, report.errors
    );
    if report.conflicts > 0 {
        println!("Run `calsync events conflicts` to review conflicting events.");
    }
    if let Some(message) = &report.error_message {
        println!("last error: {message}");
    }
    Ok(())
}
