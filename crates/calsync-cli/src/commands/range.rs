use clap::Args;
use calsync_core::sync::{EventDateTime, RemoteCalendar};
use calsync_core::Config;

use super::{calendar_client, parse_instant, CliResult};

#[derive(Args)]
pub struct RangeArgs {
    /// Calendar to read (e.g. a holiday calendar id)
    #[arg(long)]
    calendar: Option<String>,
    /// Window start (RFC 3339)
    #[arg(long)]
    from: String,
    /// Window end (RFC 3339)
    #[arg(long)]
    to: String,
    /// Print raw events as JSON
    #[arg(long)]
    json: bool,
}

pub async fn run(args: RangeArgs) -> CliResult {
    let config = Config::load()?;
    let calendar = args
        .calendar
        .unwrap_or_else(|| config.sync.calendar_id.clone());
    let from = parse_instant("from", &args.from)?;
    let to = parse_instant("to", &args.to)?;
    if to <= from {
        return Err("--to must be after --from".into());
    }

    let client = calendar_client(&config)?;
    let items = client.list_range(&calendar, from, to).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    if items.is_empty() {
        println!("No events.");
    }
    for item in &items {
        println!(
            "{:<26} {}",
            start_label(item.start.as_ref()),
            item.summary.as_deref().unwrap_or("(no title)")
        );
    }
    Ok(())
}

fn start_label(start: Option<&EventDateTime>) -> &str {
    start
        .and_then(|s| s.date_time.as_deref().or(s.date.as_deref()))
        .unwrap_or("-")
}
