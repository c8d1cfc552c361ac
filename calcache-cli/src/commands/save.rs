use anyhow::{Context, Result};
use calcache_core::bulk;
use calcache_core::event::EventObject;

use super::print_json;
use crate::app::App;

/// Reads a JSON array of event objects from stdin and prints them back with
/// their server paths.
pub async fn run(app: &App, calendar: &str, update: bool, parallel: Option<usize>) -> Result<()> {
    let input = std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?;
    let objects: Vec<EventObject> =
        serde_json::from_str(&input).context("Expected a JSON array of event objects on stdin")?;

    let saved = bulk::save_events(
        app.remote()?,
        calendar,
        objects,
        update,
        app.parallelism(parallel),
        &app.cancel,
    )
    .await?;

    print_json(&saved)
}
