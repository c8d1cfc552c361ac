pub mod config;
pub mod delete;
pub mod discover;
pub mod events;
pub mod purge;
pub mod save;
pub mod timeline;

use anyhow::Result;
use calcache_core::bulk;
use calcache_core::event::EventObject;
use calcache_core::remote::ObjectFilter;
use serde::Serialize;
use tracing::warn;

use crate::app::App;
use crate::utils::tui::create_spinner;

/// Every object of `calendar`: synced into the cache and read back, or
/// fetched straight from the server with `no_sync`.
pub async fn load_objects(app: &App, calendar: &str, no_sync: bool) -> Result<Vec<EventObject>> {
    if no_sync {
        let objects =
            bulk::query_objects(app.remote()?, calendar, ObjectFilter::default(), &app.cancel)
                .await?;
        return Ok(objects);
    }

    let engine = app.sync_engine()?;
    let spinner = create_spinner(format!("Syncing {calendar}"));
    let synced = engine.sync(calendar, &app.cancel).await;
    spinner.finish_and_clear();
    synced?;

    let (objects, outcome) = app
        .store
        .read_cached(calendar, app.settings.decode_workers())
        .collect()
        .await;
    // corrupt rows were skipped; what decoded is still worth showing
    if let Err(err) = outcome {
        warn!(error = %err, "some cached events could not be read");
    }
    Ok(objects)
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
