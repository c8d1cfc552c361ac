use anyhow::Result;

use super::{load_objects, print_json};
use crate::app::App;

pub async fn run(app: &App, calendar: &str, no_sync: bool) -> Result<()> {
    let mut objects = load_objects(app, calendar, no_sync).await?;
    objects.sort_by(|a, b| a.path.cmp(&b.path));
    print_json(&objects)
}
