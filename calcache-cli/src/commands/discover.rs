//! Principal, home set and calendar discovery.

use anyhow::Result;

use super::print_json;
use crate::app::App;

pub async fn principal(app: &App) -> Result<()> {
    let remote = app.remote()?;
    let principal = remote
        .call(&app.cancel, remote.client().current_user_principal())
        .await?;
    println!("{principal}");
    Ok(())
}

pub async fn homeset(app: &App, principal: Option<String>) -> Result<()> {
    let remote = app.remote()?;
    let principal = match principal {
        Some(principal) => principal,
        None => {
            remote
                .call(&app.cancel, remote.client().current_user_principal())
                .await?
        }
    };
    let home_set = remote
        .call(&app.cancel, remote.client().find_collection(&principal))
        .await?;
    println!("{home_set}");
    Ok(())
}

pub async fn calendars(app: &App, home_set: &str) -> Result<()> {
    let remote = app.remote()?;
    let calendars = remote
        .call(&app.cancel, remote.client().list_calendars(home_set))
        .await?;
    print_json(&calendars)
}
