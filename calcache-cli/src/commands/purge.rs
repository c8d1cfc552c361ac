use anyhow::Result;
use owo_colors::OwoColorize;

use crate::app::App;

pub async fn run(app: &App, remove_file: bool) -> Result<()> {
    app.store.purge().await?;

    if remove_file {
        if let Some(path) = app.store.path() {
            // WAL mode keeps two side files next to the database
            for suffix in ["", "-wal", "-shm"] {
                let file = format!("{}{suffix}", path.display());
                match std::fs::remove_file(&file) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            eprintln!("{}", format!("Removed {}", path.display()).dimmed());
        }
    }

    eprintln!("{}", "Cache purged".green());
    Ok(())
}
