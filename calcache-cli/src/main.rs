mod app;
mod commands;
mod render;
mod utils;

use anyhow::Result;
use calcache_core::settings::Settings;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::app::App;

#[derive(Parser)]
#[command(name = "calcache", version)]
#[command(about = "Keep a local replica of CalDAV calendars and query it")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the principal of the configured user
    Principal,
    /// Print the calendar home set of a principal
    Homeset {
        /// Defaults to the configured user's principal
        principal: Option<String>,
    },
    /// List the calendars under a home set
    Calendars { homeset: String },
    /// Print every event of a calendar as JSON
    Events {
        calendar: String,

        /// Query the server directly instead of syncing the cache
        #[arg(long)]
        no_sync: bool,
    },
    /// Show which events are active over a time window
    Timeline {
        calendar: String,

        /// Window start (RFC 3339, YYYY-MM-DD, "now" or "now-2h")
        #[arg(long)]
        start: String,

        /// Window end (same formats as --start)
        #[arg(long)]
        end: String,

        /// Query the server directly instead of syncing the cache
        #[arg(long)]
        no_sync: bool,

        /// Print segments as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create events read as JSON from stdin
    Save {
        calendar: String,

        /// Allow overwriting events that already have a path
        #[arg(long)]
        update: bool,

        /// Concurrent requests (defaults to the configured parallelism)
        #[arg(short, long)]
        parallel: Option<usize>,
    },
    /// Delete events by path (arguments, or one path per line on stdin)
    Delete {
        /// Concurrent requests (defaults to the configured parallelism)
        #[arg(short, long)]
        parallel: Option<usize>,

        paths: Vec<String>,
    },
    /// Drop everything from the local cache
    Purge {
        /// Also delete the database file
        #[arg(long)]
        remove_file: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let settings = Settings::load()?;

    if let Commands::Config = cli.command {
        return commands::config::run(&settings);
    }

    let app = App::new(settings)?;

    let cancel = app.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Principal => commands::discover::principal(&app).await,
        Commands::Homeset { principal } => commands::discover::homeset(&app, principal).await,
        Commands::Calendars { homeset } => commands::discover::calendars(&app, &homeset).await,
        Commands::Events { calendar, no_sync } => {
            commands::events::run(&app, &calendar, no_sync).await
        }
        Commands::Timeline {
            calendar,
            start,
            end,
            no_sync,
            json,
        } => commands::timeline::run(&app, &calendar, &start, &end, no_sync, json).await,
        Commands::Save {
            calendar,
            update,
            parallel,
        } => commands::save::run(&app, &calendar, update, parallel).await,
        Commands::Delete { parallel, paths } => commands::delete::run(&app, paths, parallel).await,
        Commands::Purge { remove_file } => commands::purge::run(&app, remove_file).await,
        Commands::Config => commands::config::run(&app.settings),
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging() {
    let filter = EnvFilter::try_from_env("CALCACHE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
