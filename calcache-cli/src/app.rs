//! Everything a command needs, built once in `main`.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use calcache_caldav::CalDavClient;
use calcache_core::remote::Remote;
use calcache_core::settings::Settings;
use calcache_core::store::Store;
use calcache_core::sync::SyncEngine;
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;

pub struct App {
    pub settings: Settings,
    pub store: Store,
    pub cancel: CancellationToken,
    pub local_tz: Tz,
    remote: Option<Remote>,
}

impl App {
    pub fn new(settings: Settings) -> Result<Self> {
        let store = Store::open(&settings.cache_db_path())?;

        // Purge works without a server, so a missing url only fails remote commands
        let remote = match settings.server.url {
            Some(_) => {
                let client = CalDavClient::from_settings(&settings.server)?;
                Some(Remote::new(Arc::new(client), settings.request_timeout()?))
            }
            None => None,
        };

        Ok(App {
            local_tz: settings.local_timezone(),
            settings,
            store,
            cancel: CancellationToken::new(),
            remote,
        })
    }

    pub fn remote(&self) -> Result<&Remote> {
        self.remote.as_ref().ok_or_else(|| {
            let hint = Settings::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "the config file".into());
            anyhow!(
                "No CalDAV server configured.\n\n\
                Set server.url in {hint}\n\
                or export CALCACHE_SERVER__URL."
            )
        })
    }

    pub fn sync_engine(&self) -> Result<SyncEngine> {
        Ok(SyncEngine::new(self.store.clone(), self.remote()?.clone()))
    }

    pub fn parallelism(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.settings.parallelism).max(1)
    }
}
