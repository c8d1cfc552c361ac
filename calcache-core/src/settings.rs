//! Global calcache configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, Environment, File};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::datetime::resolve_timezone;
use crate::error::{CalError, CalResult};

static DEFAULT_REQUEST_TIMEOUT: &str = "10s";
const DEFAULT_PARALLELISM: usize = 4;
const CACHE_FILE: &str = "cache.db";

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("calcache"))
        .unwrap_or_else(|| PathBuf::from("~/.cache/calcache"))
}

fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

fn default_request_timeout() -> String {
    DEFAULT_REQUEST_TIMEOUT.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Accept invalid TLS certificates.
    #[serde(default)]
    pub insecure: bool,
}

/// Configuration at ~/.config/calcache/config.toml, overridable with
/// `CALCACHE_*` environment variables (`CALCACHE_SERVER__URL`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode_workers: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_timezone: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            server: ServerSettings::default(),
            cache_dir: default_cache_dir(),
            parallelism: DEFAULT_PARALLELISM,
            request_timeout: default_request_timeout(),
            decode_workers: None,
            local_timezone: None,
        }
    }
}

impl Settings {
    pub fn config_path() -> CalResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CalError::Config("Could not determine config directory".into()))?
            .join("calcache");

        Ok(config_dir.join("config.toml"))
    }

    /// Load the user's configuration, writing a commented default file first
    /// if there is none yet.
    pub fn load() -> CalResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    /// Load `path` (if it exists) layered under the environment.
    pub fn load_from(path: &Path) -> CalResult<Self> {
        Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix("CALCACHE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CalError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| CalError::Config(e.to_string()))
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> CalResult<()> {
        let contents = format!(
            "\
# calcache configuration

# CalDAV server and credentials:
# [server]
# url = \"https://caldav.example.com/\"
# username = \"me\"
# password = \"secret\"
# insecure = false

# Where the local replica is kept:
# cache_dir = \"{}\"

# Concurrent requests for save/delete:
# parallelism = {DEFAULT_PARALLELISM}

# Per-request timeout:
# request_timeout = \"{DEFAULT_REQUEST_TIMEOUT}\"

# Tasks decoding cached events (defaults to the number of CPUs):
# decode_workers = 4

# Zone for floating times (defaults to the system zone):
# local_timezone = \"Europe/Berlin\"
",
            default_cache_dir().display()
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CalError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| CalError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.cache_dir.to_string_lossy()).into_owned())
    }

    pub fn cache_db_path(&self) -> PathBuf {
        self.cache_dir().join(CACHE_FILE)
    }

    pub fn request_timeout(&self) -> CalResult<Duration> {
        humantime::parse_duration(&self.request_timeout).map_err(|e| {
            CalError::Config(format!(
                "Invalid request_timeout '{}': {e}",
                self.request_timeout
            ))
        })
    }

    pub fn decode_workers(&self) -> usize {
        self.decode_workers
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
            .max(1)
    }

    pub fn local_timezone(&self) -> Tz {
        resolve_timezone(self.local_timezone.as_deref())
    }

    /// The effective configuration as TOML, password masked.
    pub fn to_display_toml(&self) -> CalResult<String> {
        let mut shown = self.clone();
        if shown.server.password.is_some() {
            shown.server.password = Some("********".into());
        }
        toml::to_string_pretty(&shown).map_err(|e| CalError::Config(e.to_string()))
    }
}
