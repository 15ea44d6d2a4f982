use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use tw_auth::{AuthConfig, FileStore, HttpTimeouts};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
const SETTINGS_FILE: &str = "settings.toml";
const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Contents of `settings.toml`; every field is optional in the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    /// Where the encrypted stores live; the platform config dir when unset
    pub storage_dir: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub registration_ttl_days: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let timeouts = HttpTimeouts::default();
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            storage_dir: None,
            connect_timeout_secs: timeouts.connect.as_secs(),
            request_timeout_secs: timeouts.request.as_secs(),
            registration_ttl_days: 7,
        }
    }
}

impl Settings {
    /// `settings.toml` in the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "tokenward").map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
    }

    /// Read settings from `path`; a missing file yields the defaults
    #[instrument(level = "debug")]
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => toml::from_str(&raw)
                .with_context(|| format!("Failed to parse settings file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read settings file {}", path.display())),
        }
    }

    pub fn storage_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.storage_dir {
            Some(dir) => Ok(dir.clone()),
            None => FileStore::default_storage_dir().context("Failed to locate storage directory"),
        }
    }

    pub fn auth_config(&self) -> anyhow::Result<AuthConfig> {
        let base_url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base_url {:?}", self.base_url))?;

        Ok(AuthConfig::new(base_url)
            .with_timeouts(HttpTimeouts {
                connect: Duration::from_secs(self.connect_timeout_secs),
                request: Duration::from_secs(self.request_timeout_secs),
            })
            .with_registration_ttl(Duration::from_secs(
                self.registration_ttl_days.saturating_mul(SECS_PER_DAY),
            )))
    }
}
