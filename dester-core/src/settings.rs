//! Process settings: `<home>/.dester/settings.yaml`, then environment overrides.
//!
//! Environment variables win over the file. Document-store credentials have no
//! defaults; [`Settings::require_store_credentials`] is the fatal pre-check the
//! binary runs before anything else starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::store::data_dir_at;

pub const DEFAULT_RCLONE_LISTEN_PORT: u16 = 35530;
pub const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";

pub const ENV_STORE_DOMAIN: &str = "DESTER_STORE_DOMAIN";
pub const ENV_STORE_USERNAME: &str = "DESTER_STORE_USERNAME";
pub const ENV_STORE_PASSWORD: &str = "DESTER_STORE_PASSWORD";
pub const ENV_RCLONE_LISTEN_PORT: &str = "DESTER_RCLONE_LISTEN_PORT";
pub const ENV_RCLONE_BINARY: &str = "DESTER_RCLONE_BINARY";
pub const ENV_TMDB_BASE_URL: &str = "DESTER_TMDB_BASE_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    pub daemon: DaemonSettings,
    pub metadata: MetadataSettings,
}

/// Credentials for the document store holding the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreSettings {
    pub domain: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// How the rclone daemon is launched and supervised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub listen_port: u16,
    /// Explicit rclone binary; resolved on `PATH` when unset.
    pub binary: Option<PathBuf>,
    pub kill_timeout_secs: u64,
    pub launch_timeout_secs: u64,
    pub ready_attempts: u32,
    pub ready_interval_ms: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_RCLONE_LISTEN_PORT,
            binary: None,
            kill_timeout_secs: 10,
            launch_timeout_secs: 10,
            ready_attempts: 20,
            ready_interval_ms: 250,
        }
    }
}

impl DaemonSettings {
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    pub fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataSettings {
    pub base_url: String,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TMDB_BASE_URL.to_string(),
        }
    }
}

/// `<home>/.dester/settings.yaml`: pure, no I/O.
pub fn settings_path_at(home: &Path) -> PathBuf {
    data_dir_at(home).join("settings.yaml")
}

impl Settings {
    /// Load settings from `home`, then apply the process environment.
    pub fn load_at(home: &Path) -> Result<Self, SettingsError> {
        let mut settings = Self::from_file_at(home)?;
        settings.apply_env(|var| std::env::var(var).ok())?;
        Ok(settings)
    }

    /// `load_at` convenience wrapper.
    pub fn load() -> Result<Self, SettingsError> {
        let home = dirs::home_dir().ok_or(SettingsError::HomeNotFound)?;
        Self::load_at(&home)
    }

    /// File layer only; an absent file yields defaults.
    pub fn from_file_at(home: &Path) -> Result<Self, SettingsError> {
        let path = settings_path_at(home);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|source| SettingsError::Io {
            path: path.clone(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| SettingsError::Parse { path, source })
    }

    /// Apply overrides from `lookup` (the environment in production).
    /// Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_STORE_DOMAIN) {
            self.store.domain = Some(v);
        }
        if let Some(v) = get(ENV_STORE_USERNAME) {
            self.store.username = Some(v);
        }
        if let Some(v) = get(ENV_STORE_PASSWORD) {
            self.store.password = Some(v);
        }
        if let Some(v) = get(ENV_RCLONE_LISTEN_PORT) {
            self.daemon.listen_port = v.trim().parse().map_err(|_| SettingsError::InvalidEnv {
                var: ENV_RCLONE_LISTEN_PORT,
                value: v.clone(),
            })?;
        }
        if let Some(v) = get(ENV_RCLONE_BINARY) {
            self.daemon.binary = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_TMDB_BASE_URL) {
            self.metadata.base_url = v;
        }
        Ok(())
    }

    /// Fails on the first missing document-store credential.
    pub fn require_store_credentials(&self) -> Result<(), SettingsError> {
        let missing = |value: &Option<String>| {
            value.as_deref().map(str::trim).unwrap_or_default().is_empty()
        };
        if missing(&self.store.domain) {
            return Err(SettingsError::MissingCredential("domain"));
        }
        if missing(&self.store.username) {
            return Err(SettingsError::MissingCredential("username"));
        }
        if missing(&self.store.password) {
            return Err(SettingsError::MissingCredential("password"));
        }
        Ok(())
    }
}
