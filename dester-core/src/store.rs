//! Configuration store contract and the bundled YAML-file store.
//!
//! # Storage layout
//!
//! ```text
//! ~/.dester/
//!   config.yaml      (configuration document: mode 0600)
//!   settings.yaml    (process settings, see crate::settings)
//!   rclone.conf      (daemon config, written by dester-daemon)
//! ```
//!
//! # API pattern
//!
//! Path helpers come in two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::ConfigError;
use crate::types::{Category, Configuration, CredentialBlock, ProviderApiKey};

// ---------------------------------------------------------------------------
// 1. Contract
// ---------------------------------------------------------------------------

/// Read access to the persisted configuration, plus the one write-back the
/// metadata ingestion pass performs.
///
/// Implementations must not cache: every call reflects the current document,
/// so a configuration update is picked up by the next provisioning cycle.
pub trait ConfigStore: Send + Sync {
    fn is_config_initialized(&self) -> Result<bool, ConfigError>;

    fn is_metadata_initialized(&self) -> Result<bool, ConfigError>;

    /// Categories in document order.
    fn categories(&self) -> Result<Vec<Category>, ConfigError>;

    fn remote_credential_blocks(&self) -> Result<Vec<CredentialBlock>, ConfigError>;

    /// Returns [`ConfigError::MissingField`] when no key has been stored.
    fn provider_api_key(&self) -> Result<ProviderApiKey, ConfigError>;

    fn set_metadata_initialized(&self, value: bool) -> Result<(), ConfigError>;
}

// ---------------------------------------------------------------------------
// 2. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.dester/`: pure, no I/O.
pub fn data_dir_at(home: &Path) -> PathBuf {
    home.join(".dester")
}

/// `<home>/.dester/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    data_dir_at(home).join("config.yaml")
}

/// Creates `<home>/.dester/` (mode `0700`) if it does not yet exist.
pub fn ensure_data_dir_at(home: &Path) -> Result<PathBuf, ConfigError> {
    let dir = data_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

// ---------------------------------------------------------------------------
// 3. Load / save
// ---------------------------------------------------------------------------

/// Load the configuration document.
///
/// An absent document is the default (uninitialized) configuration;
/// malformed YAML is `ConfigError::Parse` with the document path.
pub fn load_at(home: &Path) -> Result<Configuration, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(Configuration::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Configuration, ConfigError> {
    load_at(&home()?)
}

/// Atomically save the configuration document, stamping `updatedAt`.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Configuration) -> Result<(), ConfigError> {
    ensure_data_dir_at(home)?;
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let mut stamped = config.clone();
    stamped.updated_at = Some(Utc::now());

    let yaml = serde_yaml::to_string(&stamped)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &Configuration) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// 4. File-backed store
// ---------------------------------------------------------------------------

/// [`ConfigStore`] over `<home>/.dester/config.yaml`. Reads the file on every call.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    home: PathBuf,
}

impl FileConfigStore {
    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Store rooted at `dirs::home_dir()`.
    pub fn open() -> Result<Self, ConfigError> {
        Ok(Self::at(home()?))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn load(&self) -> Result<Configuration, ConfigError> {
        load_at(&self.home)
    }

    pub fn save(&self, config: &Configuration) -> Result<(), ConfigError> {
        save_at(&self.home, config)
    }
}

impl ConfigStore for FileConfigStore {
    fn is_config_initialized(&self) -> Result<bool, ConfigError> {
        Ok(self.load()?.is_config_initialized)
    }

    fn is_metadata_initialized(&self) -> Result<bool, ConfigError> {
        Ok(self.load()?.is_metadata_initialized)
    }

    fn categories(&self) -> Result<Vec<Category>, ConfigError> {
        Ok(self.load()?.categories)
    }

    fn remote_credential_blocks(&self) -> Result<Vec<CredentialBlock>, ConfigError> {
        Ok(self.load()?.remote_credentials)
    }

    fn provider_api_key(&self) -> Result<ProviderApiKey, ConfigError> {
        self.load()?
            .provider_api_key
            .filter(|key| !key.expose().trim().is_empty())
            .ok_or(ConfigError::MissingField("providerApiKey"))
    }

    fn set_metadata_initialized(&self, value: bool) -> Result<(), ConfigError> {
        let mut config = self.load()?;
        config.is_metadata_initialized = value;
        self.save(&config)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
