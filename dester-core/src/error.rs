//! Error types for dester-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from configuration store operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, disk full, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes the document path.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.dester/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// A field the caller needs is absent from the stored configuration.
    #[error("configuration field '{0}' is not set")]
    MissingField(&'static str),
}

/// Errors raised while loading or validating process settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error reading settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    /// A document-store credential is missing; the service must not start.
    #[error("no document store {0} configured")]
    MissingCredential(&'static str),

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
