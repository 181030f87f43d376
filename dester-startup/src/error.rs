//! Error types for dester-startup.

use thiserror::Error;

use dester_core::{ConfigError, SettingsError};
use dester_daemon::DaemonError;

use crate::sequencer::StartupState;

/// Failures of the metadata provider client or the ingestion pass.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata provider unreachable at {url}: {message}")]
    Http { url: String, message: String },

    /// The provider answered with an error status (bad key, rate limit, …).
    #[error("metadata provider rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("ingestion task failed: {0}")]
    Join(String),
}

/// Every way a cold start can fail. Any of these aborts the process.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("daemon error: {0}")]
    Daemon(#[from] DaemonError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("startup already ran (state: {state})")]
    AlreadyStarted { state: StartupState },

    /// Remote-backed work requested before the sequencer reached `Ready`.
    #[error("service not ready (state: {state})")]
    NotReady { state: StartupState },

    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Join(String),
}
