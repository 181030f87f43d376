use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error surface for daemon supervision, the RC transport, and the registry.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported platform '{0}'")]
    UnsupportedPlatform(String),

    #[error("rclone binary not found: {0}")]
    BinaryNotFound(String),

    #[error("failed to launch {binary}: {source}")]
    Launch {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("daemon {step} timed out after {after:?}")]
    Timeout { step: &'static str, after: Duration },

    #[error("port {port} still held by pid(s) {pids:?} after terminate")]
    PortBusy { port: u16, pids: Vec<u32> },

    #[error("control port answered by pid {answered}, expected launched daemon pid {expected}")]
    ForeignListener { expected: u32, answered: u64 },

    #[error("daemon did not answer on its control port after {attempts} attempts")]
    NotReady { attempts: u32 },

    #[error("daemon unreachable at {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("rc call {method} failed (status {status}): {message}")]
    Rc {
        method: String,
        status: u16,
        message: String,
    },

    #[error("background task failed: {0}")]
    Join(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
