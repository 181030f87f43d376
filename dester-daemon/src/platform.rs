//! Host operating-system families the daemon supervisor knows how to drive.

use std::fmt;

use crate::error::DaemonError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformFamily {
    Windows,
    Linux,
    MacOs,
}

impl PlatformFamily {
    /// Map an OS identifier to its family.
    ///
    /// Accepts Rust's `std::env::consts::OS` names as well as the
    /// `sys.platform`-style spellings (`win32`, `cygwin`, `msys`, `linux2`,
    /// `darwin`) that appear in existing deployment scripts.
    pub fn from_identifier(identifier: &str) -> Result<Self, DaemonError> {
        match identifier.trim().to_ascii_lowercase().as_str() {
            "windows" | "win32" | "cygwin" | "msys" => Ok(Self::Windows),
            "linux" | "linux2" => Ok(Self::Linux),
            "macos" | "darwin" => Ok(Self::MacOs),
            _ => Err(DaemonError::UnsupportedPlatform(identifier.to_string())),
        }
    }

    /// Identifier of the running host.
    pub fn current_identifier() -> &'static str {
        std::env::consts::OS
    }
}

impl fmt::Display for PlatformFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformFamily::Windows => write!(f, "windows"),
            PlatformFamily::Linux => write!(f, "linux"),
            PlatformFamily::MacOs => write!(f, "macos"),
        }
    }
}
