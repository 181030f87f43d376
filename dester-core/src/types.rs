//! Domain types for the Dester configuration document.
//!
//! Field names serialize as camelCase so the YAML document matches the
//! schema the document store uses (`isConfigInitialized`, `categories`, …).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a library category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryId(pub String);

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CategoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CategoryId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// One opaque rclone config section, written to the daemon config verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialBlock(pub String);

impl CredentialBlock {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CredentialBlock {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for CredentialBlock {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// API key for the metadata provider. `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderApiKey(String);

impl ProviderApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ProviderApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProviderApiKey(***)")
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A logical library bucket backed by one or more rclone remotes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub identifier: CategoryId,
    pub display_name: String,
    /// Comma-separated rclone targets, e.g. `"gdrive:Movies, onedrive:Films"`.
    pub remote_selector: String,
}

impl Category {
    pub fn new(
        identifier: impl Into<CategoryId>,
        display_name: impl Into<String>,
        remote_selector: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
            remote_selector: remote_selector.into(),
        }
    }

    /// Parsed `remote_selector` entries, trimmed, empties dropped.
    pub fn targets(&self) -> Vec<String> {
        self.remote_selector
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

/// Root of the persisted configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default)]
    pub is_config_initialized: bool,
    #[serde(default)]
    pub is_metadata_initialized: bool,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub remote_credentials: Vec<CredentialBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_api_key: Option<ProviderApiKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
