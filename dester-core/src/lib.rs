//! Dester core library: domain types, configuration store, settings.
//!
//! Public API surface:
//! - [`types`]: newtypes and the persisted [`Configuration`] document
//! - [`error`]: [`ConfigError`] and [`SettingsError`]
//! - [`store`]: the [`ConfigStore`] contract and its file-backed implementation
//! - [`settings`]: process settings loaded from YAML and the environment

pub mod error;
pub mod settings;
pub mod store;
pub mod types;

pub use error::{ConfigError, SettingsError};
pub use settings::{DaemonSettings, MetadataSettings, Settings, StoreSettings};
pub use store::{ConfigStore, FileConfigStore};
pub use types::{Category, CategoryId, Configuration, CredentialBlock, ProviderApiKey};
