//! Startup state machine.
//!
//! ```text
//! Cold → ConfigUnknown ─┬─ config not initialized ──────────────→ FirstRun
//!                       └─ Provisioning → (metadata once) ──────→ Ready
//!                                  any error ───────────────────→ Failed
//! ```
//!
//! The sequencer owns the remote registry; nothing else holds handles.
//! Routes that need remotes go through [`StartupSequencer::require_ready`].

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use dester_core::{Category, CategoryId, ConfigError, ConfigStore};
use dester_daemon::{ProcessController, RemoteRegistry};

use crate::error::StartupError;
use crate::metadata::MetadataSyncTrigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupState {
    Cold,
    ConfigUnknown,
    FirstRun,
    Provisioning,
    Ready,
    Failed,
}

impl fmt::Display for StartupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StartupState::Cold => "cold",
            StartupState::ConfigUnknown => "config_unknown",
            StartupState::FirstRun => "first_run",
            StartupState::Provisioning => "provisioning",
            StartupState::Ready => "ready",
            StartupState::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub categories: Vec<CategoryId>,
    pub daemon_pid: u32,
    pub metadata_ingested: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u128,
}

#[derive(Debug)]
pub enum StartupOutcome {
    Ready(ProvisionReport),
    FirstRun,
    Failed(StartupError),
}

pub struct StartupSequencer {
    store: Arc<dyn ConfigStore>,
    controller: ProcessController,
    registry: RemoteRegistry,
    metadata: MetadataSyncTrigger,
    state: StartupState,
    daemon_pid: Option<u32>,
}

impl StartupSequencer {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        controller: ProcessController,
        metadata: MetadataSyncTrigger,
    ) -> Self {
        let registry = RemoteRegistry::new(controller.transport());
        Self {
            store,
            controller,
            registry,
            metadata,
            state: StartupState::Cold,
            daemon_pid: None,
        }
    }

    pub fn state(&self) -> StartupState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == StartupState::Ready
    }

    pub fn controller(&self) -> &ProcessController {
        &self.controller
    }

    /// The registry, whatever the state. Empty unless provisioning succeeded.
    pub fn registry(&self) -> &RemoteRegistry {
        &self.registry
    }

    /// The registry, only once `Ready`.
    pub fn require_ready(&self) -> Result<&RemoteRegistry, StartupError> {
        if self.is_ready() {
            Ok(&self.registry)
        } else {
            Err(StartupError::NotReady { state: self.state })
        }
    }

    /// Run the cold-start sequence. Only the first call does anything.
    ///
    /// On failure the registry is empty and a daemon launched by this run
    /// has been stopped.
    pub async fn run(&mut self) -> StartupOutcome {
        if self.state != StartupState::Cold {
            return StartupOutcome::Failed(StartupError::AlreadyStarted { state: self.state });
        }

        tracing::info!("starting up");
        match self.sequence().await {
            Ok(Some(report)) => StartupOutcome::Ready(report),
            Ok(None) => StartupOutcome::FirstRun,
            Err(err) => {
                self.fail(&err);
                if let Err(stop_err) = self.shutdown().await {
                    tracing::warn!(error = %stop_err, "could not stop daemon after failed startup");
                }
                StartupOutcome::Failed(err)
            }
        }
    }

    /// Re-read categories and credentials, restart the daemon and rebuild
    /// the registry. Used after a configuration update; only valid once `Ready`.
    pub async fn reprovision(&mut self) -> Result<Vec<CategoryId>, StartupError> {
        self.require_ready()?;
        self.transition(StartupState::Provisioning);

        match self.rebuild_from_store().await {
            Ok(ids) => {
                self.transition(StartupState::Ready);
                Ok(ids)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Write the daemon config from stored credentials, restart the daemon,
    /// then bind one handle per category. Existing handles are dropped first.
    pub async fn provision_remotes(&mut self, categories: &[Category]) -> Result<u32, StartupError> {
        let blocks = self
            .read_store(|store| store.remote_credential_blocks())
            .await?;
        self.controller.write_daemon_config(&blocks)?;

        self.registry.clear();
        let pid = self.controller.restart_daemon().await?;
        self.daemon_pid = Some(pid);

        self.registry.setup(categories);
        tracing::info!(
            categories = self.registry.len(),
            port = self.controller.port(),
            "remote handles bound",
        );
        Ok(pid)
    }

    /// Drop every handle and stop the daemon if this sequencer started one.
    pub async fn shutdown(&mut self) -> Result<(), StartupError> {
        self.registry.clear();
        if let Some(pid) = self.daemon_pid.take() {
            let killed = self.controller.stop_daemon().await?;
            tracing::info!(pid, killed = ?killed, "stopped rclone daemon");
        }
        Ok(())
    }

    async fn sequence(&mut self) -> Result<Option<ProvisionReport>, StartupError> {
        let started_at = Utc::now();
        let clock = Instant::now();

        self.transition(StartupState::ConfigUnknown);
        if !self.read_store(|store| store.is_config_initialized()).await? {
            self.transition(StartupState::FirstRun);
            tracing::info!("configuration not initialized; waiting for first-run setup");
            return Ok(None);
        }

        self.transition(StartupState::Provisioning);
        let categories = self.read_store(|store| store.categories()).await?;
        let daemon_pid = self.provision_remotes(&categories).await?;

        let metadata_ingested = if self
            .read_store(|store| store.is_metadata_initialized())
            .await?
        {
            false
        } else {
            let api_key = self.read_store(|store| store.provider_api_key()).await?;
            self.metadata.fire(api_key).await?;
            true
        };

        self.transition(StartupState::Ready);
        let report = ProvisionReport {
            categories: self.registry.ids().to_vec(),
            daemon_pid,
            metadata_ingested,
            started_at,
            duration_ms: clock.elapsed().as_millis(),
        };
        tracing::info!(
            categories = report.categories.len(),
            metadata_ingested,
            duration_ms = report.duration_ms as u64,
            "startup complete",
        );
        Ok(Some(report))
    }

    async fn rebuild_from_store(&mut self) -> Result<Vec<CategoryId>, StartupError> {
        let categories = self.read_store(|store| store.categories()).await?;
        self.provision_remotes(&categories).await?;
        Ok(self.registry.ids().to_vec())
    }

    async fn read_store<T, F>(&self, read: F) -> Result<T, StartupError>
    where
        F: FnOnce(&dyn ConfigStore) -> Result<T, ConfigError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let value = tokio::task::spawn_blocking(move || read(store.as_ref()))
            .await
            .map_err(|err| StartupError::Join(format!("config read: {err}")))??;
        Ok(value)
    }

    fn fail(&mut self, err: &StartupError) {
        self.registry.clear();
        self.transition(StartupState::Failed);
        tracing::error!(error = %err, "startup failed");
    }

    fn transition(&mut self, next: StartupState) {
        tracing::debug!(from = %self.state, to = %next, "startup state");
        self.state = next;
    }
}
