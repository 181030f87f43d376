use std::path::{Path, PathBuf};
use std::sync::Arc;

use dester_core::{ConfigStore, FileConfigStore, Settings};
use dester_daemon::ProcessController;

use crate::error::StartupError;
use crate::metadata::{MetadataSyncTrigger, TmdbIngestor};
use crate::sequencer::{StartupOutcome, StartupSequencer};

/// Validate settings, then run the service and block the current thread
/// until it exits. Missing document-store credentials abort before anything
/// else starts.
pub fn start_blocking(home: &Path) -> Result<(), StartupError> {
    init_tracing();
    let settings = Settings::load_at(home)?;
    settings.require_store_credentials()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(home.to_path_buf(), settings))
}

/// Cold-start the service, then hold the daemon until ctrl-c.
pub async fn run(home: PathBuf, settings: Settings) -> Result<(), StartupError> {
    let store: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::at(&home));
    let controller = ProcessController::for_host(&home, settings.daemon.clone());
    let ingestor = Arc::new(TmdbIngestor::new(
        Arc::clone(&store),
        settings.metadata.base_url.clone(),
    ));
    let mut sequencer =
        StartupSequencer::new(store, controller, MetadataSyncTrigger::new(ingestor));

    match sequencer.run().await {
        StartupOutcome::Ready(report) => {
            tracing::info!(
                categories = ?report.categories,
                pid = report.daemon_pid,
                "service ready",
            );
        }
        StartupOutcome::FirstRun => {
            tracing::info!(home = %home.display(), "no configuration yet; remote setup skipped");
        }
        StartupOutcome::Failed(err) => return Err(err),
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("received ctrl-c, shutting down");
    sequencer.shutdown().await
}

/// `RUST_LOG` filter (default `info`); `DESTER_LOG_JSON` switches to JSON lines.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var_os("DESTER_LOG_JSON").is_some() {
        let _ = fmt().json().with_env_filter(filter).try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}
