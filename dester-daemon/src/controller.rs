//! rclone daemon lifecycle: config file, kill-then-launch restart, readiness.
//!
//! `restart_daemon` runs, in order:
//!
//! 1. resolve the platform family (unsupported → error, nothing touched)
//! 2. resolve the rclone binary
//! 3. terminate whatever listens on the port, then wait until nothing does
//!    (`kill_timeout`)
//! 4. launch a detached `rclone rcd` (`launch_timeout`)
//! 5. poll `core/pid` until the launched pid answers (`ready_attempts`);
//!    on failure the port is cleared again
//!
//! Restarts must not overlap; callers serialize them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use dester_core::{CredentialBlock, DaemonSettings};

use crate::error::{io_err, DaemonError};
use crate::paths::{daemon_config_path, DAEMON_BINARY_NAME};
use crate::platform::PlatformFamily;
use crate::rc::{self, HttpTransport, RcTransport};
use crate::supervisor::{system_supervisor, LaunchSpec, ProcessSupervisor};

/// Per-request timeout for the production RC transport.
pub const RC_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between listener lookups while waiting for the port to free up.
pub const PORT_RELEASE_POLL: Duration = Duration::from_millis(100);

/// Config file content: every block preceded by a blank line.
pub fn render_daemon_config(blocks: &[CredentialBlock]) -> String {
    blocks
        .iter()
        .map(|block| format!("\n\n{}", block.as_str()))
        .collect()
}

/// Overwrite `path` with the rendered blocks.
///
/// Written to a `.tmp` sibling (mode 0600) and renamed into place.
pub fn write_daemon_config(path: &Path, blocks: &[CredentialBlock]) -> Result<(), DaemonError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = path.with_extension("conf.tmp");
    fs::write(&tmp, render_daemon_config(blocks)).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

pub struct ProcessController {
    home: PathBuf,
    settings: DaemonSettings,
    platform: String,
    /// `None` on hosts without a supervisor; only daemon control needs one.
    supervisor: Option<Arc<dyn ProcessSupervisor>>,
    transport: Arc<dyn RcTransport>,
}

impl ProcessController {
    pub fn new(
        home: impl Into<PathBuf>,
        settings: DaemonSettings,
        platform: impl Into<String>,
        supervisor: Arc<dyn ProcessSupervisor>,
        transport: Arc<dyn RcTransport>,
    ) -> Self {
        Self {
            home: home.into(),
            settings,
            platform: platform.into(),
            supervisor: Some(supervisor),
            transport,
        }
    }

    /// Controller for the running host. Never fails: an unsupported host
    /// only surfaces when the daemon is restarted or stopped.
    pub fn for_host(home: impl Into<PathBuf>, settings: DaemonSettings) -> Self {
        Self::for_platform(home, settings, PlatformFamily::current_identifier())
    }

    /// Production supervisor and HTTP transport for `platform`.
    pub fn for_platform(
        home: impl Into<PathBuf>,
        settings: DaemonSettings,
        platform: impl Into<String>,
    ) -> Self {
        let platform = platform.into();
        let supervisor = PlatformFamily::from_identifier(&platform)
            .ok()
            .map(system_supervisor);
        let transport = Arc::new(HttpTransport::new(settings.listen_port, RC_REQUEST_TIMEOUT));
        Self {
            home: home.into(),
            settings,
            platform,
            supervisor,
            transport,
        }
    }

    pub fn port(&self) -> u16 {
        self.settings.listen_port
    }

    pub fn config_path(&self) -> PathBuf {
        daemon_config_path(&self.home)
    }

    /// The transport remote handles should share.
    pub fn transport(&self) -> Arc<dyn RcTransport> {
        Arc::clone(&self.transport)
    }

    pub fn write_daemon_config(&self, blocks: &[CredentialBlock]) -> Result<PathBuf, DaemonError> {
        let path = self.config_path();
        write_daemon_config(&path, blocks)?;
        tracing::debug!(path = %path.display(), blocks = blocks.len(), "wrote daemon config");
        Ok(path)
    }

    /// Kill any listener on the port, launch a fresh daemon, wait until it
    /// answers. Returns the new daemon's pid.
    pub async fn restart_daemon(&self) -> Result<u32, DaemonError> {
        let started = Instant::now();
        let (family, supervisor) = self.supervisor()?;
        let binary = self.resolve_binary()?;
        let port = self.port();

        let killed = self.clear_port(Arc::clone(&supervisor)).await?;
        tracing::debug!(%family, port, killed = ?killed, "cleared daemon port");

        let spec = LaunchSpec {
            binary,
            port,
            config_path: self.config_path(),
        };
        let launcher = Arc::clone(&supervisor);
        let pid = blocking_step("launch", self.settings.launch_timeout(), move || {
            launcher.launch(&spec)
        })
        .await?;
        tracing::info!(pid, port, "launched rclone daemon");

        let transport = Arc::clone(&self.transport);
        let attempts = self.settings.ready_attempts;
        let interval = self.settings.ready_interval();
        let ready = tokio::task::spawn_blocking(move || {
            rc::wait_until_ready(transport.as_ref(), pid, attempts, interval)
        })
        .await
        .map_err(|err| DaemonError::Join(format!("readiness probe: {err}")))
        .and_then(|result| result);

        let answered_on = match ready {
            Ok(attempt) => attempt,
            Err(err) => {
                tracing::warn!(pid, port, error = %err, "daemon not ready; clearing port");
                if let Err(cleanup) = self.clear_port(supervisor).await {
                    tracing::warn!(port, error = %cleanup, "could not clear port after failed launch");
                }
                return Err(err);
            }
        };

        tracing::info!(
            pid,
            port,
            attempt = answered_on,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rclone daemon ready",
        );
        Ok(pid)
    }

    /// Best-effort kill of the port listener, then wait for the port to free up.
    pub async fn stop_daemon(&self) -> Result<Vec<u32>, DaemonError> {
        let (_, supervisor) = self.supervisor()?;
        self.clear_port(supervisor).await
    }

    fn supervisor(&self) -> Result<(PlatformFamily, Arc<dyn ProcessSupervisor>), DaemonError> {
        let family = PlatformFamily::from_identifier(&self.platform)?;
        match &self.supervisor {
            Some(supervisor) => Ok((family, Arc::clone(supervisor))),
            None => Err(DaemonError::UnsupportedPlatform(self.platform.clone())),
        }
    }

    /// Terminate the listener and poll until the port has no listener left,
    /// all within `kill_timeout`.
    async fn clear_port(&self, supervisor: Arc<dyn ProcessSupervisor>) -> Result<Vec<u32>, DaemonError> {
        let port = self.port();
        let limit = self.settings.kill_timeout();
        blocking_step("terminate", limit, move || {
            let deadline = Instant::now() + limit;
            let killed = supervisor.terminate_listener(port);
            loop {
                let remaining = supervisor.listener_pids(port);
                if remaining.is_empty() {
                    return Ok(killed);
                }
                if Instant::now() + PORT_RELEASE_POLL >= deadline {
                    return Err(DaemonError::PortBusy {
                        port,
                        pids: remaining,
                    });
                }
                sleep(PORT_RELEASE_POLL);
            }
        })
        .await
    }

    /// `core/version` from the running daemon.
    pub async fn probe(&self) -> Result<Value, DaemonError> {
        let transport = Arc::clone(&self.transport);
        tokio::task::spawn_blocking(move || transport.call(rc::VERSION, json!({})))
            .await
            .map_err(|err| DaemonError::Join(format!("probe: {err}")))?
    }

    fn resolve_binary(&self) -> Result<PathBuf, DaemonError> {
        match &self.settings.binary {
            Some(binary) => Ok(binary.clone()),
            None => which::which(DAEMON_BINARY_NAME)
                .map_err(|err| DaemonError::BinaryNotFound(format!("{DAEMON_BINARY_NAME}: {err}"))),
        }
    }
}

async fn blocking_step<T, F>(step: &'static str, limit: Duration, work: F) -> Result<T, DaemonError>
where
    F: FnOnce() -> Result<T, DaemonError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(DaemonError::Join(format!("{step}: {join}"))),
        Err(_) => Err(DaemonError::Timeout { step, after: limit }),
    }
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn blocks(raw: &[&str]) -> Vec<CredentialBlock> {
        raw.iter().map(|b| CredentialBlock::from(*b)).collect()
    }

    #[test]
    fn render_prefixes_every_block_with_blank_line() {
        assert_eq!(
            render_daemon_config(&blocks(&["A", "B", "C"])),
            "\n\nA\n\nB\n\nC"
        );
        assert_eq!(render_daemon_config(&[]), "");
    }

    #[test]
    fn write_is_byte_exact_and_overwrites() {
        let home = TempDir::new().expect("home");
        let path = daemon_config_path(home.path());

        write_daemon_config(&path, &blocks(&["stale"])).expect("first write");
        write_daemon_config(&path, &blocks(&["A", "B", "C"])).expect("second write");

        assert_eq!(fs::read(&path).expect("read"), b"\n\nA\n\nB\n\nC");
        assert!(!path.with_extension("conf.tmp").exists());
    }

    #[test]
    fn malformed_blocks_pass_through_verbatim() {
        let home = TempDir::new().expect("home");
        let path = daemon_config_path(home.path());
        let raw = "[broken\ntype = = drive\n\u{1F4FC}";
        write_daemon_config(&path, &blocks(&[raw])).expect("write");
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            format!("\n\n{raw}")
        );
    }

    #[cfg(unix)]
    #[test]
    fn config_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let home = TempDir::new().expect("home");
        let path = daemon_config_path(home.path());
        write_daemon_config(&path, &blocks(&["[gdrive]\ntoken = x"])).expect("write");
        let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[tokio::test]
    async fn blocking_step_times_out() {
        let err = blocking_step("launch", Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DaemonError::Timeout { step: "launch", .. }));
    }
}
