//! Per-platform process supervision for the rclone daemon.
//!
//! Termination is best effort: a missing lookup tool, a port nobody listens
//! on, and a failed kill all end the same way (logged, nothing returned).

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::error::DaemonError;
use crate::paths::rc_address;
use crate::platform::PlatformFamily;

/// Everything needed to start one daemon instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub binary: PathBuf,
    pub port: u16,
    pub config_path: PathBuf,
}

impl LaunchSpec {
    /// `rcd` with remote control on `localhost:<port>`, no auth.
    pub fn args(&self) -> Vec<String> {
        vec![
            "rcd".to_string(),
            "--rc-no-auth".to_string(),
            "--rc-addr".to_string(),
            rc_address(self.port),
            "--config".to_string(),
            self.config_path.display().to_string(),
        ]
    }
}

/// Capability to find-and-kill the process on a port and to start the daemon.
pub trait ProcessSupervisor: Send + Sync {
    fn family(&self) -> PlatformFamily;

    /// Pids currently listening on `port`. A failed lookup reads as none.
    fn listener_pids(&self, port: u16) -> Vec<u32>;

    /// Kill whatever listens on `port`. Returns the pids a kill was sent to.
    fn terminate_listener(&self, port: u16) -> Vec<u32>;

    /// Start the daemon detached from this process. Returns its pid.
    fn launch(&self, spec: &LaunchSpec) -> Result<u32, DaemonError>;
}

/// Supervisor for the given family.
pub fn system_supervisor(family: PlatformFamily) -> Arc<dyn ProcessSupervisor> {
    match family {
        PlatformFamily::Windows => Arc::new(WindowsSupervisor),
        PlatformFamily::Linux => Arc::new(LinuxSupervisor),
        PlatformFamily::MacOs => Arc::new(MacOsSupervisor),
    }
}

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct WindowsSupervisor;

impl ProcessSupervisor for WindowsSupervisor {
    fn family(&self) -> PlatformFamily {
        PlatformFamily::Windows
    }

    fn listener_pids(&self, port: u16) -> Vec<u32> {
        let lookup = format!(
            "Get-NetTCPConnection -LocalPort {port} -State Listen -ErrorAction SilentlyContinue \
             | Select-Object -ExpandProperty OwningProcess"
        );
        run_lookup("powershell.exe", &["-NoProfile", "-Command", &lookup])
    }

    fn terminate_listener(&self, port: u16) -> Vec<u32> {
        kill_each(self.listener_pids(port), |pid| {
            let stop = format!("Stop-Process -Id {pid} -Force");
            run_quiet("powershell.exe", &["-NoProfile", "-Command", &stop])
        })
    }

    fn launch(&self, spec: &LaunchSpec) -> Result<u32, DaemonError> {
        spawn_detached(spec)
    }
}

// ---------------------------------------------------------------------------
// Linux / macOS
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct LinuxSupervisor;

impl ProcessSupervisor for LinuxSupervisor {
    fn family(&self) -> PlatformFamily {
        PlatformFamily::Linux
    }

    fn listener_pids(&self, port: u16) -> Vec<u32> {
        lsof_listeners(port)
    }

    fn terminate_listener(&self, port: u16) -> Vec<u32> {
        kill_each(lsof_listeners(port), |pid| {
            run_quiet("kill", &["-9", &pid.to_string()])
        })
    }

    fn launch(&self, spec: &LaunchSpec) -> Result<u32, DaemonError> {
        spawn_detached(spec)
    }
}

#[derive(Debug, Default)]
pub struct MacOsSupervisor;

impl ProcessSupervisor for MacOsSupervisor {
    fn family(&self) -> PlatformFamily {
        PlatformFamily::MacOs
    }

    fn listener_pids(&self, port: u16) -> Vec<u32> {
        lsof_listeners(port)
    }

    fn terminate_listener(&self, port: u16) -> Vec<u32> {
        kill_each(lsof_listeners(port), |pid| {
            run_quiet("kill", &["-9", &pid.to_string()])
        })
    }

    fn launch(&self, spec: &LaunchSpec) -> Result<u32, DaemonError> {
        spawn_detached(spec)
    }
}

fn lsof_listeners(port: u16) -> Vec<u32> {
    let filter = format!("-iTCP:{port}");
    run_lookup("lsof", &["-t", &filter, "-sTCP:LISTEN"])
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Run a lookup command and parse one pid per output line.
/// Any failure reads as "no listener".
fn run_lookup(program: &str, args: &[&str]) -> Vec<u32> {
    match Command::new(program).args(args).stdin(Stdio::null()).output() {
        Ok(output) => parse_pids(&String::from_utf8_lossy(&output.stdout)),
        Err(err) => {
            tracing::warn!(program, error = %err, "listener lookup unavailable, assuming no listener");
            Vec::new()
        }
    }
}

fn kill_each(pids: Vec<u32>, kill: impl Fn(u32) -> bool) -> Vec<u32> {
    let own = std::process::id();
    let mut killed = Vec::new();
    for pid in pids {
        if pid == own {
            continue;
        }
        if kill(pid) {
            tracing::info!(pid, "terminated previous daemon process");
            killed.push(pid);
        } else {
            tracing::warn!(pid, "kill failed");
        }
    }
    killed
}

fn run_quiet(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

pub(crate) fn parse_pids(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .filter(|pid| *pid != 0)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Spawn the daemon with null stdio in its own process group. A reaper
/// thread waits on the child so an early exit does not leave a zombie.
fn spawn_detached(spec: &LaunchSpec) -> Result<u32, DaemonError> {
    let mut command = Command::new(&spec.binary);
    command
        .args(spec.args())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    detach(&mut command);

    let mut child = command.spawn().map_err(|source| DaemonError::Launch {
        binary: spec.binary.clone(),
        source,
    })?;
    let pid = child.id();
    std::thread::spawn(move || match child.wait() {
        Ok(status) => tracing::debug!(pid, %status, "daemon process exited"),
        Err(err) => tracing::debug!(pid, error = %err, "daemon wait failed"),
    });
    Ok(pid)
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}
