//! rclone daemon lifecycle: platform supervisors, the RC control transport,
//! and the per-category remote registry.

pub mod controller;
mod error;
pub mod paths;
pub mod platform;
pub mod rc;
pub mod remote;
pub mod supervisor;

pub use controller::{render_daemon_config, write_daemon_config, ProcessController};
pub use error::DaemonError;
pub use platform::PlatformFamily;
pub use rc::{HttpTransport, RcTransport};
pub use remote::{RemoteEntry, RemoteHandle, RemoteRegistry};
pub use supervisor::{system_supervisor, LaunchSpec, ProcessSupervisor};
