//! `dester daemon`: rclone daemon control outside the startup sequence.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::json;

use dester_core::{store, Settings};
use dester_daemon::{paths::rc_base_url, DaemonError, ProcessController};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Rewrite the daemon config from stored credentials and relaunch it.
    Restart,
    /// Kill whatever listens on the daemon port.
    Stop,
    /// Ask the daemon for its version over the remote-control API.
    Status(DaemonStatusArgs),
}

#[derive(Args, Debug)]
pub struct DaemonStatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    let settings = Settings::load_at(&home).context("failed to load settings")?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    runtime.block_on(dispatch(&home, settings, command))
}

async fn dispatch(home: &Path, settings: Settings, command: DaemonCommand) -> Result<()> {
    let port = settings.daemon.listen_port;
    let controller = ProcessController::for_host(home, settings.daemon);

    match command {
        DaemonCommand::Restart => {
            let config = store::load_at(home).context("failed to load configuration")?;
            let path = controller
                .write_daemon_config(&config.remote_credentials)
                .context("failed to write daemon config")?;
            let pid = controller
                .restart_daemon()
                .await
                .context("failed to restart daemon")?;
            println!(
                "{} rclone daemon running (pid {pid}, port {port}, config {})",
                "✓".green(),
                path.display()
            );
        }
        DaemonCommand::Stop => {
            let killed = controller
                .stop_daemon()
                .await
                .context("failed to stop daemon")?;
            if killed.is_empty() {
                println!("nothing listening on port {port}");
            } else {
                let pids: Vec<String> = killed.iter().map(u32::to_string).collect();
                println!("stopped pid(s) {} on port {port}", pids.join(", "));
            }
        }
        DaemonCommand::Status(args) => {
            let url = rc_base_url(port);
            let payload = match controller.probe().await {
                Ok(version) => json!({
                    "running": true,
                    "url": url,
                    "version": version.get("version").cloned().unwrap_or_default(),
                }),
                Err(DaemonError::Unreachable { .. }) => json!({
                    "running": false,
                    "url": url,
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };

            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render daemon status JSON")?
                );
            } else if payload["running"] == json!(true) {
                println!(
                    "{} rclone {} at {url}",
                    "running".green().bold(),
                    payload["version"].as_str().unwrap_or("unknown"),
                );
            } else {
                println!("{} (nothing answering at {url})", "stopped".red().bold());
            }
        }
    }

    Ok(())
}
