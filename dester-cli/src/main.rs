//! Dester: media-library service launcher.
//!
//! # Usage
//!
//! ```text
//! dester start
//! dester daemon restart|stop
//! dester daemon status [--json]
//! dester config show [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config::ConfigCommand, daemon::DaemonCommand};

#[derive(Parser, Debug)]
#[command(
    name = "dester",
    version,
    about = "Start the Dester media service and manage its rclone daemon",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cold-start the service: provision remotes, ingest metadata, wait for ctrl-c.
    Start,

    /// Control the rclone remote-control daemon directly.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Inspect the stored library configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Start => commands::start::run(),
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Config { command } => commands::config::run(command),
    }
}
