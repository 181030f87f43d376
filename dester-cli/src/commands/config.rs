//! `dester config`: read-only view of the stored library configuration.
//!
//! Credential blocks and the provider key are never printed, only counted or
//! flagged as present.

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use dester_core::{store, Configuration};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show initialization flags and categories.
    Show(ConfigShowArgs),
}

#[derive(Args, Debug)]
pub struct ConfigShowArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    match command {
        ConfigCommand::Show(args) => {
            let config = store::load_at(&home).context("failed to load configuration")?;
            let path = store::config_path_at(&home);
            if args.json {
                print_json(&config)
            } else {
                print_summary(&config, &path.display().to_string());
                Ok(())
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigSummaryJson {
    is_config_initialized: bool,
    is_metadata_initialized: bool,
    remote_credential_blocks: usize,
    provider_api_key_set: bool,
    updated_at: Option<String>,
    categories: Vec<CategoryJson>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CategoryJson {
    identifier: String,
    display_name: String,
    targets: Vec<String>,
}

#[derive(Tabled)]
struct CategoryRow {
    #[tabled(rename = "id")]
    identifier: String,
    #[tabled(rename = "name")]
    display_name: String,
    #[tabled(rename = "remotes")]
    targets: String,
}

fn api_key_set(config: &Configuration) -> bool {
    config
        .provider_api_key
        .as_ref()
        .is_some_and(|key| !key.expose().trim().is_empty())
}

fn print_json(config: &Configuration) -> Result<()> {
    let payload = ConfigSummaryJson {
        is_config_initialized: config.is_config_initialized,
        is_metadata_initialized: config.is_metadata_initialized,
        remote_credential_blocks: config.remote_credentials.len(),
        provider_api_key_set: api_key_set(config),
        updated_at: config
            .updated_at
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        categories: config
            .categories
            .iter()
            .map(|category| CategoryJson {
                identifier: category.identifier.to_string(),
                display_name: category.display_name.clone(),
                targets: category.targets(),
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize config JSON")?
    );
    Ok(())
}

fn flag(value: bool) -> String {
    if value {
        "yes".green().to_string()
    } else {
        "no".yellow().to_string()
    }
}

fn print_summary(config: &Configuration, path: &str) {
    println!("Dester v{} | {}", env!("CARGO_PKG_VERSION"), path.bright_black());

    if !config.is_config_initialized {
        println!(
            "{} configuration not initialized; finish first-run setup before starting",
            "!".yellow().bold()
        );
    }
    println!("config initialized:    {}", flag(config.is_config_initialized));
    println!("metadata initialized:  {}", flag(config.is_metadata_initialized));
    println!("credential blocks:     {}", config.remote_credentials.len());
    println!("provider api key:      {}", flag(api_key_set(config)));
    if let Some(at) = config.updated_at {
        println!("updated:               {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    if config.categories.is_empty() {
        println!("No categories configured.");
        return;
    }

    let rows: Vec<CategoryRow> = config
        .categories
        .iter()
        .map(|category| CategoryRow {
            identifier: category.identifier.to_string(),
            display_name: category.display_name.clone(),
            targets: category.targets().join(", "),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
