//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ens_domain::config::{Config, ConfigSeverity};
use ens_domain::error::Result;

#[derive(Parser)]
#[command(name = "ensemble", about = "Agent orchestration and coordination core")]
pub struct Cli {
    /// Path to config.json (defaults to the config-home lookup).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the gateway (the default).
    Serve,
    /// Inspect or validate configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Check the config file and report issues.
    Validate,
    /// Print the effective config (secrets interpolated, so mind where
    /// you pipe it).
    Show,
}

/// Load the config from the CLI-specified or default path.
pub fn load_config(cli_path: &Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = cli_path.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&path)?;
    Ok((config, path))
}

/// Print validation results; returns false when errors were found.
pub fn validate(config: &Config, path: &std::path::Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: ok", path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}

/// Pretty-print the effective config.
pub fn show(config: &Config) {
    match serde_json::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
