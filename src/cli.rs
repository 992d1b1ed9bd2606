//! Command-line interface parsing for vesselcast
//!
//! Subcommands select between running the engine against a JSON line stream
//! and printing the effective configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::config::{Config, ConfigError};

/// Error types for CLI startup
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The provider needs a key before the engine can run
    #[error("No API key configured. Set api-key in {0} or pass --api-key")]
    MissingApiKey(String),
}

/// Marine weather forecasts along a vessel's predicted track
#[derive(Parser, Debug)]
#[command(name = "vesselcast")]
#[command(about = "Marine weather forecasts along a vessel's predicted track")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the engine, reading host commands as JSON lines on stdin
    ///
    /// Examples:
    ///   {"position":{"latitude":49.28,"longitude":-123.12}}
    ///   {"heading":1.57}
    ///   {"sog":3.1}
    ///   {"engage":true}
    ///   {"query":{"type":"point","count":6}}
    Run {
        /// Override the configured API key
        #[arg(long, env = "VESSELCAST_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Engage moving forecasts from the start
        #[arg(long)]
        engage: bool,
    },
    /// Print the effective configuration as TOML
    PrintConfig,
}

/// Configuration derived from CLI arguments for startup
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub config: Config,
    pub engage: bool,
}

impl StartupConfig {
    /// Loads the config file and applies command-line overrides.
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` ready for the `run` subcommand
    /// * `Err(CliError)` if the config is invalid or no API key is available
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let mut config = Config::load(cli.config.as_deref())?;

        let engage = match &cli.command {
            Command::Run { api_key, engage } => {
                if let Some(key) = api_key {
                    config.api_key = key.clone();
                }
                if config.api_key.is_empty() {
                    let location = cli
                        .config
                        .clone()
                        .or_else(Config::default_path)
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "the config file".to_string());
                    return Err(CliError::MissingApiKey(location));
                }
                *engage
            }
            Command::PrintConfig => false,
        };

        Ok(Self { config, engage })
    }
}
