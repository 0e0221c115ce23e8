pub mod config;

use clap::{Parser, Subcommand};

/// colab-backend — a real-time workspace collaboration engine.
#[derive(Debug, Parser)]
#[command(name = "colab-backend", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `COLAB_CONFIG` (or
/// `config.toml` by default). Returns the parsed [`Config`] and the path
/// that was used; a missing file resolves to all-defaults.
pub fn load_config() -> anyhow::Result<(colab_domain::config::Config, String)> {
    let config_path = std::env::var("COLAB_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = read_config(&config_path)?;
    Ok((config, config_path))
}

/// Reads and parses the config file, surfacing the shared domain error
/// type; the gateway binary converts it to `anyhow` at its own boundary.
fn read_config(config_path: &str) -> colab_domain::Result<colab_domain::config::Config> {
    if !std::path::Path::new(config_path).exists() {
        return Ok(colab_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(config_path)?;
    toml::from_str(&raw).map_err(|e| colab_domain::Error::Config(e.to_string()))
}
