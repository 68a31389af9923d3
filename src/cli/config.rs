use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::config::{Config, DEFAULT_CONFIG_TEMPLATE};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show {
        /// Output format: toml (default) or json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Get a configuration value
    Get {
        /// Config key (e.g., lock.wait_timeout)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Config key (e.g., lock.wait_timeout)
        key: String,

        /// Value to set
        value: String,
    },

    /// Show config file path
    Path,

    /// Initialize default config file
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn run(args: ConfigArgs, config_override: Option<&str>) -> Result<()> {
    match args.command {
        ConfigCommands::Show { format } => show_config(config_override, &format),
        ConfigCommands::Get { key } => get_config(config_override, &key),
        ConfigCommands::Set { key, value } => set_config(config_override, &key, &value),
        ConfigCommands::Path => show_path(config_override),
        ConfigCommands::Init { force } => init_config(config_override, force),
    }
}

fn show_config(config_override: Option<&str>, format: &str) -> Result<()> {
    let config = Config::load_with_override(config_override)?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        "toml" => {
            let toml = toml::to_string_pretty(&config)?;
            println!("{}", toml);
        }
        other => anyhow::bail!("Unknown format '{}': expected toml or json", other),
    }

    Ok(())
}

fn get_config(config_override: Option<&str>, key: &str) -> Result<()> {
    let config = Config::load_with_override(config_override)?;
    let value = config.get_value(key)?;
    println!("{}", value);
    Ok(())
}

fn set_config(config_override: Option<&str>, key: &str, value: &str) -> Result<()> {
    let mut config = Config::load_with_override(config_override)?;
    config.set_value(key, value)?;
    if config.source.is_none() {
        config.source = Some(config_file(config_override)?);
    }
    config.save()?;
    println!("Set {} = {}", key, value);
    Ok(())
}

fn show_path(config_override: Option<&str>) -> Result<()> {
    println!("{}", config_file(config_override)?.display());
    Ok(())
}

fn init_config(config_override: Option<&str>, force: bool) -> Result<()> {
    let path = config_file(config_override)?;

    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;

    println!("Created config file at {}", path.display());
    Ok(())
}

/// The file `--config`/`HOSTLOCK_CONFIG` points at, else the default location.
fn config_file(config_override: Option<&str>) -> Result<PathBuf> {
    match config_override {
        Some(p) => Ok(PathBuf::from(shellexpand::tilde(p).to_string())),
        None => Config::config_path(),
    }
}
