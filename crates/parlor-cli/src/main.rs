use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use parlor_cli::commands::{listen, simulate, status, watch};
use parlor_cli::{Cli, Commands, Config};

/// Load and validate config before any engine is built.
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // stdout carries the slot table, so logs go to stderr
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let Some(command) = cli.command else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = load_config(cli.config.as_deref())?;
    match command {
        Commands::Status { json } => {
            status::run(&mut io::stdout().lock(), &config, json, Utc::now())?;
        }
        Commands::Watch {
            source,
            ticks,
            json,
        } => watch::run(&config, source, ticks, json).await?,
        Commands::Listen {
            address,
            ticks,
            json,
        } => listen::run(&config, address, ticks, json).await?,
        Commands::Simulate { seed, ticks, json } => {
            simulate::run(&config, seed, ticks, json).await?;
        }
    }

    Ok(())
}
