//! Echoes - anonymous micro-posting board
//!
#![doc = "Main entry point for the echoes command-line client."]

use std::path::Path;

use anyhow::Result;

use echoes::cli::{Cli, Commands, DEFAULT_CONFIG_PATH};
use echoes::commands;
use echoes::config::Config;
use echoes::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let config_path = cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
    let config = Config::load(config_path, &cli)?;

    init_logging(&config.logging)?;
    if !Path::new(config_path).exists() {
        tracing::warn!("Config file not found at {}, using defaults", config_path);
    }
    config.validate()?;
    tracing::debug!(
        backend = %config.store.backend,
        collection = %config.collection(),
        "Configuration loaded"
    );

    match cli.command {
        Commands::Post { category, text } => {
            tracing::info!("Posting to the feed");
            commands::post::run_post(config, text, category).await?;
            Ok(())
        }
        Commands::Like { post_id } => {
            tracing::info!(post_id = %post_id, "Liking post");
            commands::like::run_like(config, post_id).await?;
            Ok(())
        }
        Commands::Feed { follow, json } => {
            tracing::info!("Showing feed");
            if follow {
                tracing::debug!("Following live updates");
            }
            commands::feed::run_feed(config, follow, json).await?;
            Ok(())
        }
    }
}
