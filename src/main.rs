//! vodhub - storage maintenance tool
//!
//! Builds the storage façade from configuration and runs one maintenance
//! command against it.

use vodhub::core::{self, CliArgs, Command};
use vodhub::{ConnectionRegistry, DbManager};

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration (handles CLI args, env vars, and config file)
    let config = match core::Config::load_with(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting vodhub v{}", vodhub::VERSION);
    info!(
        backend = config.storage.backend.as_str(),
        password_hashing = %config.security.password_hashing,
        "Storage configuration"
    );

    let registry = ConnectionRegistry::new();
    let db = DbManager::new(&config, &registry)?;

    match args.command.unwrap_or(Command::Ping) {
        Command::Ping => {
            if db.is_stats_supported() {
                db.ping().await?;
            }
            println!("backend: {}", db.backend_label());
            println!("statistics: {}", db.is_stats_supported());
            println!("bulk clear: {}", db.supports_bulk_clear());
        }
        Command::Users => {
            for user in db.get_all_users().await? {
                println!("{}", user);
            }
        }
        Command::Stats => {
            let stats = db.get_play_stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::ContentStats { limit } => {
            let stats = db.get_content_stats(limit).await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::ClearCache { prefix } => {
            let removed = db.clear_expired_cache(prefix.as_deref()).await?;
            info!(removed, "Cache cleared");
            println!("removed {} cache entries", removed);
        }
        Command::ClearAll { yes } => {
            if !yes {
                bail!("refusing to clear all data without --yes");
            }
            db.clear_all_data().await?;
            info!("All user data cleared");
        }
    }

    Ok(())
}
