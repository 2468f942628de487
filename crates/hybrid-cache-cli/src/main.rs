mod cli;
mod commands;
mod observability;
mod output;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hybrid_cache::HybridCacheProvider;
use hybrid_cache::config::loader;

use cli::{Cli, Commands, LockCommands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    observability::init_tracing_with_level(&cli.log_level);

    let config = loader::load_config(cli.config.as_deref())
        .map_err(anyhow::Error::msg)
        .context("failed to load configuration")?;
    tracing::debug!(
        redis = config.redis.is_enabled(),
        instance_name = %config.instance_name,
        "configuration loaded"
    );

    if let Commands::Config = &cli.command {
        return commands::show_config(&config);
    }

    let cache = Arc::new(
        HybridCacheProvider::from_config(config)
            .await
            .context("failed to initialise cache")?,
    );

    match &cli.command {
        Commands::Get(args) => commands::get(&cache, &args.key).await?,
        Commands::Set(args) => commands::set(&cache, args).await?,
        Commands::Remove(args) => commands::remove(&cache, &args.key).await?,
        Commands::Exists(args) => commands::exists(&cache, &args.key).await?,
        Commands::Lock(args) => match &args.command {
            LockCommands::Hold(hold) => commands::hold_lock(&cache, hold).await?,
        },
        Commands::Stampede(args) => commands::stampede(Arc::clone(&cache), args).await?,
        Commands::Config => {}
    }

    Ok(())
}
