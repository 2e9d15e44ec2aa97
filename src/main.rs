//! Chagbot CLI entry point.

use anyhow::Context as _;
use chagbot::backend::BackendClient;
use chagbot::dispatch::Dispatcher;
use chagbot::media::{AttachmentStore, UploadCache};
use chagbot::messaging::{DiscordAdapter, Messaging};
use chagbot::supervisor::{RetryPolicy, Supervisor};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chagbot")]
#[command(about = "Discord bot relaying chat to a text-generation backend and serving random pictures")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the --debug flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting Chagbot...");

    let config = if let Some(config_path) = cli.config {
        chagbot::config::Config::load_from_path(&config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?
    } else {
        chagbot::config::Config::load()
            .with_context(|| "failed to load configuration from environment")?
    };
    config.ensure_dirs()?;

    tracing::info!(
        media_dir = %config.media.dir.display(),
        cache_path = %config.media.cache_path.display(),
        backend = %config.backend.base_url,
        "Configuration loaded"
    );

    let adapter = Arc::new(DiscordAdapter::new(config.discord.token.clone()));
    let backend = Arc::new(
        BackendClient::new(&config.backend).with_context(|| "failed to initialize backend client")?,
    );
    let cache = Arc::new(UploadCache::new(&config.media.cache_path));
    let dispatcher = Arc::new(
        Dispatcher::new(
            adapter.clone(),
            backend,
            AttachmentStore::new(&config.media.dir),
            cache,
        )
        .with_token_policy(config.dispatch.token_policy)
        .with_learning(config.backend.learn),
    );

    let supervisor = Supervisor::new(adapter.clone(), RetryPolicy::from_config(&config.retry));
    let connection = supervisor.state();

    tokio::select! {
        _ = supervisor.run(dispatcher) => {
            tracing::info!("Session ended");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(state = %*connection.borrow(), "Shutdown signal received");
        }
    }

    tracing::info!("Shutting down...");
    if let Err(error) = Messaging::shutdown(adapter.as_ref()).await {
        tracing::warn!(%error, "adapter shutdown failed");
    }

    tracing::info!("Chagbot stopped");
    Ok(())
}
