//! netveil binary: serve the redaction gateway or validate its configuration.
//!
//! Configuration precedence: env vars > `./netveil.toml` (or
//! `$NETVEIL_CONFIG_PATH`) > defaults.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use netveil::admission::{AdmissionPolicy, Gateway, RateLimiter};
use netveil::config::{GatewayConfig, MappingBackend, CONFIG_PATH_ENV};
use netveil::logging::{self, LoggingGuard};
use netveil::maintenance::run_maintenance;
use netveil::server::{self, AppState};
use netveil::store::{InMemoryMappingStore, MappingStore, RedisMappingStore};

/// netveil CLI.
#[derive(Parser)]
#[command(name = "netveil", version, about)]
struct Cli {
    /// Config file path (overrides `$NETVEIL_CONFIG_PATH`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway.
    Serve,
    /// Load and validate configuration, then print a summary.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::CheckConfig => check_config(&config),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<GatewayConfig> {
    let path = path.map(|p| p.to_string_lossy().into_owned());
    GatewayConfig::load_with(|key| {
        if key == CONFIG_PATH_ENV {
            if let Some(p) = &path {
                return Some(p.clone());
            }
        }
        std::env::var(key).ok()
    })
    .context("failed to load configuration")
}

fn check_config(config: &GatewayConfig) -> Result<()> {
    logging::init_cli(&config.logging.level)?;
    config.validate().context("configuration is invalid")?;
    config
        .deterministic_key()
        .context("deterministic secret rejected")?;
    println!("{}", config.summary());
    println!("configuration OK");
    Ok(())
}

fn init_logging(config: &GatewayConfig) -> Result<Option<LoggingGuard>> {
    match &config.logging.directory {
        Some(dir) => Ok(Some(logging::init_production(dir, &config.logging.level)?)),
        None => {
            logging::init_cli(&config.logging.level)?;
            Ok(None)
        }
    }
}

async fn build_store(config: &GatewayConfig) -> Result<Arc<dyn MappingStore>> {
    match config.mapping.backend {
        MappingBackend::Memory => Ok(Arc::new(InMemoryMappingStore::new())),
        MappingBackend::Redis => {
            let url = config
                .mapping
                .redis_url
                .as_deref()
                .context("mapping.redis_url is not set")?;
            let store = RedisMappingStore::connect(url, config.mapping.redis_namespace.clone())
                .await
                .context("failed to connect to redis")?;
            Ok(Arc::new(store))
        }
    }
}

async fn serve(config: GatewayConfig) -> Result<()> {
    let _guard = init_logging(&config)?;
    config.validate().context("configuration is invalid")?;

    info!(version = env!("CARGO_PKG_VERSION"), "netveil starting");

    let key = config.deterministic_key()?.map(Arc::new);
    if key.is_none() {
        warn!("deterministic mode disabled, only random mode will be served");
    }

    let store = build_store(&config).await?;
    info!(backend = store.backend(), "mapping store ready");

    let limiter = Arc::new(RateLimiter::new(
        config.limits.rate_limit_requests,
        Duration::from_secs(config.limits.rate_limit_window_secs),
    ));
    let gateway = Arc::new(
        Gateway::new(
            Arc::clone(&store),
            Arc::clone(&limiter),
            key,
            AdmissionPolicy::from_config(&config),
        )
        .context("failed to build gateway")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = tokio::spawn(run_maintenance(
        Arc::clone(&store),
        Arc::clone(&limiter),
        Duration::from_secs(config.mapping.cleanup_interval_secs),
        shutdown_rx,
    ));

    let state = AppState::new(gateway);
    let listener = tokio::net::TcpListener::bind(config.bind_addr()?)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;

    let shutdown_state = state.clone();
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("received shutdown signal, draining");
        shutdown_state.mark_unready();
        let _ = shutdown_tx.send(true);
    };

    server::serve(listener, state, shutdown).await?;

    if let Err(e) = maintenance.await {
        warn!(error = %e, "maintenance task ended abnormally");
    }
    info!("netveil stopped");
    Ok(())
}
