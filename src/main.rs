use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pinglimit::config::{LogFormat, LoggingConfig, PinglimitConfig};
use pinglimit::http::{AppState, HttpServer};
use pinglimit::ratelimit::{spawn_eviction_task, ClientOverrides, RateLimiter};

#[derive(Parser)]
#[command(name = "pinglimit", version, about = "Per-client token bucket rate limiting service")]
struct Cli {
    /// Path to a configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log output format override
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = PinglimitConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.http_addr = listen;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    init_tracing(&config.logging)?;

    info!("Starting Pinglimit Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let overrides = match &config.rate_limiting.overrides_path {
        Some(path) => ClientOverrides::from_file(path)?,
        None => ClientOverrides::new(),
    };

    // Initialize the rate limiter
    let limits = config.rate_limiting.limits()?;
    let rate_limiter = Arc::new(RateLimiter::with_overrides(limits, overrides));
    info!(
        capacity = limits.capacity,
        refill_rate_per_second = limits.refill_rate_per_second,
        policy = ?config.http.missing_client_id,
        "Rate limiter initialized"
    );

    let eviction = spawn_eviction_task(
        rate_limiter.clone(),
        config.rate_limiting.eviction_interval(),
        config.rate_limiting.eviction_grace_period(),
    );

    let state = AppState::new(rate_limiter.clone(), &config.http)?;
    let server = HttpServer::bind(config.server.http_addr, state).await?;

    info!("Starting HTTP server on {}", server.local_addr()?);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    eviction.abort();
    info!(
        buckets = rate_limiter.bucket_count(),
        "Pinglimit Rate Limiting Service stopped"
    );
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
