//! Greenlight Server - Main entry point.
//!
//! This binary starts the Greenlight events API with:
//! - Structured JSON logging
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//! - Background eviction of idle rate limiter clients
//!
//! # Configuration
//!
//! See [`greenlight_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! # Development defaults (port 4000, 2 rps, burst 4)
//! cargo run --bin greenlight-server
//!
//! # Production
//! GREENLIGHT_ENV=production \
//! GREENLIGHT_LIMITER_RPS=5 \
//! GREENLIGHT_LIMITER_BURST=10 \
//! PORT=8080 \
//! cargo run --release --bin greenlight-server
//! ```

use std::net::SocketAddr;
use std::process::ExitCode;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use greenlight_server::config::Config;
use greenlight_server::routes::{create_router, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                               - HTTP server port (default: 4000)");
            eprintln!("  GREENLIGHT_ENV                     - development|staging|production");
            eprintln!("  GREENLIGHT_LIMITER_RPS             - Token refill rate (default: 2)");
            eprintln!("  GREENLIGHT_LIMITER_BURST           - Bucket capacity (default: 4)");
            eprintln!("  GREENLIGHT_LIMITER_ENABLED         - true|false (default: true)");
            eprintln!("  GREENLIGHT_LIMITER_SWEEP_INTERVAL_SECS - Sweep period (default: 60)");
            eprintln!("  GREENLIGHT_LIMITER_IDLE_SECS       - Idle eviction threshold (default: 180)");
            eprintln!("  GREENLIGHT_CORS_TRUSTED_ORIGINS    - Space or comma separated origins");
            eprintln!("  RUST_LOG                           - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => {
            info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = format!("{err:#}"), "Server error");
            ExitCode::from(1)
        }
    }
}

/// Serves the API until a shutdown signal arrives.
async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        port = config.port,
        env = %config.env,
        limiter_enabled = config.limiter.enabled,
        rps = config.limiter.rps,
        burst = config.limiter.burst,
        "Greenlight server starting"
    );

    let state = AppState::new(config.clone());

    let sweeper = state
        .registry
        .spawn_sweeper(config.limiter.sweep_interval, config.limiter.idle_threshold);
    info!(
        interval_secs = config.limiter.sweep_interval.as_secs(),
        idle_secs = config.limiter.idle_threshold.as_secs(),
        "Rate limiter sweeper started"
    );

    let app = create_router(state);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    info!(port = config.port, address = %bind_addr, "Server listening");

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server terminated unexpectedly");

    info!("Server shutting down gracefully");
    sweeper.abort();
    info!("Rate limiter sweeper stopped");

    result
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` with a default of `info` and request
/// traces from `tower_http` at debug.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGINT or SIGTERM is received.
///
/// If a handler cannot be installed the failure is logged and that signal
/// is ignored.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
