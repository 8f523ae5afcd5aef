//! Channel relay server binary.
//!
//! Reads configuration from flags, environment variables and an optional
//! `.env` file, installs logging, and runs the relay until interrupted.
//!
//! # Environment
//!
//! | Variable | Flag | Default |
//! |----------|------|---------|
//! | `APP_KEY` | `--secret` | required |
//! | `PORT` | `--port` | 8080 |
//! | `RELAY_BIND` | `--bind` | `0.0.0.0:$PORT` |
//! | `RELAY_TRANSPORT` | `--transport` | `websocket` |
//! | `RELAY_AUTH_MODE` | `--auth-mode` | `handshake` |
//! | `VERBOSE_LEVEL` | `--log-level` | `info` (or `RUST_LOG`) |
//! | `LOG_FILE` | `--log-file` | none |
//! | `STORAGE_DIR` | `--storage-dir` | current directory |

// ============================================================================
// Imports
// ============================================================================

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use channel_relay::config::{
    DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PORT, DEFAULT_WRITE_TIMEOUT,
};
use channel_relay::registry::DEFAULT_OUTBOX_CAPACITY;
use channel_relay::{AuthMode, Relay, RelayConfig, TransportKind};

// ============================================================================
// Args
// ============================================================================

/// Channel-filtered WebSocket/TCP message relay.
#[derive(Debug, Parser)]
#[command(name = "channel-relay", version, about)]
struct Args {
    /// Shared secret clients must present.
    #[arg(long, env = "APP_KEY", hide_env_values = true)]
    secret: String,

    /// Listen port, used when --bind is not given.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Full listen address, overriding --port.
    #[arg(long, env = "RELAY_BIND")]
    bind: Option<SocketAddr>,

    /// Socket framing: websocket or tcp.
    #[arg(long, env = "RELAY_TRANSPORT", default_value = "websocket")]
    transport: TransportKind,

    /// Authentication mode: handshake or per-message.
    #[arg(long, env = "RELAY_AUTH_MODE", default_value = "handshake")]
    auth_mode: AuthMode,

    /// Deliveries in flight per broadcast.
    #[arg(long, env = "RELAY_MAX_CONCURRENCY", default_value_t = DEFAULT_MAX_CONCURRENCY)]
    max_concurrency: usize,

    /// Per-peer write deadline in milliseconds.
    #[arg(
        long,
        env = "RELAY_WRITE_TIMEOUT_MS",
        default_value_t = DEFAULT_WRITE_TIMEOUT.as_millis() as u64
    )]
    write_timeout_ms: u64,

    /// Delay between delivery launches in milliseconds.
    #[arg(long, env = "RELAY_PACING_MS", default_value_t = 0)]
    pacing_ms: u64,

    /// Frames each connection may have queued.
    #[arg(long, env = "RELAY_OUTBOX_CAPACITY", default_value_t = DEFAULT_OUTBOX_CAPACITY)]
    outbox_capacity: usize,

    /// Largest accepted inbound message in bytes.
    #[arg(long, env = "RELAY_MAX_MESSAGE_SIZE", default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    max_message_size: usize,

    /// Close connections silent for this many seconds.
    #[arg(long, env = "RELAY_IDLE_TIMEOUT_SECS")]
    idle_timeout_secs: Option<u64>,

    /// Log level: error, warn(ing), info, verbose, debug, silly/trace.
    #[arg(long, env = "VERBOSE_LEVEL")]
    log_level: Option<String>,

    /// Log file name, written in addition to the console.
    #[arg(long, env = "LOG_FILE")]
    log_file: Option<String>,

    /// Directory for the log file.
    #[arg(long, env = "STORAGE_DIR")]
    storage_dir: Option<PathBuf>,
}

impl Args {
    /// Converts arguments into a validated relay configuration.
    fn to_config(&self) -> Result<RelayConfig> {
        let bind = self
            .bind
            .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port)));

        let config = RelayConfig::builder()
            .bind(bind)
            .transport(self.transport)
            .secret(&self.secret)
            .auth_mode(self.auth_mode)
            .max_concurrency(self.max_concurrency)
            .write_timeout(Duration::from_millis(self.write_timeout_ms))
            .pacing(Duration::from_millis(self.pacing_ms))
            .outbox_capacity(self.outbox_capacity)
            .max_message_size(self.max_message_size)
            .idle_timeout(self.idle_timeout_secs.map(Duration::from_secs))
            .build()?;

        Ok(config)
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Maps a level name to a filter directive.
///
/// Accepts the usual `tracing` levels plus `warning`, `verbose` and `silly`.
fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "error" => "error",
        "warn" | "warning" => "warn",
        "verbose" | "debug" => "debug",
        "silly" | "trace" => "trace",
        _ => "info",
    }
}

/// Installs console logging, plus a file layer when a log file is set.
///
/// The returned guard must live until exit so buffered file logs are flushed.
fn init_logging(args: &Args) -> Option<WorkerGuard> {
    let filter = match &args.log_level {
        Some(level) => EnvFilter::new(level_directive(level)),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let (file_layer, guard) = match &args.log_file {
        Some(file) => {
            let dir = args.storage_dir.clone().unwrap_or_else(|| PathBuf::from("."));
            let appender = tracing_appender::rolling::never(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

// ============================================================================
// Signals
// ============================================================================

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("Shutdown signal received");
}

// ============================================================================
// Environment
// ============================================================================

/// Returns the error from loading a `.env` file, unless the file was absent.
fn dotenv_failure<T>(result: dotenvy::Result<T>) -> Option<dotenvy::Error> {
    match result {
        Err(e) if !e.not_found() => Some(e),
        _ => None,
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    let args = Args::parse();
    let _guard = init_logging(&args);

    if let Some(e) = dotenv_failure(dotenv) {
        warn!(error = %e, "Failed to load .env");
    }

    let config = args.to_config().context("invalid relay configuration")?;
    let relay = Relay::start(config)
        .await
        .context("failed to start relay")?;

    info!(url = %relay.url(), "Relay ready");

    relay.run_until(shutdown_signal()).await;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
