//! Relay handle.
//!
//! [`Relay`] owns the registry, session machine, broadcaster and listener.
//!
//! # Example
//!
//! ```no_run
//! use channel_relay::{Relay, RelayConfig};
//!
//! # async fn example() -> channel_relay::Result<()> {
//! let config = RelayConfig::builder()
//!     .bind(([127, 0, 0, 1], 0))
//!     .secret("s3cret")
//!     .build()?;
//!
//! let relay = Relay::start(config).await?;
//! println!("listening on {}", relay.url());
//!
//! relay.shutdown().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::broadcast::Broadcaster;
use crate::config::{RelayConfig, TransportKind};
use crate::error::Result;
use crate::registry::Registry;
use crate::session::SessionMachine;
use crate::transport::Listener;

// ============================================================================
// Constants
// ============================================================================

/// How long shutdown waits for connection tasks to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// RelayContext
// ============================================================================

/// State shared by every connection task.
#[derive(Debug)]
pub(crate) struct RelayContext {
    pub(crate) registry: Arc<Registry>,
    pub(crate) sessions: SessionMachine,
    pub(crate) broadcaster: Broadcaster,
    pub(crate) transport: TransportKind,
    pub(crate) write_timeout: Duration,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) max_message_size: usize,
}

impl RelayContext {
    /// Builds the shared state for `config`.
    pub(crate) fn new(config: &RelayConfig) -> Self {
        let registry = Arc::new(Registry::with_outbox_capacity(config.outbox_capacity()));
        let sessions = SessionMachine::new(
            Arc::clone(&registry),
            config.secret().clone(),
            config.auth_mode(),
            config.max_message_size(),
        );
        let broadcaster = Broadcaster::new(Arc::clone(&registry), *config.broadcast());

        Self {
            registry,
            sessions,
            broadcaster,
            transport: config.transport(),
            write_timeout: config.broadcast().write_timeout,
            idle_timeout: config.idle_timeout(),
            max_message_size: config.max_message_size(),
        }
    }
}

// ============================================================================
// Relay
// ============================================================================

/// A running relay.
///
/// Dropping the handle leaves the relay running in the background; call
/// [`Relay::shutdown`] to stop it.
#[derive(Debug)]
pub struct Relay {
    ctx: Arc<RelayContext>,
    local_addr: SocketAddr,
    tracker: TaskTracker,
    accept_task: JoinHandle<()>,
}

impl Relay {
    /// Binds the listener and starts accepting connections.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the address cannot be bound.
    pub async fn start(config: RelayConfig) -> Result<Self> {
        let ctx = Arc::new(RelayContext::new(&config));
        let listener = Listener::bind(config.bind()).await?;
        let local_addr = listener.local_addr();

        let tracker = TaskTracker::new();
        let shutdown = ctx.registry.shutdown_signal();
        let accept_task = tokio::spawn(listener.run(
            Arc::clone(&ctx),
            tracker.clone(),
            shutdown,
        ));

        info!(
            %local_addr,
            transport = %config.transport(),
            auth_mode = %config.auth_mode(),
            "Relay started"
        );

        Ok(Self {
            ctx,
            local_addr,
            tracker,
            accept_task,
        })
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns a URL clients can connect to.
    ///
    /// Format: `ws://host:port` or `tcp://host:port`. An unspecified bind
    /// address is reported as loopback.
    #[must_use]
    pub fn url(&self) -> String {
        let ip = match self.local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        let addr = SocketAddr::new(ip, self.local_addr.port());

        match self.ctx.transport {
            TransportKind::WebSocket => format!("ws://{addr}"),
            TransportKind::Tcp => format!("tcp://{addr}"),
        }
    }

    /// Returns the number of live connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.ctx.registry.len()
    }

    /// Returns the connection registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.ctx.registry
    }

    /// Runs until `signal` resolves, then shuts down.
    pub async fn run_until<F>(self, signal: F)
    where
        F: Future<Output = ()>,
    {
        signal.await;
        self.shutdown().await;
    }

    /// Stops accepting, closes every connection and waits for their tasks.
    pub async fn shutdown(self) {
        info!(
            connections = self.ctx.registry.len(),
            "Relay shutting down"
        );

        self.ctx.registry.close_all();

        if let Err(e) = self.accept_task.await {
            warn!(error = %e, "Accept task panicked");
        }

        self.tracker.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.tracker.len(),
                "Connections still open after shutdown grace period"
            );
        }

        info!("Relay stopped");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(transport: TransportKind) -> RelayConfig {
        RelayConfig::builder()
            .bind(([127, 0, 0, 1], 0))
            .transport(transport)
            .secret("k")
            .build()
            .expect("config")
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let relay = Relay::start(config(TransportKind::WebSocket))
            .await
            .expect("start");

        assert!(relay.local_addr().port() > 0);
        assert_eq!(relay.connection_count(), 0);
        assert!(relay.registry().is_empty());

        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_url_format() {
        let relay = Relay::start(config(TransportKind::WebSocket))
            .await
            .expect("start");
        assert_eq!(relay.url(), format!("ws://127.0.0.1:{}", relay.local_addr().port()));
        relay.shutdown().await;

        let relay = Relay::start(config(TransportKind::Tcp)).await.expect("start");
        assert!(relay.url().starts_with("tcp://127.0.0.1:"));
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_unspecified_bind_reports_loopback() {
        let config = RelayConfig::builder()
            .bind(([0, 0, 0, 0], 0))
            .secret("k")
            .build()
            .expect("config");
        let relay = Relay::start(config).await.expect("start");

        assert!(relay.url().starts_with("ws://127.0.0.1:"));
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_until_returns_after_signal() {
        let relay = Relay::start(config(TransportKind::Tcp)).await.expect("start");
        relay.run_until(async {}).await;
    }
}
