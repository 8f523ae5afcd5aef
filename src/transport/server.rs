//! Listener and accept loop.
//!
//! # Connection Flow
//!
//! 1. Relay binds a TCP listener (port 0 picks a free port)
//! 2. Accept loop hands each socket to its own task
//! 3. WebSocket sockets complete the upgrade handshake first
//! 4. The connection task registers, serves and unregisters
//!
//! The loop stops when the relay's shutdown signal fires. Connection tasks
//! are tracked so shutdown can wait for them.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::TransportKind;
use crate::error::Result;
use crate::relay::RelayContext;

use super::{connection, framing};

// ============================================================================
// Constants
// ============================================================================

/// Time allowed for a WebSocket upgrade to complete.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed accept, so a full descriptor table does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// Listener
// ============================================================================

/// A bound listener that has not started accepting yet.
#[derive(Debug)]
pub struct Listener {
    /// TCP listener for incoming connections.
    listener: TcpListener,
    /// Address actually bound.
    local_addr: SocketAddr,
}

impl Listener {
    /// Binds to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        debug!(%local_addr, "Listener bound");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `shutdown` fires.
    pub(crate) async fn run(
        self,
        ctx: Arc<RelayContext>,
        tracker: TaskTracker,
        shutdown: CancellationToken,
    ) {
        info!(
            local_addr = %self.local_addr,
            transport = %ctx.transport,
            "Relay listening"
        );

        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    debug!(%addr, "TCP connection accepted");
                    tracker.spawn(handle_socket(Arc::clone(&ctx), stream, addr));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        info!(local_addr = %self.local_addr, "Listener stopped");
    }
}

// ============================================================================
// Socket Handling
// ============================================================================

/// Frames an accepted socket and runs its connection.
async fn handle_socket(ctx: Arc<RelayContext>, stream: TcpStream, addr: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%addr, error = %e, "Failed to set TCP_NODELAY");
    }

    match ctx.transport {
        TransportKind::WebSocket => {
            let config = framing::websocket_config(ctx.max_message_size);
            let upgrade = tokio_tungstenite::accept_async_with_config(stream, Some(config));
            let ws = match timeout(HANDSHAKE_TIMEOUT, upgrade).await {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    debug!(%addr, error = %e, "WebSocket upgrade failed");
                    return;
                }
                Err(_) => {
                    debug!(%addr, "WebSocket upgrade timed out");
                    return;
                }
            };
            let (reader, writer) = framing::websocket(ws);
            connection::serve(ctx, addr, reader, writer).await;
        }
        TransportKind::Tcp => {
            let (reader, writer) = framing::lines(stream, ctx.max_message_size);
            connection::serve(ctx, addr, reader, writer).await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn test_bind_random_port() {
        let listener = Listener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .expect("bind should succeed");

        assert!(listener.local_addr().port() > 0);
        assert_eq!(listener.local_addr().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_bind_in_use_fails() {
        let first = Listener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .expect("bind should succeed");

        let second = Listener::bind(first.local_addr()).await;
        assert!(matches!(second, Err(crate::Error::Io(_))));
    }
}
