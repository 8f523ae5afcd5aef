//! Shared helpers for integration tests.
//!
//! Provides:
//! - Relay startup on a random loopback port
//! - WebSocket and line-based TCP test clients
//! - Logging initialization

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing_subscriber::EnvFilter;

use channel_relay::{AuthMode, Relay, RelayConfig, RelayConfigBuilder, TransportKind};

// ============================================================================
// Constants
// ============================================================================

/// Shared secret used by every test relay.
pub const SECRET: &str = "test-secret";

/// How long to wait for an expected frame.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait before concluding no frame is coming.
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

// ============================================================================
// Setup
// ============================================================================

/// Initialize tracing once, honouring `RUST_LOG`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Base configuration on a random loopback port.
pub fn config(transport: TransportKind, mode: AuthMode) -> RelayConfigBuilder {
    RelayConfig::builder()
        .bind(([127, 0, 0, 1], 0))
        .transport(transport)
        .auth_mode(mode)
        .secret(SECRET)
}

/// Starts a relay with `builder`.
pub async fn start(builder: RelayConfigBuilder) -> Relay {
    init_logging();
    let config = builder.build().expect("valid config");
    Relay::start(config).await.expect("relay should start")
}

/// Waits until the relay reports `expected` connections.
pub async fn wait_for_connections(relay: &Relay, expected: usize) {
    timeout(RECV_TIMEOUT, async {
        while relay.connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {expected} connections, have {}",
            relay.connection_count()
        )
    });
}

// ============================================================================
// WebSocket Client
// ============================================================================

/// WebSocket test client.
pub struct WsClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    /// Connects and waits until the relay has registered the connection.
    pub async fn connect(relay: &Relay) -> Self {
        let (ws, _) = connect_async(relay.url()).await.expect("ws connect");
        let mut client = Self { ws };
        client.send(json!({"type": "ping"})).await;
        let pong = client.recv().await;
        assert_eq!(pong["type"], "ping");
        client
    }

    /// Sends a JSON value as a text frame.
    pub async fn send(&mut self, value: Value) {
        self.send_raw(&value.to_string()).await;
    }

    /// Sends raw text.
    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("ws send");
    }

    /// Sends raw bytes as a binary frame.
    pub async fn send_binary(&mut self, bytes: Vec<u8>) {
        self.ws
            .send(Message::Binary(bytes.into()))
            .await
            .expect("ws send");
    }

    /// Receives the next text frame as JSON.
    pub async fn recv(&mut self) -> Value {
        timeout(RECV_TIMEOUT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return serde_json::from_str(text.as_str()).expect("json frame");
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("connection ended: {other:?}"),
                }
            }
        })
        .await
        .expect("frame within timeout")
    }

    /// Asserts no text frame arrives within the quiet period.
    pub async fn expect_silence(&mut self) {
        if let Ok(Some(Ok(Message::Text(text)))) = timeout(QUIET_PERIOD, self.ws.next()).await {
            panic!("unexpected frame: {}", text.as_str());
        }
    }

    /// Returns `true` once the relay closes the socket.
    pub async fn closed_by_relay(&mut self) -> bool {
        timeout(RECV_TIMEOUT, async {
            loop {
                match self.ws.next().await {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return true,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    /// Authenticates and asserts success.
    pub async fn authenticate(&mut self) {
        self.send(json!({"type": "authenticate", "data": {"token": SECRET}}))
            .await;
        let reply = self.recv().await;
        assert_eq!(reply["success"], true, "authenticate failed: {reply}");
    }

    /// Subscribes and asserts success.
    pub async fn subscribe(&mut self, channels: Value) {
        self.send(json!({"type": "subscribe", "data": {"channels": channels}}))
            .await;
        let reply = self.recv().await;
        assert_eq!(reply["type"], "bindings", "unexpected reply: {reply}");
        assert_eq!(reply["success"], true);
    }

    /// Closes the socket.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

// ============================================================================
// TCP Client
// ============================================================================

/// Newline-delimited TCP test client.
pub struct TcpClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TcpClient {
    /// Connects and waits until the relay has registered the connection.
    pub async fn connect(relay: &Relay) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(relay.local_addr()).await?;
        let (read, writer) = stream.into_split();
        let mut client = Self {
            lines: BufReader::new(read).lines(),
            writer,
        };
        client.send(json!({"type": "ping"})).await?;
        client.recv().await?;
        Ok(client)
    }

    /// Sends a JSON value as one line.
    pub async fn send(&mut self, value: Value) -> anyhow::Result<()> {
        self.send_raw(&value.to_string()).await
    }

    /// Sends raw text followed by a newline.
    pub async fn send_raw(&mut self, text: &str) -> anyhow::Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    /// Receives the next line as JSON.
    pub async fn recv(&mut self) -> anyhow::Result<Value> {
        let line = timeout(RECV_TIMEOUT, self.lines.next_line())
            .await??
            .ok_or_else(|| anyhow::anyhow!("connection closed"))?;
        Ok(serde_json::from_str(&line)?)
    }

    /// Returns `true` if no line arrives within the quiet period.
    pub async fn is_silent(&mut self) -> bool {
        timeout(QUIET_PERIOD, self.lines.next_line()).await.is_err()
    }
}
