//! Channel relay - filtered publish/subscribe over persistent sockets.
//!
//! Clients connect over WebSocket (or newline-delimited TCP), authenticate
//! with a shared secret, subscribe to channels and publish payloads that the
//! relay fans out to every other client listening on that channel.
//!
//! # Architecture
//!
//! ```text
//! socket ─► framing ─► decode ─► session machine ─┬─► reply ─► own outbox
//!                                                 └─► broadcaster
//!                                                        │
//!                                  registry snapshot ◄───┘
//!                                        │
//!                          peer outboxes (bounded, with deadline)
//! ```
//!
//! Key design principles:
//!
//! - Per-connection state lives in the [`Registry`], keyed by [`ConnectionId`]
//! - Each connection processes its units strictly in order
//! - One slow receiver can stall a broadcast for at most the write timeout
//! - Logs are structured `tracing` events carrying `conn_id` and `channel`
//!
//! # Quick Start
//!
//! ```no_run
//! use channel_relay::{Relay, RelayConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = RelayConfig::builder()
//!         .bind(([0, 0, 0, 0], 8080))
//!         .secret("s3cret")
//!         .build()?;
//!
//!     let relay = Relay::start(config).await?;
//!     println!("Relay listening on {}", relay.url());
//!
//!     relay
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`broadcast`] | Bounded-concurrency channel fan-out |
//! | [`config`] | [`RelayConfig`] and its builder |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Connection and channel ID wrappers |
//! | [`protocol`] | Wire envelope and response types |
//! | [`registry`] | Live connections and their state |
//! | [`relay`] | Top-level [`Relay`] handle |
//! | [`session`] | Per-connection state machine |
//! | [`transport`] | WebSocket and TCP listeners |

// ============================================================================
// Modules
// ============================================================================

/// Channel fan-out.
pub mod broadcast;

/// Relay configuration.
///
/// Use [`RelayConfig::builder()`] to create a validated configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for connections and channels.
pub mod identifiers;

/// Wire envelope types.
pub mod protocol;

/// Connection registry.
pub mod registry;

/// Top-level relay handle.
pub mod relay;

/// Session state machine.
pub mod session;

/// Socket transport layer.
///
/// Listener, framing and per-connection loops.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Relay types
pub use relay::Relay;

// Configuration types
pub use config::{
    AuthMode, BroadcastConfig, RelayConfig, RelayConfigBuilder, Secret, TransportKind,
};

// Engine types
pub use broadcast::{BroadcastReport, Broadcaster};
pub use registry::{ConnectionState, Registry, Subscriptions};
pub use session::{Outcome, SessionMachine};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ChannelId, ConnectionId};

// Protocol types
pub use protocol::{Envelope, Publication, Response, ResponseKind};
