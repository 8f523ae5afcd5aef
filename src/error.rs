//! Error types for the channel relay.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use channel_relay::{Relay, RelayConfig, Result};
//!
//! async fn example(config: RelayConfig) -> Result<()> {
//!     let relay = Relay::start(config).await?;
//!     relay.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Client | [`Error::AuthenticationFailed`], [`Error::Unauthenticated`] |
//! | Delivery | [`Error::PeerWriteTimeout`], [`Error::ConnectionClosed`] |
//! | Registry | [`Error::ConnectionNotFound`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Codec`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_util::codec::LinesCodecError;

use crate::identifiers::ConnectionId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Client-caused variants are answered on the offending connection and never
/// escalate; transport variants end one connection; only [`Error::Config`] and
/// listener-level [`Error::Io`] are fatal, and only at startup.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when relay configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Client Errors
    // ========================================================================
    /// Token did not match the shared secret.
    #[error("Invalid token")]
    AuthenticationFailed,

    /// Publish attempted by a connection that is not authenticated.
    #[error("Unauthenticated response")]
    Unauthenticated,

    // ========================================================================
    // Delivery Errors
    // ========================================================================
    /// Peer outbox did not accept a frame before the write deadline.
    #[error("Write to {conn_id} timed out after {timeout_ms}ms")]
    PeerWriteTimeout {
        /// The peer that failed to accept the frame.
        conn_id: ConnectionId,
        /// Milliseconds waited before giving up.
        timeout_ms: u64,
    },

    /// Connection closed while a frame was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// Connection is not (or no longer) registered.
    #[error("Connection not found: {conn_id}")]
    ConnectionNotFound {
        /// The missing connection ID.
        conn_id: ConnectionId,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Line framing error on a TCP transport.
    #[error("Framing error: {0}")]
    Codec(#[from] LinesCodecError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a peer write timeout error.
    #[inline]
    pub fn peer_write_timeout(conn_id: ConnectionId, timeout_ms: u64) -> Self {
        Self::PeerWriteTimeout {
            conn_id,
            timeout_ms,
        }
    }

    /// Creates a connection not found error.
    #[inline]
    pub fn connection_not_found(conn_id: ConnectionId) -> Self {
        Self::ConnectionNotFound { conn_id }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::PeerWriteTimeout { .. })
    }

    /// Returns `true` if this error ends the affected connection.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::PeerWriteTimeout { .. }
                | Self::ConnectionClosed
                | Self::ConnectionNotFound { .. }
                | Self::Io(_)
                | Self::WebSocket(_)
                | Self::Codec(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
