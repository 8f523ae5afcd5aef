//! Relay configuration.
//!
//! Provides [`RelayConfig`] and its builder.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use channel_relay::{AuthMode, RelayConfig};
//!
//! # fn example() -> channel_relay::Result<()> {
//! let config = RelayConfig::builder()
//!     .bind(([127, 0, 0, 1], 8080))
//!     .secret("s3cret")
//!     .auth_mode(AuthMode::Handshake)
//!     .write_timeout(Duration::from_secs(2))
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | `bind` | `0.0.0.0:8080` |
//! | `transport` | `websocket` |
//! | `auth_mode` | `handshake` |
//! | `max_concurrency` | 64 |
//! | `write_timeout` | 5 s |
//! | `pacing` | none |
//! | `outbox_capacity` | 256 |
//! | `max_message_size` | 64 KiB |
//! | `idle_timeout` | none |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::registry::DEFAULT_OUTBOX_CAPACITY;

// ============================================================================
// Constants
// ============================================================================

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default number of in-flight deliveries per broadcast.
pub const DEFAULT_MAX_CONCURRENCY: usize = 64;

/// Default per-peer write deadline.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default upper bound for one inbound unit, in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

// ============================================================================
// AuthMode
// ============================================================================

/// How connections prove knowledge of the shared secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Connections send `authenticate` once; later publishes are trusted.
    #[default]
    Handshake,
    /// Every publish carries the token; `authenticate` and `subscribe` are refused.
    PerMessage,
}

impl AuthMode {
    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::PerMessage => "per-message",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "handshake" => Ok(Self::Handshake),
            "per-message" | "per_message" | "permessage" | "token" => Ok(Self::PerMessage),
            other => Err(Error::config(format!(
                "unknown auth mode '{other}', expected 'handshake' or 'per-message'"
            ))),
        }
    }
}

// ============================================================================
// TransportKind
// ============================================================================

/// Framing used on accepted sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// WebSocket; one text frame per unit.
    #[default]
    WebSocket,
    /// Raw TCP; one newline-terminated line per unit.
    Tcp,
}

impl TransportKind {
    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::Tcp => "tcp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(Self::WebSocket),
            "tcp" | "lines" => Ok(Self::Tcp),
            other => Err(Error::config(format!(
                "unknown transport '{other}', expected 'websocket' or 'tcp'"
            ))),
        }
    }
}

// ============================================================================
// Secret
// ============================================================================

/// Shared secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Arc<str>);

impl Secret {
    /// Wraps a secret value.
    #[inline]
    #[must_use]
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    /// Compares `candidate` against the secret in time independent of where
    /// the first mismatching byte is.
    #[must_use]
    pub fn verify(&self, candidate: &str) -> bool {
        let expected = self.0.as_bytes();
        let given = candidate.as_bytes();

        let mut diff = expected.len() ^ given.len();
        for i in 0..expected.len().max(given.len()) {
            let a = expected.get(i).copied().unwrap_or(0);
            let b = given.get(i).copied().unwrap_or(0);
            diff |= usize::from(a ^ b);
        }
        diff == 0
    }

    /// Returns `true` if the secret is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

// ============================================================================
// BroadcastConfig
// ============================================================================

/// Fan-out tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Deliveries in flight at once.
    pub max_concurrency: usize,
    /// How long one peer may take to accept a frame.
    pub write_timeout: Duration,
    /// Delay between delivery launches. Zero disables pacing.
    pub pacing: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            pacing: Duration::ZERO,
        }
    }
}

impl BroadcastConfig {
    /// Checks the values are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if concurrency or the write timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::config("max_concurrency must be at least 1"));
        }
        if self.write_timeout.is_zero() {
            return Err(Error::config("write_timeout must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// RelayConfig
// ============================================================================

/// Validated relay configuration.
///
/// Use [`RelayConfig::builder()`] to create one.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    bind: SocketAddr,
    transport: TransportKind,
    secret: Secret,
    auth_mode: AuthMode,
    broadcast: BroadcastConfig,
    outbox_capacity: usize,
    max_message_size: usize,
    idle_timeout: Option<Duration>,
}

impl RelayConfig {
    /// Creates a builder with default settings and no secret.
    #[inline]
    #[must_use]
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::new()
    }

    /// Listen address.
    #[inline]
    #[must_use]
    pub const fn bind(&self) -> SocketAddr {
        self.bind
    }

    /// Socket framing.
    #[inline]
    #[must_use]
    pub const fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Shared secret.
    #[inline]
    #[must_use]
    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    /// Authentication mode.
    #[inline]
    #[must_use]
    pub const fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    /// Fan-out tuning.
    #[inline]
    #[must_use]
    pub const fn broadcast(&self) -> &BroadcastConfig {
        &self.broadcast
    }

    /// Frames a connection may have queued.
    #[inline]
    #[must_use]
    pub const fn outbox_capacity(&self) -> usize {
        self.outbox_capacity
    }

    /// Largest accepted inbound unit, in bytes.
    #[inline]
    #[must_use]
    pub const fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Inactivity limit after which a connection is closed.
    #[inline]
    #[must_use]
    pub const fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }
}

// ============================================================================
// RelayConfigBuilder
// ============================================================================

/// Builder for [`RelayConfig`].
#[derive(Debug, Clone)]
pub struct RelayConfigBuilder {
    bind: SocketAddr,
    transport: TransportKind,
    secret: Option<Secret>,
    auth_mode: AuthMode,
    broadcast: BroadcastConfig,
    outbox_capacity: usize,
    max_message_size: usize,
    idle_timeout: Option<Duration>,
}

impl Default for RelayConfigBuilder {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            transport: TransportKind::default(),
            secret: None,
            auth_mode: AuthMode::default(),
            broadcast: BroadcastConfig::default(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            idle_timeout: None,
        }
    }
}

impl RelayConfigBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the listen address. Port 0 picks a free port.
    #[inline]
    #[must_use]
    pub fn bind(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.bind = addr.into();
        self
    }

    /// Sets the socket framing.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the shared secret.
    #[inline]
    #[must_use]
    pub fn secret(mut self, secret: impl AsRef<str>) -> Self {
        self.secret = Some(Secret::new(secret));
        self
    }

    /// Sets the authentication mode.
    #[inline]
    #[must_use]
    pub fn auth_mode(mut self, mode: AuthMode) -> Self {
        self.auth_mode = mode;
        self
    }

    /// Replaces all fan-out tuning at once.
    #[inline]
    #[must_use]
    pub fn broadcast(mut self, broadcast: BroadcastConfig) -> Self {
        self.broadcast = broadcast;
        self
    }

    /// Sets how many deliveries one broadcast keeps in flight.
    #[inline]
    #[must_use]
    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.broadcast.max_concurrency = n;
        self
    }

    /// Sets the per-peer write deadline.
    #[inline]
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.broadcast.write_timeout = timeout;
        self
    }

    /// Sets the delay between delivery launches.
    #[inline]
    #[must_use]
    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.broadcast.pacing = pacing;
        self
    }

    /// Sets the per-connection outbound queue capacity.
    #[inline]
    #[must_use]
    pub fn outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity;
        self
    }

    /// Sets the largest accepted inbound unit, in bytes.
    #[inline]
    #[must_use]
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Closes connections that send nothing for `timeout`.
    #[inline]
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no secret was set, or it is empty
    /// - [`Error::Config`] if a size, capacity or timeout is zero
    pub fn build(self) -> Result<RelayConfig> {
        let secret = self.validate_secret()?;
        self.broadcast.validate()?;

        if self.outbox_capacity == 0 {
            return Err(Error::config("outbox_capacity must be at least 1"));
        }
        if self.max_message_size == 0 {
            return Err(Error::config("max_message_size must be at least 1"));
        }
        if self.idle_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::config("idle_timeout must be greater than zero"));
        }

        Ok(RelayConfig {
            bind: self.bind,
            transport: self.transport,
            secret,
            auth_mode: self.auth_mode,
            broadcast: self.broadcast,
            outbox_capacity: self.outbox_capacity,
            max_message_size: self.max_message_size,
            idle_timeout: self.idle_timeout,
        })
    }

    fn validate_secret(&self) -> Result<Secret> {
        let secret = self.secret.clone().ok_or_else(|| {
            Error::config(
                "A shared secret is required. Use .secret() to set it.\n\
                 Example: RelayConfig::builder().secret(\"s3cret\")",
            )
        })?;

        if secret.is_empty() {
            return Err(Error::config("shared secret must not be empty"));
        }

        Ok(secret)
    }
}

// ============================================================================
// Tests
// ============================================================================
