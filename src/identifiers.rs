//! Type-safe identifiers for relay entities.
//!
//! Newtype wrappers keep connection handles and channel names from being
//! mixed up with plain integers and strings.
//!
//! | Type | Backing | Wire form |
//! |------|---------|-----------|
//! | [`ConnectionId`] | `u64`, process-unique | never on the wire |
//! | [`ChannelId`] | `String` | JSON string or non-negative integer |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Longest accepted channel name, in bytes.
pub const MAX_CHANNEL_LEN: usize = 256;

/// Next connection ID to hand out. Starts at 1 so 0 never names a connection.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// ConnectionId
// ============================================================================

/// Opaque handle to a registered connection.
///
/// Allocated from a process-wide counter, so an ID is never reused and a
/// removed connection cannot be resurrected by a late lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next unused connection ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw value. Intended for tests and log correlation.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// ChannelId
// ============================================================================

/// Name of a broadcast channel.
///
/// Clients may send either a string or a non-negative integer; integers are
/// stored in decimal form so `7` and `"7"` address the same channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawChannelId")]
pub struct ChannelId(String);

/// Wire representations accepted for a channel.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawChannelId {
    Number(u64),
    Text(String),
}

impl ChannelId {
    /// Creates a channel ID, validating its length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the name is empty or longer than
    /// [`MAX_CHANNEL_LEN`] bytes.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::config("channel name must not be empty"));
        }
        if name.len() > MAX_CHANNEL_LEN {
            return Err(Error::config(format!(
                "channel name exceeds {MAX_CHANNEL_LEN} bytes"
            )));
        }
        Ok(Self(name))
    }

    /// Returns the channel name.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<RawChannelId> for ChannelId {
    type Error = Error;

    fn try_from(raw: RawChannelId) -> Result<Self> {
        match raw {
            RawChannelId::Number(n) => Ok(Self(n.to_string())),
            RawChannelId::Text(s) => Self::new(s),
        }
    }
}

impl From<u64> for ChannelId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
