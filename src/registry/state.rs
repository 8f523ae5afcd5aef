//! Per-connection semantic state.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::identifiers::ChannelId;

// ============================================================================
// Subscriptions
// ============================================================================

/// Set of channels a connection listens on.
///
/// An empty set is a wildcard: the connection receives every channel.
/// Cloning is a reference-count bump, so registry snapshots stay cheap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscriptions(Arc<FxHashSet<ChannelId>>);

impl Subscriptions {
    /// Returns the wildcard set.
    #[inline]
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Returns `true` if a publish on `channel` should reach this connection.
    #[inline]
    #[must_use]
    pub fn accepts(&self, channel: &ChannelId) -> bool {
        self.0.is_empty() || self.0.contains(channel)
    }

    /// Returns `true` if no explicit channels are set.
    #[inline]
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of explicit channels.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no explicit channels are set.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if `channel` is explicitly in the set.
    #[inline]
    #[must_use]
    pub fn contains(&self, channel: &ChannelId) -> bool {
        self.0.contains(channel)
    }
}

impl FromIterator<ChannelId> for Subscriptions {
    fn from_iter<I: IntoIterator<Item = ChannelId>>(iter: I) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Snapshot of a connection's authentication and subscription state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// Whether the connection presented the shared secret.
    pub authenticated: bool,
    /// Channels the connection listens on.
    pub subscriptions: Subscriptions,
}

impl ConnectionState {
    /// Returns `true` if the connection has an explicit subscription set.
    #[inline]
    #[must_use]
    pub fn is_bound(&self) -> bool {
        !self.subscriptions.is_wildcard()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_accepts_everything() {
        let subs = Subscriptions::all();
        assert!(subs.is_wildcard());
        assert!(subs.accepts(&ChannelId::from(1)));
        assert!(subs.accepts(&ChannelId::from(999)));
    }

    #[test]
    fn test_explicit_set_filters() {
        let subs: Subscriptions = [ChannelId::from(7)].into_iter().collect();
        assert!(subs.accepts(&ChannelId::from(7)));
        assert!(!subs.accepts(&ChannelId::from(3)));
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn test_default_state() {
        let state = ConnectionState::default();
        assert!(!state.authenticated);
        assert!(!state.is_bound());
    }
}
