//! Connection registry.
//!
//! Tracks every live connection and owns its authoritative state.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Registry                     │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ conn-1 → state, outbox, close token    │  │
//! │  │ conn-2 → state, outbox, close token    │  │
//! │  │ conn-3 → state, outbox, close token    │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Entries are inserted on accept and removed on close, error, failed
//! delivery or shutdown. Enumeration works on a snapshot taken under the read
//! lock, so a connection removed mid-broadcast is at worst written to once
//! more through a queue whose writer has already gone, which fails safely.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `outbox` | Bounded per-connection outbound queue |
//! | `state` | Authentication flag and subscription set |

// ============================================================================
// Submodules
// ============================================================================

/// Bounded per-connection outbound queue.
pub mod outbox;

/// Per-connection semantic state.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use outbox::{Outbox, OutboxReceiver};
pub use state::{ConnectionState, Subscriptions};

// ============================================================================
// Imports
// ============================================================================

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::{ChannelId, ConnectionId};

// ============================================================================
// Constants
// ============================================================================

/// Default number of frames a connection may have queued.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

// ============================================================================
// Types
// ============================================================================

/// Registry record for one connection.
#[derive(Debug)]
struct Entry {
    /// Semantic state.
    state: ConnectionState,
    /// Outbound queue.
    outbox: Outbox,
    /// Cancelled when the entry is removed.
    closed: CancellationToken,
}

/// Everything a transport needs after registering a connection.
#[derive(Debug)]
pub struct Registration {
    /// Handle of the new connection.
    pub id: ConnectionId,
    /// Sending half of its outbound queue.
    pub outbox: Outbox,
    /// Receiving half, for the writer task.
    pub inbox: OutboxReceiver,
    /// Fires once the connection is unregistered.
    pub closed: CancellationToken,
}

/// A broadcast target taken from a registry snapshot.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Peer handle.
    pub id: ConnectionId,
    /// Peer outbound queue.
    pub outbox: Outbox,
}

// ============================================================================
// Registry
// ============================================================================

/// Thread-safe set of live connections.
///
/// The lock is never held across an `.await`.
#[derive(Debug)]
pub struct Registry {
    /// Live connections by handle.
    entries: RwLock<FxHashMap<ConnectionId, Entry>>,
    /// Capacity of each new outbox.
    outbox_capacity: usize,
    /// Parent of every connection's close token.
    root: CancellationToken,
}

impl Registry {
    /// Creates an empty registry with the default outbox capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_outbox_capacity(DEFAULT_OUTBOX_CAPACITY)
    }

    /// Creates an empty registry whose connections queue at most
    /// `outbox_capacity` frames.
    #[must_use]
    pub fn with_outbox_capacity(outbox_capacity: usize) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            outbox_capacity: outbox_capacity.max(1),
            root: CancellationToken::new(),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Registry - Lifecycle
// ============================================================================

impl Registry {
    /// Registers a new connection with default state.
    ///
    /// Called once per accepted transport.
    pub fn register(&self) -> Registration {
        let id = ConnectionId::next();
        let (outbox, inbox) = Outbox::channel(id, self.outbox_capacity);
        let closed = self.root.child_token();

        self.entries.write().insert(
            id,
            Entry {
                state: ConnectionState::default(),
                outbox: outbox.clone(),
                closed: closed.clone(),
            },
        );

        info!(conn_id = %id, "Connection registered");

        Registration {
            id,
            outbox,
            inbox,
            closed,
        }
    }

    /// Removes a connection and signals its transport to close.
    ///
    /// Idempotent: returns `false` if the connection was already gone.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.entries.write().remove(&id);

        match removed {
            Some(entry) => {
                entry.closed.cancel();
                info!(conn_id = %id, "Connection unregistered");
                true
            }
            None => {
                debug!(conn_id = %id, "Unregister of unknown connection ignored");
                false
            }
        }
    }

    /// Returns a token that fires when [`Registry::close_all`] runs.
    #[must_use]
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Removes every connection and cancels all close tokens.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.entries.write().drain().collect();
        self.root.cancel();

        if !drained.is_empty() {
            info!(count = drained.len(), "All connections closed");
        }
    }
}

// ============================================================================
// Registry - State
// ============================================================================

impl Registry {
    /// Returns a snapshot of a connection's state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotFound`] if the connection is gone.
    pub fn get(&self, id: ConnectionId) -> Result<ConnectionState> {
        self.entries
            .read()
            .get(&id)
            .map(|entry| entry.state.clone())
            .ok_or_else(|| Error::connection_not_found(id))
    }

    /// Sets the authentication flag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotFound`] if the connection is gone.
    pub fn set_authenticated(&self, id: ConnectionId, authenticated: bool) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| Error::connection_not_found(id))?;
        entry.state.authenticated = authenticated;
        Ok(())
    }

    /// Replaces the subscription set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotFound`] if the connection is gone.
    pub fn set_subscriptions(&self, id: ConnectionId, subscriptions: Subscriptions) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| Error::connection_not_found(id))?;
        entry.state.subscriptions = subscriptions;
        Ok(())
    }

    /// Returns `true` if the connection is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Returns the number of live connections.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if no connection is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// ============================================================================
// Registry - Enumeration
// ============================================================================

impl Registry {
    /// Visits every live connection except `origin`.
    ///
    /// The set is snapshotted first and the lock released, so `visit` may call
    /// back into the registry, including [`Registry::unregister`].
    pub fn for_each_other<F>(&self, origin: ConnectionId, mut visit: F)
    where
        F: FnMut(ConnectionId, &ConnectionState),
    {
        let snapshot: Vec<(ConnectionId, ConnectionState)> = self
            .entries
            .read()
            .iter()
            .filter(|(id, _)| **id != origin)
            .map(|(id, entry)| (*id, entry.state.clone()))
            .collect();

        for (id, state) in &snapshot {
            visit(*id, state);
        }
    }

    /// Returns the connections a publish on `channel` from `origin` must reach.
    pub fn peers_for(&self, origin: ConnectionId, channel: &ChannelId) -> Vec<Peer> {
        self.entries
            .read()
            .iter()
            .filter(|(id, entry)| **id != origin && entry.state.subscriptions.accepts(channel))
            .map(|(id, entry)| Peer {
                id: *id,
                outbox: entry.outbox.clone(),
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn channels(ids: &[u64]) -> Subscriptions {
        ids.iter().copied().map(ChannelId::from).collect()
    }

    #[test]
    fn test_register_defaults() {
        let registry = Registry::new();
        let reg = registry.register();

        let state = registry.get(reg.id).expect("registered");
        assert!(!state.authenticated);
        assert!(state.subscriptions.is_wildcard());
        assert_eq!(registry.len(), 1);
        assert!(!reg.closed.is_cancelled());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = Registry::new();
        let reg = registry.register();

        assert!(registry.unregister(reg.id));
        assert!(reg.closed.is_cancelled());
        assert!(!registry.unregister(reg.id));
        assert!(!registry.unregister(ConnectionId::from_raw(u64::MAX)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_state_updates() {
        let registry = Registry::new();
        let reg = registry.register();

        registry.set_authenticated(reg.id, true).expect("set auth");
        registry
            .set_subscriptions(reg.id, channels(&[1, 2]))
            .expect("set subs");

        let state = registry.get(reg.id).expect("state");
        assert!(state.authenticated);
        assert!(state.subscriptions.contains(&ChannelId::from(2)));
    }

    #[test]
    fn test_subscriptions_replace() {
        let registry = Registry::new();
        let reg = registry.register();

        registry.set_subscriptions(reg.id, channels(&[1])).expect("first");
        registry.set_subscriptions(reg.id, channels(&[2])).expect("second");

        let state = registry.get(reg.id).expect("state");
        assert!(!state.subscriptions.contains(&ChannelId::from(1)));
        assert!(state.subscriptions.contains(&ChannelId::from(2)));
    }

    #[test]
    fn test_unknown_connection_errors() {
        let registry = Registry::new();
        let missing = ConnectionId::from_raw(u64::MAX - 1);

        assert!(matches!(
            registry.get(missing),
            Err(Error::ConnectionNotFound { .. })
        ));
        assert!(registry.set_authenticated(missing, true).is_err());
        assert!(registry.set_subscriptions(missing, channels(&[1])).is_err());
    }

    #[test]
    fn test_for_each_other_excludes_origin() {
        let registry = Registry::new();
        let a = registry.register();
        let b = registry.register();
        let c = registry.register();

        let mut seen = Vec::new();
        registry.for_each_other(a.id, |id, _| seen.push(id));
        seen.sort();

        let mut expected = vec![b.id, c.id];
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_for_each_other_tolerates_unregister() {
        let registry = Registry::new();
        let origin = registry.register();
        let _b = registry.register();
        let _c = registry.register();

        let mut visited = 0;
        registry.for_each_other(origin.id, |id, _| {
            visited += 1;
            registry.unregister(id);
        });

        assert_eq!(visited, 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_peers_for_filters_by_channel() {
        let registry = Registry::new();
        let origin = registry.register();
        let wildcard = registry.register();
        let seven = registry.register();
        let three = registry.register();

        registry.set_subscriptions(seven.id, channels(&[7])).expect("subs");
        registry.set_subscriptions(three.id, channels(&[3])).expect("subs");

        let mut ids: Vec<_> = registry
            .peers_for(origin.id, &ChannelId::from(7))
            .into_iter()
            .map(|peer| peer.id)
            .collect();
        ids.sort();

        let mut expected = vec![wildcard.id, seven.id];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_close_all() {
        let registry = Registry::new();
        let a = registry.register();
        let b = registry.register();

        registry.close_all();

        assert!(registry.is_empty());
        assert!(a.closed.is_cancelled());
        assert!(b.closed.is_cancelled());
    }
}
