//! Channel fan-out.
//!
//! Delivers one published payload to every eligible peer.
//!
//! # Delivery
//!
//! ```text
//! publish ──► peers_for(origin, channel) ──► encode once
//!                                               │
//!            ┌──────────────┬──────────────┬────┴─────────┐
//!            ▼              ▼              ▼              ▼
//!         outbox 1       outbox 2       outbox 3   ...  outbox N
//!        (deadline)     (deadline)     (deadline)     (deadline)
//! ```
//!
//! At most `max_concurrency` deliveries are in flight. With pacing enabled,
//! launches are spaced apart but already launched deliveries keep running.
//! A peer that misses the write deadline, or whose queue is closed, is
//! unregistered; the broadcast carries on with the rest.

// ============================================================================
// Imports
// ============================================================================

use std::pin::pin;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::config::BroadcastConfig;
use crate::error::Result;
use crate::identifiers::{ChannelId, ConnectionId};
use crate::protocol::{Frame, Response, encode};
use crate::registry::Registry;

// ============================================================================
// BroadcastReport
// ============================================================================

/// Counts from one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers that matched the channel when the broadcast started.
    pub eligible: usize,
    /// Peers whose queue accepted the frame.
    pub delivered: usize,
    /// Peers dropped for a timeout or a closed queue.
    pub dropped: usize,
}

// ============================================================================
// Broadcaster
// ============================================================================

/// Fans published payloads out to subscribed peers.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    config: BroadcastConfig,
}

impl Broadcaster {
    /// Creates a broadcaster over `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>, config: BroadcastConfig) -> Self {
        Self { registry, config }
    }

    /// Returns the fan-out tuning.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Sends `payload` to every peer of `origin` subscribed to `channel`.
    ///
    /// Resolves once every peer in the snapshot has been delivered to or
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the payload cannot be
    /// encoded. Per-peer failures are reported in the returned counts.
    pub async fn broadcast(
        &self,
        origin: ConnectionId,
        channel: &ChannelId,
        payload: Value,
    ) -> Result<BroadcastReport> {
        let peers = self.registry.peers_for(origin, channel);
        let mut report = BroadcastReport {
            eligible: peers.len(),
            ..BroadcastReport::default()
        };

        if peers.is_empty() {
            debug!(conn_id = %origin, channel = %channel, "No subscribers");
            return Ok(report);
        }

        let frame = encode(&Response::relay(payload))?;
        let BroadcastConfig {
            max_concurrency,
            write_timeout,
            pacing,
        } = self.config;

        let deliveries = stream::iter(peers.into_iter().enumerate())
            .then(move |(index, peer)| async move {
                if index > 0 && !pacing.is_zero() {
                    sleep(pacing).await;
                }
                peer
            })
            .map(move |peer| {
                let frame = Frame::clone(&frame);
                async move {
                    let result = peer.outbox.deliver(frame, write_timeout).await;
                    (peer.id, result)
                }
            })
            .buffer_unordered(max_concurrency.max(1));
        let mut deliveries = pin!(deliveries);

        while let Some((peer, result)) = deliveries.next().await {
            match result {
                Ok(()) => {
                    trace!(conn_id = %peer, channel = %channel, "Frame queued");
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(conn_id = %peer, channel = %channel, error = %e, "Dropping peer");
                    self.registry.unregister(peer);
                    report.dropped += 1;
                }
            }
        }

        debug!(
            conn_id = %origin,
            channel = %channel,
            eligible = report.eligible,
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast complete"
        );

        Ok(report)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::{Duration, Instant};

    use serde_json::json;

    use crate::registry::{Registration, Subscriptions};

    fn broadcaster(registry: &Arc<Registry>, write_timeout: Duration) -> Broadcaster {
        Broadcaster::new(
            Arc::clone(registry),
            BroadcastConfig {
                max_concurrency: 8,
                write_timeout,
                pacing: Duration::ZERO,
            },
        )
    }

    fn subscribe(registry: &Registry, reg: &Registration, ids: &[u64]) {
        let subs: Subscriptions = ids.iter().copied().map(ChannelId::from).collect();
        registry.set_subscriptions(reg.id, subs).expect("subscribe");
    }

    #[tokio::test]
    async fn test_fanout_to_49_peers() {
        let registry = Arc::new(Registry::new());
        let mut regs: Vec<Registration> = (0..50).map(|_| registry.register()).collect();
        for reg in &regs {
            subscribe(&registry, reg, &[7]);
        }
        let origin = regs[0].id;

        let report = broadcaster(&registry, Duration::from_secs(1))
            .broadcast(origin, &ChannelId::from(7), json!({"n": 1}))
            .await
            .expect("broadcast");

        assert_eq!(
            report,
            BroadcastReport {
                eligible: 49,
                delivered: 49,
                dropped: 0
            }
        );

        let expected = r#"{"success":true,"type":"message","response":{"n":1}}"#;
        assert!(regs[0].inbox.try_recv().is_err());
        for reg in regs.iter_mut().skip(1) {
            let frame = reg.inbox.try_recv().expect("frame delivered");
            assert_eq!(&*frame, expected);
            assert!(reg.inbox.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_channel_filtering() {
        let registry = Arc::new(Registry::new());
        let origin = registry.register();
        let mut wildcard = registry.register();
        let mut seven = registry.register();
        let mut three = registry.register();
        subscribe(&registry, &seven, &[7]);
        subscribe(&registry, &three, &[3]);

        let report = broadcaster(&registry, Duration::from_secs(1))
            .broadcast(origin.id, &ChannelId::from(7), json!("hi"))
            .await
            .expect("broadcast");

        assert_eq!(report.delivered, 2);
        assert!(wildcard.inbox.try_recv().is_ok());
        assert!(seven.inbox.try_recv().is_ok());
        assert!(three.inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_peer_is_dropped() {
        let registry = Arc::new(Registry::with_outbox_capacity(1));
        let origin = registry.register();
        let slow = registry.register();
        let mut fast = registry.register();

        slow.outbox
            .deliver(Frame::from("backlog"), Duration::from_millis(10))
            .await
            .expect("fill slow queue");

        let report = broadcaster(&registry, Duration::from_millis(50))
            .broadcast(origin.id, &ChannelId::from(1), json!({}))
            .await
            .expect("broadcast");

        assert_eq!(report.eligible, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert!(fast.inbox.try_recv().is_ok());
        assert!(!registry.contains(slow.id));
        assert!(slow.closed.is_cancelled());
        assert!(registry.contains(fast.id));
    }

    #[tokio::test]
    async fn test_closed_peer_is_dropped() {
        let registry = Arc::new(Registry::new());
        let origin = registry.register();
        let gone = registry.register();
        drop(gone.inbox);

        let report = broadcaster(&registry, Duration::from_millis(50))
            .broadcast(origin.id, &ChannelId::from(1), json!(null))
            .await
            .expect("broadcast");

        assert_eq!(report.dropped, 1);
        assert!(!registry.contains(gone.id));
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let registry = Arc::new(Registry::new());
        let origin = registry.register();

        let report = broadcaster(&registry, Duration::from_secs(1))
            .broadcast(origin.id, &ChannelId::from(1), json!(1))
            .await
            .expect("broadcast");

        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_pacing_spaces_launches() {
        let registry = Arc::new(Registry::new());
        let origin = registry.register();
        let _peers: Vec<Registration> = (0..3).map(|_| registry.register()).collect();

        let paced = Broadcaster::new(
            Arc::clone(&registry),
            BroadcastConfig {
                max_concurrency: 8,
                write_timeout: Duration::from_secs(1),
                pacing: Duration::from_millis(20),
            },
        );

        let started = Instant::now();
        let report = paced
            .broadcast(origin.id, &ChannelId::from(1), json!(1))
            .await
            .expect("broadcast");

        assert_eq!(report.delivered, 3);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_unregister_during_broadcast() {
        let registry = Arc::new(Registry::with_outbox_capacity(1));
        let origin = registry.register();
        let victim = registry.register();
        victim
            .outbox
            .deliver(Frame::from("backlog"), Duration::from_millis(10))
            .await
            .expect("fill");

        let racer = {
            let registry = Arc::clone(&registry);
            let id = victim.id;
            tokio::spawn(async move {
                sleep(Duration::from_millis(5)).await;
                registry.unregister(id)
            })
        };

        let report = broadcaster(&registry, Duration::from_millis(100))
            .broadcast(origin.id, &ChannelId::from(1), json!(1))
            .await
            .expect("broadcast");

        racer.await.expect("join");
        assert_eq!(report.eligible, 1);
        assert!(!registry.contains(victim.id));
        assert!(registry.contains(origin.id));
    }
}
