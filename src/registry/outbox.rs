//! Bounded outbound queue in front of a connection's writer task.
//!
//! Every frame destined for a connection, whether a direct response or a
//! relayed payload, goes through its [`Outbox`]. The writer task drains the
//! queue to the socket, so a peer that stops reading fills its own queue and
//! nobody else's.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::Frame;

/// Receiving half, owned by the writer task.
pub type OutboxReceiver = mpsc::Receiver<Frame>;

// ============================================================================
// Outbox
// ============================================================================

/// Sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    /// Connection this queue feeds.
    conn_id: ConnectionId,
    /// Bounded sender.
    tx: mpsc::Sender<Frame>,
}

impl Outbox {
    /// Creates a queue holding at most `capacity` frames.
    pub(crate) fn channel(conn_id: ConnectionId, capacity: usize) -> (Self, OutboxReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { conn_id, tx }, rx)
    }

    /// Enqueues a frame, waiting at most `deadline` for space.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the writer task is gone
    /// - [`Error::PeerWriteTimeout`] if the queue stayed full past `deadline`
    pub async fn deliver(&self, frame: Frame, deadline: Duration) -> Result<()> {
        let frame = match self.tx.try_send(frame) {
            Ok(()) => return Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(Error::ConnectionClosed),
            Err(mpsc::error::TrySendError::Full(frame)) => frame,
        };

        match timeout(deadline, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::peer_write_timeout(
                self.conn_id,
                deadline.as_millis() as u64,
            )),
        }
    }

    /// Returns `true` once the receiving side has been dropped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_deliver_fast_path() {
        let (outbox, mut rx) = Outbox::channel(ConnectionId::from_raw(1), 4);
        outbox.deliver(Frame::from("a"), DEADLINE).await.expect("deliver");
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_deliver_times_out_when_full() {
        let (outbox, _rx) = Outbox::channel(ConnectionId::from_raw(2), 1);
        outbox.deliver(Frame::from("a"), DEADLINE).await.expect("first fits");

        let err = outbox
            .deliver(Frame::from("b"), DEADLINE)
            .await
            .expect_err("queue is full");
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_deliver_waits_for_space() {
        let (outbox, mut rx) = Outbox::channel(ConnectionId::from_raw(3), 1);
        outbox.deliver(Frame::from("a"), DEADLINE).await.expect("first fits");

        let drain = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let first = rx.recv().await;
            let second = rx.recv().await;
            (first, second)
        });

        outbox
            .deliver(Frame::from("b"), Duration::from_secs(1))
            .await
            .expect("space frees up");

        let (first, second) = drain.await.expect("join");
        assert_eq!(first.as_deref(), Some("a"));
        assert_eq!(second.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_deliver_to_closed_queue() {
        let (outbox, rx) = Outbox::channel(ConnectionId::from_raw(4), 1);
        drop(rx);
        assert!(outbox.is_closed());

        let err = outbox
            .deliver(Frame::from("a"), DEADLINE)
            .await
            .expect_err("closed");
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
