//! Per-connection event loop.
//!
//! # Tasks
//!
//! Each accepted socket runs two tasks:
//!
//! - **Reader** (the connection task itself): reads one unit at a time,
//!   runs it through the session machine, enqueues the reply and awaits any
//!   resulting broadcast before reading the next unit.
//! - **Writer** (spawned): drains the outbox to the socket with a per-write
//!   deadline.
//!
//! Either side ending cancels the connection's close token, which stops the
//! other. The registry entry is removed before the tasks finish.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::error::Elapsed;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{Frame, Response, ResponseKind, encode};
use crate::registry::{Outbox, OutboxReceiver, Registration};
use crate::relay::RelayContext;

use super::framing::Inbound;

// ============================================================================
// Constants
// ============================================================================

/// Reply text for a unit the framing layer discarded.
const MALFORMED_MESSAGE: &str = "Malformed message";

/// How long a closing socket may take to flush.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Types
// ============================================================================

/// Why a reader loop stopped.
#[derive(Debug)]
enum Disconnect {
    /// Peer closed the socket.
    Peer,
    /// The relay closed the connection.
    Relay,
    /// Nothing was read within the idle timeout.
    Idle,
    /// Read or processing failed.
    Failed(Error),
}

// ============================================================================
// Connection
// ============================================================================

/// Runs one connection to completion.
///
/// Registers on entry and unregisters on exit, whatever the reason.
pub(crate) async fn serve<R, W>(ctx: Arc<RelayContext>, addr: SocketAddr, reader: R, writer: W)
where
    R: Stream<Item = Result<Inbound>> + Send,
    W: Sink<Frame, Error = Error> + Send + 'static,
{
    let Registration {
        id,
        outbox,
        inbox,
        closed,
    } = ctx.registry.register();

    debug!(conn_id = %id, %addr, "Connection started");

    let writer_task = tokio::spawn(write_loop(
        id,
        writer,
        inbox,
        closed.clone(),
        ctx.write_timeout,
    ));

    let reason = read_loop(&ctx, id, &outbox, reader, &closed).await;

    match &reason {
        Disconnect::Failed(e) if e.is_connection_error() => {
            debug!(conn_id = %id, error = %e, "Connection dropped");
        }
        Disconnect::Failed(e) => warn!(conn_id = %id, error = %e, "Connection failed"),
        Disconnect::Idle => debug!(conn_id = %id, "Connection idle, closing"),
        Disconnect::Peer | Disconnect::Relay => {
            debug!(conn_id = %id, reason = ?reason, "Connection ended");
        }
    }

    ctx.registry.unregister(id);
    closed.cancel();

    if let Err(e) = writer_task.await {
        warn!(conn_id = %id, error = %e, "Writer task panicked");
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Reads and processes units until the connection ends.
async fn read_loop<R>(
    ctx: &RelayContext,
    conn: ConnectionId,
    outbox: &Outbox,
    reader: R,
    closed: &CancellationToken,
) -> Disconnect
where
    R: Stream<Item = Result<Inbound>>,
{
    let mut reader = pin!(reader);

    loop {
        let next = tokio::select! {
            biased;
            () = closed.cancelled() => return Disconnect::Relay,
            next = next_inbound(reader.as_mut(), ctx.idle_timeout) => next,
        };

        let raw = match next {
            Err(_) => return Disconnect::Idle,
            Ok(None | Some(Ok(Inbound::Close))) => return Disconnect::Peer,
            Ok(Some(Err(e))) => return Disconnect::Failed(e),
            Ok(Some(Ok(discarded @ (Inbound::Oversized | Inbound::Invalid)))) => {
                debug!(conn_id = %conn, unit = ?discarded, "Message discarded");
                let reply = Response::failure(ResponseKind::Error, MALFORMED_MESSAGE);
                if let Err(e) = reply_to(ctx, outbox, &reply).await {
                    return Disconnect::Failed(e);
                }
                continue;
            }
            Ok(Some(Ok(Inbound::Frame(raw)))) => raw,
        };

        trace!(conn_id = %conn, bytes = raw.len(), "Frame received");

        if let Err(e) = dispatch(ctx, conn, outbox, &raw).await {
            return Disconnect::Failed(e);
        }
    }
}

/// Waits for the next inbound item, bounded by the idle timeout if set.
async fn next_inbound<R>(
    mut reader: Pin<&mut R>,
    idle_timeout: Option<Duration>,
) -> std::result::Result<Option<Result<Inbound>>, Elapsed>
where
    R: Stream<Item = Result<Inbound>>,
{
    match idle_timeout {
        Some(limit) => timeout(limit, reader.next()).await,
        None => Ok(reader.next().await),
    }
}

/// Processes one unit: reply first, then fan out.
async fn dispatch(
    ctx: &RelayContext,
    conn: ConnectionId,
    outbox: &Outbox,
    raw: &str,
) -> Result<()> {
    let outcome = ctx.sessions.process(conn, raw)?;

    if let Some(reply) = &outcome.reply {
        reply_to(ctx, outbox, reply).await?;
    }

    if let Some(publication) = outcome.publication {
        ctx.broadcaster
            .broadcast(conn, &publication.channel, publication.payload)
            .await?;
    }

    Ok(())
}

/// Enqueues a direct response on the connection's own outbox.
async fn reply_to(ctx: &RelayContext, outbox: &Outbox, response: &Response) -> Result<()> {
    let frame = encode(response)?;
    outbox.deliver(frame, ctx.write_timeout).await
}

// ============================================================================
// Writer
// ============================================================================

/// Drains the outbox to the socket until the connection closes.
async fn write_loop<W>(
    conn: ConnectionId,
    writer: W,
    mut inbox: OutboxReceiver,
    closed: CancellationToken,
    write_timeout: Duration,
) where
    W: Sink<Frame, Error = Error>,
{
    let mut writer = pin!(writer);
    let mut healthy = true;

    loop {
        let frame = tokio::select! {
            biased;
            () = closed.cancelled() => break,
            frame = inbox.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        match timeout(write_timeout, writer.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(conn_id = %conn, error = %e, "Socket write failed");
                healthy = false;
                break;
            }
            Err(_) => {
                warn!(
                    conn_id = %conn,
                    timeout_ms = write_timeout.as_millis() as u64,
                    "Socket write timed out"
                );
                healthy = false;
                break;
            }
        }
    }

    // Stops the reader if the writer gave up first.
    closed.cancel();
    inbox.close();

    let flush = async {
        if healthy {
            while let Some(frame) = inbox.recv().await {
                writer.feed(frame).await?;
            }
        }
        writer.close().await
    };

    match timeout(CLOSE_TIMEOUT, flush).await {
        Ok(Ok(())) => trace!(conn_id = %conn, "Writer closed"),
        Ok(Err(e)) => trace!(conn_id = %conn, error = %e, "Close failed"),
        Err(_) => trace!(conn_id = %conn, "Close timed out"),
    }
}

// ============================================================================
// Tests
// ============================================================================
