//! Socket framing.
//!
//! Splits an accepted socket into a stream of [`Inbound`] units and a sink of
//! outbound [`Frame`]s, so the connection loop is the same for every
//! transport.
//!
//! | Transport | Inbound unit | Outbound unit |
//! |-----------|--------------|---------------|
//! | WebSocket | text frame, or binary frame holding UTF-8 | text frame |
//! | TCP | one `\n`-terminated line | one line |
//!
//! An over-long TCP line is skipped and the connection keeps reading. An
//! over-long WebSocket message is reported once and then ends the stream,
//! because the rest of the frame is still on the wire.

// ============================================================================
// Imports
// ============================================================================

use std::future::ready;

use bytes::BytesMut;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::codec::{Decoder, Encoder, Framed, LinesCodec, LinesCodecError};

use crate::error::{Error, Result};
use crate::protocol::Frame;

// ============================================================================
// Inbound
// ============================================================================

/// One item read from a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete unit of text.
    Frame(String),
    /// A unit longer than the framing limit was discarded.
    Oversized,
    /// A binary unit that was not valid UTF-8 was discarded.
    Invalid,
    /// The peer asked to close.
    Close,
}

// ============================================================================
// WebSocket
// ============================================================================

/// WebSocket limits for a relay accepting messages of at most `max_size`
/// bytes.
///
/// Frames and reassembled messages share the limit, so nothing larger is
/// ever buffered.
#[must_use]
pub fn websocket_config(max_size: usize) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(max_size))
        .max_frame_size(Some(max_size))
}

/// Splits a WebSocket into inbound units and an outbound frame sink.
///
/// Ping and pong control frames are answered by the WebSocket layer and never
/// surface here. A message over the configured limit yields
/// [`Inbound::Oversized`] and ends the stream.
pub fn websocket<S>(
    ws: WebSocketStream<S>,
) -> (
    impl Stream<Item = Result<Inbound>> + Send + 'static,
    impl Sink<Frame, Error = Error> + Send + 'static,
)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();

    let sink = sink.with(|frame: Frame| {
        ready(Ok::<_, Error>(Message::Text(frame.to_string().into())))
    });

    let stream = stream
        .filter_map(|message| {
            ready(match message {
                Ok(Message::Text(text)) => Some(Ok(Inbound::Frame(text.as_str().to_owned()))),
                Ok(Message::Binary(bytes)) => Some(Ok(match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Inbound::Frame(text),
                    Err(_) => Inbound::Invalid,
                })),
                Ok(Message::Close(_)) => Some(Ok(Inbound::Close)),
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                Err(WsError::Capacity(_)) => Some(Ok(Inbound::Oversized)),
                Err(e) => Some(Err(Error::from(e))),
            })
        })
        .scan(false, |ended, item| {
            if *ended {
                return ready(None);
            }
            *ended = matches!(item, Ok(Inbound::Oversized));
            ready(Some(item))
        });

    (stream, sink)
}

// ============================================================================
// Lines
// ============================================================================

/// Newline-delimited codec that reports over-long lines instead of failing.
///
/// [`LinesCodec`] already skips to the next newline after an over-long line;
/// this wrapper turns the error into [`Inbound::Oversized`] so the framed
/// stream keeps going.
#[derive(Debug, Clone)]
pub struct LineFraming {
    inner: LinesCodec,
}

impl LineFraming {
    /// Creates a codec accepting lines of at most `max_length` bytes.
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
        }
    }

    fn lift(
        decoded: std::result::Result<Option<String>, LinesCodecError>,
    ) -> std::result::Result<Option<Inbound>, LinesCodecError> {
        match decoded {
            Ok(line) => Ok(line.map(Inbound::Frame)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Inbound::Oversized)),
            Err(e) => Err(e),
        }
    }
}

impl Decoder for LineFraming {
    type Item = Inbound;
    type Error = LinesCodecError;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> std::result::Result<Option<Inbound>, LinesCodecError> {
        Self::lift(self.inner.decode(buf))
    }

    fn decode_eof(
        &mut self,
        buf: &mut BytesMut,
    ) -> std::result::Result<Option<Inbound>, LinesCodecError> {
        Self::lift(self.inner.decode_eof(buf))
    }
}

impl Encoder<Frame> for LineFraming {
    type Error = LinesCodecError;

    fn encode(
        &mut self,
        frame: Frame,
        dst: &mut BytesMut,
    ) -> std::result::Result<(), LinesCodecError> {
        self.inner.encode(&*frame, dst)
    }
}

/// Splits a byte stream into newline-delimited units of at most
/// `max_length` bytes.
///
/// An over-long line yields [`Inbound::Oversized`] and is skipped up to the
/// next newline; the connection stays usable.
pub fn lines<S>(
    io: S,
    max_length: usize,
) -> (
    impl Stream<Item = Result<Inbound>> + Send + 'static,
    impl Sink<Frame, Error = Error> + Send + 'static,
)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = Framed::new(io, LineFraming::new(max_length)).split();

    let sink = sink.sink_map_err(Error::from);
    let stream = stream.map(|item| item.map_err(Error::from));

    (stream, sink)
}

// ============================================================================
// Tests
// ============================================================================
