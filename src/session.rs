//! Per-connection session state machine.
//!
//! Interprets decoded envelopes against a connection's registry entry and
//! decides what to answer and whether to broadcast.
//!
//! # Handshake mode
//!
//! | State | Envelope | Effect | Reply type |
//! |-------|----------|--------|------------|
//! | any | `authenticate` (good token) | authenticated | `authentication` |
//! | any | `authenticate` (bad token) | none | `authentication` (failure) |
//! | any | `subscribe` | replace subscriptions | `bindings` |
//! | any | `ping` | none | `ping` |
//! | unauthenticated | `publish` | none | `message` (failure) |
//! | authenticated | `publish` | broadcast | `sent` |
//!
//! # Per-message mode
//!
//! Every `publish` carries the token. `authenticate` and `subscribe` are
//! refused, so every connection receives every channel.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::config::{AuthMode, Secret};
use crate::error::{Error, Result};
use crate::identifiers::{ChannelId, ConnectionId};
use crate::protocol::{Envelope, Publication, Response, ResponseKind, decode};
use crate::registry::{Registry, Subscriptions};

// ============================================================================
// Constants
// ============================================================================

/// Reply text for any unit that failed to decode.
const MALFORMED_MESSAGE: &str = "Malformed message";

/// Reply text for handshake requests in per-message mode.
const HANDSHAKE_DISABLED: &str = "Handshake disabled";

// ============================================================================
// Outcome
// ============================================================================

/// Result of processing one inbound unit.
///
/// The caller enqueues `reply` on the originating connection first, then
/// broadcasts `publication`, and only then reads the next unit.
#[derive(Debug, Default, PartialEq)]
pub struct Outcome {
    /// Direct answer to the originator, if any.
    pub reply: Option<Response>,
    /// Payload to fan out, if the request was an accepted publish.
    pub publication: Option<Publication>,
}

impl Outcome {
    /// An outcome with a reply and nothing to broadcast.
    #[inline]
    fn reply(response: Response) -> Self {
        Self {
            reply: Some(response),
            publication: None,
        }
    }

    /// An outcome with neither reply nor broadcast.
    #[inline]
    fn silent() -> Self {
        Self::default()
    }
}

// ============================================================================
// SessionMachine
// ============================================================================

/// Applies envelopes to registry state.
///
/// One instance serves every connection of a relay.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    registry: Arc<Registry>,
    secret: Secret,
    mode: AuthMode,
    max_message_size: usize,
}

impl SessionMachine {
    /// Creates a session machine over `registry`.
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        secret: Secret,
        mode: AuthMode,
        max_message_size: usize,
    ) -> Self {
        Self {
            registry,
            secret,
            mode,
            max_message_size,
        }
    }

    /// Returns the authentication mode.
    #[inline]
    #[must_use]
    pub const fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Decodes and applies one inbound unit from `conn`.
    ///
    /// Decode failures and client mistakes are answered through
    /// [`Outcome::reply`] and never returned as errors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotFound`] if `conn` was unregistered
    /// while the unit was in flight.
    pub fn process(&self, conn: ConnectionId, raw: &str) -> Result<Outcome> {
        match decode(raw, self.max_message_size) {
            Ok(envelope) => self.apply(conn, envelope),
            Err(err) => {
                debug!(conn_id = %conn, error = %err, "Malformed message");
                Ok(Outcome::reply(Response::failure(
                    err.category,
                    MALFORMED_MESSAGE,
                )))
            }
        }
    }

    /// Applies an already decoded envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionNotFound`] if `conn` is not registered.
    pub fn apply(&self, conn: ConnectionId, envelope: Envelope) -> Result<Outcome> {
        match self.mode {
            AuthMode::Handshake => self.apply_handshake(conn, envelope),
            AuthMode::PerMessage => self.apply_per_message(conn, envelope),
        }
    }
}

// ============================================================================
// Handshake Mode
// ============================================================================

impl SessionMachine {
    fn apply_handshake(&self, conn: ConnectionId, envelope: Envelope) -> Result<Outcome> {
        match envelope {
            Envelope::Authenticate { token } => self.authenticate(conn, &token),
            Envelope::Subscribe { channels } => self.subscribe(conn, channels),
            Envelope::Ping => self.ping(conn, false),
            Envelope::Publish(publication) => {
                let state = self.registry.get(conn)?;
                if !state.authenticated {
                    debug!(
                        conn_id = %conn,
                        channel = %publication.channel,
                        "Publish rejected: unauthenticated"
                    );
                    return Ok(Outcome::reply(Response::failure(
                        ResponseKind::Message,
                        Error::Unauthenticated.to_string(),
                    )));
                }
                Ok(Self::accept(conn, publication))
            }
            Envelope::Unrecognized { kind } => Ok(Self::ignore(conn, kind)),
        }
    }

    fn authenticate(&self, conn: ConnectionId, token: &str) -> Result<Outcome> {
        if !self.secret.verify(token) {
            // Confirms the connection still exists; state is left as it was.
            self.registry.get(conn)?;
            debug!(conn_id = %conn, "Authentication failed");
            return Ok(Outcome::reply(Response::failure(
                ResponseKind::Authentication,
                Error::AuthenticationFailed.to_string(),
            )));
        }

        self.registry.set_authenticated(conn, true)?;
        debug!(conn_id = %conn, "Authenticated");
        Ok(Outcome::reply(Response::ack(ResponseKind::Authentication)))
    }

    fn subscribe(&self, conn: ConnectionId, channels: Vec<ChannelId>) -> Result<Outcome> {
        let names: Vec<&str> = channels.iter().map(ChannelId::as_str).collect();
        let data = json!({
            "channels": names,
            "response": format!("Successfully binded to {}", names.join(", ")),
        });

        let subscriptions: Subscriptions = channels.iter().cloned().collect();
        self.registry.set_subscriptions(conn, subscriptions)?;
        debug!(conn_id = %conn, count = channels.len(), "Subscriptions replaced");

        Ok(Outcome::reply(Response::ok(ResponseKind::Bindings, data)))
    }
}

// ============================================================================
// Per-message Mode
// ============================================================================

impl SessionMachine {
    fn apply_per_message(&self, conn: ConnectionId, envelope: Envelope) -> Result<Outcome> {
        match envelope {
            Envelope::Authenticate { .. } | Envelope::Subscribe { .. } => {
                let kind = envelope.response_kind();
                debug!(conn_id = %conn, kind = %kind, "Handshake request refused");
                Ok(Outcome::reply(Response::failure(kind, HANDSHAKE_DISABLED)))
            }
            Envelope::Ping => self.ping(conn, true),
            Envelope::Publish(publication) => {
                self.registry.get(conn)?;
                let valid = publication
                    .token
                    .as_deref()
                    .is_some_and(|token| self.secret.verify(token));
                if !valid {
                    debug!(
                        conn_id = %conn,
                        channel = %publication.channel,
                        "Publish rejected: invalid token"
                    );
                    return Ok(Outcome::reply(Response::failure(
                        ResponseKind::Message,
                        Error::AuthenticationFailed.to_string(),
                    )));
                }
                Ok(Self::accept(conn, publication))
            }
            Envelope::Unrecognized { kind } => Ok(Self::ignore(conn, kind)),
        }
    }
}

// ============================================================================
// Shared
// ============================================================================

impl SessionMachine {
    fn ping(&self, conn: ConnectionId, per_message: bool) -> Result<Outcome> {
        let state = self.registry.get(conn)?;
        let data = json!({
            "authenticated": state.authenticated && !per_message,
            "binded": state.is_bound(),
        });
        Ok(Outcome::reply(Response::ok(ResponseKind::Ping, data)))
    }

    fn accept(conn: ConnectionId, publication: Publication) -> Outcome {
        debug!(conn_id = %conn, channel = %publication.channel, "Publish accepted");
        Outcome {
            reply: Some(Response::ack(ResponseKind::Sent)),
            publication: Some(publication),
        }
    }

    fn ignore(conn: ConnectionId, kind: Option<String>) -> Outcome {
        debug!(conn_id = %conn, kind = ?kind, "Unrecognized message type dropped");
        Outcome::silent()
    }
}

// ============================================================================
// Tests
// ============================================================================
