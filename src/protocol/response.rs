//! Outbound response types.
//!
//! # Format
//!
//! Direct response to the requesting connection:
//!
//! ```json
//! { "success": true, "type": "bindings", "data": { "channels": ["7"] } }
//! ```
//!
//! Relayed payload delivered to peers:
//!
//! ```json
//! { "success": true, "type": "message", "response": { ... } }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::Result;

use super::Frame;

// ============================================================================
// ResponseKind
// ============================================================================

/// Category tag of a response, echoed in its `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Answer to `authenticate`.
    Authentication,
    /// Answer to `subscribe`.
    Bindings,
    /// Answer to a rejected `publish`, and the tag of relayed payloads.
    Message,
    /// Answer to an accepted `publish`.
    Sent,
    /// Answer to `ping`.
    Ping,
    /// Answer to a unit whose category could not be determined.
    Error,
}

impl ResponseKind {
    /// Returns the wire tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Bindings => "bindings",
            Self::Message => "message",
            Self::Sent => "sent",
            Self::Ping => "ping",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Body
// ============================================================================

/// Payload object of a response, keyed by the field it is written under.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Body {
    /// Written as `"data"`. Used for direct responses.
    Data(Value),
    /// Written as `"response"`. Used for relayed payloads.
    Response(Value),
}

// ============================================================================
// Response
// ============================================================================

/// A response sent by the relay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Whether the request succeeded.
    pub success: bool,

    /// Request category.
    #[serde(rename = "type")]
    pub kind: ResponseKind,

    /// Payload object.
    #[serde(flatten)]
    pub body: Body,
}

impl Response {
    /// Creates a successful response carrying `data`.
    #[inline]
    #[must_use]
    pub fn ok(kind: ResponseKind, data: Value) -> Self {
        Self {
            success: true,
            kind,
            body: Body::Data(data),
        }
    }

    /// Creates a successful response with an empty data object.
    #[inline]
    #[must_use]
    pub fn ack(kind: ResponseKind) -> Self {
        Self::ok(kind, Value::Object(Map::new()))
    }

    /// Creates a failure response with `data.error` set to `message`.
    #[inline]
    #[must_use]
    pub fn failure(kind: ResponseKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            kind,
            body: Body::Data(json!({ "error": message.into() })),
        }
    }

    /// Creates the frame relayed to subscribers of a channel.
    #[inline]
    #[must_use]
    pub fn relay(payload: Value) -> Self {
        Self {
            success: true,
            kind: ResponseKind::Message,
            body: Body::Response(payload),
        }
    }

    /// Returns the payload value regardless of which field carries it.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &Value {
        match &self.body {
            Body::Data(v) | Body::Response(v) => v,
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a response into a frame.
///
/// Object keys inside payloads are emitted in sorted order, so the same
/// response always produces the same bytes.
///
/// # Errors
///
/// Returns [`Error::Json`](crate::Error::Json) if serialization fails.
pub fn encode(response: &Response) -> Result<Frame> {
    let json = serde_json::to_string(response)?;
    Ok(Frame::from(json))
}

// ============================================================================
// Tests
// ============================================================================
