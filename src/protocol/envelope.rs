//! Inbound envelope types and decoding.
//!
//! # Format
//!
//! ```json
//! { "type": "authenticate", "data": { "token": "secret" } }
//! { "type": "subscribe",    "data": { "channels": [7, "news"] } }
//! { "type": "publish",      "data": { "channel": 7, "payload": { ... } } }
//! { "type": "ping" }
//! ```
//!
//! Older clients use `authentication`, `bindings` and `message` as tags, put
//! the subscription list under `data.bindings`, and publish with a top-level
//! `channel` whose `data` is the payload itself. Both shapes decode to the
//! same [`Envelope`].

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::identifiers::ChannelId;

use super::ResponseKind;

// ============================================================================
// Envelope
// ============================================================================

/// A decoded inbound unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Present a token for the shared secret.
    Authenticate {
        /// Candidate secret.
        token: String,
    },
    /// Replace the connection's subscription set.
    Subscribe {
        /// Channels in the order the client listed them, duplicates removed.
        channels: Vec<ChannelId>,
    },
    /// Relay a payload to subscribers of a channel.
    Publish(Publication),
    /// Query connection state.
    Ping,
    /// Missing or unknown `type`. Dropped without a response.
    Unrecognized {
        /// The tag as sent, if it was a string.
        kind: Option<String>,
    },
}

impl Envelope {
    /// Returns the response category for this envelope.
    #[must_use]
    pub const fn response_kind(&self) -> ResponseKind {
        match self {
            Self::Authenticate { .. } => ResponseKind::Authentication,
            Self::Subscribe { .. } => ResponseKind::Bindings,
            Self::Publish(_) => ResponseKind::Message,
            Self::Ping => ResponseKind::Ping,
            Self::Unrecognized { .. } => ResponseKind::Error,
        }
    }
}

/// Payload published to a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    /// Target channel.
    pub channel: ChannelId,
    /// Application payload, relayed verbatim.
    pub payload: Value,
    /// Per-message token, when the client sent one.
    pub token: Option<String>,
}

// ============================================================================
// DecodeError
// ============================================================================

/// Inbound unit was not a valid envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {category} message: {reason}")]
pub struct DecodeError {
    /// Category of the request, or [`ResponseKind::Error`] when unknown.
    pub category: ResponseKind,
    /// What was wrong.
    pub reason: String,
}

impl DecodeError {
    /// Creates a decode error.
    #[inline]
    pub fn new(category: ResponseKind, reason: impl Into<String>) -> Self {
        Self {
            category,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Raw Shapes
// ============================================================================

/// Outer object before the tag is interpreted.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type", default)]
    kind: Option<Value>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    channel: Option<Value>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Deserialize)]
struct AuthenticateData {
    token: String,
}

#[derive(Deserialize)]
struct SubscribeData {
    #[serde(alias = "bindings")]
    channels: Vec<ChannelId>,
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes one inbound unit.
///
/// # Errors
///
/// Returns [`DecodeError`] if the unit is empty, larger than `max_size`
/// bytes, not a JSON object, or a recognised type with invalid data.
/// A missing or unknown `type` is not an error; it yields
/// [`Envelope::Unrecognized`].
pub fn decode(raw: &str, max_size: usize) -> Result<Envelope, DecodeError> {
    if raw.len() > max_size {
        return Err(DecodeError::new(
            ResponseKind::Error,
            format!("message exceeds {max_size} bytes"),
        ));
    }
    if raw.trim().is_empty() {
        return Err(DecodeError::new(ResponseKind::Error, "empty message"));
    }

    let value: Value = serde_json::from_str(raw)
        .map_err(|e| DecodeError::new(ResponseKind::Error, format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(DecodeError::new(
            ResponseKind::Error,
            "message must be a JSON object",
        ));
    }

    let raw: RawEnvelope = serde_json::from_value(value)
        .map_err(|e| DecodeError::new(ResponseKind::Error, e.to_string()))?;

    let kind = match raw.kind {
        Some(Value::String(kind)) => kind,
        _ => return Ok(Envelope::Unrecognized { kind: None }),
    };

    match kind.as_str() {
        "authenticate" | "authentication" => {
            let data: AuthenticateData = serde_json::from_value(raw.data)
                .map_err(|e| DecodeError::new(ResponseKind::Authentication, e.to_string()))?;
            Ok(Envelope::Authenticate { token: data.token })
        }
        "subscribe" | "bindings" => {
            let data: SubscribeData = serde_json::from_value(raw.data)
                .map_err(|e| DecodeError::new(ResponseKind::Bindings, e.to_string()))?;
            let mut channels: Vec<ChannelId> = Vec::with_capacity(data.channels.len());
            for channel in data.channels {
                if !channels.contains(&channel) {
                    channels.push(channel);
                }
            }
            Ok(Envelope::Subscribe { channels })
        }
        "publish" | "message" => decode_publication(raw.data, raw.channel, raw.token),
        "ping" => Ok(Envelope::Ping),
        _ => Ok(Envelope::Unrecognized { kind: Some(kind) }),
    }
}

/// Extracts channel, payload and token from either publish shape.
fn decode_publication(
    data: Value,
    top_level_channel: Option<Value>,
    top_level_token: Option<String>,
) -> Result<Envelope, DecodeError> {
    let malformed = |reason: String| DecodeError::new(ResponseKind::Message, reason);

    let (channel, payload, token) = match top_level_channel {
        // Legacy shape: `data` is the payload.
        Some(channel) => (channel, data, top_level_token),
        None => {
            let Value::Object(mut fields) = data else {
                return Err(malformed("publish requires data.channel".to_string()));
            };
            let channel = fields
                .remove("channel")
                .ok_or_else(|| malformed("publish requires data.channel".to_string()))?;
            let token = match fields.remove("token") {
                Some(Value::String(token)) => Some(token),
                Some(_) => return Err(malformed("data.token must be a string".to_string())),
                None => top_level_token,
            };
            let payload = fields
                .remove("payload")
                .unwrap_or_else(|| Value::Object(fields));
            (channel, payload, token)
        }
    };

    let channel: ChannelId =
        serde_json::from_value(channel).map_err(|e| malformed(format!("invalid channel: {e}")))?;

    Ok(Envelope::Publish(Publication {
        channel,
        payload,
        token,
    }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    const MAX: usize = 64 * 1024;

    #[test]
    fn test_decode_authenticate() {
        let envelope = decode(r#"{"type":"authenticate","data":{"token":"s3cret"}}"#, MAX)
            .expect("decode");
        assert_eq!(
            envelope,
            Envelope::Authenticate {
                token: "s3cret".to_string()
            }
        );
    }

    #[test]
    fn test_decode_legacy_authentication_tag() {
        let envelope = decode(r#"{"type":"authentication","data":{"token":"t"}}"#, MAX)
            .expect("decode");
        assert!(matches!(envelope, Envelope::Authenticate { .. }));
    }

    #[test]
    fn test_decode_subscribe_dedups_and_normalises() {
        let envelope = decode(
            r#"{"type":"subscribe","data":{"channels":[7,"news","7",7]}}"#,
            MAX,
        )
        .expect("decode");
        assert_eq!(
            envelope,
            Envelope::Subscribe {
                channels: vec![ChannelId::from(7), ChannelId::new("news").expect("channel")]
            }
        );
    }

    #[test]
    fn test_decode_legacy_bindings() {
        let envelope =
            decode(r#"{"type":"bindings","data":{"bindings":[3]}}"#, MAX).expect("decode");
        assert_eq!(
            envelope,
            Envelope::Subscribe {
                channels: vec![ChannelId::from(3)]
            }
        );
    }

    #[test]
    fn test_decode_publish_with_payload_field() {
        let envelope = decode(
            r#"{"type":"publish","data":{"channel":7,"payload":{"x":1},"token":"t"}}"#,
            MAX,
        )
        .expect("decode");
        assert_eq!(
            envelope,
            Envelope::Publish(Publication {
                channel: ChannelId::from(7),
                payload: json!({"x": 1}),
                token: Some("t".to_string()),
            })
        );
    }

    #[test]
    fn test_decode_publish_inline_payload() {
        let envelope = decode(
            r#"{"type":"publish","data":{"channel":"a","text":"hi"}}"#,
            MAX,
        )
        .expect("decode");
        let Envelope::Publish(publication) = envelope else {
            panic!("expected publish");
        };
        assert_eq!(publication.payload, json!({"text": "hi"}));
        assert_eq!(publication.token, None);
    }

    #[test]
    fn test_decode_legacy_message() {
        let envelope = decode(
            r#"{"type":"message","channel":7,"token":"t","data":{"channel":"inner","v":2}}"#,
            MAX,
        )
        .expect("decode");
        let Envelope::Publish(publication) = envelope else {
            panic!("expected publish");
        };
        assert_eq!(publication.channel, ChannelId::from(7));
        assert_eq!(publication.payload, json!({"channel": "inner", "v": 2}));
        assert_eq!(publication.token.as_deref(), Some("t"));
    }

    #[test]
    fn test_decode_ping_without_data() {
        assert_eq!(decode(r#"{"type":"ping"}"#, MAX).expect("decode"), Envelope::Ping);
    }

    #[test]
    fn test_unknown_and_missing_tags_are_unrecognized() {
        assert_eq!(
            decode(r#"{"type":"shout","data":{}}"#, MAX).expect("decode"),
            Envelope::Unrecognized {
                kind: Some("shout".to_string())
            }
        );
        assert_eq!(
            decode(r#"{"data":{}}"#, MAX).expect("decode"),
            Envelope::Unrecognized { kind: None }
        );
        assert_eq!(
            decode(r#"{"type":5}"#, MAX).expect("decode"),
            Envelope::Unrecognized { kind: None }
        );
    }

    #[test]
    fn test_malformed_units() {
        let err = decode("{not json", MAX).unwrap_err();
        assert_eq!(err.category, ResponseKind::Error);

        let err = decode("[1,2]", MAX).unwrap_err();
        assert_eq!(err.category, ResponseKind::Error);

        let err = decode("   ", MAX).unwrap_err();
        assert_eq!(err.category, ResponseKind::Error);

        let err = decode(r#"{"type":"authenticate","data":{}}"#, MAX).unwrap_err();
        assert_eq!(err.category, ResponseKind::Authentication);

        let err = decode(r#"{"type":"subscribe","data":{"channels":[true]}}"#, MAX).unwrap_err();
        assert_eq!(err.category, ResponseKind::Bindings);

        let err = decode(r#"{"type":"publish","data":{"payload":1}}"#, MAX).unwrap_err();
        assert_eq!(err.category, ResponseKind::Message);
    }

    #[test]
    fn test_oversized_unit() {
        let raw = format!(r#"{{"type":"ping","pad":"{}"}}"#, "x".repeat(100));
        let err = decode(&raw, 64).unwrap_err();
        assert!(err.reason.contains("exceeds 64 bytes"));
    }
}
