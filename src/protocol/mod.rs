//! Wire envelope types.
//!
//! Every unit on the wire is one JSON object.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`Envelope`] | Client → Relay | `authenticate`, `subscribe`, `publish`, `ping` |
//! | [`Response`] | Relay → Client | Acknowledgement or failure for one request |
//! | Relayed frame | Relay → Peers | `{"success":true,"type":"message","response":<payload>}` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Inbound envelope and its decoder |
//! | `response` | Outbound response and its encoder |

// ============================================================================
// Submodules
// ============================================================================

/// Inbound envelope types and decoding.
pub mod envelope;

/// Outbound response types and encoding.
pub mod response;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{DecodeError, Envelope, Publication, decode};
pub use response::{Body, Response, ResponseKind, encode};

// ============================================================================
// Frame
// ============================================================================

/// One encoded outbound unit.
///
/// Shared by reference count so a fan-out encodes once and every peer queue
/// holds the same allocation.
pub type Frame = std::sync::Arc<str>;
