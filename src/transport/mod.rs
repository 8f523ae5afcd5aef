//! Socket transport layer.
//!
//! Accepts client sockets and turns them into sequences of text units for
//! the session machine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   WebSocket or      ┌──────────────────────────────┐
//! │  Client A   │◄───────────────────►│  reader task ─► session      │
//! └─────────────┘   TCP lines         │  writer task ◄─ outbox       │
//! ┌─────────────┐                     ├──────────────────────────────┤
//! │  Client B   │◄───────────────────►│  reader task ─► session      │
//! └─────────────┘                     │  writer task ◄─ outbox       │
//!                                     └──────────────────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Listener::bind` - Bind the listen address
//! 2. Accept loop spawns one task per socket
//! 3. Socket is framed (WebSocket upgrade, or newline codec)
//! 4. Connection registers, serves units in order, unregisters on exit
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Reader and writer loops for one connection |
//! | `framing` | WebSocket and line framing into [`Inbound`] units |
//! | `server` | Listener binding and accept loop |

// ============================================================================
// Submodules
// ============================================================================

/// Reader and writer loops.
mod connection;

/// Socket framing.
pub mod framing;

/// Listener and accept loop.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use framing::{Inbound, LineFraming};
pub use server::Listener;
