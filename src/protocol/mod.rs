//! WebSocket protocol message types.
//!
//! This module defines the message format for communication between
//! the page (client) and the backend service (server).
//!
//! # Protocol Overview
//!
//! | Message Kind | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Client → Server | Single-shot call |
//! | `RequestStream` | Client → Server | Subscribe to a topic |
//! | `Response` | Server → Client | Answer to `Request` (exactly once) |
//! | `Push` | Server → Client | Stream event (any number of times) |
//!
//! The server never originates a `Request`. Identifiers are generated by
//! the client and echoed back unchanged.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | [`Envelope`] and [`MessageKind`] |
//! | `frame` | Text framing and keep-alive sentinel |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope and kind types.
pub mod envelope;

/// Text frame encoding.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{Envelope, MessageKind};
pub use frame::{KEEP_ALIVE_TOKEN, OPEN_PAGE_NAME, WireFormat, is_keep_alive};
