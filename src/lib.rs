//! Service link - reconnecting request/stream channel between a page and
//! a local backend service.
//!
//! The page talks to the backend over a WebSocket. Every message is a
//! JSON envelope that carries an identifier, a kind, an operation name and
//! a payload. Identifiers correlate responses with requests and pushes
//! with stream subscriptions.
//!
//! # Architecture
//!
//! - **Transport**: owns the socket, reconnects with a fixed delay, hides
//!   keep-alive frames, emits connected/message/disconnected events
//! - **Connection**: correlates `Response`/`Push` envelopes with pending
//!   requests and live streams
//! - **Client / PageListener**: typed façade used by page logic
//! - **Server**: backend side used by tests and embedders
//!
//! Key rules:
//!
//! - A request resolves exactly once, with a response or an error
//! - A stream receives pushes in arrival order until dropped
//! - The server never sends `Request`/`RequestStream`
//!
//! # Quick Start
//!
//! ```no_run
//! use serde::Deserialize;
//! use service_link::{Client, Result};
//!
//! #[derive(Deserialize)]
//! struct VersionInfo {
//!     installed: bool,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder().port(8888).connect().await?;
//!
//!     let info: VersionInfo = client.request("VersionInfo", "v").await?;
//!     println!("installed: {}", info.installed);
//!
//!     client.request_stream("OpenPageStream", "", |url: Result<String>| {
//!         if let Ok(url) = url {
//!             println!("open {url}");
//!         }
//!     })?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Client`], [`PageListener`] and their configuration |
//! | [`connection`] | Correlating router over a transport |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Message identifiers |
//! | [`protocol`] | Envelope and frame types |
//! | [`transport`] | Socket, in-memory and server transports |

// ============================================================================
// Modules
// ============================================================================

/// Page-facing API.
///
/// Use [`Client::builder()`] to create a configured client.
pub mod client;

/// Request/stream correlation.
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Message identifiers.
pub mod identifiers;

/// Envelope and frame types.
pub mod protocol;

/// Transport layer.
///
/// Reconnecting WebSocket client, in-memory double and backend server.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Client, ClientBuilder, LinkOptions, PageListener};

// Connection types
pub use connection::{Channel, Connection, ConnectionSettings, MAX_PENDING_REQUESTS};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::MessageId;

// Protocol types
pub use protocol::{Envelope, MessageKind, WireFormat};

// Transport types
pub use transport::{
    Handler, MemoryTransport, Responder, Server, SocketConfig, Transport, TransportEvent,
    WebSocketTransport, handler_fn,
};
