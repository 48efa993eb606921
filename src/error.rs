//! Error types for the service link.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use service_link::{Client, Result};
//!
//! async fn example(client: &Client) -> Result<()> {
//!     let info: serde_json::Value = client.request("VersionInfo", "v").await?;
//!     println!("{info}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Local misuse | [`Error::NotConnected`], [`Error::NullPayload`], [`Error::TooManyPending`] |
//! | Protocol | [`Error::MalformedFrame`], [`Error::UnexpectedRequest`], [`Error::UnknownRequestId`], [`Error::UnknownStreamId`] |
//! | Execution | [`Error::RequestTimeout`] |
//! | Server side | [`Error::AlreadyResponded`], [`Error::StreamClosed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::MessageId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when link options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// A single connect attempt failed.
    ///
    /// Only observed by the retry loop; callers never receive it.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// A single connect attempt exceeded its timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The socket closed while a request was pending, or the link was shut down.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Local Misuse
    // ========================================================================
    /// Send attempted while no socket is open.
    #[error("Not connected")]
    NotConnected,

    /// Send attempted with a null payload.
    #[error("Payload is null")]
    NullPayload,

    /// Too many requests are awaiting a response.
    #[error("Too many pending requests (max {max})")]
    TooManyPending {
        /// The configured maximum.
        max: usize,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Inbound frame was null or could not be parsed.
    #[error("Malformed frame: {message}")]
    MalformedFrame {
        /// Description of the parse failure.
        message: String,
    },

    /// The server sent a request toward the client.
    #[error("Unexpected request from server: id={id}, name={name}")]
    UnexpectedRequest {
        /// Identifier carried by the offending envelope.
        id: MessageId,
        /// Name carried by the offending envelope.
        name: String,
    },

    /// A response arrived for an identifier that is not pending.
    #[error("Unknown request id: {id}")]
    UnknownRequestId {
        /// The unmatched identifier.
        id: MessageId,
    },

    /// A push arrived for an identifier with no live stream.
    #[error("Unknown stream id: {id}")]
    UnknownStreamId {
        /// The unmatched identifier.
        id: MessageId,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Request timeout.
    ///
    /// Only returned when a request timeout is configured.
    #[error("Request {id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        id: MessageId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Server Errors
    // ========================================================================
    /// A response was already sent for this request.
    #[error("Response already sent")]
    AlreadyResponded,

    /// The client session behind a responder is gone.
    #[error("Stream closed")]
    StreamClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a too-many-pending error.
    #[inline]
    pub fn too_many_pending(max: usize) -> Self {
        Self::TooManyPending { max }
    }

    /// Creates a malformed frame error.
    #[inline]
    pub fn malformed_frame(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// Creates an unexpected request error.
    #[inline]
    pub fn unexpected_request(id: MessageId, name: impl Into<String>) -> Self {
        Self::UnexpectedRequest {
            id,
            name: name.into(),
        }
    }

    /// Creates an unknown request id error.
    #[inline]
    pub fn unknown_request_id(id: MessageId) -> Self {
        Self::UnknownRequestId { id }
    }

    /// Creates an unknown stream id error.
    #[inline]
    pub fn unknown_stream_id(id: MessageId) -> Self {
        Self::UnknownStreamId { id }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(id: MessageId, timeout_ms: u64) -> Self {
        Self::RequestTimeout { id, timeout_ms }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the peer broke the message contract.
    ///
    /// These indicate client/server desynchronization rather than a
    /// network condition.
    #[inline]
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::MalformedFrame { .. }
                | Self::UnexpectedRequest { .. }
                | Self::UnknownRequestId { .. }
                | Self::UnknownStreamId { .. }
        )
    }

    /// Returns `true` if the caller used the link incorrectly.
    #[inline]
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::NullPayload | Self::TooManyPending { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
