//! Envelope message type.
//!
//! Every frame on the correlated channel is one [`Envelope`].
//!
//! # Format
//!
//! ```json
//! {
//!   "id": "uuid",
//!   "kind": "Request",
//!   "name": "VersionInfo",
//!   "data": { ... }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::MessageId;

// ============================================================================
// MessageKind
// ============================================================================

/// Envelope kind discriminator.
///
/// | Kind | Direction |
/// |------|-----------|
/// | `Request` | client → server, answered by one `Response` |
/// | `RequestStream` | client → server, answered by any number of `Push` |
/// | `Push` | server → client |
/// | `Response` | server → client |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Single-shot request.
    Request,
    /// Stream subscription.
    RequestStream,
    /// Stream event.
    Push,
    /// Reply to a `Request`.
    Response,
}

impl MessageKind {
    /// Returns `true` for kinds only a client may originate.
    #[inline]
    #[must_use]
    pub const fn is_request(self) -> bool {
        matches!(self, Self::Request | Self::RequestStream)
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// The unit exchanged over the wire.
///
/// `name` and `data` are opaque to the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation token, echoed back by the peer.
    pub id: MessageId,

    /// Envelope kind.
    pub kind: MessageKind,

    /// Operation or stream topic.
    pub name: String,

    /// Opaque payload.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Creates an envelope of any kind.
    #[inline]
    #[must_use]
    pub fn new(id: MessageId, kind: MessageKind, name: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            data,
        }
    }

    /// Creates a `Request` envelope.
    #[inline]
    #[must_use]
    pub fn request(id: MessageId, name: impl Into<String>, data: Value) -> Self {
        Self::new(id, MessageKind::Request, name, data)
    }

    /// Creates a `RequestStream` envelope.
    #[inline]
    #[must_use]
    pub fn request_stream(id: MessageId, name: impl Into<String>, data: Value) -> Self {
        Self::new(id, MessageKind::RequestStream, name, data)
    }

    /// Creates a `Push` envelope.
    #[inline]
    #[must_use]
    pub fn push(id: MessageId, name: impl Into<String>, data: Value) -> Self {
        Self::new(id, MessageKind::Push, name, data)
    }

    /// Creates a `Response` envelope.
    #[inline]
    #[must_use]
    pub fn response(id: MessageId, name: impl Into<String>, data: Value) -> Self {
        Self::new(id, MessageKind::Response, name, data)
    }

    /// Decodes an envelope from an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] if the value is not an envelope.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::malformed_frame(e.to_string()))
    }

    /// Encodes the envelope as a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the payload cannot be serialized.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
