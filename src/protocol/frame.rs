//! Text frame encoding.
//!
//! Two framings share the socket layer:
//!
//! | Format | Used on | Frame contents |
//! |--------|---------|----------------|
//! | [`WireFormat::Json`] | `/websocket` | one JSON [`Envelope`](super::Envelope) |
//! | [`WireFormat::Text`] | `/onopenpage` | a bare string (URL) |
//!
//! Either side may interleave [`KEEP_ALIVE_TOKEN`] frames, which are
//! never decoded.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Sentinel frame sent by the heartbeat.
pub const KEEP_ALIVE_TOKEN: &str = "still-alive";

/// Stream name used for the open-page channel.
pub const OPEN_PAGE_NAME: &str = "OpenPage";

// ============================================================================
// WireFormat
// ============================================================================

/// How values are turned into text frames and back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFormat {
    /// JSON text.
    #[default]
    Json,
    /// Bare strings without JSON wrapping.
    Text,
}

impl WireFormat {
    /// Serializes a value into a text frame.
    ///
    /// In [`WireFormat::Text`] a string value is written as-is; anything
    /// else falls back to its JSON text.
    ///
    /// # Errors
    ///
    /// - [`Error::NullPayload`] if `value` is null
    /// - [`Error::Json`] if serialization fails
    pub fn encode(self, value: &Value) -> Result<String> {
        if value.is_null() {
            return Err(Error::NullPayload);
        }

        match (self, value) {
            (Self::Text, Value::String(text)) => Ok(text.clone()),
            _ => Ok(serde_json::to_string(value)?),
        }
    }

    /// Parses a text frame into a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] if the frame is not valid JSON
    /// or decodes to null.
    pub fn decode(self, text: &str) -> Result<Value> {
        match self {
            Self::Text => Ok(Value::String(text.to_string())),
            Self::Json => {
                let value: Value = serde_json::from_str(text)
                    .map_err(|e| Error::malformed_frame(e.to_string()))?;
                if value.is_null() {
                    return Err(Error::malformed_frame("received null message"));
                }
                Ok(value)
            }
        }
    }
}

/// Returns `true` if the frame is a heartbeat sentinel.
#[inline]
#[must_use]
pub fn is_keep_alive(text: &str) -> bool {
    text == KEEP_ALIVE_TOKEN
}

// ============================================================================
// Tests
// ============================================================================
