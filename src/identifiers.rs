//! Correlation identifiers.
//!
//! A [`MessageId`] is an opaque token chosen by the sender and echoed back
//! by the peer. The link never interprets it beyond equality.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Reserved identifier of the implicit open-page stream.
const OPEN_PAGE_ID: &str = "open-page";

// ============================================================================
// MessageId
// ============================================================================

/// Opaque correlation token for requests and streams.
///
/// Serialized as a bare JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Creates an identifier from an arbitrary token.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier (UUID v4).
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the reserved identifier of the open-page stream.
    #[inline]
    #[must_use]
    pub fn open_page() -> Self {
        Self(OPEN_PAGE_ID.to_string())
    }

    /// Returns `true` if this is the reserved open-page identifier.
    #[inline]
    #[must_use]
    pub fn is_open_page(&self) -> bool {
        self.0 == OPEN_PAGE_ID
    }

    /// Returns the raw token.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        let a = MessageId::generate();
        let b = MessageId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_page_reserved() {
        assert!(MessageId::open_page().is_open_page());
        assert!(!MessageId::generate().is_open_page());
    }

    #[test]
    fn test_serializes_transparently() {
        let id = MessageId::new("abc");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, r#""abc""#);

        let parsed: MessageId = serde_json::from_str(r#""xyz""#).expect("parse");
        assert_eq!(parsed.as_str(), "xyz");
    }
}
