//! Open-page listener.
//!
//! The backend announces URLs the page should load on a dedicated socket
//! that carries bare strings. An empty string means "nothing to load".

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, warn};

use crate::connection::{Channel, Connection, ConnectionSettings};
use crate::transport::Transport;

// ============================================================================
// Types
// ============================================================================

type PageHandler = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Default)]
struct PageState {
    current: Mutex<Option<String>>,
    handler: RwLock<Option<PageHandler>>,
}

// ============================================================================
// PageListener
// ============================================================================

/// Receives "open this page" notifications from the backend.
#[derive(Clone)]
pub struct PageListener {
    connection: Connection,
    state: Arc<PageState>,
}

impl fmt::Debug for PageListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageListener")
            .field("connected", &self.connection.is_connected())
            .field("current", &self.current())
            .finish()
    }
}

impl PageListener {
    /// Wraps a connection running on the open-page channel.
    #[must_use]
    pub fn from_connection(connection: Connection) -> Self {
        let state = Arc::new(PageState::default());

        let callback_state = Arc::clone(&state);
        connection.on_open_page(move |value: Value| {
            let Value::String(url) = value else {
                warn!(?value, "Open-page value is not a string");
                return;
            };

            debug!(%url, "Open page");
            if !url.is_empty() {
                *callback_state.current.lock() = Some(url.clone());
            }

            let handler = callback_state.handler.read().clone();
            if let Some(handler) = handler {
                handler(url);
            }
        });

        Self { connection, state }
    }

    /// Creates a listener over any transport carrying bare strings.
    #[must_use]
    pub fn from_transport(transport: Arc<dyn Transport>) -> Self {
        let settings = ConnectionSettings {
            channel: Channel::OpenPage,
            ..ConnectionSettings::default()
        };
        Self::from_connection(Connection::with_settings(transport, settings))
    }

    /// Registers the handler for announced URLs.
    ///
    /// Empty strings are passed through. A second call replaces the handler.
    pub fn on_open_page<F>(&self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        *self.state.handler.write() = Some(Arc::new(handler));
    }

    /// Returns the last non-empty URL announced.
    #[must_use]
    pub fn current(&self) -> Option<String> {
        self.state.current.lock().clone()
    }

    /// Returns `true` while the socket is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Suspends until the socket is open.
    pub async fn wait_connected(&self) {
        self.connection.wait_connected().await;
    }

    /// Returns the underlying connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Stops reconnecting.
    pub fn shutdown(&self) {
        self.connection.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::WireFormat;
    use crate::transport::MemoryTransport;

    fn listener() -> (MemoryTransport, PageListener) {
        let transport = MemoryTransport::connected();
        let listener = PageListener::from_transport(Arc::new(transport.clone()));
        (transport, listener)
    }

    #[test]
    fn test_delivers_urls_in_order() {
        let (transport, listener) = listener();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            listener.on_open_page(move |url| seen.lock().push(url));
        }

        for url in ["http://a", "", "http://b"] {
            transport.deliver_text(url, WireFormat::Text);
        }

        assert_eq!(*seen.lock(), vec!["http://a", "", "http://b"]);
    }

    #[test]
    fn test_current_ignores_empty() {
        let (transport, listener) = listener();
        assert!(listener.current().is_none());

        transport.deliver_text("http://a", WireFormat::Text);
        transport.deliver_text("", WireFormat::Text);
        assert_eq!(listener.current().as_deref(), Some("http://a"));
    }

    #[test]
    fn test_current_without_handler() {
        let (transport, listener) = listener();
        transport.deliver_text("http://a", WireFormat::Text);
        assert_eq!(listener.current().as_deref(), Some("http://a"));
        assert_eq!(listener.connection().violation_count(), 0);
    }

    #[test]
    fn test_keep_alive_not_delivered() {
        let (transport, listener) = listener();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            listener.on_open_page(move |url| seen.lock().push(url));
        }

        transport.deliver_text("still-alive", WireFormat::Text);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_handler_replaced() {
        let (transport, listener) = listener();
        let first = Arc::new(Mutex::new(0));
        let second = Arc::new(Mutex::new(0));
        {
            let first = Arc::clone(&first);
            listener.on_open_page(move |_| *first.lock() += 1);
        }
        {
            let second = Arc::clone(&second);
            listener.on_open_page(move |_| *second.lock() += 1);
        }

        transport.deliver_text("http://a", WireFormat::Text);
        assert_eq!(*first.lock(), 0);
        assert_eq!(*second.lock(), 1);
    }
}
