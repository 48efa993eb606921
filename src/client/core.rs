//! Client façade.
//!
//! [`Client`] exposes named operations to page logic without leaking the
//! envelope structure.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::connection::{Connection, ConnectionSettings};
use crate::error::{Error, Result};
use crate::identifiers::MessageId;
use crate::transport::Transport;

use super::builder::ClientBuilder;

// ============================================================================
// Client
// ============================================================================

/// Typed request/stream API over the correlated channel.
///
/// Cheap to clone; clones share one connection.
///
/// # Example
///
/// ```ignore
/// let client = Client::builder().connect().await?;
/// let info: VersionInfo = client.request("VersionInfo", "v").await?;
/// ```
#[derive(Clone)]
pub struct Client {
    connection: Connection,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("connected", &self.connection.is_connected())
            .field("pending", &self.connection.pending_count())
            .field("streams", &self.connection.stream_count())
            .finish()
    }
}

// ============================================================================
// Client - Constructors
// ============================================================================

impl Client {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates a client over any transport with default router settings.
    #[must_use]
    pub fn from_transport(transport: Arc<dyn Transport>) -> Self {
        Self::from_connection(Connection::with_settings(
            transport,
            ConnectionSettings::default(),
        ))
    }

    /// Wraps an existing connection.
    #[inline]
    #[must_use]
    pub fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }
}

// ============================================================================
// Client - Operations
// ============================================================================

impl Client {
    /// Calls `name` with `payload` and decodes the response.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no socket is open
    /// - [`Error::ConnectionClosed`] if the socket drops before the response
    /// - [`Error::Json`] if the payload or response does not (de)serialize
    pub async fn request<T, P>(&self, name: &str, payload: P) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let data = serde_json::to_value(payload)?;
        let value = self.connection.request(name, data).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Calls `name` and returns the raw response payload.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request).
    pub async fn request_value<P: Serialize>(&self, name: &str, payload: P) -> Result<Value> {
        let data = serde_json::to_value(payload)?;
        self.connection.request(name, data).await
    }

    /// Subscribes to `name`; `on_event` receives every decoded push.
    ///
    /// A push whose payload does not decode as `T` is delivered as
    /// `Err(Error::Json)`; the stream stays open.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no socket is open
    /// - [`Error::Json`] if the payload does not serialize
    pub fn request_stream<T, P, F>(&self, name: &str, payload: P, on_event: F) -> Result<MessageId>
    where
        T: DeserializeOwned,
        P: Serialize,
        F: Fn(Result<T>) + Send + Sync + 'static,
    {
        let data = serde_json::to_value(payload)?;
        self.connection.request_stream(name, data, move |value| {
            on_event(serde_json::from_value(value).map_err(Error::from));
        })
    }

    /// Forgets a stream locally.
    ///
    /// Returns `true` if the stream existed.
    #[inline]
    pub fn drop_stream(&self, id: &MessageId) -> bool {
        self.connection.drop_stream(id)
    }

    /// Sets the hook called for every protocol violation.
    pub fn on_violation<F>(&self, hook: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.connection.on_violation(hook);
    }

    /// Returns `true` while a socket is open.
    ///
    /// `false` means the page should show its "connecting" state.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Suspends until a socket is open.
    pub async fn wait_connected(&self) {
        self.connection.wait_connected().await;
    }

    /// Returns the underlying connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Stops reconnecting and fails every pending request.
    pub fn shutdown(&self) {
        self.connection.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================
