//! Builder pattern for link configuration.
//!
//! Provides a fluent API for creating [`Client`] and [`PageListener`]
//! instances.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use service_link::Client;
//!
//! let client = Client::builder()
//!     .port(8888)
//!     .retry_delay(Duration::from_secs(2))
//!     .connect()
//!     .await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::debug;

use crate::connection::{Channel, Connection};
use crate::error::{Error, Result};
use crate::transport::{Transport, WebSocketTransport};

use super::core::Client;
use super::options::LinkOptions;
use super::page::PageListener;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`] or [`PageListener`].
///
/// Use [`Client::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct ClientBuilder {
    options: LinkOptions,
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every option at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: LinkOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the backend host.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.options = self.options.with_host(host);
        self
    }

    /// Sets the backend port.
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.options = self.options.with_port(port);
        self
    }

    /// Sets the delay between connect attempts.
    #[inline]
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.options = self.options.with_retry_delay(delay);
        self
    }

    /// Sets the maximum duration of a single connect attempt.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.options = self.options.with_connect_timeout(connect_timeout);
        self
    }

    /// Enables the keep-alive with the default period.
    #[inline]
    #[must_use]
    pub fn heartbeat(mut self) -> Self {
        self.options = self.options.with_heartbeat();
        self
    }

    /// Enables the keep-alive with a custom period.
    #[inline]
    #[must_use]
    pub fn heartbeat_interval(mut self, period: Duration) -> Self {
        self.options = self.options.with_heartbeat_interval(period);
        self
    }

    /// Fails requests not answered in time.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.options = self.options.with_request_timeout(request_timeout);
        self
    }

    /// Disables stream re-subscription after a reconnect.
    #[inline]
    #[must_use]
    pub fn without_resubscribe(mut self) -> Self {
        self.options = self.options.without_resubscribe();
        self
    }

    /// Returns the options collected so far.
    #[inline]
    #[must_use]
    pub fn link_options(&self) -> &LinkOptions {
        &self.options
    }
}

// ============================================================================
// Build Methods
// ============================================================================

impl ClientBuilder {
    /// Starts connecting in the background and returns immediately.
    ///
    /// The client reports not-connected until the first socket opens.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the options are invalid
    /// - [`Error::Config`] if called outside a Tokio runtime
    pub fn build(self) -> Result<Client> {
        let connection = self.spawn_connection(Channel::Correlated)?;
        Ok(Client::from_connection(connection))
    }

    /// Builds the client and waits for the first socket to open.
    ///
    /// Retries forever; wrap in a timeout to bound the wait.
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build).
    pub async fn connect(self) -> Result<Client> {
        let client = self.build()?;
        client.wait_connected().await;
        Ok(client)
    }

    /// Starts the open-page listener in the background.
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build).
    pub fn build_page_listener(self) -> Result<PageListener> {
        let connection = self.spawn_connection(Channel::OpenPage)?;
        Ok(PageListener::from_connection(connection))
    }

    /// Builds a client over a caller-supplied transport.
    ///
    /// Socket options are ignored; router options still apply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid.
    pub fn build_with_transport(self, transport: Arc<dyn Transport>) -> Result<Client> {
        self.options.validate()?;
        let settings = self.options.connection_settings(Channel::Correlated);
        Ok(Client::from_connection(Connection::with_settings(
            transport, settings,
        )))
    }

    fn spawn_connection(&self, channel: Channel) -> Result<Connection> {
        if Handle::try_current().is_err() {
            return Err(Error::config(
                "no Tokio runtime available. Build the link from within an async context.",
            ));
        }

        let config = self.options.socket_config(channel)?;
        debug!(url = %config.url, ?channel, "Starting link");

        let transport: Arc<dyn Transport> = Arc::new(WebSocketTransport::spawn(config));
        Ok(Connection::with_settings(
            transport,
            self.options.connection_settings(channel),
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================
