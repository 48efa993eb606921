//! Link options.
//!
//! Provides a type-safe description of where the backend lives and how the
//! link behaves when it goes away.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use service_link::LinkOptions;
//!
//! let options = LinkOptions::new()
//!     .with_port(9000)
//!     .with_retry_delay(Duration::from_secs(1))
//!     .with_heartbeat();
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::connection::{Channel, ConnectionSettings};
use crate::error::{Error, Result};
use crate::protocol::WireFormat;
use crate::transport::SocketConfig;
use crate::transport::server::{API_PATH, PAGE_PATH};
use crate::transport::websocket::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RETRY_DELAY,
};

// ============================================================================
// Constants
// ============================================================================

/// Well-known backend port.
pub const DEFAULT_PORT: u16 = 8888;

// ============================================================================
// LinkOptions
// ============================================================================

/// Configuration for a [`Client`](super::Client) or
/// [`PageListener`](super::PageListener).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    /// Host of the backend.
    pub host: String,

    /// Port of the backend.
    pub port: u16,

    /// Delay between connect attempts.
    pub retry_delay: Duration,

    /// Maximum duration of a single connect attempt.
    pub connect_timeout: Duration,

    /// Keep-alive period, if enabled.
    pub heartbeat: Option<Duration>,

    /// Per-request timeout, if enabled.
    pub request_timeout: Option<Duration>,

    /// Re-send stream subscriptions after a reconnect.
    pub resubscribe_streams: bool,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl LinkOptions {
    /// Creates options pointing at `127.0.0.1:8888` with default timings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            retry_delay: DEFAULT_RETRY_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat: None,
            request_timeout: None,
            resubscribe_streams: true,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl LinkOptions {
    /// Sets the backend host.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the backend port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the delay between connect attempts.
    #[inline]
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the maximum duration of a single connect attempt.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Enables the keep-alive with the default 5 second period.
    #[inline]
    #[must_use]
    pub fn with_heartbeat(self) -> Self {
        self.with_heartbeat_interval(DEFAULT_HEARTBEAT_INTERVAL)
    }

    /// Enables the keep-alive with a custom period.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, period: Duration) -> Self {
        self.heartbeat = Some(period);
        self
    }

    /// Fails requests not answered within `request_timeout`.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }

    /// Keeps streams silent after a reconnect instead of re-subscribing.
    #[inline]
    #[must_use]
    pub fn without_resubscribe(mut self) -> Self {
        self.resubscribe_streams = false;
        self
    }
}

// ============================================================================
// Conversion Methods
// ============================================================================

impl LinkOptions {
    /// Checks the options for values the link cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for zero durations or an empty host.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::config("host must not be empty"));
        }
        if self.retry_delay.is_zero() {
            return Err(Error::config("retry delay must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect timeout must be greater than zero"));
        }
        if self.heartbeat.is_some_and(|period| period.is_zero()) {
            return Err(Error::config("heartbeat interval must be greater than zero"));
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::config("request timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Returns the URL of the correlated channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host does not form a valid URL.
    pub fn api_url(&self) -> Result<Url> {
        self.url_for(API_PATH)
    }

    /// Returns the URL of the open-page channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host does not form a valid URL.
    pub fn page_url(&self) -> Result<Url> {
        self.url_for(PAGE_PATH)
    }

    /// Builds the socket config for one channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid.
    pub fn socket_config(&self, channel: Channel) -> Result<SocketConfig> {
        self.validate()?;

        let (url, format) = match channel {
            Channel::Correlated => (self.api_url()?, WireFormat::Json),
            Channel::OpenPage => (self.page_url()?, WireFormat::Text),
        };

        Ok(SocketConfig {
            url,
            format,
            retry_delay: self.retry_delay,
            connect_timeout: self.connect_timeout,
            heartbeat: self.heartbeat,
        })
    }

    /// Builds the router settings for one channel.
    #[must_use]
    pub fn connection_settings(&self, channel: Channel) -> ConnectionSettings {
        ConnectionSettings {
            channel,
            resubscribe_streams: self.resubscribe_streams,
            request_timeout: self.request_timeout,
        }
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        let raw = format!("ws://{}:{}{}", self.host, self.port, path);
        Url::parse(&raw).map_err(|e| Error::config(format!("invalid endpoint {raw}: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
