//! Reconnecting WebSocket client.
//!
//! This module keeps exactly one socket to the backend open, replacing it
//! whenever it fails.
//!
//! # Event Loop
//!
//! The transport spawns a tokio task that handles:
//!
//! - Connect attempts, each bounded by `connect_timeout`
//! - A fixed `retry_delay` after every failed attempt or close (no limit)
//! - Incoming text frames, decoded and handed to the handler
//! - Outgoing frames queued by [`Transport::send`] while open
//! - Optional keep-alive frames, immediately on open and then periodically

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior, interval, sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{KEEP_ALIVE_TOKEN, WireFormat, is_keep_alive};

use super::{HandlerSlot, Transport, TransportEvent, TransportHandler};

// ============================================================================
// Constants
// ============================================================================

/// Delay between connect attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Maximum duration of a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Keep-alive period when the heartbeat is enabled.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How a connected session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Remote close or socket error; reconnect.
    Lost,
    /// Local shutdown; stop.
    Shutdown,
}

// ============================================================================
// SocketConfig
// ============================================================================

/// Settings for one [`WebSocketTransport`].
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Endpoint URL (`ws://`).
    pub url: Url,
    /// Frame encoding.
    pub format: WireFormat,
    /// Delay between connect attempts.
    pub retry_delay: Duration,
    /// Maximum duration of a single connect attempt.
    pub connect_timeout: Duration,
    /// Keep-alive period, if enabled.
    pub heartbeat: Option<Duration>,
}

impl SocketConfig {
    /// Creates a config with default timings and JSON framing.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            format: WireFormat::Json,
            retry_delay: DEFAULT_RETRY_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat: None,
        }
    }
}

// ============================================================================
// WebSocketTransport
// ============================================================================

/// Reconnecting WebSocket client transport.
///
/// Dropping the transport stops its loop.
pub struct WebSocketTransport {
    shared: Arc<Shared>,
}

/// State shared with the event loop task.
struct Shared {
    config: SocketConfig,
    /// Writer queue of the open socket, `None` while disconnected.
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    connected: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    handler: HandlerSlot,
}

impl WebSocketTransport {
    /// Starts the connect loop and returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(config: SocketConfig) -> Self {
        let (connected, _) = watch::channel(false);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            config,
            outgoing: Mutex::new(None),
            connected,
            shutdown,
            handler: HandlerSlot::default(),
        });

        tokio::spawn(Self::run_connect_loop(Arc::clone(&shared), shutdown_rx));

        Self { shared }
    }

    /// Starts the connect loop and waits until the first socket is open.
    ///
    /// Never fails on network errors: it retries until the backend is up.
    pub async fn connect(config: SocketConfig) -> Self {
        let transport = Self::spawn(config);
        transport.wait_connected().await;
        transport
    }

    /// Returns the endpoint this transport connects to.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.shared.config.url
    }

    /// Connect loop: attempt, run session, wait, repeat.
    async fn run_connect_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
        let config = shared.config.clone();
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            trace!(url = %config.url, attempt, "Connecting");

            let outcome = tokio::select! {
                result = timeout(config.connect_timeout, connect_async(config.url.as_str())) => result,
                _ = shutdown_rx.changed() => break,
            };

            match outcome {
                Ok(Ok((socket, _))) => {
                    info!(url = %config.url, attempt, "WebSocket connection established");
                    attempt = 0;

                    let end = Self::run_session(&shared, socket, &mut shutdown_rx).await;
                    shared.mark_disconnected();

                    if end == SessionEnd::Shutdown {
                        break;
                    }
                    debug!(url = %config.url, "Connection closed, reconnecting");
                }

                Ok(Err(e)) => {
                    let err = Error::connection(e.to_string());
                    debug!(error = %err, attempt, "Connect attempt failed");
                }

                Err(_) => {
                    let err = Error::connection_timeout(config.connect_timeout.as_millis() as u64);
                    warn!(error = %err, attempt, "Connect attempt timed out");
                }
            }

            tokio::select! {
                _ = sleep(config.retry_delay) => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        shared.mark_disconnected();
        debug!(url = %config.url, "Connect loop terminated");
    }

    /// Runs one open socket until it closes or shutdown is requested.
    async fn run_session(
        shared: &Shared,
        socket: Socket,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (mut ws_write, mut ws_read) = socket.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel();

        // Writer must be installed before Connected so the handler can send
        *shared.outgoing.lock() = Some(outgoing_tx);
        shared.connected.send_replace(true);
        shared.handler.emit(TransportEvent::Connected);

        let mut heartbeat = shared.config.heartbeat.map(heartbeat_ticker);

        loop {
            tokio::select! {
                // Incoming frames from backend
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => shared.handle_incoming_text(&text),

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            return SessionEnd::Lost;
                        }

                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            return SessionEnd::Lost;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            return SessionEnd::Lost;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Frames queued by send()
                Some(message) = outgoing_rx.recv() => {
                    if let Err(e) = ws_write.send(message).await {
                        warn!(error = %e, "Failed to write frame");
                        return SessionEnd::Lost;
                    }
                }

                // Keep-alive
                _ = next_heartbeat(&mut heartbeat) => {
                    let frame = Message::Text(KEEP_ALIVE_TOKEN.to_string().into());
                    if let Err(e) = ws_write.send(frame).await {
                        warn!(error = %e, "Failed to send keep-alive");
                    } else {
                        trace!("Keep-alive sent");
                    }
                }

                _ = shutdown_rx.changed() => {
                    debug!("Shutdown requested");
                    let _ = ws_write.close().await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}

/// Creates the per-session keep-alive ticker.
///
/// The first tick completes immediately, so a token goes out right after
/// open. Each session gets a fresh ticker; nothing accumulates while the
/// socket is down.
fn heartbeat_ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Resolves on the next heartbeat tick, or never if the heartbeat is off.
async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl Shared {
    /// Decodes one inbound frame and hands it to the handler.
    fn handle_incoming_text(&self, text: &str) {
        if is_keep_alive(text) {
            trace!("Keep-alive received");
            return;
        }

        match self.config.format.decode(text) {
            Ok(value) => self.handler.emit(TransportEvent::Message(value)),
            Err(e) => {
                error!(error = %e, "Dropping malformed frame");
                self.handler.emit(TransportEvent::Invalid(e));
            }
        }
    }

    /// Clears the writer and reports the close once.
    fn mark_disconnected(&self) {
        self.outgoing.lock().take();
        let was_connected = self.connected.send_replace(false);
        if was_connected {
            self.handler.emit(TransportEvent::Disconnected);
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn send(&self, value: &Value) -> Result<()> {
        let text = self.shared.config.format.encode(value)?;

        let outgoing = self.shared.outgoing.lock();
        let Some(tx) = outgoing.as_ref() else {
            return Err(Error::NotConnected);
        };
        tx.send(Message::Text(text.into()))
            .map_err(|_| Error::NotConnected)?;

        trace!(url = %self.shared.config.url, "Frame queued");
        Ok(())
    }

    fn set_handler(&self, handler: TransportHandler) {
        self.shared.handler.set(handler);
    }

    fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    async fn wait_connected(&self) {
        let mut rx = self.shared.connected.subscribe();
        let _ = rx.wait_for(|connected| *connected).await;
    }

    fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================
