//! Backend WebSocket server.
//!
//! This module provides the service side of the link: it accepts pages on
//! the loopback interface and answers their envelopes.
//!
//! # Routes
//!
//! | Path | Behavior |
//! |------|----------|
//! | `/websocket` | Correlated protocol: each `Request`/`RequestStream` is dispatched by `name` to a registered [`Handler`] |
//! | `/onopenpage` | Push-only: every URL passed to [`Server::open_page`] is written as a bare string |
//!
//! # Connection Flow
//!
//! 1. [`Server::bind`] binds to `ip:port` and starts the accept loop
//! 2. A page connects; the upgrade request path selects the route
//! 3. Handlers run as separate tasks and reply through a [`Responder`]
//! 4. [`Server::shutdown`] closes every session and releases the port

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::{from_str, to_string};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, interval};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::MessageId;
use crate::protocol::{Envelope, KEEP_ALIVE_TOKEN, MessageKind, is_keep_alive};

// ============================================================================
// Constants
// ============================================================================

/// Route of the correlated protocol.
pub const API_PATH: &str = "/websocket";

/// Route of the open-page push channel.
pub const PAGE_PATH: &str = "/onopenpage";

/// Outbound envelope queue per session.
const SESSION_QUEUE: usize = 64;

/// Buffered open-page URLs per listener.
const PAGE_QUEUE: usize = 64;

// ============================================================================
// Handler
// ============================================================================

/// Answers envelopes with one `name`.
///
/// Each call runs in its own task.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handles one `Request` or `RequestStream`.
    ///
    /// # Errors
    ///
    /// Errors are logged by the server; nothing is sent to the client.
    async fn handle(&self, request: Envelope, responder: Responder) -> Result<()>;
}

/// [`Handler`] backed by an async closure.
///
/// Created by [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wraps an async closure as a [`Handler`].
///
/// # Example
///
/// ```ignore
/// server.register("VersionInfo", handler_fn(|_req, mut res| async move {
///     res.send(serde_json::json!({"installed": false})).await
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Envelope, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Envelope, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, request: Envelope, responder: Responder) -> Result<()> {
        (self.f)(request, responder).await
    }
}

// ============================================================================
// Responder
// ============================================================================

/// Reply mode of a [`Responder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyMode {
    /// Any number of `Push` envelopes.
    Stream,
    /// One `Response`; the flag records whether it was sent.
    Response(bool),
}

/// Reply channel handed to a [`Handler`].
///
/// For a `Request` it allows exactly one reply; for a `RequestStream` every
/// send becomes a `Push` with the subscription id.
#[derive(Debug)]
pub struct Responder {
    id: MessageId,
    name: String,
    mode: ReplyMode,
    tx: mpsc::Sender<Envelope>,
}

impl Responder {
    /// Creates a responder for an inbound envelope.
    ///
    /// Returns `None` for kinds a client must not send (`Push`, `Response`).
    #[must_use]
    pub fn for_envelope(envelope: &Envelope, tx: mpsc::Sender<Envelope>) -> Option<Self> {
        let mode = match envelope.kind {
            MessageKind::Request => ReplyMode::Response(false),
            MessageKind::RequestStream => ReplyMode::Stream,
            MessageKind::Push | MessageKind::Response => return None,
        };

        Some(Self {
            id: envelope.id.clone(),
            name: envelope.name.clone(),
            mode,
            tx,
        })
    }

    /// Returns the identifier being answered.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Returns `true` if this responder feeds a stream.
    #[inline]
    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.mode == ReplyMode::Stream
    }

    /// Sends a reply.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyResponded`] on a second reply to a `Request`
    /// - [`Error::Json`] if `data` cannot be serialized
    /// - [`Error::StreamClosed`] if the client session is gone
    pub async fn send<T: Serialize>(&mut self, data: T) -> Result<()> {
        let kind = match &mut self.mode {
            ReplyMode::Stream => MessageKind::Push,
            ReplyMode::Response(true) => return Err(Error::AlreadyResponded),
            ReplyMode::Response(sent) => {
                *sent = true;
                MessageKind::Response
            }
        };

        let envelope = Envelope::new(
            self.id.clone(),
            kind,
            self.name.clone(),
            serde_json::to_value(data)?,
        );

        self.tx
            .send(envelope)
            .await
            .map_err(|_| Error::StreamClosed)
    }
}

// ============================================================================
// Server
// ============================================================================

/// Loopback WebSocket server for the backend side of the link.
///
/// # Example
///
/// ```ignore
/// use std::net::{IpAddr, Ipv4Addr};
/// use service_link::transport::{Server, handler_fn};
///
/// let server = Server::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 8888).await?;
/// server.register("VersionInfo", handler_fn(|_req, mut res| async move {
///     res.send("1.0").await
/// }));
/// server.open_page("https://example.com");
/// ```
pub struct Server {
    port: u16,
    shared: Arc<ServerShared>,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// State shared with the accept loop and sessions.
struct ServerShared {
    handlers: RwLock<FxHashMap<String, Arc<dyn Handler>>>,
    pages: broadcast::Sender<String>,
    heartbeat: Option<Duration>,
    sessions: AtomicUsize,
}

// ============================================================================
// Server - Constructor
// ============================================================================

impl Server {
    /// Binds the server and starts the accept loop.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        Self::bind_with_heartbeat(ip, port, None).await
    }

    /// Binds the server with an optional keep-alive on every session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind_with_heartbeat(
        ip: IpAddr,
        port: u16,
        heartbeat: Option<Duration>,
    ) -> Result<Self> {
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        let (pages, _) = broadcast::channel(PAGE_QUEUE);
        let shared = Arc::new(ServerShared {
            handlers: RwLock::new(FxHashMap::default()),
            pages,
            heartbeat,
            sessions: AtomicUsize::new(0),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(Self::accept_loop(
            listener,
            Arc::clone(&shared),
            shutdown_rx,
        ));

        info!(port = actual_port, "Server started");

        Ok(Self {
            port: actual_port,
            shared,
            shutdown,
            accept_task,
        })
    }
}

// ============================================================================
// Server - Public API
// ============================================================================

impl Server {
    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the base WebSocket URL.
    ///
    /// Format: `ws://127.0.0.1:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Returns the number of open sessions on both routes.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.shared.sessions.load(Ordering::SeqCst)
    }

    /// Returns the number of connected open-page listeners.
    #[inline]
    #[must_use]
    pub fn page_listener_count(&self) -> usize {
        self.shared.pages.receiver_count()
    }

    /// Registers the handler for `name`, replacing any previous one.
    pub fn register<H>(&self, name: impl Into<String>, handler: H)
    where
        H: Handler + 'static,
    {
        let name = name.into();
        debug!(%name, "Handler registered");
        self.shared.handlers.write().insert(name, Arc::new(handler));
    }

    /// Pushes a URL to every open-page listener.
    ///
    /// Returns the number of listeners that will receive it.
    pub fn open_page(&self, url: impl Into<String>) -> usize {
        self.shared.pages.send(url.into()).unwrap_or(0)
    }

    /// Closes every session, stops accepting and releases the port.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.accept_task.await {
            warn!(error = %e, "Accept loop panicked");
        }
        info!(port = self.port, "Server stopped");
    }
}

// ============================================================================
// Server - Internal
// ============================================================================

impl Server {
    /// Accept loop; each connection gets its own session task.
    async fn accept_loop(
        listener: TcpListener,
        shared: Arc<ServerShared>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            debug!(?addr, "TCP connection accepted");
                            tokio::spawn(Self::run_session(
                                stream,
                                Arc::clone(&shared),
                                shutdown_rx.clone(),
                            ));
                        }
                        Err(e) => warn!(error = %e, "Accept failed"),
                    }
                }

                _ = shutdown_rx.changed() => break,
            }
        }

        debug!("Accept loop terminated");
    }

    /// Upgrades one connection and runs the route its path selects.
    async fn run_session(
        stream: TcpStream,
        shared: Arc<ServerShared>,
        shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut path = String::new();
        let callback = |request: &Request,
                        response: Response|
         -> std::result::Result<Response, ErrorResponse> {
            path = request.uri().path().to_string();
            Ok(response)
        };

        let socket = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(error = %e, "WebSocket upgrade failed");
                return;
            }
        };

        shared.sessions.fetch_add(1, Ordering::SeqCst);
        debug!(%path, "Session opened");

        let result = match path.as_str() {
            API_PATH => Self::run_api_session(socket, &shared, shutdown_rx).await,
            PAGE_PATH => Self::run_page_session(socket, &shared, shutdown_rx).await,
            _ => {
                warn!(%path, "Unknown route");
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!(error = %e, %path, "Session ended with error");
        }

        shared.sessions.fetch_sub(1, Ordering::SeqCst);
        debug!(%path, "Session closed");
    }

    /// Correlated protocol session.
    async fn run_api_session(
        socket: WebSocketStream<TcpStream>,
        shared: &Arc<ServerShared>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut ws_write, mut ws_read) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Envelope>(SESSION_QUEUE);
        let mut heartbeat = shared.heartbeat.map(interval);

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if is_keep_alive(&text) {
                                trace!("Keep-alive received");
                                continue;
                            }

                            let envelope = match from_str::<Envelope>(&text) {
                                Ok(envelope) => envelope,
                                Err(e) => {
                                    warn!(error = %e, "Failed to parse incoming message");
                                    continue;
                                }
                            };

                            let Some(responder) = Responder::for_envelope(&envelope, tx.clone()) else {
                                warn!(id = %envelope.id, kind = ?envelope.kind, "Received invalid message kind");
                                continue;
                            };

                            shared.dispatch(envelope, responder);
                        }

                        Some(Ok(Message::Close(_))) | None => return Ok(()),

                        Some(Err(e)) => return Err(e.into()),

                        _ => {}
                    }
                }

                Some(envelope) = rx.recv() => {
                    let json = to_string(&envelope)?;
                    ws_write.send(Message::Text(json.into())).await?;
                }

                _ = next_tick(&mut heartbeat) => {
                    ws_write.send(Message::Text(KEEP_ALIVE_TOKEN.to_string().into())).await?;
                }

                _ = shutdown_rx.changed() => {
                    let _ = ws_write.close().await;
                    return Ok(());
                }
            }
        }
    }

    /// Open-page push session: bare strings, no envelopes.
    async fn run_page_session(
        socket: WebSocketStream<TcpStream>,
        shared: &Arc<ServerShared>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut ws_write, mut ws_read) = socket.split();
        let mut pages = shared.pages.subscribe();
        let mut heartbeat = shared.heartbeat.map(interval);

        loop {
            tokio::select! {
                page = pages.recv() => {
                    match page {
                        Ok(url) => ws_write.send(Message::Text(url.into())).await?,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(lagged = n, "Open-page listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    }
                }

                // Inbound frames are only read to notice the close
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Err(e)) => return Err(e.into()),
                        _ => {}
                    }
                }

                _ = next_tick(&mut heartbeat) => {
                    ws_write.send(Message::Text(KEEP_ALIVE_TOKEN.to_string().into())).await?;
                }

                _ = shutdown_rx.changed() => {
                    let _ = ws_write.close().await;
                    return Ok(());
                }
            }
        }
    }
}

impl ServerShared {
    /// Runs the handler registered for the envelope's name.
    fn dispatch(&self, envelope: Envelope, responder: Responder) {
        let handler = self.handlers.read().get(&envelope.name).cloned();

        let Some(handler) = handler else {
            warn!(name = %envelope.name, id = %envelope.id, "No handler registered");
            return;
        };

        trace!(name = %envelope.name, id = %envelope.id, "Dispatching");
        tokio::spawn(async move {
            let name = envelope.name.clone();
            if let Err(e) = handler.handle(envelope, responder).await {
                warn!(error = %e, %name, "Handler failed");
            }
        });
    }
}

/// Resolves on the next tick, or never without a ticker.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================
