//! Request/response correlation and stream routing.
//!
//! [`Connection`] sits on top of a [`Transport`] and turns its frames into
//! resolved requests and stream callbacks.
//!
//! # Routing
//!
//! | Inbound kind | Action |
//! |--------------|--------|
//! | `Response` | resolve and remove the pending request with that id |
//! | `Push` | invoke the stream callback with that id (entry kept) |
//! | `Request` / `RequestStream` | protocol violation |
//!
//! Unmatched ids and undecodable frames are protocol violations too. They
//! are logged, counted and passed to the `on_violation` hook; the link keeps
//! running.
//!
//! # Reconnects
//!
//! - Pending requests fail with [`Error::ConnectionClosed`] when the socket
//!   drops. They are never re-sent.
//! - Streams survive. After a reconnect their `RequestStream` envelopes are
//!   re-sent with the original id unless disabled in [`ConnectionSettings`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::MessageId;
use crate::protocol::{Envelope, MessageKind, OPEN_PAGE_NAME};
use crate::transport::{Transport, TransportEvent, call_guarded};

// ============================================================================
// Constants
// ============================================================================

/// Maximum pending requests before rejecting new ones.
pub const MAX_PENDING_REQUESTS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to response channels.
type PendingMap = FxHashMap<MessageId, oneshot::Sender<Result<Value>>>;

/// Map of stream IDs to subscriptions.
type StreamMap = FxHashMap<MessageId, StreamEntry>;

/// Stream callback type.
///
/// Called once per `Push`, in arrival order, with the unchanged payload.
pub type StreamCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Protocol violation hook type.
pub type ViolationHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// One live subscription.
struct StreamEntry {
    name: String,
    data: Value,
    callback: StreamCallback,
    /// Whether the subscription was announced with `RequestStream`.
    announced: bool,
    /// Announced on a socket that has since closed.
    stale: bool,
}

// ============================================================================
// ConnectionSettings
// ============================================================================

/// Which framing the underlying channel carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Channel {
    /// JSON envelopes.
    #[default]
    Correlated,
    /// Bare strings, routed to the open-page stream.
    OpenPage,
}

/// Router behavior knobs.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Framing of inbound values.
    pub channel: Channel,
    /// Re-send `RequestStream` for live streams after a reconnect.
    pub resubscribe_streams: bool,
    /// Fail requests not answered within this duration.
    pub request_timeout: Option<Duration>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            channel: Channel::Correlated,
            resubscribe_streams: true,
            request_timeout: None,
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Correlating router over one [`Transport`].
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync`; clones share the same maps and transport.
#[derive(Clone)]
pub struct Connection {
    transport: Arc<dyn Transport>,
    router: Arc<Router>,
    request_timeout: Option<Duration>,
}

/// State shared with the transport handler.
struct Router {
    channel: Channel,
    resubscribe_streams: bool,
    pending: Mutex<PendingMap>,
    streams: Mutex<StreamMap>,
    violations: AtomicU64,
    on_violation: RwLock<Option<ViolationHandler>>,
}

impl Connection {
    /// Creates a connection with default settings.
    ///
    /// Installs itself as the transport's handler.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_settings(transport, ConnectionSettings::default())
    }

    /// Creates a connection with explicit settings.
    ///
    /// Installs itself as the transport's handler.
    #[must_use]
    pub fn with_settings(transport: Arc<dyn Transport>, settings: ConnectionSettings) -> Self {
        let router = Arc::new(Router {
            channel: settings.channel,
            resubscribe_streams: settings.resubscribe_streams,
            pending: Mutex::new(PendingMap::default()),
            streams: Mutex::new(StreamMap::default()),
            violations: AtomicU64::new(0),
            on_violation: RwLock::new(None),
        });

        let handler_router = Arc::clone(&router);
        let handler_transport: Weak<dyn Transport> = Arc::downgrade(&transport);
        transport.set_handler(Arc::new(move |event: TransportEvent| {
            handler_router.handle_event(event, &handler_transport);
        }));

        Self {
            transport,
            router,
            request_timeout: settings.request_timeout,
        }
    }

    /// Sends a `Request` and waits for its `Response`.
    ///
    /// Without a configured timeout this waits until the response arrives
    /// or the socket drops.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] / [`Error::NullPayload`] from the transport
    /// - [`Error::TooManyPending`] if the pending cap is reached
    /// - [`Error::ConnectionClosed`] if the socket drops before the response
    /// - [`Error::RequestTimeout`] if a timeout is configured and expires
    pub async fn request(&self, name: impl Into<String>, data: Value) -> Result<Value> {
        self.request_with_id(MessageId::generate(), name, data).await
    }

    /// Like [`request`](Self::request) with a caller-chosen identifier.
    ///
    /// A colliding pending entry is overwritten; its caller then sees
    /// [`Error::ConnectionClosed`].
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request).
    pub async fn request_with_id(
        &self,
        id: MessageId,
        name: impl Into<String>,
        data: Value,
    ) -> Result<Value> {
        let response_rx = self.start_request(id.clone(), name.into(), data)?;

        let Some(request_timeout) = self.request_timeout else {
            return response_rx.await.map_err(|_| Error::ConnectionClosed)?;
        };

        match timeout(request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.router.remove_abandoned(&id);
                Err(Error::request_timeout(id, request_timeout.as_millis() as u64))
            }
        }
    }

    /// Sends a `RequestStream` and routes every later `Push` to `on_event`.
    ///
    /// The subscription lives until [`drop_stream`](Self::drop_stream) or
    /// the end of the connection.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] / [`Error::NullPayload`] from the transport;
    ///   no subscription is kept in that case
    pub fn request_stream<F>(
        &self,
        name: impl Into<String>,
        data: Value,
        on_event: F,
    ) -> Result<MessageId>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let id = MessageId::generate();
        self.request_stream_with_id(id.clone(), name, data, on_event)?;
        Ok(id)
    }

    /// Like [`request_stream`](Self::request_stream) with a caller-chosen identifier.
    ///
    /// # Errors
    ///
    /// Same as [`request_stream`](Self::request_stream).
    pub fn request_stream_with_id<F>(
        &self,
        id: MessageId,
        name: impl Into<String>,
        data: Value,
        on_event: F,
    ) -> Result<()>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let name = name.into();
        let envelope = Envelope::request_stream(id.clone(), name.clone(), data.clone());
        let value = envelope.to_value()?;

        let entry = StreamEntry {
            name,
            data,
            callback: Arc::new(on_event),
            announced: true,
            stale: false,
        };

        let previous = self.router.streams.lock().insert(id.clone(), entry);

        if let Err(e) = self.transport.send(&value) {
            let mut streams = self.router.streams.lock();
            match previous {
                Some(previous) => {
                    streams.insert(id, previous);
                }
                None => {
                    streams.remove(&id);
                }
            }
            return Err(e);
        }

        debug!(%id, name = %envelope.name, "Stream subscribed");
        Ok(())
    }

    /// Registers the single open-page handler.
    ///
    /// The open-page channel is a stream under the reserved
    /// [`MessageId::open_page`] id that is never announced to the server.
    /// A second call replaces the handler.
    pub fn on_open_page<F>(&self, on_page: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let entry = StreamEntry {
            name: OPEN_PAGE_NAME.to_string(),
            data: Value::Null,
            callback: Arc::new(on_page),
            announced: false,
            stale: false,
        };
        self.router
            .streams
            .lock()
            .insert(MessageId::open_page(), entry);
    }

    /// Forgets a stream locally. Nothing is sent to the server.
    ///
    /// Returns `true` if the stream existed.
    pub fn drop_stream(&self, id: &MessageId) -> bool {
        let removed = self.router.streams.lock().remove(id).is_some();
        if removed {
            debug!(%id, "Stream dropped");
        }
        removed
    }

    /// Routes one inbound envelope.
    ///
    /// Transports call this through the installed handler; it is public so
    /// hosts can feed envelopes from other sources.
    ///
    /// # Errors
    ///
    /// - [`Error::UnexpectedRequest`] for `Request`/`RequestStream`
    /// - [`Error::UnknownStreamId`] for a `Push` with no stream
    /// - [`Error::UnknownRequestId`] for a `Response` with no pending request
    pub fn dispatch(&self, envelope: Envelope) -> Result<()> {
        self.router.dispatch(envelope)
    }

    /// Sets the hook called for every protocol violation.
    pub fn on_violation<F>(&self, hook: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        *self.router.on_violation.write() = Some(Arc::new(hook));
    }

    /// Returns how many protocol violations were observed.
    #[inline]
    #[must_use]
    pub fn violation_count(&self) -> u64 {
        self.router.violations.load(Ordering::Relaxed)
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.router.pending.lock().len()
    }

    /// Returns the number of live streams.
    #[inline]
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.router.streams.lock().len()
    }

    /// Returns `true` while the transport has an open socket.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Suspends until the transport has an open socket.
    pub async fn wait_connected(&self) {
        self.transport.wait_connected().await;
    }

    /// Stops the transport and fails every pending request.
    pub fn shutdown(&self) {
        self.transport.shutdown();
        self.router.fail_pending();
    }

    /// Registers the pending entry and sends the envelope.
    ///
    /// On send failure the map is restored, including any entry the new one
    /// replaced.
    fn start_request(
        &self,
        id: MessageId,
        name: String,
        data: Value,
    ) -> Result<oneshot::Receiver<Result<Value>>> {
        let envelope = Envelope::request(id.clone(), name, data);
        let value = envelope.to_value()?;
        let (response_tx, response_rx) = oneshot::channel();

        let previous = {
            let mut pending = self.router.pending.lock();
            if pending.len() >= MAX_PENDING_REQUESTS {
                warn!(
                    pending = pending.len(),
                    max = MAX_PENDING_REQUESTS,
                    "Too many pending requests"
                );
                return Err(Error::too_many_pending(MAX_PENDING_REQUESTS));
            }
            pending.insert(id.clone(), response_tx)
        };

        if let Err(e) = self.transport.send(&value) {
            let mut pending = self.router.pending.lock();
            match previous {
                Some(previous) => {
                    pending.insert(id, previous);
                }
                None => {
                    pending.remove(&id);
                }
            }
            return Err(e);
        }

        trace!(%id, name = %envelope.name, "Request sent");
        Ok(response_rx)
    }
}

// ============================================================================
// Router
// ============================================================================

impl Router {
    /// Entry point for every transport event.
    fn handle_event(&self, event: TransportEvent, transport: &Weak<dyn Transport>) {
        match event {
            TransportEvent::Connected => {
                if let Some(transport) = transport.upgrade() {
                    self.resubscribe(transport.as_ref());
                }
            }

            TransportEvent::Message(value) => {
                // Violations are reported inside
                let _ = self.dispatch_value(value);
            }

            TransportEvent::Invalid(err) => self.report(&err),

            TransportEvent::Disconnected => {
                self.mark_streams_stale();
                self.fail_pending();
            }
        }
    }

    /// Decodes a value according to the channel, then dispatches it.
    fn dispatch_value(&self, value: Value) -> Result<()> {
        let envelope = match (self.channel, value) {
            (Channel::OpenPage, Value::String(url)) => {
                Envelope::push(MessageId::open_page(), OPEN_PAGE_NAME, Value::String(url))
            }
            (Channel::OpenPage, other) => {
                let err = Error::malformed_frame(format!("expected page url, got {other}"));
                self.report(&err);
                return Err(err);
            }
            (Channel::Correlated, value) => match Envelope::from_value(value) {
                Ok(envelope) => envelope,
                Err(err) => {
                    self.report(&err);
                    return Err(err);
                }
            },
        };

        self.dispatch(envelope)
    }

    /// Routes an envelope and reports any violation.
    fn dispatch(&self, envelope: Envelope) -> Result<()> {
        let result = self.route(envelope);
        if let Err(ref err) = result {
            self.report(err);
        }
        result
    }

    fn route(&self, envelope: Envelope) -> Result<()> {
        match envelope.kind {
            MessageKind::Request | MessageKind::RequestStream => {
                Err(Error::unexpected_request(envelope.id, envelope.name))
            }

            MessageKind::Push => {
                // Callback runs outside the lock so it may call back into the connection
                let callback = self
                    .streams
                    .lock()
                    .get(&envelope.id)
                    .map(|entry| Arc::clone(&entry.callback));

                let Some(callback) = callback else {
                    return Err(Error::unknown_stream_id(envelope.id));
                };

                trace!(id = %envelope.id, name = %envelope.name, "Push routed");
                let data = envelope.data;
                if !call_guarded("stream callback", || callback(data)) {
                    warn!(id = %envelope.id, name = %envelope.name, "Stream callback panicked");
                }
                Ok(())
            }

            MessageKind::Response => {
                let tx = self.pending.lock().remove(&envelope.id);

                let Some(tx) = tx else {
                    return Err(Error::unknown_request_id(envelope.id));
                };

                trace!(id = %envelope.id, name = %envelope.name, "Response routed");
                // Caller may have given up (timeout); the entry is consumed either way
                let _ = tx.send(Ok(envelope.data));
                Ok(())
            }
        }
    }

    /// Logs, counts and forwards a protocol violation.
    fn report(&self, err: &Error) {
        self.violations.fetch_add(1, Ordering::Relaxed);
        error!(error = %err, "Protocol violation");

        let hook = self.on_violation.read().clone();
        if let Some(hook) = hook {
            call_guarded("violation hook", || hook(err));
        }
    }

    /// Fails all pending requests with ConnectionClosed.
    fn fail_pending(&self) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on disconnect");
        }
    }

    /// Removes a timed-out request unless a newer request took its id.
    ///
    /// The timed-out caller has dropped its receiver, so its sender is closed.
    fn remove_abandoned(&self, id: &MessageId) {
        let mut pending = self.pending.lock();
        if pending.get(id).is_some_and(|tx| tx.is_closed()) {
            pending.remove(id);
        }
    }

    /// Flags every announced stream for re-announcement on the next socket.
    fn mark_streams_stale(&self) {
        for entry in self.streams.lock().values_mut() {
            if entry.announced {
                entry.stale = true;
            }
        }
    }

    /// Re-announces every stale stream with its original id.
    ///
    /// Streams subscribed on the new socket are not stale and are skipped.
    fn resubscribe(&self, transport: &dyn Transport) {
        if !self.resubscribe_streams {
            return;
        }

        let envelopes: Vec<Envelope> = self
            .streams
            .lock()
            .iter()
            .filter(|(_, entry)| entry.stale)
            .map(|(id, entry)| {
                Envelope::request_stream(id.clone(), entry.name.clone(), entry.data.clone())
            })
            .collect();

        for envelope in envelopes {
            let sent = envelope
                .to_value()
                .and_then(|value| transport.send(&value));

            match sent {
                Ok(()) => {
                    if let Some(entry) = self.streams.lock().get_mut(&envelope.id) {
                        entry.stale = false;
                    }
                    debug!(id = %envelope.id, name = %envelope.name, "Stream resubscribed");
                }
                Err(e) => warn!(error = %e, id = %envelope.id, "Failed to resubscribe stream"),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready, task};

    use crate::transport::MemoryTransport;

    fn connection() -> (MemoryTransport, Connection) {
        let transport = MemoryTransport::connected();
        let connection = Connection::new(Arc::new(transport.clone()));
        (transport, connection)
    }

    fn sent_id(transport: &MemoryTransport) -> MessageId {
        let sent = transport.take_sent();
        let envelope = Envelope::from_value(sent.last().cloned().expect("sent")).expect("envelope");
        envelope.id
    }

    #[test]
    fn test_constants() {
        assert_eq!(MAX_PENDING_REQUESTS, 100);
    }

    #[test]
    fn test_request_resolves_on_response() {
        let (transport, connection) = connection();

        let mut request = task::spawn(connection.request("VersionInfo", json!("v")));
        assert_pending!(request.poll());
        assert_eq!(connection.pending_count(), 1);

        let id = sent_id(&transport);
        transport.deliver(json!({
            "id": id.as_str(),
            "kind": "Response",
            "name": "VersionInfo",
            "data": {"installed": false}
        }));

        assert!(request.is_woken());
        let value = assert_ready!(request.poll()).expect("response");
        assert_eq!(value, json!({"installed": false}));
        assert_eq!(connection.pending_count(), 0);
    }

    #[test]
    fn test_second_response_is_unknown() {
        let (transport, connection) = connection();

        let mut request = task::spawn(connection.request("VersionInfo", json!("v")));
        assert_pending!(request.poll());
        let id = sent_id(&transport);

        let response = Envelope::response(id.clone(), "VersionInfo", json!(1));
        connection.dispatch(response.clone()).expect("first");
        let _ = assert_ready!(request.poll());

        let err = connection.dispatch(response).unwrap_err();
        assert!(matches!(err, Error::UnknownRequestId { id: ref got } if *got == id));
        assert_eq!(connection.violation_count(), 1);
    }

    #[test]
    fn test_send_while_disconnected_leaves_maps_untouched() {
        let transport = MemoryTransport::new();
        let connection = Connection::new(Arc::new(transport.clone()));

        let mut request = task::spawn(connection.request("VersionInfo", json!("v")));
        let err = assert_ready!(request.poll()).unwrap_err();
        assert!(matches!(err, Error::NotConnected));

        let err = connection
            .request_stream("OpenPageStream", json!(""), |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));

        assert_eq!(connection.pending_count(), 0);
        assert_eq!(connection.stream_count(), 0);
    }

    #[test]
    fn test_null_payload_rejected() {
        let (transport, connection) = connection();
        // Envelopes are never null; the transport rejects raw nulls
        assert!(matches!(transport.send(&Value::Null), Err(Error::NullPayload)));
        assert_eq!(connection.pending_count(), 0);
    }

    #[test]
    fn test_server_request_is_violation() {
        let (_transport, connection) = connection();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            connection.on_violation(move |err| seen.lock().push(err.to_string()));
        }

        let err = connection
            .dispatch(Envelope::request(MessageId::new("s1"), "Ping", json!(null)))
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedRequest { .. }));

        let err = connection
            .dispatch(Envelope::request_stream(MessageId::new("s2"), "Ping", json!(null)))
            .unwrap_err();
        assert!(err.is_protocol_violation());

        assert_eq!(seen.lock().len(), 2);
        assert_eq!(connection.violation_count(), 2);
    }

    #[test]
    fn test_push_routes_in_order() {
        let (transport, connection) = connection();
        let events = Arc::new(Mutex::new(Vec::new()));

        let id = {
            let events = Arc::clone(&events);
            connection
                .request_stream("OpenPageStream", json!(""), move |value| {
                    events.lock().push(value);
                })
                .expect("subscribe")
        };

        let sent = Envelope::from_value(transport.take_sent().remove(0)).expect("envelope");
        assert_eq!(sent.kind, MessageKind::RequestStream);
        assert_eq!(sent.id, id);

        for url in ["a", "", "b"] {
            connection
                .dispatch(Envelope::push(id.clone(), "OpenPageStream", json!(url)))
                .expect("push");
        }

        assert_eq!(*events.lock(), vec![json!("a"), json!(""), json!("b")]);
        assert_eq!(connection.stream_count(), 1);
    }

    #[test]
    fn test_push_unknown_stream() {
        let (_transport, connection) = connection();
        let err = connection
            .dispatch(Envelope::push(MessageId::new("nope"), "x", json!(1)))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownStreamId { .. }));
    }

    #[test]
    fn test_drop_stream() {
        let (_transport, connection) = connection();
        let id = connection
            .request_stream("Ticks", json!(null), |_| {})
            .expect("subscribe");

        assert!(connection.drop_stream(&id));
        assert!(!connection.drop_stream(&id));

        let err = connection
            .dispatch(Envelope::push(id, "Ticks", json!(1)))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownStreamId { .. }));
    }

    #[test]
    fn test_disconnect_fails_pending() {
        let (transport, connection) = connection();

        let mut request = task::spawn(connection.request("Disks", json!("disks")));
        assert_pending!(request.poll());

        transport.close();

        let err = assert_ready!(request.poll()).unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(connection.pending_count(), 0);
    }

    #[test]
    fn test_reconnect_resubscribes_streams() {
        let (transport, connection) = connection();
        let id = connection
            .request_stream("OpenPageStream", json!(""), |_| {})
            .expect("subscribe");
        transport.take_sent();

        transport.close();
        transport.open();

        let resent = transport.take_sent();
        assert_eq!(resent.len(), 1);
        let envelope = Envelope::from_value(resent[0].clone()).expect("envelope");
        assert_eq!(envelope.kind, MessageKind::RequestStream);
        assert_eq!(envelope.id, id);
        assert_eq!(envelope.name, "OpenPageStream");
    }

    #[test]
    fn test_resubscribe_disabled() {
        let transport = MemoryTransport::connected();
        let settings = ConnectionSettings {
            resubscribe_streams: false,
            ..ConnectionSettings::default()
        };
        let connection = Connection::with_settings(Arc::new(transport.clone()), settings);
        connection
            .request_stream("OpenPageStream", json!(""), |_| {})
            .expect("subscribe");
        transport.take_sent();

        transport.close();
        transport.open();
        assert!(transport.sent().is_empty());
        assert_eq!(connection.stream_count(), 1);
    }

    #[test]
    fn test_open_page_channel() {
        let transport = MemoryTransport::connected();
        let settings = ConnectionSettings {
            channel: Channel::OpenPage,
            ..ConnectionSettings::default()
        };
        let connection = Connection::with_settings(Arc::new(transport.clone()), settings);

        let pages = Arc::new(Mutex::new(Vec::new()));
        {
            let pages = Arc::clone(&pages);
            connection.on_open_page(move |value| pages.lock().push(value));
        }

        transport.deliver(json!("https://a"));
        transport.deliver(json!(""));

        // Never announced, so nothing is sent on reconnect
        transport.close();
        transport.open();

        assert_eq!(*pages.lock(), vec![json!("https://a"), json!("")]);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_malformed_frame_counted() {
        let (transport, connection) = connection();
        transport.deliver_text("{broken", crate::protocol::WireFormat::Json);
        transport.deliver(json!({"no": "envelope"}));
        assert_eq!(connection.violation_count(), 2);
    }

    #[test]
    fn test_too_many_pending() {
        let (_transport, connection) = connection();
        let mut requests: Vec<_> = (0..MAX_PENDING_REQUESTS)
            .map(|i| task::spawn(connection.request("Echo", json!(i))))
            .collect();
        for request in &mut requests {
            assert_pending!(request.poll());
        }

        let mut overflow = task::spawn(connection.request("Echo", json!("x")));
        let err = assert_ready!(overflow.poll()).unwrap_err();
        assert!(matches!(err, Error::TooManyPending { max: MAX_PENDING_REQUESTS }));
        assert_eq!(connection.pending_count(), MAX_PENDING_REQUESTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_removes_entry() {
        let transport = MemoryTransport::connected();
        let settings = ConnectionSettings {
            request_timeout: Some(Duration::from_millis(100)),
            ..ConnectionSettings::default()
        };
        let connection = Connection::with_settings(Arc::new(transport.clone()), settings);

        let err = connection
            .request("VersionInfo", json!("v"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequestTimeout { timeout_ms: 100, .. }));
        assert_eq!(connection.pending_count(), 0);
    }

    #[test]
    fn test_server_request_rejected_while_disconnected() {
        let transport = MemoryTransport::new();
        let connection = Connection::new(Arc::new(transport.clone()));

        let err = connection
            .dispatch(Envelope::request(MessageId::new("s1"), "Ping", json!(null)))
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedRequest { .. }));

        transport.open();
        transport.close();
        let err = connection
            .dispatch(Envelope::request_stream(MessageId::new("s2"), "Ping", json!(null)))
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedRequest { .. }));
        assert_eq!(connection.violation_count(), 2);
    }

    #[test]
    fn test_panicking_stream_callback_keeps_routing() {
        let (transport, connection) = connection();
        let bad = connection
            .request_stream("Bad", json!(null), |_| panic!("callback bug"))
            .expect("subscribe");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let good = {
            let seen = Arc::clone(&seen);
            connection
                .request_stream("Good", json!(null), move |value| seen.lock().push(value))
                .expect("subscribe")
        };
        transport.take_sent();

        let push = Envelope::push(bad.clone(), "Bad", json!("boom"));
        transport.deliver(push.to_value().expect("value"));
        connection
            .dispatch(Envelope::push(bad, "Bad", json!("again")))
            .expect("panic is not a violation");
        transport.deliver(
            Envelope::push(good, "Good", json!(1))
                .to_value()
                .expect("value"),
        );

        assert_eq!(*seen.lock(), vec![json!(1)]);
        assert_eq!(connection.violation_count(), 0);
        assert!(connection.is_connected());

        let mut request = task::spawn(connection.request("VersionInfo", json!("v")));
        assert_pending!(request.poll());
        let id = sent_id(&transport);
        transport.deliver(
            Envelope::response(id, "VersionInfo", json!({"installed": true}))
                .to_value()
                .expect("value"),
        );
        assert_eq!(
            assert_ready!(request.poll()).expect("response"),
            json!({"installed": true})
        );
    }

    #[test]
    fn test_panicking_violation_hook() {
        let (_transport, connection) = connection();
        connection.on_violation(|_| panic!("hook bug"));

        for _ in 0..2 {
            let err = connection
                .dispatch(Envelope::push(MessageId::new("nope"), "x", json!(1)))
                .unwrap_err();
            assert!(matches!(err, Error::UnknownStreamId { .. }));
        }
        assert_eq!(connection.violation_count(), 2);
    }

    #[test]
    fn test_stream_subscribed_before_connected_event_sent_once() {
        let (transport, connection) = connection();
        let old = connection
            .request_stream("Old", json!(null), |_| {})
            .expect("subscribe");
        transport.close();
        transport.take_sent();

        // Sends are accepted before the handler sees Connected
        transport.set_connected(true);
        let fresh = connection
            .request_stream("Fresh", json!(null), |_| {})
            .expect("subscribe");
        transport.emit(TransportEvent::Connected);

        let ids: Vec<MessageId> = transport
            .take_sent()
            .into_iter()
            .map(|value| Envelope::from_value(value).expect("envelope").id)
            .collect();
        assert_eq!(ids, vec![fresh, old]);

        // Nothing is stale until the next close
        transport.emit(TransportEvent::Connected);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_failed_send_restores_colliding_request() {
        let (transport, connection) = connection();
        let id = MessageId::new("dup");

        let mut first = task::spawn(connection.request_with_id(id.clone(), "Op", json!(1)));
        assert_pending!(first.poll());

        transport.set_connected(false);
        let mut second = task::spawn(connection.request_with_id(id.clone(), "Op", json!(2)));
        let err = assert_ready!(second.poll()).unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(connection.pending_count(), 1);
        assert!(!first.is_woken());

        connection
            .dispatch(Envelope::response(id, "Op", json!("ok")))
            .expect("response");
        assert_eq!(assert_ready!(first.poll()).expect("response"), json!("ok"));
    }

    #[test]
    fn test_timeout_cleanup_keeps_newer_request() {
        let (_transport, connection) = connection();
        let id = MessageId::new("dup");

        let abandoned = connection
            .start_request(id.clone(), "Op".to_string(), json!(1))
            .expect("first");
        drop(abandoned);
        let mut newer = connection
            .start_request(id.clone(), "Op".to_string(), json!(2))
            .expect("second");

        connection.router.remove_abandoned(&id);
        assert_eq!(connection.pending_count(), 1);

        connection
            .dispatch(Envelope::response(id.clone(), "Op", json!("ok")))
            .expect("response");
        assert_eq!(newer.try_recv().expect("resolved").expect("ok"), json!("ok"));

        // An abandoned entry on its own is removed
        let abandoned = connection
            .start_request(id.clone(), "Op".to_string(), json!(3))
            .expect("third");
        drop(abandoned);
        connection.router.remove_abandoned(&id);
        assert_eq!(connection.pending_count(), 0);
    }
}
