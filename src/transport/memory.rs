//! In-process transport.
//!
//! [`MemoryTransport`] stands in for the socket in tests and embeddings:
//! it records every sent value and lets the owner inject inbound frames,
//! opens and closes.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::{WireFormat, is_keep_alive};

use super::{HandlerSlot, Transport, TransportEvent, TransportHandler};

// ============================================================================
// MemoryTransport
// ============================================================================

/// Transport double driven by the test.
///
/// Cloning yields another handle to the same transport.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

struct Inner {
    connected: watch::Sender<bool>,
    sent: Mutex<Vec<Value>>,
    handler: HandlerSlot,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Creates a disconnected transport.
    #[must_use]
    pub fn new() -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                connected,
                sent: Mutex::new(Vec::new()),
                handler: HandlerSlot::default(),
            }),
        }
    }

    /// Creates a transport that is already open.
    ///
    /// No `Connected` event is emitted.
    #[must_use]
    pub fn connected() -> Self {
        let transport = Self::new();
        transport.inner.connected.send_replace(true);
        transport
    }

    /// Simulates a socket open.
    pub fn open(&self) {
        self.inner.connected.send_replace(true);
        self.inner.handler.emit(TransportEvent::Connected);
    }

    /// Simulates a socket close.
    pub fn close(&self) {
        let was_connected = self.inner.connected.send_replace(false);
        if was_connected {
            self.inner.handler.emit(TransportEvent::Disconnected);
        }
    }

    /// Flips the connected flag without emitting an event.
    ///
    /// Together with [`emit`](Self::emit) this reproduces the window where
    /// sends are accepted before `Connected` reaches the handler.
    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.send_replace(connected);
    }

    /// Emits a raw event to the handler.
    pub fn emit(&self, event: TransportEvent) {
        self.inner.handler.emit(event);
    }

    /// Delivers an already-decoded inbound value.
    pub fn deliver(&self, value: Value) {
        self.inner.handler.emit(TransportEvent::Message(value));
    }

    /// Delivers a raw inbound text frame, decoding it like a socket would.
    pub fn deliver_text(&self, text: &str, format: WireFormat) {
        if is_keep_alive(text) {
            trace!("Keep-alive frame dropped");
            return;
        }

        let event = match format.decode(text) {
            Ok(value) => TransportEvent::Message(value),
            Err(e) => TransportEvent::Invalid(e),
        };
        self.inner.handler.emit(event);
    }

    /// Returns a copy of every value sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Value> {
        self.inner.sent.lock().clone()
    }

    /// Removes and returns every value sent so far.
    pub fn take_sent(&self) -> Vec<Value> {
        std::mem::take(&mut *self.inner.sent.lock())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn send(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            return Err(Error::NullPayload);
        }
        if !*self.inner.connected.borrow() {
            return Err(Error::NotConnected);
        }

        self.inner.sent.lock().push(value.clone());
        Ok(())
    }

    fn set_handler(&self, handler: TransportHandler) {
        self.inner.handler.set(handler);
    }

    fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    async fn wait_connected(&self) {
        let mut rx = self.inner.connected.subscribe();
        let _ = rx.wait_for(|connected| *connected).await;
    }

    fn shutdown(&self) {
        self.close();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_while_disconnected() {
        let transport = MemoryTransport::new();
        let err = transport.send(&json!({"a": 1})).unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_send_null() {
        let transport = MemoryTransport::connected();
        let err = transport.send(&Value::Null).unwrap_err();
        assert!(matches!(err, Error::NullPayload));
    }

    #[test]
    fn test_records_sent_values() {
        let transport = MemoryTransport::connected();
        transport.send(&json!(1)).expect("send");
        transport.send(&json!(2)).expect("send");

        assert_eq!(transport.take_sent(), vec![json!(1), json!(2)]);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_close_emits_once() {
        let transport = MemoryTransport::connected();
        let count = Arc::new(Mutex::new(0));
        let count_clone = Arc::clone(&count);
        transport.set_handler(Arc::new(move |event: TransportEvent| {
            if matches!(event, TransportEvent::Disconnected) {
                *count_clone.lock() += 1;
            }
        }));

        transport.close();
        transport.close();
        assert_eq!(*count.lock(), 1);
    }

    #[tokio::test]
    async fn test_wait_connected() {
        let transport = MemoryTransport::new();
        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.wait_connected().await })
        };

        transport.open();
        waiter.await.expect("join");
        assert!(transport.is_connected());
    }
}
