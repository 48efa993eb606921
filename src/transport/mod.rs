//! WebSocket transport layer.
//!
//! This module owns the physical socket between the page (client) and the
//! backend service (server), and hides its failures from the router.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Page (Rust)    │                              │  Backend        │
//! │                 │         WebSocket            │                 │
//! │  Connection     │◄────────────────────────────►│  Server         │
//! │  → Transport    │    127.0.0.1:8888/websocket  │  → Handlers     │
//! │                 │    127.0.0.1:8888/onopenpage │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Transport Lifecycle
//!
//! 1. `WebSocketTransport::spawn` - Start the connect loop
//! 2. `TransportEvent::Connected` - Socket open, sends accepted
//! 3. `TransportEvent::Message` - One per decoded inbound frame
//! 4. `TransportEvent::Disconnected` - Socket lost, loop retries after a fixed delay
//! 5. `Transport::shutdown` - Stop the loop
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `websocket` | Reconnecting WebSocket client with heartbeat |
//! | `memory` | In-process transport for tests |
//! | `server` | Backend WebSocket server and handler dispatch |

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{error, trace};

use crate::error::{Error, Result};

// ============================================================================
// Submodules
// ============================================================================

/// In-process transport.
pub mod memory;

/// Backend WebSocket server.
pub mod server;

/// Reconnecting WebSocket client.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use memory::MemoryTransport;
pub use server::{FnHandler, Handler, Responder, Server, handler_fn};
pub use websocket::{SocketConfig, WebSocketTransport};

// ============================================================================
// TransportEvent
// ============================================================================

/// Notification from a transport to its single registered handler.
#[derive(Debug)]
pub enum TransportEvent {
    /// A socket was opened; sends now succeed.
    Connected,
    /// A decoded inbound frame.
    Message(Value),
    /// An inbound frame that could not be decoded.
    Invalid(Error),
    /// The socket was lost; sends fail until the next `Connected`.
    Disconnected,
}

/// Handler callback type.
///
/// Called for every [`TransportEvent`], in order, from the transport's task.
pub type TransportHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;

// ============================================================================
// Transport
// ============================================================================

/// A message channel that may drop and come back.
///
/// Implementations keep at most one socket open and report its state
/// through the registered [`TransportHandler`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Serializes and writes a value.
    ///
    /// Never queues: a send during an outage fails.
    ///
    /// # Errors
    ///
    /// - [`Error::NullPayload`] if `value` is null
    /// - [`Error::NotConnected`] if no socket is open
    fn send(&self, value: &Value) -> Result<()>;

    /// Replaces the inbound handler.
    fn set_handler(&self, handler: TransportHandler);

    /// Returns `true` while a socket is open.
    fn is_connected(&self) -> bool;

    /// Suspends until a socket is open.
    async fn wait_connected(&self);

    /// Closes the socket and stops reconnecting.
    fn shutdown(&self);
}

// ============================================================================
// HandlerSlot
// ============================================================================

/// Single replaceable handler shared by transport implementations.
///
/// The handler is cloned out before it runs, so it may call back into the
/// transport.
#[derive(Default)]
pub(crate) struct HandlerSlot {
    inner: RwLock<Option<TransportHandler>>,
}

impl HandlerSlot {
    pub(crate) fn set(&self, handler: TransportHandler) {
        *self.inner.write() = Some(handler);
    }

    /// Runs the handler on the caller's task.
    ///
    /// A panicking handler is logged and swallowed so the transport loop
    /// keeps its state and keeps reconnecting.
    pub(crate) fn emit(&self, event: TransportEvent) {
        let handler = self.inner.read().clone();
        match handler {
            Some(handler) => {
                call_guarded("transport handler", || handler(event));
            }
            None => trace!(?event, "No transport handler registered"),
        }
    }
}

// ============================================================================
// Panic Guard
// ============================================================================

/// Runs a user callback, turning a panic into an `error!` log.
///
/// Returns `false` if the callback panicked.
pub(crate) fn call_guarded(context: &'static str, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(panic) => {
            error!(context, message = %panic_message(panic.as_ref()), "Callback panicked");
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    #[test]
    fn test_call_guarded() {
        assert!(call_guarded("ok", || {}));
        assert!(!call_guarded("str", || panic!("boom")));
        assert!(!call_guarded("string", || panic!("{}", String::from("boom"))));
    }

    #[test]
    fn test_emit_survives_panicking_handler() {
        let slot = HandlerSlot::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            slot.set(Arc::new(move |event: TransportEvent| {
                let connected = matches!(event, TransportEvent::Connected);
                seen.lock().push(connected);
                if connected {
                    panic!("handler bug");
                }
            }));
        }

        slot.emit(TransportEvent::Connected);
        slot.emit(TransportEvent::Disconnected);
        assert_eq!(*seen.lock(), vec![true, false]);
    }
}
