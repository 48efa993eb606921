//! Shared utilities for integration tests.
//!
//! - Logging initialization
//! - Polling helper
//! - Loopback server startup

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use service_link::{Client, ClientBuilder, Server};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

/// Retry delay used by test clients.
pub const FAST_RETRY: Duration = Duration::from_millis(50);

/// Upper bound for any single wait in a test.
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing; `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("service_link=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Polls `condition` every few milliseconds until it holds.
///
/// Panics after [`WAIT_LIMIT`].
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(WAIT_LIMIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not met within {WAIT_LIMIT:?}");
}

/// Binds a server on a random loopback port.
pub async fn start_server() -> anyhow::Result<Server> {
    Ok(Server::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?)
}

/// Binds a server on a fixed loopback port.
pub async fn start_server_on(port: u16) -> anyhow::Result<Server> {
    Ok(Server::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), port).await?)
}

/// Returns a builder pointed at `port` with a short retry delay.
pub fn builder_for(port: u16) -> ClientBuilder {
    Client::builder()
        .port(port)
        .retry_delay(FAST_RETRY)
        .connect_timeout(Duration::from_secs(1))
}

/// Connects a client to `port`, bounded by [`WAIT_LIMIT`].
pub async fn connect_client(port: u16) -> anyhow::Result<Client> {
    let client = tokio::time::timeout(WAIT_LIMIT, builder_for(port).connect()).await??;
    Ok(client)
}
