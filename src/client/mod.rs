//! Page-facing API.
//!
//! - [`Client`] issues requests and subscribes to streams
//! - [`PageListener`] follows the backend's "open this page" announcements
//! - [`ClientBuilder`] / [`LinkOptions`] configure both

// ============================================================================
// Submodules
// ============================================================================

/// Builder pattern for link configuration.
pub mod builder;

/// Client façade.
pub mod core;

/// Link options.
pub mod options;

/// Open-page listener.
pub mod page;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use core::Client;
pub use options::{DEFAULT_PORT, LinkOptions};
pub use page::PageListener;
