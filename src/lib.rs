//! Chain Event Notifier
//!
//! Fans out blockchain block events, reverts, and finalizations from an
//! upstream indexing process to one of two publishing modes: a
//! RabbitMQ-style broker (with a session-bus side channel for
//! transaction-ordered events) or a websocket hub with per-client
//! subscription filtering.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          NOTIFIER CORE                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │ Interceptor  │─▶│EventsHandler │─▶│  Publisher   │          │
//! │  └──────────────┘  └──────┬───────┘  └──────┬───────┘          │
//! │                           │                  │                  │
//! │                    ┌──────▼──────┐    ┌──────┴───────┐         │
//! │                    │ LockService │    │  Hub / Broker │         │
//! │                    └─────────────┘    └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`types`] - Domain types (validated primitives, the event data model)
//! - [`error`] - Layered error types
//! - [`config`] - Configuration loading and validation
//! - [`interceptor`] - Normalizes raw block-save data into the event model
//! - [`lock`] - Deduplication lock service
//! - [`handler`] - Events handler: dedup + publisher seam
//! - [`hub`] - Websocket fan-out with per-client subscription filtering
//! - [`publisher`] - Broker fan-out with the session-bus side channel
//! - [`facade`] - Thin orchestrator exposed to the ingress layer
//! - [`metrics`] - Prometheus counters
//!
//! # Getting Started
//!
//! ```bash
//! cp config/default.toml config/development.toml
//! # Edit config/development.toml with your configuration
//!
//! cargo run -- run
//! ```

#![doc(html_root_url = "https://docs.rs/chain-event-notifier")]

pub mod config;
pub mod error;
pub mod facade;
pub mod handler;
pub mod hub;
pub mod interceptor;
pub mod lock;
pub mod metrics;
pub mod publisher;
pub mod types;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version string
#[must_use]
pub const fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert!(version().starts_with("0."));
    }
}
