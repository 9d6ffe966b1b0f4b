//! Dispatcher port: one instance per connected websocket client.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::event::Event;

/// A sink for events destined to a single connected client.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Stable identifier for this dispatcher, used as the subscription
    /// key in [`crate::hub::subscription_mapper::SubscriptionMapper`].
    fn id(&self) -> Uuid;

    /// Deliver a batch of matched push-log events.
    ///
    /// # Errors
    /// Returns an error if the underlying connection is gone; the hub
    /// logs and drops such errors rather than propagating them.
    async fn dispatch_events(&self, events: Vec<Event>) -> Result<()>;

    /// Deliver an arbitrary JSON payload (used for block-level broadcasts:
    /// reverts, finalizations, raw txs/scrs, and block-events-with-order).
    ///
    /// # Errors
    /// Returns an error if the underlying connection is gone.
    async fn dispatch_payload(&self, payload: serde_json::Value) -> Result<()>;
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks {
    //! Mock implementations for testing.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{async_trait, Dispatcher, Event, Result, Uuid};

    /// Records every delivery it receives.
    #[derive(Debug, Clone)]
    pub struct MockDispatcher {
        id: Uuid,
        events_received: Arc<AtomicUsize>,
        dispatch_events_calls: Arc<AtomicUsize>,
        payloads: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    impl MockDispatcher {
        /// Create a mock dispatcher with a fresh random id.
        #[must_use]
        pub fn new() -> Self {
            Self {
                id: Uuid::new_v4(),
                events_received: Arc::new(AtomicUsize::new(0)),
                dispatch_events_calls: Arc::new(AtomicUsize::new(0)),
                payloads: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Number of events delivered via `dispatch_events` so far.
        #[must_use]
        pub fn events_received(&self) -> usize {
            self.events_received.load(Ordering::SeqCst)
        }

        /// Number of times `dispatch_events` was called, including calls
        /// with an empty vector.
        #[must_use]
        pub fn dispatch_events_calls(&self) -> usize {
            self.dispatch_events_calls.load(Ordering::SeqCst)
        }

        /// Number of payloads delivered via `dispatch_payload` so far.
        #[must_use]
        pub fn payloads_received(&self) -> usize {
            self.payloads.lock().len()
        }
    }

    impl Default for MockDispatcher {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Dispatcher for MockDispatcher {
        fn id(&self) -> Uuid {
            self.id
        }

        async fn dispatch_events(&self, events: Vec<Event>) -> Result<()> {
            self.dispatch_events_calls.fetch_add(1, Ordering::SeqCst);
            self.events_received.fetch_add(events.len(), Ordering::SeqCst);
            Ok(())
        }

        async fn dispatch_payload(&self, payload: serde_json::Value) -> Result<()> {
            self.payloads.lock().push(payload);
            Ok(())
        }
    }
}
