//! The websocket hub: fans out broadcasts to registered dispatchers.
//!
//! [`Hub`] is the producer-facing handle (implements [`crate::handler::Publisher`]);
//! [`HubLoop`] is the single-writer consumer that owns the dispatcher
//! registry and the subscription mapper. Producers never touch shared
//! state directly -- they hand values over bounded channels and the loop
//! does the fan-out, so dispatcher registration/removal and broadcast
//! delivery are never interleaved unpredictably.

pub mod dispatcher;
pub mod filter;
pub mod subscription_mapper;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};
use uuid::Uuid;

pub use dispatcher::Dispatcher;
pub use subscription_mapper::SubscriptionMapper;

use crate::error::Result;
use crate::handler::Publisher;
use crate::types::event::{
    BlockEvents, BlockEventsWithOrder, BlockScrs, BlockTxs, Event, EventType, FinalizedBlock, RevertBlock,
};

/// Channel capacity for each broadcast kind. Bounded rather than the
/// upstream system's unbounded channels, so a slow consumer applies
/// backpressure instead of growing memory without limit.
const CHANNEL_CAPACITY: usize = 1024;

enum Broadcast {
    Events(BlockEvents),
    EventsWithOrder(BlockEventsWithOrder),
    Revert(RevertBlock),
    Finalized(FinalizedBlock),
    Txs(BlockTxs),
    Scrs(BlockScrs),
}

/// Producer-facing handle: send broadcasts in, register/remove
/// dispatchers. Cloning is cheap; every clone shares the same loop.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<Broadcast>,
    registry: Arc<RwLock<HashMap<Uuid, Arc<dyn Dispatcher>>>>,
    mapper: Arc<SubscriptionMapper>,
    cancel: CancellationToken,
}

/// Consumer loop: owns the receiving half and runs the fan-out.
pub struct HubLoop {
    rx: mpsc::Receiver<Broadcast>,
    registry: Arc<RwLock<HashMap<Uuid, Arc<dyn Dispatcher>>>>,
    mapper: Arc<SubscriptionMapper>,
    cancel: CancellationToken,
}

/// Build a connected `(Hub, HubLoop)` pair.
#[must_use]
pub fn channel(cancel: CancellationToken) -> (Hub, HubLoop) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let registry = Arc::new(RwLock::new(HashMap::new()));
    let mapper = Arc::new(SubscriptionMapper::new());

    let hub = Hub {
        tx,
        registry: Arc::clone(&registry),
        mapper: Arc::clone(&mapper),
        cancel: cancel.clone(),
    };
    let hub_loop = HubLoop {
        rx,
        registry,
        mapper,
        cancel,
    };
    (hub, hub_loop)
}

impl Hub {
    /// Register a dispatcher.
    pub fn register(&self, dispatcher: Arc<dyn Dispatcher>) {
        self.registry.write().insert(dispatcher.id(), dispatcher);
    }

    /// Remove a dispatcher and drop its subscriptions.
    pub fn deregister(&self, dispatcher_id: Uuid) {
        self.registry.write().remove(&dispatcher_id);
        self.mapper.remove_subscriptions(dispatcher_id);
    }

    /// Replace a dispatcher's subscriptions.
    pub fn subscribe(&self, dispatcher_id: Uuid, subscriptions: Vec<crate::types::event::Subscription>) {
        self.mapper.set_subscriptions(dispatcher_id, subscriptions);
    }

    async fn send_or_drop(&self, broadcast: Broadcast) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            result = self.tx.send(broadcast) => {
                if result.is_err() {
                    warn!("hub loop is gone, dropping broadcast");
                }
            }
        }
    }
}

#[async_trait]
impl Publisher for Hub {
    async fn broadcast(&self, events: BlockEvents) -> Result<()> {
        self.send_or_drop(Broadcast::Events(events)).await;
        Ok(())
    }

    async fn broadcast_with_order(&self, events: BlockEventsWithOrder) -> Result<()> {
        self.send_or_drop(Broadcast::EventsWithOrder(events)).await;
        Ok(())
    }

    async fn broadcast_revert(&self, revert: RevertBlock) -> Result<()> {
        self.send_or_drop(Broadcast::Revert(revert)).await;
        Ok(())
    }

    async fn broadcast_finalized(&self, finalized: FinalizedBlock) -> Result<()> {
        self.send_or_drop(Broadcast::Finalized(finalized)).await;
        Ok(())
    }

    async fn broadcast_txs(&self, txs: BlockTxs) -> Result<()> {
        self.send_or_drop(Broadcast::Txs(txs)).await;
        Ok(())
    }

    async fn broadcast_scrs(&self, scrs: BlockScrs) -> Result<()> {
        self.send_or_drop(Broadcast::Scrs(scrs)).await;
        Ok(())
    }
}

impl HubLoop {
    /// Run the fan-out loop until cancelled or the channel closes.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                broadcast = self.rx.recv() => {
                    match broadcast {
                        Some(broadcast) => self.handle(broadcast).await,
                        None => break,
                    }
                }
            }
        }
    }

    #[instrument(skip(self, broadcast))]
    async fn handle(&self, broadcast: Broadcast) {
        match broadcast {
            Broadcast::Events(events) => self.handle_events(&events.events).await,
            Broadcast::EventsWithOrder(events) => {
                self.handle_events(&events.events).await;
                self.dispatch_payload(EventType::BlockEventsWithOrder, &events).await;
            }
            Broadcast::Revert(revert) => self.dispatch_payload(EventType::Revert, &revert).await,
            Broadcast::Finalized(finalized) => {
                self.dispatch_payload(EventType::Finalized, &finalized).await;
            }
            Broadcast::Txs(txs) => self.dispatch_payload(EventType::BlockTxs, &txs).await,
            Broadcast::Scrs(scrs) => self.dispatch_payload(EventType::BlockScrs, &scrs).await,
        }
    }

    async fn handle_events(&self, events: &[Event]) {
        let matches = self.mapper.matching_push_log_events(events);
        if matches.is_empty() {
            return;
        }

        // Collect dispatcher handles and drop the registry lock before
        // awaiting: `parking_lot::RwLockReadGuard` is not `Send`, so it
        // cannot be held across an await point on this runtime.
        let targets: Vec<(Arc<dyn Dispatcher>, Vec<Event>)> = {
            let registry = self.registry.read();
            matches
                .into_iter()
                .filter_map(|(id, events)| registry.get(&id).cloned().map(|d| (d, events)))
                .collect()
        };

        for (dispatcher, events) in targets {
            if let Err(error) = dispatcher.dispatch_events(events).await {
                metrics::counter!(crate::metrics::DISPATCH_FAILURES).increment(1);
                warn!(?error, dispatcher_id = %dispatcher.id(), "dispatch failed");
            }
        }
    }

    async fn dispatch_payload<T: serde::Serialize>(&self, event_type: EventType, payload: &T) {
        let dispatcher_ids = self.mapper.dispatchers_for(event_type);
        if dispatcher_ids.is_empty() {
            return;
        }

        let value = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(error) => {
                warn!(?error, "failed to serialize broadcast payload");
                return;
            }
        };

        let targets: Vec<Arc<dyn Dispatcher>> = {
            let registry = self.registry.read();
            dispatcher_ids
                .into_iter()
                .filter_map(|id| registry.get(&id).cloned())
                .collect()
        };

        for dispatcher in targets {
            if let Err(error) = dispatcher.dispatch_payload(value.clone()).await {
                warn!(?error, dispatcher_id = %dispatcher.id(), "dispatch failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::dispatcher::mocks::MockDispatcher;
    use super::*;
    use crate::types::event::Subscription;

    #[tokio::test]
    async fn registered_dispatcher_receives_matching_events() {
        let cancel = CancellationToken::new();
        let (hub, hub_loop) = channel(cancel.clone());
        let run_handle = tokio::spawn(hub_loop.run());

        let dispatcher = Arc::new(MockDispatcher::new());
        hub.register(dispatcher.clone());
        hub.subscribe(
            dispatcher.id(),
            vec![Subscription {
                dispatcher_id: dispatcher.id(),
                event_type: EventType::PushLogEvents,
                identifier: "*".into(),
                address: "*".into(),
                topics: vec![],
            }],
        );

        hub.broadcast(BlockEvents {
            hash: "h1".into(),
            shard_id: 0,
            timestamp: 0,
            events: vec![Event {
                log_address: "erd1qqq".into(),
                log_address_shard: 0,
                address: "erd1abc".into(),
                address_shard: 0,
                identifier: "writeLog".into(),
                topics: vec![],
                data: vec![],
                tx_hash: "tx".into(),
            }],
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.events_received(), 1);

        cancel.cancel();
        run_handle.await.unwrap();
    }

    #[tokio::test]
    async fn dispatcher_with_non_matching_filter_still_receives_an_empty_delivery() {
        let cancel = CancellationToken::new();
        let (hub, hub_loop) = channel(cancel.clone());
        let run_handle = tokio::spawn(hub_loop.run());

        let dispatcher = Arc::new(MockDispatcher::new());
        hub.register(dispatcher.clone());
        hub.subscribe(
            dispatcher.id(),
            vec![Subscription {
                dispatcher_id: dispatcher.id(),
                event_type: EventType::PushLogEvents,
                identifier: "ESDTTransfer".into(),
                address: "*".into(),
                topics: vec![],
            }],
        );

        hub.broadcast(BlockEvents {
            hash: "h1".into(),
            shard_id: 0,
            timestamp: 0,
            events: vec![Event {
                log_address: "erd1qqq".into(),
                log_address_shard: 0,
                address: "erd1abc".into(),
                address_shard: 0,
                identifier: "writeLog".into(),
                topics: vec![],
                data: vec![],
                tx_hash: "tx".into(),
            }],
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.dispatch_events_calls(), 1);
        assert_eq!(dispatcher.events_received(), 0);

        cancel.cancel();
        run_handle.await.unwrap();
    }

    #[tokio::test]
    async fn deregistered_dispatcher_receives_nothing() {
        let cancel = CancellationToken::new();
        let (hub, hub_loop) = channel(cancel.clone());
        let run_handle = tokio::spawn(hub_loop.run());

        let dispatcher = Arc::new(MockDispatcher::new());
        hub.register(dispatcher.clone());
        hub.subscribe(
            dispatcher.id(),
            vec![Subscription {
                dispatcher_id: dispatcher.id(),
                event_type: EventType::Revert,
                identifier: "*".into(),
                address: "*".into(),
                topics: vec![],
            }],
        );
        hub.deregister(dispatcher.id());

        hub.broadcast_revert(RevertBlock {
            hash: "h1".into(),
            nonce: 1,
            round: 1,
            epoch: 0,
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.payloads_received(), 0);

        cancel.cancel();
        run_handle.await.unwrap();
    }
}
