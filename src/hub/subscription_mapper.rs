//! Tracks active subscriptions and resolves which dispatchers (and which
//! events) a given broadcast should reach.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use uuid::Uuid;

use super::filter;
use crate::types::event::{Event, EventType, Subscription};

/// Subscriptions grouped by dispatcher id.
#[derive(Default)]
pub struct SubscriptionMapper {
    subscriptions: RwLock<HashMap<Uuid, Vec<Subscription>>>,
}

impl SubscriptionMapper {
    /// Create an empty mapper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a dispatcher's subscriptions.
    pub fn set_subscriptions(&self, dispatcher_id: Uuid, subscriptions: Vec<Subscription>) {
        self.subscriptions.write().insert(dispatcher_id, subscriptions);
    }

    /// Drop every subscription belonging to `dispatcher_id`, e.g. on
    /// disconnect.
    pub fn remove_subscriptions(&self, dispatcher_id: Uuid) {
        self.subscriptions.write().remove(&dispatcher_id);
    }

    /// For push-log events: returns, per dispatcher holding at least one
    /// `push-log-events` subscription, the events matched by at least one
    /// of those subscriptions. Multiple matching subscriptions for the
    /// same dispatcher accumulate into one vector rather than producing
    /// duplicate deliveries per subscription.
    ///
    /// A dispatcher whose subscriptions match zero events still gets an
    /// entry with an empty vector: downstream distinguishes "arrived,
    /// nothing matched" from "never arrived", so every dispatcher holding a
    /// matching subscription must be represented in the result.
    #[must_use]
    pub fn matching_push_log_events(&self, events: &[Event]) -> HashMap<Uuid, Vec<Event>> {
        let mut out: HashMap<Uuid, Vec<Event>> = HashMap::new();
        let subscriptions = self.subscriptions.read();

        for (dispatcher_id, subs) in subscriptions.iter() {
            let relevant: Vec<&Subscription> = subs
                .iter()
                .filter(|s| s.event_type == EventType::PushLogEvents)
                .collect();
            if relevant.is_empty() {
                continue;
            }

            let entry = out.entry(*dispatcher_id).or_default();
            for event in events {
                if relevant.iter().any(|s| filter::matches(s, event)) {
                    entry.push(event.clone());
                }
            }
        }

        out
    }

    /// For block-level broadcasts (revert, finalized, block-txs,
    /// block-scrs, block-events-with-order): returns the set of
    /// dispatcher ids subscribed to `event_type`, deduplicated so a
    /// dispatcher with multiple matching subscriptions is counted once.
    #[must_use]
    pub fn dispatchers_for(&self, event_type: EventType) -> HashSet<Uuid> {
        self.subscriptions
            .read()
            .iter()
            .filter(|(_, subs)| subs.iter().any(|s| s.event_type == event_type))
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(identifier: &str) -> Event {
        Event {
            log_address: "erd1qqq".into(),
            log_address_shard: 0,
            address: "erd1abc".into(),
            address_shard: 0,
            identifier: identifier.into(),
            topics: vec![],
            data: vec![],
            tx_hash: "tx".into(),
        }
    }

    fn subscription(dispatcher_id: Uuid, event_type: EventType, identifier: &str) -> Subscription {
        Subscription {
            dispatcher_id,
            event_type,
            identifier: identifier.into(),
            address: "*".into(),
            topics: vec![],
        }
    }

    #[test]
    fn multiple_matching_subscriptions_accumulate_once_per_dispatcher() {
        let mapper = SubscriptionMapper::new();
        let dispatcher_id = Uuid::new_v4();
        mapper.set_subscriptions(
            dispatcher_id,
            vec![
                subscription(dispatcher_id, EventType::PushLogEvents, "ESDTTransfer"),
                subscription(dispatcher_id, EventType::PushLogEvents, "*"),
            ],
        );

        let matches = mapper.matching_push_log_events(&[event("ESDTTransfer")]);
        assert_eq!(matches[&dispatcher_id].len(), 1);
    }

    #[test]
    fn dispatchers_for_dedupes_across_subscriptions() {
        let mapper = SubscriptionMapper::new();
        let dispatcher_id = Uuid::new_v4();
        mapper.set_subscriptions(
            dispatcher_id,
            vec![
                subscription(dispatcher_id, EventType::Revert, "*"),
                subscription(dispatcher_id, EventType::Revert, "*"),
            ],
        );

        let dispatchers = mapper.dispatchers_for(EventType::Revert);
        assert_eq!(dispatchers.len(), 1);
    }

    #[test]
    fn dispatcher_with_non_matching_subscription_still_gets_an_empty_entry() {
        let mapper = SubscriptionMapper::new();
        let dispatcher_id = Uuid::new_v4();
        mapper.set_subscriptions(
            dispatcher_id,
            vec![subscription(dispatcher_id, EventType::PushLogEvents, "ESDTTransfer")],
        );

        let matches = mapper.matching_push_log_events(&[event("writeLog")]);
        assert_eq!(matches.len(), 1);
        assert!(matches[&dispatcher_id].is_empty());
    }

    #[test]
    fn remove_subscriptions_clears_dispatcher() {
        let mapper = SubscriptionMapper::new();
        let dispatcher_id = Uuid::new_v4();
        mapper.set_subscriptions(
            dispatcher_id,
            vec![subscription(dispatcher_id, EventType::PushLogEvents, "*")],
        );
        mapper.remove_subscriptions(dispatcher_id);

        let matches = mapper.matching_push_log_events(&[event("ESDTTransfer")]);
        assert!(matches.is_empty());
    }
}
