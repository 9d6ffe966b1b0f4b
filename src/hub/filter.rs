//! Subscription filter matching.

use crate::types::event::{Event, Subscription};

/// Returns `true` if `event` satisfies `subscription`'s identifier,
/// address, and per-position topic filters.
///
/// - `"*"` matches anything.
/// - Topic filters are compared position-by-position against the event's
///   hex-encoded topics; a filter shorter than the event's topic list
///   never rejects on the missing positions, and a filter longer than the
///   event's topic list rejects (the position simply doesn't exist).
#[must_use]
pub fn matches(subscription: &Subscription, event: &Event) -> bool {
    if !field_matches(&subscription.identifier, &event.identifier) {
        return false;
    }
    if !field_matches(&subscription.address, &event.address) {
        return false;
    }

    for (i, topic_filter) in subscription.topics.iter().enumerate() {
        if topic_filter == "*" {
            continue;
        }
        match event.topics.get(i) {
            Some(topic) if hex::encode(topic) == *topic_filter => {}
            _ => return false,
        }
    }

    true
}

fn field_matches(filter: &str, value: &str) -> bool {
    filter == "*" || filter == value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(identifier: &str, address: &str, topics: Vec<Vec<u8>>) -> Event {
        Event {
            log_address: "erd1qqq".into(),
            log_address_shard: 0,
            address: address.into(),
            address_shard: 0,
            identifier: identifier.into(),
            topics,
            data: vec![],
            tx_hash: "tx".into(),
        }
    }

    fn subscription(identifier: &str, address: &str, topics: Vec<&str>) -> Subscription {
        Subscription {
            dispatcher_id: uuid::Uuid::nil(),
            event_type: crate::types::event::EventType::PushLogEvents,
            identifier: identifier.into(),
            address: address.into(),
            topics: topics.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn wildcard_matches_everything() {
        let sub = subscription("*", "*", vec![]);
        let ev = event("ESDTTransfer", "erd1abc", vec![]);
        assert!(matches(&sub, &ev));
    }

    #[test]
    fn identifier_mismatch_rejects() {
        let sub = subscription("ESDTTransfer", "*", vec![]);
        let ev = event("writeLog", "erd1abc", vec![]);
        assert!(!matches(&sub, &ev));
    }

    #[test]
    fn topic_position_match_is_required() {
        let sub = subscription("*", "*", vec!["*", "deadbeef"]);
        let ev = event("writeLog", "erd1abc", vec![b"ignored".to_vec(), vec![0xde, 0xad, 0xbe, 0xef]]);
        assert!(matches(&sub, &ev));
    }

    #[test]
    fn topic_position_mismatch_rejects() {
        let sub = subscription("*", "*", vec!["*", "deadbeef"]);
        let ev = event("writeLog", "erd1abc", vec![b"ignored".to_vec(), vec![0x00]]);
        assert!(!matches(&sub, &ev));
    }

    #[test]
    fn excess_event_topics_never_reject() {
        let sub = subscription("*", "*", vec!["*"]);
        let ev = event("writeLog", "erd1abc", vec![vec![1], vec![2], vec![3]]);
        assert!(matches(&sub, &ev));
    }

    #[test]
    fn missing_topic_position_rejects_nonwildcard_filter() {
        let sub = subscription("*", "*", vec!["*", "deadbeef"]);
        let ev = event("writeLog", "erd1abc", vec![vec![1]]);
        assert!(!matches(&sub, &ev));
    }
}
