//! Session-bus side channel: re-publishes `BlockEventsWithOrder` events,
//! grouped by transaction, to a session-aware destination keyed by
//! [`crate::interceptor::group_by_tx_hash`]'s session id so that a
//! consumer can process a transaction's events in order.
//!
//! Triggered only by [`crate::types::event::BlockEventsWithOrder`]
//! broadcasts; every other broadcast kind bypasses this channel entirely.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{instrument, warn};

use crate::error::{Result, TransportError};
use crate::types::event::{identifiers, Event};
use crate::types::primitives::PublicKey;

/// Failure reasons from adding a message to a session-bus batch.
#[derive(Debug, Clone)]
pub enum SessionBusAddError {
    /// The message, on its own, exceeds the destination's per-message
    /// size limit. The batch should be flushed and the same event
    /// retried against a fresh batch.
    MessageTooLarge,
    /// Any other transport-level failure.
    Other(String),
}

/// Per-message application properties attached alongside the JSON body.
#[derive(Debug, Clone)]
pub struct SessionMessageProperties {
    /// The event's address.
    pub address: String,
    /// The event's identifier.
    pub identifier: String,
    /// Set for `MultiESDTNFTTransfer` events; `true` when `topics[1]` is
    /// non-empty.
    pub is_nft: Option<bool>,
}

/// Port for a batching session-bus destination.
#[async_trait]
pub trait SessionBusSender: Send + Sync {
    /// Add a message to the current batch, keyed by `session_id`, carrying
    /// `properties` as application properties.
    ///
    /// # Errors
    /// Returns [`SessionBusAddError::MessageTooLarge`] when the message
    /// cannot fit in a batch by itself, or `Other` for any other failure.
    async fn add(
        &self,
        session_id: &str,
        payload: &[u8],
        properties: SessionMessageProperties,
    ) -> std::result::Result<(), SessionBusAddError>;

    /// Flush the current batch.
    ///
    /// # Errors
    /// Returns an error if the flush itself fails.
    async fn flush(&self) -> Result<()>;

    /// Number of messages currently buffered.
    fn batch_len(&self) -> usize;
}

/// Identifiers that never reach the session bus: transaction-lifecycle
/// markers with no session-scoped consumer.
fn is_session_bus_excluded(identifier: &str) -> bool {
    matches!(
        identifier,
        identifiers::COMPLETED_TX_EVENT
            | identifiers::SIGNAL_ERROR
            | identifiers::INTERNAL_VM_ERRORS
            | identifiers::WRITE_LOG
    )
}

/// Derives the session id for an event: NFT/ESDT-related identifiers key
/// on `topics[0]` (the token identifier), otherwise on the event's
/// address.
#[must_use]
pub fn session_id(event: &Event) -> (String, bool) {
    match event.identifier.as_str() {
        identifiers::ESDT_TRANSFER
        | identifiers::ESDT_NFT_TRANSFER
        | identifiers::ESDT_NFT_CREATE
        | identifiers::ESDT_NFT_BURN
        | identifiers::ESDT_NFT_UPDATE_ATTRIBUTES
        | identifiers::ESDT_NFT_ADD_URI
        | identifiers::ESDT_NFT_ADD_QUANTITY => (topic_as_string(event, 0), false),
        identifiers::MULTI_ESDT_NFT_TRANSFER => {
            let is_nft = event.topics.get(1).is_some_and(|t| !t.is_empty());
            (topic_as_string(event, 0), is_nft)
        }
        _ => (event.address.clone(), false),
    }
}

fn topic_as_string(event: &Event, index: usize) -> String {
    event
        .topics
        .get(index)
        .map(|t| String::from_utf8_lossy(t).into_owned())
        .unwrap_or_default()
}

/// Returns `true` if a cross-shard ESDT/NFT transfer event should be
/// skipped on the session bus: the event's log shard differs from the
/// shard encoded in `topics[3]` (the receiver's address), meaning the
/// counterpart log on the receiving shard will publish it instead.
#[must_use]
pub fn should_skip_cross_shard(event: &Event) -> bool {
    if !matches!(
        event.identifier.as_str(),
        identifiers::ESDT_TRANSFER | identifiers::ESDT_NFT_TRANSFER | identifiers::MULTI_ESDT_NFT_TRANSFER
    ) {
        return false;
    }

    let Some(receiver_topic) = event.topics.get(3) else {
        return false;
    };
    let Ok(receiver) = PublicKey::from_slice(receiver_topic) else {
        return false;
    };

    receiver.shard().as_u32() != event.log_address_shard
}

/// Publish `events`, grouped by session id, to `sender`. Implements the
/// retry-same-index state machine for oversized messages: when adding an
/// event fails with [`SessionBusAddError::MessageTooLarge`], the current
/// batch is flushed and the same event is retried against the now-empty
/// batch. If the batch was already empty, the event genuinely cannot be
/// sent and the error is surfaced.
///
/// # Errors
/// Returns [`TransportError::SessionBus`] if an event cannot be added
/// even to an empty batch, or if a flush fails.
#[instrument(skip(sender, events))]
pub async fn publish_session_events<S: SessionBusSender>(sender: &S, events: &[Event]) -> Result<()> {
    let mut index = 0;
    while index < events.len() {
        let event = &events[index];

        if is_session_bus_excluded(&event.identifier) || should_skip_cross_shard(event) {
            index += 1;
            continue;
        }

        let (session, is_nft) = session_id(event);
        let properties = SessionMessageProperties {
            address: event.address.clone(),
            identifier: event.identifier.clone(),
            is_nft: (event.identifier == identifiers::MULTI_ESDT_NFT_TRANSFER).then_some(is_nft),
        };
        let payload = serde_json::to_vec(event)
            .map_err(|e| TransportError::SessionBus(format!("serialize event: {e}")))?;

        match sender.add(&session, &payload, properties).await {
            Ok(()) => index += 1,
            Err(SessionBusAddError::MessageTooLarge) => {
                if sender.batch_len() == 0 {
                    return Err(TransportError::SessionBus(format!(
                        "event for session {session} exceeds the maximum message size"
                    ))
                    .into());
                }
                warn!(session, "batch full, flushing and retrying same event");
                sender.flush().await?;
                // retry the same index against a fresh batch
            }
            Err(SessionBusAddError::Other(message)) => {
                metrics::counter!(crate::metrics::SESSION_BUS_FAILURES).increment(1);
                return Err(TransportError::SessionBus(message).into());
            }
        }
    }

    sender.flush().await
}

/// AMQP-backed session-bus sender. A stand-in for the upstream system's
/// Azure Service Bus side channel: no crate in this workspace's dependency
/// pack speaks that protocol, so this reuses the broker's AMQP transport
/// with per-session routing keys instead.
pub struct AmqpSessionBusSender {
    channel: Channel,
    topic: String,
    max_message_bytes: usize,
    batch: parking_lot::Mutex<Vec<(String, Vec<u8>, SessionMessageProperties)>>,
}

/// Default per-message size limit, matching typical broker frame limits.
const DEFAULT_MAX_MESSAGE_BYTES: usize = 256 * 1024;

impl AmqpSessionBusSender {
    /// Connect to the broker and declare the session-bus topic exchange.
    ///
    /// # Errors
    /// Returns [`TransportError::Connectivity`] if the connection or
    /// exchange declaration fails.
    pub async fn connect(url: &str, topic: &str) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::Connectivity(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TransportError::Connectivity(e.to_string()))?;

        channel
            .exchange_declare(
                topic,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Connectivity(e.to_string()))?;

        Ok(Self {
            channel,
            topic: topic.to_string(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            batch: parking_lot::Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl SessionBusSender for AmqpSessionBusSender {
    async fn add(
        &self,
        session_id: &str,
        payload: &[u8],
        properties: SessionMessageProperties,
    ) -> std::result::Result<(), SessionBusAddError> {
        if payload.len() > self.max_message_bytes {
            return Err(SessionBusAddError::MessageTooLarge);
        }
        self.batch.lock().push((session_id.to_string(), payload.to_vec(), properties));
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let batch = std::mem::take(&mut *self.batch.lock());
        for (session_id, payload, properties) in batch {
            let mut headers = FieldTable::default();
            headers.insert(
                ShortString::from("Address"),
                AMQPValue::LongString(properties.address.into()),
            );
            headers.insert(
                ShortString::from("Identifier"),
                AMQPValue::LongString(properties.identifier.into()),
            );
            if let Some(is_nft) = properties.is_nft {
                headers.insert(
                    ShortString::from("isNFT"),
                    AMQPValue::LongString(is_nft.to_string().into()),
                );
            }

            self.channel
                .basic_publish(
                    &self.topic,
                    &session_id,
                    BasicPublishOptions::default(),
                    &payload,
                    BasicProperties::default()
                        .with_message_id(session_id.clone().into())
                        .with_headers(headers),
                )
                .await
                .map_err(|e| TransportError::SessionBus(e.to_string()))?;
        }
        Ok(())
    }

    fn batch_len(&self) -> usize {
        self.batch.lock().len()
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks {
    //! Mock implementations for testing.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{async_trait, Result, SessionBusAddError, SessionBusSender, SessionMessageProperties};

    /// Records batches flushed; can simulate a per-call batch-capacity
    /// limit and oversized-message rejections.
    pub struct MockSessionBusSender {
        batch: Mutex<Vec<(String, Vec<u8>, SessionMessageProperties)>>,
        capacity: usize,
        max_message_bytes: usize,
        flushes: Arc<AtomicUsize>,
        flushed_batches: Mutex<Vec<Vec<(String, Vec<u8>, SessionMessageProperties)>>>,
    }

    impl MockSessionBusSender {
        /// Create a mock with the given per-batch capacity and
        /// per-message size limit.
        #[must_use]
        pub fn new(capacity: usize, max_message_bytes: usize) -> Self {
            Self {
                batch: Mutex::new(Vec::new()),
                capacity,
                max_message_bytes,
                flushes: Arc::new(AtomicUsize::new(0)),
                flushed_batches: Mutex::new(Vec::new()),
            }
        }

        /// Number of times `flush` was called.
        #[must_use]
        pub fn flush_count(&self) -> usize {
            self.flushes.load(Ordering::SeqCst)
        }

        /// Every batch that was flushed, in order.
        #[must_use]
        pub fn flushed_batches(&self) -> Vec<Vec<(String, Vec<u8>, SessionMessageProperties)>> {
            self.flushed_batches.lock().clone()
        }
    }

    #[async_trait]
    impl SessionBusSender for MockSessionBusSender {
        async fn add(
            &self,
            session_id: &str,
            payload: &[u8],
            properties: SessionMessageProperties,
        ) -> std::result::Result<(), SessionBusAddError> {
            if payload.len() > self.max_message_bytes {
                return Err(SessionBusAddError::MessageTooLarge);
            }
            let mut batch = self.batch.lock();
            if batch.len() >= self.capacity {
                return Err(SessionBusAddError::MessageTooLarge);
            }
            batch.push((session_id.to_string(), payload.to_vec(), properties));
            Ok(())
        }

        async fn flush(&self) -> Result<()> {
            let batch = std::mem::take(&mut *self.batch.lock());
            self.flushes.fetch_add(1, Ordering::SeqCst);
            self.flushed_batches.lock().push(batch);
            Ok(())
        }

        fn batch_len(&self) -> usize {
            self.batch.lock().len()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::mocks::MockSessionBusSender;
    use super::*;

    fn event(identifier: &str, topics: Vec<Vec<u8>>, log_address_shard: u32) -> Event {
        Event {
            log_address: "erd1qqq".into(),
            log_address_shard,
            address: "erd1abc".into(),
            address_shard: 0,
            identifier: identifier.into(),
            topics,
            data: vec![],
            tx_hash: "tx".into(),
        }
    }

    #[test]
    fn session_id_uses_address_for_non_transfer_events() {
        let ev = event(identifiers::WRITE_LOG, vec![], 0);
        let (session, is_nft) = session_id(&ev);
        assert_eq!(session, "erd1abc");
        assert!(!is_nft);
    }

    #[test]
    fn session_id_uses_first_topic_for_esdt_transfer() {
        let ev = event(identifiers::ESDT_TRANSFER, vec![b"TOKEN-abcdef".to_vec()], 0);
        let (session, _) = session_id(&ev);
        assert_eq!(session, "TOKEN-abcdef");
    }

    #[test]
    fn session_id_flags_nft_for_multi_transfer_with_nonempty_second_topic() {
        let ev = event(
            identifiers::MULTI_ESDT_NFT_TRANSFER,
            vec![b"TOKEN-abcdef".to_vec(), vec![1]],
            0,
        );
        let (_, is_nft) = session_id(&ev);
        assert!(is_nft);
    }

    #[test]
    fn cross_shard_transfer_is_skipped() {
        let receiver = PublicKey::new([1u8; 32]);
        let ev = event(
            identifiers::ESDT_TRANSFER,
            vec![vec![], vec![], vec![], receiver.as_bytes().to_vec()],
            receiver.shard().as_u32().wrapping_add(1),
        );
        assert!(should_skip_cross_shard(&ev));
    }

    #[test]
    fn same_shard_transfer_is_not_skipped() {
        let receiver = PublicKey::new([1u8; 32]);
        let ev = event(
            identifiers::ESDT_TRANSFER,
            vec![vec![], vec![], vec![], receiver.as_bytes().to_vec()],
            receiver.shard().as_u32(),
        );
        assert!(!should_skip_cross_shard(&ev));
    }

    #[tokio::test]
    async fn publish_retries_same_event_after_flush_on_oversized_batch() {
        let sender = MockSessionBusSender::new(1, 1024);
        let events = vec![event("customEvent", vec![], 0), event("customEvent", vec![], 0)];

        publish_session_events(&sender, &events).await.unwrap();

        // capacity 1 forces a flush between the two events, plus the
        // trailing flush at the end.
        assert_eq!(sender.flush_count(), 2);
        assert_eq!(sender.flushed_batches().iter().map(Vec::len).sum::<usize>(), 2);
    }

    #[tokio::test]
    async fn publish_fails_when_message_never_fits_an_empty_batch() {
        let sender = MockSessionBusSender::new(4, 1);
        let events = vec![event("customEvent", vec![], 0)];

        let err = publish_session_events(&sender, &events).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::NotifierError::Transport(TransportError::SessionBus(_))
        ));
    }

    #[tokio::test]
    async fn excluded_identifiers_never_reach_the_batch() {
        let sender = MockSessionBusSender::new(8, 1024);
        let events = vec![
            event(identifiers::COMPLETED_TX_EVENT, vec![], 0),
            event(identifiers::SIGNAL_ERROR, vec![], 0),
            event(identifiers::INTERNAL_VM_ERRORS, vec![], 0),
            event(identifiers::WRITE_LOG, vec![], 0),
        ];

        publish_session_events(&sender, &events).await.unwrap();

        assert_eq!(sender.flush_count(), 1);
        assert!(sender.flushed_batches().iter().all(Vec::is_empty));
    }

    #[tokio::test]
    async fn application_properties_carry_address_identifier_and_is_nft() {
        let sender = MockSessionBusSender::new(8, 1024);
        let events = vec![event(
            identifiers::MULTI_ESDT_NFT_TRANSFER,
            vec![b"TOKEN-abcdef".to_vec(), vec![1]],
            0,
        )];

        publish_session_events(&sender, &events).await.unwrap();

        let batches = sender.flushed_batches();
        let (_, _, properties) = &batches[0][0];
        assert_eq!(properties.address, "erd1abc");
        assert_eq!(properties.identifier, identifiers::MULTI_ESDT_NFT_TRANSFER);
        assert_eq!(properties.is_nft, Some(true));
    }
}
