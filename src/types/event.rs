//! Event data model: the normalized shapes flowing through the notifier
//! core, from the interceptor's output to the hub/broker's wire formats.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known event identifiers the interceptor and publisher reason about.
pub mod identifiers {
    /// Emitted alongside a failed transaction.
    pub const SIGNAL_ERROR: &str = "signalError";
    /// Emitted for internal VM failures.
    pub const INTERNAL_VM_ERRORS: &str = "internalVMErrors";
    /// Fungible ESDT transfer.
    pub const ESDT_TRANSFER: &str = "ESDTTransfer";
    /// Single NFT/SFT transfer.
    pub const ESDT_NFT_TRANSFER: &str = "ESDTNFTTransfer";
    /// Multi-token transfer (fungible or NFT).
    pub const MULTI_ESDT_NFT_TRANSFER: &str = "MultiESDTNFTTransfer";
    /// Transaction completion marker.
    pub const COMPLETED_TX_EVENT: &str = "completedTxEvent";
    /// Generic log write marker.
    pub const WRITE_LOG: &str = "writeLog";
    /// NFT creation.
    pub const ESDT_NFT_CREATE: &str = "ESDTNFTCreate";
    /// NFT burn.
    pub const ESDT_NFT_BURN: &str = "ESDTNFTBurn";
    /// NFT attribute update.
    pub const ESDT_NFT_UPDATE_ATTRIBUTES: &str = "ESDTNFTUpdateAttributes";
    /// NFT URI addition.
    pub const ESDT_NFT_ADD_URI: &str = "ESDTNFTAddURI";
    /// NFT quantity addition.
    pub const ESDT_NFT_ADD_QUANTITY: &str = "ESDTNFTAddQuantity";
}

/// A single topic: an ordered byte string attached to an event.
pub type Topic = Vec<u8>;

/// A normalized, addressed blockchain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Bech32 address of the log this event belongs to.
    pub log_address: String,
    /// Shard of `log_address` (0-2, or the metachain sentinel).
    pub log_address_shard: u32,
    /// Bech32 address the event itself targets.
    pub address: String,
    /// Shard of `address`.
    pub address_shard: u32,
    /// Event identifier (e.g. `ESDTTransfer`, `signalError`).
    pub identifier: String,
    /// Ordered topics.
    pub topics: Vec<Topic>,
    /// Opaque event payload.
    pub data: Vec<u8>,
    /// Hash of the transaction that produced this event.
    pub tx_hash: String,
}

/// A batch of events belonging to one block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEvents {
    /// Block hash (hex).
    pub hash: String,
    /// Shard that produced the block.
    pub shard_id: u32,
    /// Block timestamp (unix seconds).
    pub timestamp: i64,
    /// Events in source order.
    pub events: Vec<Event>,
}

/// Fee accounting attached to a transaction or smart contract result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeInfo {
    /// Fee charged, as a decimal string.
    pub fee: String,
    /// Gas actually consumed.
    pub gas_used: u64,
}

/// A transaction annotated with its position within the block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxWithOrder {
    /// Raw transaction body.
    pub tx: serde_json::Value,
    /// Execution order within the block.
    pub exec_order: u32,
    /// Fee accounting, when available.
    pub fee_info: Option<FeeInfo>,
}

/// A smart contract result annotated with its position within the block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrWithOrder {
    /// Raw smart contract result body.
    pub scr: serde_json::Value,
    /// Execution order within the block.
    pub exec_order: u32,
    /// Fee accounting, when available.
    pub fee_info: Option<FeeInfo>,
}

/// A block's events together with its ordered transactions and SCRs.
///
/// This is the only payload that triggers the session-bus side channel
/// (see [`crate::publisher::session_bus`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEventsWithOrder {
    /// Block hash (hex).
    pub hash: String,
    /// Shard that produced the block.
    pub shard_id: u32,
    /// Block timestamp (unix seconds).
    pub timestamp: i64,
    /// Transactions keyed by hash.
    pub txs: HashMap<String, TxWithOrder>,
    /// Smart contract results keyed by hash.
    pub scrs: HashMap<String, ScrWithOrder>,
    /// Events in source order.
    pub events: Vec<Event>,
}

/// A block revert notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevertBlock {
    /// Reverted block hash (hex).
    pub hash: String,
    /// Block nonce.
    pub nonce: u64,
    /// Consensus round.
    pub round: u64,
    /// Epoch.
    pub epoch: u32,
}

/// A block finalization notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedBlock {
    /// Finalized block hash (hex).
    pub hash: String,
}

/// Raw transactions for a block, keyed by hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockTxs {
    /// Block hash (hex).
    pub hash: String,
    /// Transactions keyed by hash.
    pub txs: HashMap<String, serde_json::Value>,
}

/// Raw smart contract results for a block, keyed by hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockScrs {
    /// Block hash (hex).
    pub hash: String,
    /// Smart contract results keyed by hash.
    pub scrs: HashMap<String, serde_json::Value>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUBSCRIPTIONS (websocket mode)
// ═══════════════════════════════════════════════════════════════════════════════

/// The kind of broadcast a subscription wants to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    /// Filtered per-event log pushes.
    PushLogEvents,
    /// Block revert notifications.
    Revert,
    /// Block finalization notifications.
    Finalized,
    /// Raw block transactions.
    BlockTxs,
    /// Raw block smart contract results.
    BlockScrs,
    /// Block events with ordered txs/scrs (triggers the session-bus side
    /// channel on the broker publisher side; on the hub side it is just
    /// another subscribable block-level stream).
    BlockEventsWithOrder,
}

impl Default for EventType {
    fn default() -> Self {
        Self::PushLogEvents
    }
}

/// A normalized subscription held by the hub's `SubscriptionMapper`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// The dispatcher (websocket connection) this subscription belongs to.
    pub dispatcher_id: Uuid,
    /// The kind of broadcast being subscribed to.
    #[serde(default)]
    pub event_type: EventType,
    /// Identifier filter (`"*"` for wildcard).
    #[serde(default = "wildcard")]
    pub identifier: String,
    /// Address filter (`"*"` for wildcard).
    #[serde(default = "wildcard")]
    pub address: String,
    /// Per-position topic filters (hex-encoded), `"*"` for wildcard.
    #[serde(default)]
    pub topics: Vec<String>,
}

fn wildcard() -> String {
    "*".to_string()
}

/// The raw subscribe frame received from a websocket client.
///
/// Missing filter fields default to `"*"`; a missing event type defaults to
/// [`EventType::PushLogEvents`].
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeEvent {
    /// Requested broadcast kind, if any.
    #[serde(default)]
    pub event_type: Option<EventType>,
    /// Identifier to match, if any.
    #[serde(default)]
    pub match_identifier: Option<String>,
    /// Address to match, if any.
    #[serde(default)]
    pub match_address: Option<String>,
    /// Per-position topic filters to match.
    #[serde(default)]
    pub match_topics: Vec<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_through_json() {
        let event = Event {
            log_address: "erd1qqq".into(),
            log_address_shard: 1,
            address: "erd1www".into(),
            address_shard: 2,
            identifier: identifiers::ESDT_TRANSFER.into(),
            topics: vec![b"tok".to_vec(), vec![1, 2, 3]],
            data: vec![9, 9],
            tx_hash: "abcd".into(),
        };

        let encoded = serde_json::to_string(&event).expect("serialize");
        let decoded: Event = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(event, decoded);
    }

    #[test]
    fn subscribe_event_defaults_are_wildcards() {
        let raw = r#"{}"#;
        let frame: SubscribeEvent = serde_json::from_str(raw).expect("deserialize");
        assert!(frame.event_type.is_none());
        assert!(frame.match_identifier.is_none());
        assert!(frame.match_topics.is_empty());
    }
}
