//! Normalizes raw block-save data into the notifier core's event model.
//!
//! The interceptor is the entry point for inbound block data (delivered by
//! an out-of-scope ingress layer). It validates the shape of the raw
//! payload, derives shard ids from public keys, and builds the per-event
//! log group used to decide whether a `signalError`/`internalVMErrors`
//! pair should suppress its sibling transfer events.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{InterceptError, Result};
use crate::types::event::{identifiers, BlockEvents, Event, Topic};
use crate::types::primitives::PublicKey;

/// A single raw log entry as received from the ingress layer, before
/// addresses are resolved to shards.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawLogEvent {
    /// Address the event targets, bech32-encoded.
    pub address: String,
    /// Event identifier.
    pub identifier: String,
    /// Ordered topics.
    #[serde(default)]
    pub topics: Vec<Topic>,
    /// Opaque payload.
    #[serde(default)]
    pub data: Vec<u8>,
}

/// A transaction log: the address the log is attached to, plus its raw
/// events in source order.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TxLog {
    /// Transaction hash.
    pub tx_hash: String,
    /// Address the log is attached to, bech32-encoded.
    pub address: String,
    /// Raw events in source order.
    pub events: Vec<RawLogEvent>,
}

/// The transactions pool: logs keyed by transaction hash.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransactionsPool {
    /// Logs produced by this block's transactions.
    pub logs: Vec<TxLog>,
}

/// Raw block-save arguments, as handed to the interceptor by the ingress
/// layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArgsSaveBlockData {
    /// Block hash (hex).
    pub hash: String,
    /// Shard that produced the block.
    pub shard_id: u32,
    /// Block timestamp (unix seconds).
    pub timestamp: i64,
    /// The transactions pool, when present. Absence is a malformed
    /// payload ([`InterceptError::NilTransactionsPool`]).
    pub transactions_pool: Option<TransactionsPool>,
    /// Smart contract results produced by this block, keyed by tx hash.
    /// Presence of a tx hash here lifts the error-gated transfer
    /// suppression for that log group (the transfer has a matching SCR).
    #[serde(default)]
    pub scrs: HashMap<String, serde_json::Value>,
}

/// Normalizes raw block-save data into [`BlockEvents`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Interceptor;

impl Interceptor {
    /// Create a new interceptor. Stateless; kept as a struct for symmetry
    /// with the rest of the core and to give call sites a stable handle to
    /// `#[instrument]`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Process raw block-save arguments into a normalized [`BlockEvents`].
    ///
    /// # Errors
    /// Returns [`InterceptError::NilTransactionsPool`] if the pool is
    /// absent, or [`InterceptError::InvalidPublicKey`] if an address
    /// cannot be parsed.
    #[instrument(skip(self, args), fields(hash = %args.hash))]
    pub fn process(&self, args: ArgsSaveBlockData) -> Result<BlockEvents> {
        let pool = args
            .transactions_pool
            .ok_or(InterceptError::NilTransactionsPool)?;

        let events = build_log_events(&pool, &args.scrs)?;

        Ok(BlockEvents {
            hash: args.hash,
            shard_id: args.shard_id,
            timestamp: args.timestamp,
            events,
        })
    }
}

/// Builds the normalized event list for a transactions pool, applying the
/// group-local `signalError`/`internalVMErrors` suppression rule: when a
/// transaction's log group contains a signal-error marker AND the log's tx
/// hash has no matching entry in the block's SCR map, the transfer events
/// emitted alongside it *within that same group* are dropped. A tx hash
/// present in the SCR map lifts the suppression even if a signal-error
/// marker fired. The suppression never crosses transaction boundaries.
fn build_log_events(pool: &TransactionsPool, scrs: &HashMap<String, serde_json::Value>) -> Result<Vec<Event>> {
    let mut out = Vec::new();

    for log in &pool.logs {
        let log_address = PublicKey::from_bech32(&log.address)?;
        let log_address_shard = log_address.shard().as_u32();

        let has_signal_error = log.events.iter().any(|e| {
            e.identifier == identifiers::SIGNAL_ERROR || e.identifier == identifiers::INTERNAL_VM_ERRORS
        });
        let suppress_transfers = has_signal_error && !scrs.contains_key(&log.tx_hash);

        for raw in &log.events {
            if suppress_transfers && is_transfer_identifier(&raw.identifier) {
                continue;
            }

            let address = PublicKey::from_bech32(&raw.address)?;

            out.push(Event {
                log_address: log_address.to_bech32(),
                log_address_shard,
                address: address.to_bech32(),
                address_shard: address.shard().as_u32(),
                identifier: raw.identifier.clone(),
                topics: raw.topics.clone(),
                data: raw.data.clone(),
                tx_hash: log.tx_hash.clone(),
            });
        }
    }

    Ok(out)
}

fn is_transfer_identifier(identifier: &str) -> bool {
    matches!(
        identifier,
        identifiers::ESDT_TRANSFER | identifiers::ESDT_NFT_TRANSFER | identifiers::MULTI_ESDT_NFT_TRANSFER
    )
}

/// Groups a block's normalized events by transaction hash. Used by the
/// session-bus side channel to reconstruct per-transaction log groups from
/// the flat event list.
#[must_use]
pub fn group_by_tx_hash(events: &[Event]) -> HashMap<&str, Vec<&Event>> {
    let mut groups: HashMap<&str, Vec<&Event>> = HashMap::new();
    for event in events {
        groups.entry(event.tx_hash.as_str()).or_default().push(event);
    }
    groups
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pool_with(events: Vec<RawLogEvent>, tx_hash: &str, address: &str) -> TransactionsPool {
        TransactionsPool {
            logs: vec![TxLog {
                tx_hash: tx_hash.into(),
                address: address.into(),
                events,
            }],
        }
    }

    fn zero_address() -> String {
        PublicKey::ZERO.to_bech32()
    }

    #[test]
    fn process_rejects_nil_pool() {
        let interceptor = Interceptor::new();
        let args = ArgsSaveBlockData {
            hash: "abcd".into(),
            shard_id: 0,
            timestamp: 0,
            transactions_pool: None,
            scrs: HashMap::new(),
        };
        let err = interceptor.process(args).unwrap_err();
        assert!(matches!(
            err,
            crate::error::NotifierError::Intercept(InterceptError::NilTransactionsPool)
        ));
    }

    #[test]
    fn signal_error_suppresses_sibling_transfer_in_same_group() {
        let pool = pool_with(
            vec![
                RawLogEvent {
                    address: zero_address(),
                    identifier: identifiers::SIGNAL_ERROR.into(),
                    topics: vec![],
                    data: vec![],
                },
                RawLogEvent {
                    address: zero_address(),
                    identifier: identifiers::ESDT_TRANSFER.into(),
                    topics: vec![],
                    data: vec![],
                },
            ],
            "tx1",
            &zero_address(),
        );

        let events = build_log_events(&pool, &HashMap::new()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].identifier, identifiers::SIGNAL_ERROR);
    }

    #[test]
    fn signal_error_does_not_suppress_transfer_when_tx_hash_has_an_scr() {
        let pool = pool_with(
            vec![
                RawLogEvent {
                    address: zero_address(),
                    identifier: identifiers::ESDT_TRANSFER.into(),
                    topics: vec![],
                    data: vec![],
                },
                RawLogEvent {
                    address: zero_address(),
                    identifier: identifiers::SIGNAL_ERROR.into(),
                    topics: vec![],
                    data: vec![],
                },
            ],
            "tx1",
            &zero_address(),
        );
        let scrs = HashMap::from([("tx1".to_string(), serde_json::json!({}))]);

        let events = build_log_events(&pool, &scrs).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.identifier == identifiers::ESDT_TRANSFER));
    }

    #[test]
    fn signal_error_does_not_suppress_transfer_in_a_different_transaction() {
        let mut pool = pool_with(
            vec![RawLogEvent {
                address: zero_address(),
                identifier: identifiers::SIGNAL_ERROR.into(),
                topics: vec![],
                data: vec![],
            }],
            "tx1",
            &zero_address(),
        );
        pool.logs.push(TxLog {
            tx_hash: "tx2".into(),
            address: zero_address(),
            events: vec![RawLogEvent {
                address: zero_address(),
                identifier: identifiers::ESDT_TRANSFER.into(),
                topics: vec![],
                data: vec![],
            }],
        });

        let events = build_log_events(&pool, &HashMap::new()).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.identifier == identifiers::ESDT_TRANSFER));
    }

    #[test]
    fn shards_are_derived_from_addresses() {
        let addr = zero_address();
        let pool = pool_with(
            vec![RawLogEvent {
                address: addr.clone(),
                identifier: identifiers::WRITE_LOG.into(),
                topics: vec![],
                data: vec![],
            }],
            "tx1",
            &addr,
        );

        let events = build_log_events(&pool, &HashMap::new()).unwrap();
        assert_eq!(events[0].address_shard, crate::types::primitives::METACHAIN_SHARD_ID);
    }

    #[test]
    fn group_by_tx_hash_partitions_events() {
        let events = vec![
            Event {
                log_address: zero_address(),
                log_address_shard: 0,
                address: zero_address(),
                address_shard: 0,
                identifier: "a".into(),
                topics: vec![],
                data: vec![],
                tx_hash: "tx1".into(),
            },
            Event {
                log_address: zero_address(),
                log_address_shard: 0,
                address: zero_address(),
                address_shard: 0,
                identifier: "b".into(),
                topics: vec![],
                data: vec![],
                tx_hash: "tx2".into(),
            },
        ];

        let groups = group_by_tx_hash(&events);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["tx1"].len(), 1);
    }
}
