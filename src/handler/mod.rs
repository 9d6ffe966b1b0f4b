//! Events handler: the seam between the interceptor's normalized output
//! and a publisher (hub or broker), with deduplication in between.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::error::{NotifierError, Result, TransportError};
use crate::lock::LockService;
use crate::types::event::{BlockEvents, BlockEventsWithOrder, BlockScrs, BlockTxs, FinalizedBlock, RevertBlock};

/// How long to wait before retrying a lock check that was refused at the
/// connection level.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Port implemented by whichever component fans events out to consumers:
/// the websocket [`crate::hub::Hub`] or the [`crate::publisher::BrokerPublisher`].
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Broadcast a block's events.
    async fn broadcast(&self, events: BlockEvents) -> Result<()>;
    /// Broadcast a block's events together with ordered txs/scrs.
    async fn broadcast_with_order(&self, events: BlockEventsWithOrder) -> Result<()>;
    /// Broadcast a block revert.
    async fn broadcast_revert(&self, revert: RevertBlock) -> Result<()>;
    /// Broadcast a block finalization.
    async fn broadcast_finalized(&self, finalized: FinalizedBlock) -> Result<()>;
    /// Broadcast a block's raw transactions.
    async fn broadcast_txs(&self, txs: BlockTxs) -> Result<()>;
    /// Broadcast a block's raw smart contract results.
    async fn broadcast_scrs(&self, scrs: BlockScrs) -> Result<()>;
}

/// Deduplicates and forwards normalized block data to a [`Publisher`].
///
/// Only [`BlockEvents`] pushes are deduplicated (keyed by block hash);
/// reverts, finalizations, and raw tx/scr dumps pass through unconditionally,
/// mirroring the upstream system's dedup scope.
pub struct EventsHandler<L, P> {
    lock: L,
    publisher: P,
    check_duplicates: bool,
}

impl<L, P> EventsHandler<L, P>
where
    L: LockService,
    P: Publisher,
{
    /// Build a new handler. `check_duplicates` mirrors
    /// `connector_api.check_duplicates`; when `false` the lock service is
    /// never consulted.
    pub const fn new(lock: L, publisher: P, check_duplicates: bool) -> Self {
        Self {
            lock,
            publisher,
            check_duplicates,
        }
    }

    /// Handle a block's events, deduplicating by block hash.
    #[instrument(skip(self, events), fields(hash = %events.hash))]
    pub async fn handle_block_events(&self, events: BlockEvents) -> Result<()> {
        if self.check_duplicates && self.is_duplicate(&events.hash).await? {
            metrics::counter!(crate::metrics::DEDUP_HITS).increment(1);
            debug!(hash = %events.hash, "dropping duplicate block events");
            return Ok(());
        }
        metrics::counter!(crate::metrics::EVENTS_HANDLED).increment(1);
        self.publisher.broadcast(events).await
    }

    /// Handle a block's events with ordered txs/scrs, deduplicating by
    /// block hash.
    #[instrument(skip(self, events), fields(hash = %events.hash))]
    pub async fn handle_block_events_with_order(&self, events: BlockEventsWithOrder) -> Result<()> {
        if self.check_duplicates && self.is_duplicate(&events.hash).await? {
            debug!(hash = %events.hash, "dropping duplicate block events with order");
            return Ok(());
        }
        self.publisher.broadcast_with_order(events).await
    }

    /// Handle a block revert. Never deduplicated.
    #[instrument(skip(self, revert), fields(hash = %revert.hash))]
    pub async fn handle_revert(&self, revert: RevertBlock) -> Result<()> {
        self.publisher.broadcast_revert(revert).await
    }

    /// Handle a block finalization. Never deduplicated.
    #[instrument(skip(self, finalized), fields(hash = %finalized.hash))]
    pub async fn handle_finalized(&self, finalized: FinalizedBlock) -> Result<()> {
        self.publisher.broadcast_finalized(finalized).await
    }

    /// Handle a block's raw transactions. Never deduplicated.
    #[instrument(skip(self, txs), fields(hash = %txs.hash))]
    pub async fn handle_block_txs(&self, txs: BlockTxs) -> Result<()> {
        self.publisher.broadcast_txs(txs).await
    }

    /// Handle a block's raw smart contract results. Never deduplicated.
    #[instrument(skip(self, scrs), fields(hash = %scrs.hash))]
    pub async fn handle_block_scrs(&self, scrs: BlockScrs) -> Result<()> {
        self.publisher.broadcast_scrs(scrs).await
    }

    /// Check whether `key` has already been processed, retrying on
    /// `LockConnectionRefused` rather than surfacing it to the caller:
    /// the lock backend may still be starting up.
    async fn is_duplicate(&self, key: &str) -> Result<bool> {
        loop {
            match self.lock.is_event_processed(key).await {
                Ok(seen) => return Ok(seen),
                Err(NotifierError::Transport(TransportError::LockConnectionRefused)) => {
                    warn!("lock service connection refused, retrying");
                    tokio::time::sleep(LOCK_RETRY_DELAY).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}
