//! Facade: the thin orchestrator wiring the interceptor to the events
//! handler, exposed to the (out-of-scope) ingress layer as a single
//! entry point.

use tracing::instrument;

use crate::error::Result;
use crate::handler::{EventsHandler, Publisher};
use crate::interceptor::{ArgsSaveBlockData, Interceptor};
use crate::lock::LockService;
use crate::types::event::{BlockEventsWithOrder, BlockScrs, BlockTxs, FinalizedBlock, RevertBlock};

/// Entry point used by the ingress layer: normalizes raw block data and
/// forwards it to whichever publisher the process was configured with.
pub struct Facade<L, P> {
    interceptor: Interceptor,
    handler: EventsHandler<L, P>,
}

impl<L, P> Facade<L, P>
where
    L: LockService,
    P: Publisher,
{
    /// Build a facade from its constituent parts.
    #[must_use]
    pub const fn new(interceptor: Interceptor, handler: EventsHandler<L, P>) -> Self {
        Self { interceptor, handler }
    }

    /// Normalize and handle a raw block-save payload.
    ///
    /// # Errors
    /// Returns an error if normalization fails ([`crate::error::InterceptError`])
    /// or the handler's publish fails.
    #[instrument(skip(self, args), fields(hash = %args.hash))]
    pub async fn save_block(&self, args: ArgsSaveBlockData) -> Result<()> {
        let events = self.interceptor.process(args)?;
        self.handler.handle_block_events(events).await
    }

    /// Normalize and handle a raw block-save payload that also carries
    /// ordered txs/scrs.
    ///
    /// # Errors
    /// See [`Self::save_block`].
    pub async fn save_block_with_order(&self, events: BlockEventsWithOrder) -> Result<()> {
        self.handler.handle_block_events_with_order(events).await
    }

    /// Forward a block revert notification.
    ///
    /// # Errors
    /// Returns an error if the handler's publish fails.
    pub async fn revert_block(&self, revert: RevertBlock) -> Result<()> {
        self.handler.handle_revert(revert).await
    }

    /// Forward a block finalization notification.
    ///
    /// # Errors
    /// Returns an error if the handler's publish fails.
    pub async fn finalized_block(&self, finalized: FinalizedBlock) -> Result<()> {
        self.handler.handle_finalized(finalized).await
    }

    /// Forward a block's raw transactions.
    ///
    /// # Errors
    /// Returns an error if the handler's publish fails.
    pub async fn block_txs(&self, txs: BlockTxs) -> Result<()> {
        self.handler.handle_block_txs(txs).await
    }

    /// Forward a block's raw smart contract results.
    ///
    /// # Errors
    /// Returns an error if the handler's publish fails.
    pub async fn block_scrs(&self, scrs: BlockScrs) -> Result<()> {
        self.handler.handle_block_scrs(scrs).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::interceptor::{RawLogEvent, TransactionsPool, TxLog};
    use crate::lock::mocks::MockLockService;
    use crate::types::event::{BlockEvents, BlockScrs, BlockTxs};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CountingPublisher {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Publisher for CountingPublisher {
        async fn broadcast(&self, _events: BlockEvents) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn broadcast_with_order(&self, _events: BlockEventsWithOrder) -> Result<()> {
            Ok(())
        }
        async fn broadcast_revert(&self, _revert: RevertBlock) -> Result<()> {
            Ok(())
        }
        async fn broadcast_finalized(&self, _finalized: FinalizedBlock) -> Result<()> {
            Ok(())
        }
        async fn broadcast_txs(&self, _txs: BlockTxs) -> Result<()> {
            Ok(())
        }
        async fn broadcast_scrs(&self, _scrs: BlockScrs) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn save_block_normalizes_and_publishes() {
        let publisher = CountingPublisher::default();
        let handler = EventsHandler::new(MockLockService::new(), publisher.clone(), true);
        let facade = Facade::new(Interceptor::new(), handler);

        let zero = crate::types::primitives::PublicKey::ZERO.to_bech32();
        let args = ArgsSaveBlockData {
            hash: "h1".into(),
            shard_id: 0,
            timestamp: 0,
            transactions_pool: Some(TransactionsPool {
                logs: vec![TxLog {
                    tx_hash: "tx1".into(),
                    address: zero.clone(),
                    events: vec![RawLogEvent {
                        address: zero,
                        identifier: "writeLog".into(),
                        topics: vec![],
                        data: vec![],
                    }],
                }],
            }),
            scrs: std::collections::HashMap::new(),
        };

        facade.save_block(args).await.unwrap();
        assert_eq!(publisher.count.load(Ordering::SeqCst), 1);
    }
}
