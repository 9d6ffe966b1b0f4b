//! Domain types: validated primitives and the event data model.
//!
//! - [`primitives`] - Validated newtypes (`PublicKey`, `Shard`)
//! - [`event`] - The event data model flowing through the notifier core
//!
//! # Usage
//!
//! ```ignore
//! use chain_event_notifier::types::event::{BlockEvents, Event};
//! use chain_event_notifier::types::primitives::PublicKey;
//! ```

pub mod event;
pub mod primitives;

pub use event::{
    BlockEvents, BlockEventsWithOrder, BlockScrs, BlockTxs, Event, EventType, FeeInfo,
    FinalizedBlock, RevertBlock, ScrWithOrder, Subscription, SubscribeEvent, Topic, TxWithOrder,
};
pub use primitives::{InvalidPublicKey, PublicKey, Shard};
