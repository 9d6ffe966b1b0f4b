//! Broker driver port: publishes raw payloads to named exchanges over
//! AMQP, and signals connectivity loss so the publisher loop can reconnect
//! or reopen the channel without crashing.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind as AmqpExchangeKind};
use tokio::sync::{watch, RwLock};
use tracing::instrument;

use crate::error::{Result, TransportError};

use super::exchanges::ExchangeTable;

/// Signals the current connectivity state of a broker driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// The underlying connection and channel are healthy.
    Connected,
    /// The underlying connection dropped; the driver needs [`BrokerDriver::reconnect`].
    Disconnected,
    /// The connection is alive but the channel closed; the driver needs
    /// [`BrokerDriver::reopen_channel`].
    ChannelClosed,
}

/// A `watch` receiver a caller can poll or await for connectivity
/// transitions.
pub type ConnectivitySignals = watch::Receiver<Connectivity>;

/// Port for publishing raw payloads to a named exchange.
#[async_trait]
pub trait BrokerDriver: Send + Sync {
    /// Publish `payload` to the exchange named `exchange`.
    ///
    /// # Errors
    /// Returns [`TransportError::Publish`] on failure.
    async fn publish(&self, exchange: &str, payload: &[u8]) -> Result<()>;

    /// Current connectivity signal receiver.
    fn connectivity(&self) -> ConnectivitySignals;

    /// Re-establish the connection (and its channel) after a
    /// [`Connectivity::Disconnected`] signal.
    ///
    /// # Errors
    /// Returns [`TransportError::Connectivity`] if the reconnect fails.
    async fn reconnect(&self) -> Result<()>;

    /// Re-open the channel on the existing connection after a
    /// [`Connectivity::ChannelClosed`] signal.
    ///
    /// # Errors
    /// Returns [`TransportError::Connectivity`] if the channel cannot be
    /// reopened.
    async fn reopen_channel(&self) -> Result<()>;
}

struct AmqpState {
    connection: Connection,
    channel: Channel,
}

/// AMQP-backed broker driver using `lapin`.
pub struct AmqpBrokerDriver {
    url: String,
    table: ExchangeTable,
    state: RwLock<AmqpState>,
    connectivity_tx: watch::Sender<Connectivity>,
}

async fn declare_exchanges(channel: &Channel, table: &ExchangeTable) -> Result<()> {
    for (_, name, kind) in table.all() {
        channel
            .exchange_declare(
                name,
                parse_exchange_kind(kind),
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Connectivity(e.to_string()))?;
    }
    Ok(())
}

impl AmqpBrokerDriver {
    /// Connect to the broker and declare every exchange in `table`.
    ///
    /// # Errors
    /// Returns [`TransportError::Connectivity`] if the connection or
    /// initial exchange declarations fail.
    pub async fn connect(url: &str, table: &ExchangeTable) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::Connectivity(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TransportError::Connectivity(e.to_string()))?;
        declare_exchanges(&channel, table).await?;

        let (connectivity_tx, _) = watch::channel(Connectivity::Connected);

        Ok(Self {
            url: url.to_string(),
            table: table.clone(),
            state: RwLock::new(AmqpState { connection, channel }),
            connectivity_tx,
        })
    }
}

#[async_trait]
impl BrokerDriver for AmqpBrokerDriver {
    #[instrument(skip(self, payload), fields(exchange))]
    async fn publish(&self, exchange: &str, payload: &[u8]) -> Result<()> {
        let channel = self.state.read().await.channel.clone();
        let result = channel
            .basic_publish(
                exchange,
                "",
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default(),
            )
            .await;

        match result {
            Ok(confirm) => {
                confirm
                    .await
                    .map_err(|e| TransportError::Publish(e.to_string()))?;
                let _ = self.connectivity_tx.send(Connectivity::Connected);
                Ok(())
            }
            Err(error) => {
                let connected = self.state.read().await.connection.status().connected();
                let signal = if connected {
                    Connectivity::ChannelClosed
                } else {
                    Connectivity::Disconnected
                };
                let _ = self.connectivity_tx.send(signal);
                Err(TransportError::Publish(error.to_string()).into())
            }
        }
    }

    fn connectivity(&self) -> ConnectivitySignals {
        self.connectivity_tx.subscribe()
    }

    async fn reconnect(&self) -> Result<()> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::Connectivity(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TransportError::Connectivity(e.to_string()))?;
        declare_exchanges(&channel, &self.table).await?;

        *self.state.write().await = AmqpState { connection, channel };
        let _ = self.connectivity_tx.send(Connectivity::Connected);
        Ok(())
    }

    async fn reopen_channel(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let channel = state
            .connection
            .create_channel()
            .await
            .map_err(|e| TransportError::Connectivity(e.to_string()))?;
        declare_exchanges(&channel, &self.table).await?;
        state.channel = channel;
        drop(state);

        let _ = self.connectivity_tx.send(Connectivity::Connected);
        Ok(())
    }
}

fn parse_exchange_kind(kind: &str) -> AmqpExchangeKind {
    match kind {
        "direct" => AmqpExchangeKind::Direct,
        "topic" => AmqpExchangeKind::Topic,
        "headers" => AmqpExchangeKind::Headers,
        _ => AmqpExchangeKind::Fanout,
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks {
    //! Mock implementations for testing.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{async_trait, watch, BrokerDriver, Connectivity, ConnectivitySignals, Result, TransportError};

    /// Records every publish; can be told to fail the next N calls. Also
    /// counts `reconnect`/`reopen_channel` calls so tests can assert the
    /// publisher loop reacted to a connectivity signal.
    #[derive(Clone)]
    pub struct MockBrokerDriver {
        published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
        fail_next: Arc<AtomicUsize>,
        connectivity_tx: Arc<watch::Sender<Connectivity>>,
        reconnects: Arc<AtomicUsize>,
        reopens: Arc<AtomicUsize>,
    }

    impl MockBrokerDriver {
        /// Create a mock driver that never fails.
        #[must_use]
        pub fn new() -> Self {
            let (tx, _) = watch::channel(Connectivity::Connected);
            Self {
                published: Arc::new(Mutex::new(Vec::new())),
                fail_next: Arc::new(AtomicUsize::new(0)),
                connectivity_tx: Arc::new(tx),
                reconnects: Arc::new(AtomicUsize::new(0)),
                reopens: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Make the next `n` publish calls fail.
        pub fn fail_next(&self, n: usize) {
            self.fail_next.store(n, Ordering::SeqCst);
        }

        /// Every `(exchange, payload)` published so far.
        #[must_use]
        pub fn published(&self) -> Vec<(String, Vec<u8>)> {
            self.published.lock().clone()
        }

        /// Push a connectivity transition for the loop to react to.
        pub fn signal(&self, connectivity: Connectivity) {
            let _ = self.connectivity_tx.send(connectivity);
        }

        /// Number of times `reconnect` was called.
        #[must_use]
        pub fn reconnect_count(&self) -> usize {
            self.reconnects.load(Ordering::SeqCst)
        }

        /// Number of times `reopen_channel` was called.
        #[must_use]
        pub fn reopen_count(&self) -> usize {
            self.reopens.load(Ordering::SeqCst)
        }
    }

    impl Default for MockBrokerDriver {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl BrokerDriver for MockBrokerDriver {
        async fn publish(&self, exchange: &str, payload: &[u8]) -> Result<()> {
            let remaining = self.fail_next.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next.fetch_sub(1, Ordering::SeqCst);
                return Err(TransportError::Publish("mock failure".into()).into());
            }
            self.published.lock().push((exchange.to_string(), payload.to_vec()));
            Ok(())
        }

        fn connectivity(&self) -> ConnectivitySignals {
            self.connectivity_tx.subscribe()
        }

        async fn reconnect(&self) -> Result<()> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            let _ = self.connectivity_tx.send(Connectivity::Connected);
            Ok(())
        }

        async fn reopen_channel(&self) -> Result<()> {
            self.reopens.fetch_add(1, Ordering::SeqCst);
            let _ = self.connectivity_tx.send(Connectivity::Connected);
            Ok(())
        }
    }
}
