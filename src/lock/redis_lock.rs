//! Redis-backed dedup lock: `SET key 1 NX EX ttl`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::instrument;

use crate::config::RedisSettings;
use crate::error::{NotifierError, Result, TransportError};

use super::LockService;

/// Dedup lock backed by a single Redis instance (or sentinel-resolved
/// primary) reached through `redis::aio::ConnectionManager`, which
/// reconnects transparently on connection loss.
#[derive(Clone)]
pub struct RedisLockService {
    conn: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisLockService {
    /// Connect to Redis and build the lock service.
    ///
    /// # Errors
    /// Returns [`TransportError::Lock`] if the initial connection fails.
    pub async fn connect(settings: &RedisSettings) -> Result<Self> {
        let client = redis::Client::open(settings.url.as_str())
            .map_err(|e| TransportError::Lock(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| map_redis_err(&e))?;

        Ok(Self {
            conn,
            ttl_seconds: settings.ttl().as_secs(),
        })
    }
}

#[async_trait]
impl LockService for RedisLockService {
    #[instrument(skip(self), fields(key))]
    async fn is_event_processed(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let set: Option<String> = conn
            .set_options(
                key,
                1,
                redis::SetOptions::default()
                    .conditional_set(redis::ExistenceCheck::NX)
                    .with_expiration(redis::SetExpiry::EX(self.ttl_seconds)),
            )
            .await
            .map_err(|e| map_redis_err(&e))?;

        // `NX` returns `None` when the key already existed: a duplicate.
        Ok(set.is_none())
    }
}

fn map_redis_err(err: &redis::RedisError) -> NotifierError {
    if err.is_connection_refusal() {
        TransportError::LockConnectionRefused.into()
    } else {
        TransportError::Lock(err.to_string()).into()
    }
}
