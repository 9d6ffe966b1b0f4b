//! Deduplication lock service: prevents the same event payload from being
//! pushed to subscribers/exchanges twice.
//!
//! [`LockService`] is a port; [`redis_lock::RedisLockService`] is the
//! production adapter and [`disabled::DisabledLockService`] is used when
//! `connector_api.check_duplicates` is off.

pub mod disabled;
pub mod redis_lock;

use async_trait::async_trait;

use crate::error::Result;

pub use disabled::DisabledLockService;
pub use redis_lock::RedisLockService;

/// Port for deduplication bookkeeping.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Returns `true` if `key` has already been seen (and records it if
    /// not), so that a caller can skip re-processing a duplicate event.
    ///
    /// # Errors
    /// Returns a [`crate::error::NotifierError::Transport`] on backend
    /// failure. Callers should treat
    /// [`crate::error::TransportError::LockConnectionRefused`] specially:
    /// it signals a retriable condition rather than a hard failure.
    async fn is_event_processed(&self, key: &str) -> Result<bool>;
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks {
    //! Mock implementations for testing.

    use std::collections::HashSet;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{async_trait, LockService, Result};

    /// An in-memory lock service; never returns an error.
    #[derive(Debug, Clone, Default)]
    pub struct MockLockService {
        seen: Arc<Mutex<HashSet<String>>>,
    }

    impl MockLockService {
        /// Create an empty mock lock service.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of distinct keys recorded so far.
        #[must_use]
        pub fn seen_count(&self) -> usize {
            self.seen.lock().len()
        }
    }

    #[async_trait]
    impl LockService for MockLockService {
        async fn is_event_processed(&self, key: &str) -> Result<bool> {
            let mut seen = self.seen.lock();
            if seen.contains(key) {
                Ok(true)
            } else {
                seen.insert(key.to_string());
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::mocks::MockLockService;
    use super::*;

    #[tokio::test]
    async fn mock_lock_service_dedupes() {
        let lock = MockLockService::new();
        assert!(!lock.is_event_processed("a").await.unwrap());
        assert!(lock.is_event_processed("a").await.unwrap());
        assert!(!lock.is_event_processed("b").await.unwrap());
        assert_eq!(lock.seen_count(), 2);
    }
}
