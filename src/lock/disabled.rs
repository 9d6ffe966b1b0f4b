//! No-op lock service used when `connector_api.check_duplicates` is off.

use async_trait::async_trait;

use crate::error::Result;

use super::LockService;

/// Always reports events as unseen. Used to skip Redis entirely when
/// dedup is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledLockService;

#[async_trait]
impl LockService for DisabledLockService {
    async fn is_event_processed(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }
}
