//! Per-account critical sections.
//!
//! Every mutation of one account's session (API call, provider event, timer)
//! runs under that account's async mutex. Different accounts never contend.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use msgdeck_types::account::AccountKey;

#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    locks: DashMap<AccountKey, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub(crate) async fn lock(&self, key: &AccountKey) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(key.clone()).or_default().clone();
        mutex.lock_owned().await
    }

    /// Forget `key`'s mutex when nobody holds or awaits it. A later `lock`
    /// starts a fresh one.
    pub(crate) fn prune(&self, key: &AccountKey) -> bool {
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1)
            .is_some()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}
