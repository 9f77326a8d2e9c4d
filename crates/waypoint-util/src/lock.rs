//! Per-key async locks.
//!
//! `KeyedLocks` hands out one `tokio::sync::Mutex` per string key. Holders
//! of the same key are queued in FIFO order; different keys never contend.
//! The returned guard releases the key when dropped, including on early
//! returns and `?` propagation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Registry of async locks keyed by string, e.g. `"conversation-cnv_123"`.
#[derive(Default, Clone)]
pub struct KeyedLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Guard for a held key. Dropping it releases the key.
pub struct KeyedGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedGuard {
    /// The key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl KeyedLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the conventional `<type>-<id>` key.
    pub fn key(kind: &str, id: &str) -> String {
        format!("{kind}-{id}")
    }

    /// Acquire the lock for `key`, waiting for any current holder.
    pub async fn acquire(&self, key: impl Into<String>) -> KeyedGuard {
        let key = key.into();
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Entries only referenced by the map are idle.
            locks.retain(|k, m| k == &key || Arc::strong_count(m) > 1);
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        trace!(key = %key, "Waiting for lock");
        let guard = mutex.lock_owned().await;
        trace!(key = %key, "Lock acquired");

        KeyedGuard { key, _guard: guard }
    }

    /// Number of keys currently tracked (held or waited on).
    pub fn tracked(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|m| Arc::strong_count(m) > 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = active.clone();
            let max_active = max_active.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("conversation-1").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.acquire("message-a").await;
        let b = tokio::time::timeout(Duration::from_millis(200), locks.acquire("message-b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_guard_drop_releases_key() {
        let locks = KeyedLocks::new();
        {
            let guard = locks.acquire(KeyedLocks::key("snapshot", "x")).await;
            assert_eq!(guard.key(), "snapshot-x");
            assert_eq!(locks.tracked(), 1);
        }
        assert_eq!(locks.tracked(), 0);
        let again = tokio::time::timeout(Duration::from_millis(200), locks.acquire("snapshot-x")).await;
        assert!(again.is_ok());
    }
}
