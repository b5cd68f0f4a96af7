use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Async mutexes keyed by id. Used per server to serialize membership,
/// channel ordering, invite counters and event publication, and per user to
/// serialize presence changes.
///
/// Entries exist only while someone holds or waits for them: the last guard
/// to drop removes its key, so ids that never resolve leave nothing behind.
#[derive(Default)]
pub struct KeyedLocks {
    inner: Arc<LockMap>,
}

/// Exclusive access to one key. Releases on drop.
pub struct KeyedGuard {
    map: Arc<LockMap>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // Release first so our own Arc clone is gone before the count check.
        self.guard.take();
        // Waiters clone the Arc under the same shard lock, so a count of one
        // means nobody else can reach this mutex.
        self.map
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &str) -> KeyedGuard {
        // Clone the Arc out so no map shard stays locked across the await.
        let mutex = self.inner.entry(key.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            map: self.inner.clone(),
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Lock several keys in sorted order so overlapping callers cannot deadlock.
    pub async fn acquire_many(&self, keys: &[String]) -> Vec<KeyedGuard> {
        let mut sorted: Vec<&String> = keys.iter().collect();
        sorted.sort();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            guards.push(self.acquire(key).await);
        }
        guards
    }

    /// Keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("s1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.acquire("s1").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("s2")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_many_dedups_and_releases_entries() {
        let locks = KeyedLocks::new();
        let guards = locks
            .acquire_many(&["b".to_string(), "a".to_string(), "b".to_string()])
            .await;
        assert_eq!(guards.len(), 2);
        assert_eq!(locks.len(), 2);
        drop(guards);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_entry_survives_while_a_waiter_is_queued() {
        let locks = Arc::new(KeyedLocks::new());
        let first = locks.acquire("s1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("s1").await;
            })
        };
        // Let the waiter register on the mutex.
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_many_distinct_keys_leave_no_entries() {
        let locks = KeyedLocks::new();
        for i in 0..1000 {
            let _guard = locks.acquire(&format!("missing-{i}")).await;
        }
        assert_eq!(locks.len(), 0);
    }
}
