//! Per-key async lock with cleanup of idle keys.

use std::hash::Hash;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap<K> = DashMap<K, Weak<Mutex<()>>>;

/// Guard returned by [`KeyedAsyncLock::lock`].
///
/// Dropping the last guard (with no other task waiting) removes the key from the map.
pub struct KeyedLockGuard<K>
where
    K: Hash + Eq + Clone,
{
    guard: Option<OwnedMutexGuard<()>>,
    arc: Arc<Mutex<()>>,
    key: K,
    locks: Arc<LockMap<K>>,
}

impl<K> Drop for KeyedLockGuard<K>
where
    K: Hash + Eq + Clone,
{
    fn drop(&mut self) {
        drop(self.guard.take());
        // The shard lock held by `remove_if` excludes a concurrent upgrade in `get_or_create`,
        // so a count of 1 means nobody else holds or waits for this mutex.
        self.locks
            .remove_if(&self.key, |_, _| Arc::strong_count(&self.arc) == 1);
    }
}

/// Serializes async operations per key while letting different keys proceed in parallel.
///
/// The lifecycle manager keys this by container name, so two concurrent starts of the same
/// engine cannot both observe "absent" and race into duplicate creates.
pub struct KeyedAsyncLock<K>
where
    K: Hash + Eq + Clone,
{
    locks: Arc<LockMap<K>>,
}

impl<K> KeyedAsyncLock<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Waits until no other guard for `key` is alive and returns a new one.
    pub async fn lock(&self, key: &K) -> KeyedLockGuard<K> {
        let arc = self.get_or_create(key);
        let guard = Arc::clone(&arc).lock_owned().await;

        KeyedLockGuard {
            guard: Some(guard),
            arc,
            key: key.clone(),
            locks: Arc::clone(&self.locks),
        }
    }

    fn get_or_create(&self, key: &K) -> Arc<Mutex<()>> {
        match self.locks.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if let Some(strong) = occupied.get().upgrade() {
                    return strong;
                }
                let strong = Arc::new(Mutex::new(()));
                occupied.insert(Arc::downgrade(&strong));
                strong
            }
            Entry::Vacant(vacant) => {
                let strong = Arc::new(Mutex::new(()));
                vacant.insert(Arc::downgrade(&strong));
                strong
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

impl<K> Default for KeyedAsyncLock<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_lock_serializes_same_key() {
        let locks = Arc::new(KeyedAsyncLock::<String>::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..10 {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&"c1".to_owned()).await;
                let val = counter.load(Ordering::SeqCst);
                sleep(Duration::from_millis(1)).await;
                counter.store(val + 1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedAsyncLock::<u32>::new();
        let first = locks.lock(&1).await;
        let second = tokio::time::timeout(Duration::from_secs(1), locks.lock(&2)).await;
        assert!(second.is_ok());
        assert_eq!(locks.len(), 2);
        drop(first);
        drop(second);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_waiter_keeps_entry_alive() {
        let locks = Arc::new(KeyedAsyncLock::<u32>::new());
        let guard = locks.lock(&7).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock(&7).await;
            })
        };
        tokio::task::yield_now().await;
        sleep(Duration::from_millis(10)).await;

        drop(guard);
        assert_eq!(locks.len(), 1);
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }
}
