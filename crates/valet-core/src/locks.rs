//! Per-person advisory locks on top of the TTL cache.
//!
//! A held lock serializes the turn loop for one person. The guard releases on
//! drop so the lock is freed even when a turn errors mid-flight; the TTL is
//! the crash backstop when a process dies while holding it.

use std::sync::Arc;
use std::time::Duration;

use crate::kv_cache::KvCache;

#[derive(Debug, Clone)]
/// Non-blocking acquire-with-TTL lock manager keyed by person id.
pub struct AdvisoryLocks {
    cache: Arc<KvCache>,
    ttl: Duration,
}

/// Owned lock handle. Dropping it releases the lock.
pub struct LockGuard {
    cache: Arc<KvCache>,
    key: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.cache.remove(&self.key);
    }
}

impl AdvisoryLocks {
    pub fn new(cache: Arc<KvCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Attempts to take the lock for `person_id` without blocking.
    pub fn acquire(&self, person_id: &str) -> Option<LockGuard> {
        let key = lock_key(person_id);
        if self.cache.set_if_absent(&key, "1", self.ttl) {
            Some(LockGuard {
                cache: Arc::clone(&self.cache),
                key,
            })
        } else {
            None
        }
    }
}

fn lock_key(person_id: &str) -> String {
    format!("lock:person:{person_id}")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::AdvisoryLocks;
    use crate::kv_cache::KvCache;

    #[test]
    fn second_acquire_fails_while_guard_is_held() {
        let cache = Arc::new(KvCache::new());
        let locks = AdvisoryLocks::new(cache, Duration::from_secs(20));

        let guard = locks.acquire("p1").expect("first acquire");
        assert!(locks.acquire("p1").is_none());
        drop(guard);
        assert!(locks.acquire("p1").is_some());
    }

    #[test]
    fn locks_are_scoped_per_person() {
        let cache = Arc::new(KvCache::new());
        let locks = AdvisoryLocks::new(cache, Duration::from_secs(20));

        let _a = locks.acquire("p1").expect("p1");
        assert!(locks.acquire("p2").is_some());
    }
}
