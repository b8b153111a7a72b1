//! In-process key-value cache with per-entry TTLs.
//!
//! This is the "fast store" collaborator for session continuity, approval
//! resume payloads, merge tokens, and advisory locks. Entries are soft state:
//! durable mirrors in the relational store remain the reconciliation
//! fallback, the cache is authoritative only while an entry is live.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::time_utils::now_unix_ms;

#[derive(Debug, Clone)]
struct KvEntry {
    value: String,
    expires_at_ms: u64,
}

#[derive(Debug, Default)]
/// TTL-bearing key-value store shared across gateway and worker components.
pub struct KvCache {
    entries: Mutex<HashMap<String, KvEntry>>,
}

impl KvCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live value for `key`, dropping it first when expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.lock_entries();
        let now = now_unix_ms();
        match entries.get(key) {
            Some(entry) if entry.expires_at_ms > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) {
        let expires_at_ms = now_unix_ms().saturating_add(ttl.as_millis() as u64);
        self.lock_entries().insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at_ms,
            },
        );
    }

    /// Extends the TTL of a live entry; returns false when the key is absent
    /// or already expired.
    pub fn refresh_ttl(&self, key: &str, ttl: Duration) -> bool {
        let mut entries = self.lock_entries();
        let now = now_unix_ms();
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at_ms > now => {
                entry.expires_at_ms = now.saturating_add(ttl.as_millis() as u64);
                true
            }
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }

    /// Atomic set-if-absent used for advisory locking. Returns true when the
    /// caller now owns the key.
    pub fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let mut entries = self.lock_entries();
        let now = now_unix_ms();
        if let Some(existing) = entries.get(key) {
            if existing.expires_at_ms > now {
                return false;
            }
        }
        entries.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at_ms: now.saturating_add(ttl.as_millis() as u64),
            },
        );
        true
    }

    /// Removes a key, returning its live value when one existed.
    pub fn take(&self, key: &str) -> Option<String> {
        let mut entries = self.lock_entries();
        let now = now_unix_ms();
        entries
            .remove(key)
            .filter(|entry| entry.expires_at_ms > now)
            .map(|entry| entry.value)
    }

    pub fn remove(&self, key: &str) {
        self.lock_entries().remove(key);
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, KvEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::KvCache;

    #[test]
    fn get_returns_live_values_and_drops_expired_ones() {
        let cache = KvCache::new();
        cache.set_with_ttl("a", "1", Duration::from_secs(60));
        assert_eq!(cache.get("a").as_deref(), Some("1"));

        cache.set_with_ttl("b", "2", Duration::from_millis(0));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn set_if_absent_rejects_live_keys_and_reclaims_expired_ones() {
        let cache = KvCache::new();
        assert!(cache.set_if_absent("lock", "1", Duration::from_secs(10)));
        assert!(!cache.set_if_absent("lock", "1", Duration::from_secs(10)));

        cache.set_with_ttl("stale", "1", Duration::from_millis(0));
        assert!(cache.set_if_absent("stale", "2", Duration::from_secs(10)));
    }

    #[test]
    fn refresh_ttl_only_touches_live_entries() {
        let cache = KvCache::new();
        cache.set_with_ttl("a", "1", Duration::from_secs(10));
        assert!(cache.refresh_ttl("a", Duration::from_secs(60)));
        assert!(!cache.refresh_ttl("missing", Duration::from_secs(60)));
    }

    #[test]
    fn take_consumes_the_entry() {
        let cache = KvCache::new();
        cache.set_with_ttl("merge", "payload", Duration::from_secs(10));
        assert_eq!(cache.take("merge").as_deref(), Some("payload"));
        assert_eq!(cache.take("merge"), None);
    }
}
