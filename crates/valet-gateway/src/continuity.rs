//! Engine session continuity: cache-first with a durable mirror.
//!
//! The cache is authoritative while an entry is live; the mirror row only
//! seeds continuity after a cache miss (restart, TTL lapse). The two writes
//! are not transactional, by design.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use valet_core::KvCache;
use valet_store::Store;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub session_id: String,
    pub last_response_id: Option<String>,
}

pub struct SessionContinuity {
    store: Arc<Store>,
    cache: Arc<KvCache>,
    ttl: Duration,
}

impl SessionContinuity {
    pub fn new(store: Arc<Store>, cache: Arc<KvCache>, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    fn cache_key(person_id: &str) -> String {
        format!("runtime:person:{person_id}")
    }

    /// Returns the live session handle, falling back to the durable mirror
    /// and finally to `bootstrap` for a brand-new session. `bootstrap`
    /// reports whether it actually provisioned (so callers can audit it).
    pub async fn ensure<F, Fut>(&self, person_id: &str, bootstrap: F) -> Result<(SessionHandle, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SessionHandle>>,
    {
        if let Some(raw) = self.cache.get(&Self::cache_key(person_id)) {
            let handle: SessionHandle =
                serde_json::from_str(&raw).context("cached session handle is corrupt")?;
            self.cache.refresh_ttl(&Self::cache_key(person_id), self.ttl);
            self.mirror(person_id, &handle)?;
            return Ok((handle, false));
        }

        if let Some(row) = self.store.latest_runtime_session(person_id)? {
            let handle = SessionHandle {
                session_id: row.engine_session_id,
                last_response_id: row.last_response_id,
            };
            self.put(person_id, &handle)?;
            return Ok((handle, false));
        }

        let handle = bootstrap().await?;
        self.put(person_id, &handle)?;
        Ok((handle, true))
    }

    /// Persists a new response checkpoint in both stores, keeping the
    /// session id unchanged.
    pub fn update_checkpoint(&self, person_id: &str, response_id: &str) -> Result<()> {
        let key = Self::cache_key(person_id);
        let handle = match self.cache.get(&key) {
            Some(raw) => {
                let mut handle: SessionHandle =
                    serde_json::from_str(&raw).context("cached session handle is corrupt")?;
                handle.last_response_id = Some(response_id.to_string());
                handle
            }
            None => {
                let row = self
                    .store
                    .latest_runtime_session(person_id)?
                    .context("no session to checkpoint")?;
                SessionHandle {
                    session_id: row.engine_session_id,
                    last_response_id: Some(response_id.to_string()),
                }
            }
        };
        self.put(person_id, &handle)
    }

    /// Discards continuity and issues a fresh opaque session id.
    pub fn rotate(&self, person_id: &str) -> Result<SessionHandle> {
        let handle = SessionHandle {
            session_id: valet_core::new_entity_id("sess"),
            last_response_id: None,
        };
        self.put(person_id, &handle)?;
        Ok(handle)
    }

    fn put(&self, person_id: &str, handle: &SessionHandle) -> Result<()> {
        self.cache.set_with_ttl(
            &Self::cache_key(person_id),
            &serde_json::to_string(handle)?,
            self.ttl,
        );
        self.mirror(person_id, handle)
    }

    fn mirror(&self, person_id: &str, handle: &SessionHandle) -> Result<()> {
        self.store
            .upsert_runtime_session(
                person_id,
                &handle.session_id,
                handle.last_response_id.as_deref(),
                self.ttl,
            )
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn continuity() -> SessionContinuity {
        SessionContinuity::new(
            Arc::new(Store::open_in_memory().expect("store")),
            Arc::new(KvCache::default()),
            Duration::from_secs(600),
        )
    }

    fn handle(id: &str) -> SessionHandle {
        SessionHandle {
            session_id: id.to_string(),
            last_response_id: None,
        }
    }

    #[tokio::test]
    async fn bootstrap_runs_only_on_first_use() {
        let continuity = continuity();
        let (first, provisioned) = continuity
            .ensure("person-1", || async { Ok(handle("sess-1")) })
            .await
            .expect("ensure");
        assert!(provisioned);
        assert_eq!(first.session_id, "sess-1");

        let (second, provisioned) = continuity
            .ensure("person-1", || async { panic!("must not bootstrap") })
            .await
            .expect("ensure");
        assert!(!provisioned);
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn checkpoint_updates_survive_a_cache_miss() {
        let store = Arc::new(Store::open_in_memory().expect("store"));
        let warm = SessionContinuity::new(
            store.clone(),
            Arc::new(KvCache::default()),
            Duration::from_secs(600),
        );
        warm.ensure("person-1", || async { Ok(handle("sess-1")) })
            .await
            .expect("ensure");
        warm.update_checkpoint("person-1", "resp-5").expect("checkpoint");

        // Fresh cache simulates a process restart; the mirror row seeds it.
        let cold = SessionContinuity::new(store, Arc::new(KvCache::default()), Duration::from_secs(600));
        let (restored, provisioned) = cold
            .ensure("person-1", || async { panic!("must not bootstrap") })
            .await
            .expect("ensure");
        assert!(!provisioned);
        assert_eq!(restored.session_id, "sess-1");
        assert_eq!(restored.last_response_id.as_deref(), Some("resp-5"));
    }

    #[tokio::test]
    async fn rotate_invalidates_continuity() {
        let continuity = continuity();
        continuity
            .ensure("person-1", || async { Ok(handle("sess-1")) })
            .await
            .expect("ensure");
        let rotated = continuity.rotate("person-1").expect("rotate");
        assert_ne!(rotated.session_id, "sess-1");
        assert!(rotated.last_response_id.is_none());

        let (current, _) = continuity
            .ensure("person-1", || async { panic!("must not bootstrap") })
            .await
            .expect("ensure");
        assert_eq!(current.session_id, rotated.session_id);
    }
}
