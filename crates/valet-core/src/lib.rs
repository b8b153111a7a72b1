//! Shared primitives for the Valet workspace: ids, time, text shaping, and
//! the TTL key-value cache that backs session continuity and advisory locks.

pub mod kv_cache;
pub mod locks;
pub mod text;
pub mod time_utils;

pub use kv_cache::KvCache;
pub use locks::{AdvisoryLocks, LockGuard};
pub use text::{collapse_whitespace, truncate_chars};
pub use time_utils::{now_rfc3339, now_unix_ms, unix_ms_after};

use std::sync::atomic::{AtomicU64, Ordering};

static ENTITY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocates an opaque, process-unique entity id with a type prefix.
pub fn new_entity_id(prefix: &str) -> String {
    let millis = now_unix_ms();
    let count = ENTITY_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{millis}-{count}")
}
