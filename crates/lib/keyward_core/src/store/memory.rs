//! In-process [`EphemeralStore`] backed by a `DashMap`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::EphemeralStore;
use crate::auth::AuthResult;

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Process-local store. Expiry is checked on every read and expired entries
/// are evicted by [`MemoryStore::cleanup`].
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of entries held, live or not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict expired entries. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// A shared store with its sweep task already running. Must be called
    /// inside a tokio runtime.
    pub fn with_sweeper(every: Duration) -> Arc<Self> {
        let store = Arc::new(Self::new());
        store.spawn_cleanup_task(every);
        store
    }

    /// Spawn a periodic cleanup task. The task ends once the store is dropped.
    pub fn spawn_cleanup_task(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let evicted = store.cleanup();
                if evicted > 0 {
                    debug!(evicted, "swept expired ephemeral entries");
                }
            }
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> AuthResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn take(&self, key: &str) -> AuthResult<Option<String>> {
        // `remove` holds the shard lock, so only one caller can win the entry.
        let Some((_, entry)) = self.entries.remove(key) else {
            return Ok(None);
        };
        if !entry.is_live(Instant::now()) {
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn delete(&self, key: &str) -> AuthResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
