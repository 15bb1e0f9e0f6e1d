use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use canopy_core::cache::DecisionCache;

#[derive(Debug, Clone, Copy)]
struct Entry {
    allowed: bool,
    expires_at: Instant,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local expiring decision cache.
///
/// Reads share the lock; writes are exclusive. Each entry expires a fixed
/// TTL after insertion; an expired entry reads as a miss without mutating
/// the map. When an insert would exceed `max_size`, expired entries are
/// swept first, and if the map is still full it is discarded wholesale
/// before the insert proceeds. Stale data can never leak; the hit rate
/// pays for it under heavy pressure.
#[derive(Debug)]
pub struct LocalCache {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
    max_size: usize,
}

impl LocalCache {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_size,
        }
    }

    /// Starts the background sweeper that drops expired entries every
    /// `interval`. The task runs for the life of the process.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await;
            loop {
                tick.tick().await;
                cache.sweep();
            }
        })
    }

    /// Removes every expired entry. Also used directly by the insert path
    /// when the map is at capacity.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap();
        entries.retain(|_, entry| !entry.expired(now));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }
}

#[async_trait]
impl DecisionCache for LocalCache {
    async fn get(&self, key: &str) -> Option<bool> {
        let now = Instant::now();
        let entries = self.entries.read().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expired(now) => None,
            Some(entry) => Some(entry.allowed),
            None => None,
        }
    }

    async fn set(&self, key: &str, allowed: bool) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap();

        if entries.len() >= self.max_size {
            entries.retain(|_, entry| !entry.expired(now));
            if entries.len() >= self.max_size {
                entries.clear();
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                allowed,
                expires_at: now + self.ttl,
            },
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.write().unwrap().remove(key);
    }

    async fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}
