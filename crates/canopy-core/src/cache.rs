use async_trait::async_trait;
use uuid::Uuid;

/// Builds the cache key for a permission decision.
pub fn decision_key(principal: &str, resource_id: Uuid, permission: &str) -> String {
    format!("perm:{principal}:{resource_id}:{permission}")
}

/// String-keyed store of previously computed permission decisions.
///
/// Only positive decisions are ever written: a negative decision must be
/// recomputed so that a newly granted binding becomes effective within the
/// mutation-invalidation window rather than a TTL. Cache failures degrade
/// to misses; they never surface as errors.
#[async_trait]
pub trait DecisionCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<bool>;
    async fn set(&self, key: &str, allowed: bool);
    async fn delete(&self, key: &str);
    async fn clear(&self);
}

/// Cache variant that stores nothing. Every `get` misses.
///
/// This is the default, and the only variant safe for horizontally scaled
/// deployments without a shared store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl DecisionCache for NoopCache {
    async fn get(&self, _key: &str) -> Option<bool> {
        None
    }

    async fn set(&self, _key: &str, _allowed: bool) {}

    async fn delete(&self, _key: &str) {}

    async fn clear(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_key_is_deterministic() {
        let resource_id = Uuid::nil();
        let key = decision_key("user:alice@example.com", resource_id, "storage.objects.read");

        assert_eq!(
            key,
            format!("perm:user:alice@example.com:{resource_id}:storage.objects.read")
        );
        assert_eq!(
            key,
            decision_key("user:alice@example.com", resource_id, "storage.objects.read")
        );
    }

    #[tokio::test]
    async fn noop_cache_always_misses() {
        let cache = NoopCache;
        cache.set("perm:k", true).await;

        assert_eq!(cache.get("perm:k").await, None);
    }

    #[tokio::test]
    async fn noop_cache_delete_and_clear_are_noops() {
        let cache = NoopCache;
        cache.delete("perm:k").await;
        cache.clear().await;

        assert_eq!(cache.get("perm:k").await, None);
    }
}
