use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use canopy_core::cache::DecisionCache;

use crate::config::SharedCacheConfig;

use super::CacheError;

fn redis_url(config: &SharedCacheConfig) -> String {
    if config.password.is_empty() {
        format!("redis://{}/{}", config.address, config.db)
    } else {
        format!("redis://:{}@{}/{}", config.password, config.address, config.db)
    }
}

/// Decision cache backed by an external key-value store, shared by every
/// replica of the service. Entries carry a per-key TTL; the store does the
/// expiring. A cache is a hint: read failures degrade to misses and write
/// failures are dropped.
pub struct SharedCache {
    conn: ConnectionManager,
    ttl: Duration,
}

impl SharedCache {
    /// Connects eagerly so a misconfigured endpoint fails at startup
    /// rather than degrading every check to a miss.
    pub async fn connect(config: &SharedCacheConfig) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url(config))
            .map_err(|e| CacheError::Connect(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connect(e.to_string()))?;
        Ok(Self {
            conn,
            ttl: Duration::from_secs(config.ttl_seconds),
        })
    }
}

#[async_trait]
impl DecisionCache for SharedCache {
    async fn get(&self, key: &str) -> Option<bool> {
        let mut conn = self.conn.clone();
        let value: Option<String> = match conn.get(key).await {
            Ok(value) => value,
            Err(_) => return None,
        };
        value.and_then(|v| serde_json::from_str(&v).ok())
    }

    async fn set(&self, key: &str, allowed: bool) {
        let mut conn = self.conn.clone();
        let Ok(payload) = serde_json::to_string(&allowed) else {
            return;
        };
        let _: Result<(), _> = conn.set_ex(key, payload, self.ttl.as_secs()).await;
    }

    async fn delete(&self, key: &str) {
        let mut conn = self.conn.clone();
        let _: Result<(), _> = conn.del(key).await;
    }

    async fn clear(&self) {
        let mut scan_conn = self.conn.clone();
        let keys: Vec<String> = match scan_conn.scan_match::<_, String>("perm:*").await {
            Ok(mut iter) => {
                let mut keys = Vec::new();
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
                keys
            }
            Err(_) => return,
        };
        if keys.is_empty() {
            return;
        }

        let mut del_conn = self.conn.clone();
        let _: Result<(), _> = del_conn.del(keys).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_without_password() {
        let config = SharedCacheConfig::default();

        assert_eq!(redis_url(&config), "redis://localhost:6379/0");
    }

    #[test]
    fn url_with_password_and_db() {
        let config = SharedCacheConfig {
            address: "cache.internal:6380".to_string(),
            password: "hunter2".to_string(),
            db: 3,
            ttl_seconds: 60,
        };

        assert_eq!(redis_url(&config), "redis://:hunter2@cache.internal:6380/3");
    }
}
