mod memory;
mod shared;

pub use memory::LocalCache;
pub use shared::SharedCache;

use std::sync::Arc;
use std::time::Duration;

use canopy_core::cache::{DecisionCache, NoopCache};

use crate::config::{CacheConfig, CacheType};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to connect to shared cache: {0}")]
    Connect(String),
}

/// Builds the decision cache selected by configuration. With caching
/// disabled (the default) every variant collapses to the no-op cache, which
/// is the only one safe for horizontally scaled deployments without a
/// shared store.
pub async fn build_cache(config: &CacheConfig) -> Result<Arc<dyn DecisionCache>, CacheError> {
    if !config.enabled {
        return Ok(Arc::new(NoopCache));
    }

    match config.cache_type {
        CacheType::None => Ok(Arc::new(NoopCache)),
        CacheType::Memory => {
            let cache = Arc::new(LocalCache::new(
                Duration::from_secs(config.ttl_seconds),
                config.max_size,
            ));
            let _ = cache.spawn_sweeper(Duration::from_secs(config.cleanup_minutes * 60));
            Ok(cache)
        }
        CacheType::Shared => {
            let cache = SharedCache::connect(&config.shared).await?;
            Ok(Arc::new(cache))
        }
    }
}
