//! Cached public key repository.

use std::sync::Arc;

use chrono::Utc;
use postbox_common::AppResult;
use tracing::info;

use crate::memory::MemoryStore;
use crate::records::CachedPublicKey;

/// Key cache repository for store operations.
#[derive(Clone)]
pub struct KeyCacheRepository {
    store: Arc<MemoryStore>,
}

impl KeyCacheRepository {
    /// Create a new key cache repository.
    #[must_use]
    pub const fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Look up a cached key by owner.
    pub async fn find_by_owner(&self, owner: &str) -> AppResult<Option<CachedPublicKey>> {
        Ok(self.store.read().await.key_cache.get(owner).cloned())
    }

    /// Cache a fetched key. Only the fetch completion handler writes here.
    pub async fn put(&self, owner: &str, key_pem: Option<String>) -> AppResult<()> {
        if key_pem.is_none() {
            info!(owner = %owner, "Caching key tombstone (actor gone)");
        }
        self.store.write().await.key_cache.insert(
            owner.to_string(),
            CachedPublicKey {
                owner: owner.to_string(),
                key_pem,
                cached_at: Utc::now(),
            },
        );
        Ok(())
    }
}
