//! Collection repository.
//!
//! Collections are ordered append-only logs scoped to an owning actor
//! (inbox, outbox, followers, following).

use std::sync::Arc;

use postbox_common::AppResult;

use crate::memory::MemoryStore;
use crate::records::CollectionKind;

/// Collection repository for store operations.
#[derive(Clone)]
pub struct CollectionRepository {
    store: Arc<MemoryStore>,
}

impl CollectionRepository {
    /// Create a new collection repository.
    #[must_use]
    pub const fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Append a member. Appending an already present member is a no-op.
    pub async fn append(
        &self,
        owner: &str,
        kind: CollectionKind,
        member: &str,
    ) -> AppResult<()> {
        let mut inner = self.store.write().await;
        let log = inner
            .collections
            .entry((owner.to_string(), kind))
            .or_default();
        if !log.iter().any(|m| m == member) {
            log.push(member.to_string());
        }
        Ok(())
    }

    /// All members, oldest first.
    pub async fn members(&self, owner: &str, kind: CollectionKind) -> AppResult<Vec<String>> {
        Ok(self
            .store
            .read()
            .await
            .collections
            .get(&(owner.to_string(), kind))
            .cloned()
            .unwrap_or_default())
    }
}
