//! Actor repository.

use std::sync::Arc;

use postbox_common::AppResult;

use crate::memory::MemoryStore;
use crate::records::Actor;

/// Actor repository for store operations.
#[derive(Clone)]
pub struct ActorRepository {
    store: Arc<MemoryStore>,
}

impl ActorRepository {
    /// Create a new actor repository.
    #[must_use]
    pub const fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Find an actor by id.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<Actor>> {
        Ok(self.store.read().await.actors.get(id).cloned())
    }

    /// Find a local actor by username.
    pub async fn find_local_by_name(&self, name: &str) -> AppResult<Option<Actor>> {
        Ok(self
            .store
            .read()
            .await
            .actors
            .values()
            .find(|a| a.local && a.preferred_username.as_deref() == Some(name))
            .cloned())
    }

    /// Insert or overwrite an actor.
    pub async fn put(&self, actor: Actor) -> AppResult<()> {
        self.store.write().await.actors.insert(actor.id.clone(), actor);
        Ok(())
    }

    /// Delete an actor.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.store.write().await.actors.remove(id);
        Ok(())
    }
}
