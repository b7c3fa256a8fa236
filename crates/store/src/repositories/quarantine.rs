//! Quarantine repository for inbound messages awaiting validation.

use std::sync::Arc;

use postbox_common::{AppError, AppResult};

use crate::memory::MemoryStore;
use crate::records::IncomingMessage;

/// Quarantine repository for store operations.
#[derive(Clone)]
pub struct QuarantineRepository {
    store: Arc<MemoryStore>,
}

impl QuarantineRepository {
    /// Create a new quarantine repository.
    #[must_use]
    pub const fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Persist a newly received message. Receipt order is preserved.
    pub async fn insert(&self, message: IncomingMessage) -> AppResult<()> {
        self.store.write().await.quarantine.push(message);
        Ok(())
    }

    /// Find a quarantined message by id.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<IncomingMessage>> {
        Ok(self
            .store
            .read()
            .await
            .quarantine
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    /// Mark a message as waiting on an actor's key.
    pub async fn set_waiting(&self, id: &str, actor_id: &str) -> AppResult<()> {
        let mut inner = self.store.write().await;
        let message = inner
            .quarantine
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Quarantined message: {id}")))?;
        message.waiting_for = Some(actor_id.to_string());
        Ok(())
    }

    /// All messages waiting on the given actor, in receipt order.
    pub async fn waiters_for(&self, actor_id: &str) -> AppResult<Vec<IncomingMessage>> {
        Ok(self
            .store
            .read()
            .await
            .quarantine
            .iter()
            .filter(|m| m.waiting_for.as_deref() == Some(actor_id))
            .cloned()
            .collect())
    }

    /// Remove a message (validated or dropped).
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.store.write().await.quarantine.retain(|m| m.id != id);
        Ok(())
    }
}
