//! Activity repository.

use std::sync::Arc;

use postbox_common::{AppError, AppResult};
use serde_json::Value;

use crate::memory::MemoryStore;
use crate::records::Activity;

/// Activity repository for store operations.
#[derive(Clone)]
pub struct ActivityRepository {
    store: Arc<MemoryStore>,
}

impl ActivityRepository {
    /// Create a new activity repository.
    #[must_use]
    pub const fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Find an activity by id.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<Activity>> {
        Ok(self.store.read().await.activities.get(id).cloned())
    }

    /// Load an activity, failing when absent.
    pub async fn get(&self, id: &str) -> AppResult<Activity> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::ActivityNotFound(id.to_string()))
    }

    /// Insert an activity. Returns `false` when an activity with this id is
    /// already stored (validation is idempotent by id).
    pub async fn insert(&self, activity: Activity) -> AppResult<bool> {
        let mut inner = self.store.write().await;
        if inner.activities.contains_key(&activity.id) {
            return Ok(false);
        }
        inner.activities.insert(activity.id.clone(), activity);
        Ok(true)
    }

    /// Patch the `object` field of a stored activity.
    pub async fn patch_object(&self, id: &str, object: Value) -> AppResult<()> {
        let mut inner = self.store.write().await;
        let activity = inner
            .activities
            .get_mut(id)
            .ok_or_else(|| AppError::ActivityNotFound(id.to_string()))?;
        activity.object = Some(object);
        Ok(())
    }

    /// Delete an activity (administrative tombstoning only).
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.store.write().await.activities.remove(id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn activity(id: &str) -> Activity {
        Activity::from_document(&json!({
            "id": id,
            "type": "Like",
            "actor": "https://remote.example/users/fred",
            "object": "https://local.example/notes/1",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_by_id() {
        let repo = ActivityRepository::new(Arc::new(MemoryStore::new()));

        assert!(repo.insert(activity("https://x/act/1")).await.unwrap());
        assert!(!repo.insert(activity("https://x/act/1")).await.unwrap());
        assert!(repo.insert(activity("https://x/act/2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_patch_object() {
        let repo = ActivityRepository::new(Arc::new(MemoryStore::new()));
        repo.insert(activity("https://x/act/1")).await.unwrap();

        repo.patch_object("https://x/act/1", json!("https://x/notes/5"))
            .await
            .unwrap();

        let stored = repo.get("https://x/act/1").await.unwrap();
        assert_eq!(stored.object_id().unwrap(), "https://x/notes/5");
    }
}
