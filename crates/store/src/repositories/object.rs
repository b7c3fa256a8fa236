//! Stored object repository.

use std::sync::Arc;

use postbox_common::{AppError, AppResult};
use serde_json::Value;

use crate::memory::MemoryStore;
use crate::records::StoredObject;

/// Stored object repository for store operations.
#[derive(Clone)]
pub struct ObjectRepository {
    store: Arc<MemoryStore>,
}

impl ObjectRepository {
    /// Create a new object repository.
    #[must_use]
    pub const fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Find an object by id.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<StoredObject>> {
        Ok(self.store.read().await.objects.get(id).cloned())
    }

    /// Insert or overwrite an object.
    pub async fn put(&self, object: StoredObject) -> AppResult<()> {
        self.store
            .write()
            .await
            .objects
            .insert(object.id.clone(), object);
        Ok(())
    }

    /// Patch individual fields of a stored object's document.
    pub async fn patch(&self, id: &str, fields: &serde_json::Map<String, Value>) -> AppResult<()> {
        let mut inner = self.store.write().await;
        let object = inner
            .objects
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Object: {id}")))?;
        if let Value::Object(doc) = &mut object.document {
            for (k, v) in fields {
                doc.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }

    /// Replace an object's document with a tombstone.
    pub async fn tombstone(&self, id: &str) -> AppResult<()> {
        let mut inner = self.store.write().await;
        let object = inner
            .objects
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Object: {id}")))?;
        object.kind = "Tombstone".to_string();
        object.document = serde_json::json!({ "id": id, "type": "Tombstone" });
        Ok(())
    }

    /// Delete an object.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.store.write().await.objects.remove(id);
        Ok(())
    }
}
