//! Update and Delete activity processors.
//!
//! Neither carries a relationship side effect; against locally stored
//! objects, Update patches the record's fields and Delete tombstones it.
//! Either against an object the actor does not own is a warned no-op.

use async_trait::async_trait;
use postbox_common::AppResult;
use postbox_store::{Activity, ObjectRepository, StoredObject};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::SideEffect;

fn owned_by(object: &StoredObject, actor: &str) -> bool {
    object.attributed_to.as_deref() == Some(actor)
}

/// Processor for Update: patches a stored object's fields.
pub struct UpdateProcessor {
    object_repo: ObjectRepository,
}

impl UpdateProcessor {
    /// Create a new update processor.
    #[must_use]
    pub const fn new(object_repo: ObjectRepository) -> Self {
        Self { object_repo }
    }
}

#[async_trait]
impl SideEffect for UpdateProcessor {
    async fn apply(&self, activity: &Activity) -> AppResult<()> {
        let Some(Value::Object(ref fields)) = activity.object else {
            debug!(activity = %activity.id, "Update without an embedded object ignored");
            return Ok(());
        };
        let Some(object_id) = activity.object_id() else {
            debug!(activity = %activity.id, "Update object has no identifier");
            return Ok(());
        };

        let Some(stored) = self.object_repo.find_by_id(&object_id).await? else {
            debug!(object = %object_id, "Updated object not stored here");
            return Ok(());
        };
        if !owned_by(&stored, &activity.actor) {
            warn!(object = %object_id, actor = %activity.actor, "Update by non-owner ignored");
            return Ok(());
        }

        self.object_repo.patch(&object_id, fields).await?;
        info!(object = %object_id, "Object updated");
        Ok(())
    }
}

/// Processor for Delete: tombstones a stored object.
pub struct DeleteProcessor {
    object_repo: ObjectRepository,
}

impl DeleteProcessor {
    /// Create a new delete processor.
    #[must_use]
    pub const fn new(object_repo: ObjectRepository) -> Self {
        Self { object_repo }
    }
}

#[async_trait]
impl SideEffect for DeleteProcessor {
    async fn apply(&self, activity: &Activity) -> AppResult<()> {
        let Some(object_id) = activity.object_id() else {
            debug!(activity = %activity.id, "Delete object has no identifier");
            return Ok(());
        };

        let Some(stored) = self.object_repo.find_by_id(&object_id).await? else {
            debug!(object = %object_id, "Deleted object not stored here");
            return Ok(());
        };
        if !owned_by(&stored, &activity.actor) {
            warn!(object = %object_id, actor = %activity.actor, "Delete by non-owner ignored");
            return Ok(());
        }

        self.object_repo.tombstone(&object_id).await?;
        info!(object = %object_id, "Object tombstoned");
        Ok(())
    }
}
