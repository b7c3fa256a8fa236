//! Like activity processor.

use async_trait::async_trait;
use postbox_common::AppResult;
use postbox_store::{
    Activity, ActorRepository, CollectionKind, CollectionRepository, ObjectRepository,
};
use tracing::{debug, info};

use super::SideEffect;

/// Processor for Like: no relationship change, but the liked object's local
/// owner is notified through its inbox.
pub struct LikeProcessor {
    object_repo: ObjectRepository,
    actor_repo: ActorRepository,
    collection_repo: CollectionRepository,
}

impl LikeProcessor {
    /// Create a new like processor.
    #[must_use]
    pub const fn new(
        object_repo: ObjectRepository,
        actor_repo: ActorRepository,
        collection_repo: CollectionRepository,
    ) -> Self {
        Self {
            object_repo,
            actor_repo,
            collection_repo,
        }
    }
}

#[async_trait]
impl SideEffect for LikeProcessor {
    async fn apply(&self, activity: &Activity) -> AppResult<()> {
        let Some(object_id) = activity.object_id() else {
            debug!(activity = %activity.id, "Like object has no identifier");
            return Ok(());
        };

        let Some(object) = self.object_repo.find_by_id(&object_id).await? else {
            debug!(object = %object_id, "Liked object not stored here");
            return Ok(());
        };
        let Some(owner_id) = object.attributed_to else {
            return Ok(());
        };

        let owner_is_local = self
            .actor_repo
            .find_by_id(&owner_id)
            .await?
            .is_some_and(|a| a.local);
        if owner_is_local {
            self.collection_repo
                .append(&owner_id, CollectionKind::Inbox, &activity.id)
                .await?;
            info!(object = %object_id, owner = %owner_id, "Owner notified of like");
        }

        Ok(())
    }
}
