//! Undo activity processor.

use async_trait::async_trait;
use postbox_common::AppResult;
use postbox_store::{Activity, ActivityRepository, FollowingRepository};
use tracing::{info, warn};

use super::{SideEffect, follow_pair};

/// Processor for Undo-of-Follow: removes the `Following` row. Undo of
/// anything else is a warned no-op.
pub struct UndoProcessor {
    following_repo: FollowingRepository,
    activity_repo: ActivityRepository,
}

impl UndoProcessor {
    /// Create a new undo processor.
    #[must_use]
    pub const fn new(following_repo: FollowingRepository, activity_repo: ActivityRepository) -> Self {
        Self {
            following_repo,
            activity_repo,
        }
    }
}

#[async_trait]
impl SideEffect for UndoProcessor {
    async fn apply(&self, activity: &Activity) -> AppResult<()> {
        let Some((follower, followee)) = follow_pair(activity, &self.activity_repo).await? else {
            warn!(activity = %activity.id, "Undo of an unsupported object ignored");
            return Ok(());
        };

        // Only the follower can take its follow back.
        if follower != activity.actor {
            warn!(
                activity = %activity.id,
                actor = %activity.actor,
                follower = %follower,
                "Undo actor is not the follower"
            );
            return Ok(());
        }

        if self.following_repo.delete_by_pair(&follower, &followee).await? {
            info!(follower = %follower, followee = %followee, "Follow undone");
        } else {
            warn!(follower = %follower, followee = %followee, "No matching follow to undo");
        }
        Ok(())
    }
}
