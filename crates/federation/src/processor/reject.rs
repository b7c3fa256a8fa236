//! Reject activity processor.

use async_trait::async_trait;
use postbox_common::AppResult;
use postbox_store::{Activity, ActivityRepository, FollowingRepository};
use tracing::{info, warn};

use super::{SideEffect, follow_pair};

/// Processor for Reject-of-Follow: removes the matching `Following` row.
/// Same type guard as Accept: rejecting anything else is a warned no-op.
pub struct RejectProcessor {
    following_repo: FollowingRepository,
    activity_repo: ActivityRepository,
}

impl RejectProcessor {
    /// Create a new reject processor.
    #[must_use]
    pub const fn new(following_repo: FollowingRepository, activity_repo: ActivityRepository) -> Self {
        Self {
            following_repo,
            activity_repo,
        }
    }
}

#[async_trait]
impl SideEffect for RejectProcessor {
    async fn apply(&self, activity: &Activity) -> AppResult<()> {
        let Some((follower, followee)) = follow_pair(activity, &self.activity_repo).await? else {
            warn!(activity = %activity.id, "Reject of a non-Follow object ignored");
            return Ok(());
        };

        if followee != activity.actor {
            warn!(
                activity = %activity.id,
                actor = %activity.actor,
                followee = %followee,
                "Reject actor is not the followee"
            );
            return Ok(());
        }

        if self.following_repo.delete_by_pair(&follower, &followee).await? {
            info!(follower = %follower, followee = %followee, "Follow rejected");
        } else {
            warn!(follower = %follower, followee = %followee, "No matching follow to reject");
        }
        Ok(())
    }
}
