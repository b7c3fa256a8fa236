//! Accept activity processor.

use async_trait::async_trait;
use postbox_common::AppResult;
use postbox_store::{
    Activity, ActivityRepository, ActorRepository, CollectionKind, CollectionRepository,
    FollowingRepository,
};
use tracing::{info, warn};

use super::{SideEffect, follow_pair};

/// Processor for Accept-of-Follow: flips the matching `Following` row to
/// accepted. Accept of anything else is a warned no-op; it never mutates
/// unrelated state.
pub struct AcceptProcessor {
    actor_repo: ActorRepository,
    following_repo: FollowingRepository,
    activity_repo: ActivityRepository,
    collection_repo: CollectionRepository,
}

impl AcceptProcessor {
    /// Create a new accept processor.
    #[must_use]
    pub const fn new(
        actor_repo: ActorRepository,
        following_repo: FollowingRepository,
        activity_repo: ActivityRepository,
        collection_repo: CollectionRepository,
    ) -> Self {
        Self {
            actor_repo,
            following_repo,
            activity_repo,
            collection_repo,
        }
    }

    async fn is_local(&self, id: &str) -> AppResult<bool> {
        Ok(self
            .actor_repo
            .find_by_id(id)
            .await?
            .is_some_and(|a| a.local))
    }
}

#[async_trait]
impl SideEffect for AcceptProcessor {
    async fn apply(&self, activity: &Activity) -> AppResult<()> {
        let Some((follower, followee)) = follow_pair(activity, &self.activity_repo).await? else {
            warn!(activity = %activity.id, "Accept of a non-Follow object ignored");
            return Ok(());
        };

        // Only the followee may accept its own follows.
        if followee != activity.actor {
            warn!(
                activity = %activity.id,
                actor = %activity.actor,
                followee = %followee,
                "Accept actor is not the followee"
            );
            return Ok(());
        }

        if !self.following_repo.mark_accepted(&follower, &followee).await? {
            warn!(follower = %follower, followee = %followee, "No matching follow to accept");
            return Ok(());
        }

        if self.is_local(&followee).await? {
            self.collection_repo
                .append(&followee, CollectionKind::Followers, &follower)
                .await?;
        }
        if self.is_local(&follower).await? {
            self.collection_repo
                .append(&follower, CollectionKind::Following, &followee)
                .await?;
        }

        info!(follower = %follower, followee = %followee, "Follow accepted");
        Ok(())
    }
}
