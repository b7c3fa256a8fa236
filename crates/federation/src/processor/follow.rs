//! Follow activity processor.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use postbox_common::{AppError, AppResult, IdGenerator};
use postbox_store::{
    Activity, ActivityRepository, ActorRepository, CollectionKind, CollectionRepository,
    FollowingRepository,
};
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use super::SideEffect;
use crate::jobs::{DeliveryJob, JobQueue};

/// Processor for incoming Follow activities.
///
/// Creates the `Following` row: pending when the followee reviews follows
/// manually, accepted immediately (with an `Accept` sent back) when the
/// followee auto-accepts.
pub struct FollowProcessor {
    actor_repo: ActorRepository,
    following_repo: FollowingRepository,
    activity_repo: ActivityRepository,
    collection_repo: CollectionRepository,
    jobs: Arc<dyn JobQueue>,
    id_gen: IdGenerator,
    base_url: Url,
}

impl FollowProcessor {
    /// Create a new follow processor.
    #[must_use]
    pub fn new(
        actor_repo: ActorRepository,
        following_repo: FollowingRepository,
        activity_repo: ActivityRepository,
        collection_repo: CollectionRepository,
        jobs: Arc<dyn JobQueue>,
        base_url: Url,
    ) -> Self {
        Self {
            actor_repo,
            following_repo,
            activity_repo,
            collection_repo,
            jobs,
            id_gen: IdGenerator::new(),
            base_url,
        }
    }

    /// Synthesize an Accept of `follow`, store it, and enqueue delivery
    /// back to the follower.
    async fn send_accept(&self, follow: &Activity, followee_id: &str) -> AppResult<()> {
        let accept_id = self
            .base_url
            .join(&format!("activities/{}", self.id_gen.generate()))
            .map_err(|e| AppError::Internal(format!("Bad activity id: {e}")))?
            .to_string();

        let doc = json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "id": accept_id,
            "type": "Accept",
            "actor": followee_id,
            "object": follow.to_document(false),
            "to": [follow.actor],
            "published": Utc::now().to_rfc3339(),
        });

        let accept = Activity::from_document(&doc)?;
        self.activity_repo.insert(accept).await?;
        self.collection_repo
            .append(followee_id, CollectionKind::Outbox, &accept_id)
            .await?;
        self.jobs
            .enqueue_delivery(DeliveryJob {
                activity_id: accept_id,
                incoming: false,
            })
            .await
    }
}

#[async_trait]
impl SideEffect for FollowProcessor {
    async fn apply(&self, activity: &Activity) -> AppResult<()> {
        let Some(followee_id) = activity.object_id() else {
            return Err(AppError::Validation(
                "Follow object has no identifier".to_string(),
            ));
        };

        let Some(followee) = self.actor_repo.find_by_id(&followee_id).await? else {
            warn!(followee = %followee_id, "Follow target unknown");
            return Ok(());
        };
        if !followee.local {
            warn!(followee = %followee_id, "Follow target is not local");
            return Ok(());
        }

        if followee.auto_accept_followers {
            self.following_repo
                .create(&activity.actor, &followee.id, false)
                .await?;
            self.collection_repo
                .append(&followee.id, CollectionKind::Followers, &activity.actor)
                .await?;

            info!(
                follower = %activity.actor,
                followee = %followee.id,
                "Follow auto-accepted"
            );

            self.send_accept(activity, &followee.id).await
        } else {
            self.following_repo
                .create(&activity.actor, &followee.id, true)
                .await?;

            info!(
                follower = %activity.actor,
                followee = %followee.id,
                "Follow pending manual acceptance"
            );
            Ok(())
        }
    }
}
