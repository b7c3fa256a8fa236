//! Side-effect engine.
//!
//! After a message is accepted, its activity is dispatched strictly on type
//! through a table built once at startup and injected into the validator.
//! Shape validation is a precondition: an activity missing the fields its
//! type requires is rejected before any side effect runs. Side effects on
//! the same actor's relationships are serialized through a per-actor lock.

mod accept;
mod create;
mod follow;
mod like;
mod reject;
mod undo;
mod update;

pub use accept::AcceptProcessor;
pub use create::CreateProcessor;
pub use follow::FollowProcessor;
pub use like::LikeProcessor;
pub use reject::RejectProcessor;
pub use undo::UndoProcessor;
pub use update::{DeleteProcessor, UpdateProcessor};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use postbox_common::{AppError, AppResult};
use postbox_store::{Activity, ActivityKind, ActivityRepository, ActorLocks};
use serde_json::Value;
use tracing::debug;

/// One activity type's state transition.
#[async_trait]
pub trait SideEffect: Send + Sync {
    /// Apply the side effect of an accepted activity.
    async fn apply(&self, activity: &Activity) -> AppResult<()>;
}

/// Type-dispatched side-effect table.
pub struct SideEffectEngine {
    locks: Arc<ActorLocks>,
    activity_repo: ActivityRepository,
    handlers: HashMap<ActivityKind, Arc<dyn SideEffect>>,
}

impl SideEffectEngine {
    /// Create an engine with an empty dispatch table.
    #[must_use]
    pub fn new(locks: Arc<ActorLocks>, activity_repo: ActivityRepository) -> Self {
        Self {
            locks,
            activity_repo,
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for an activity type.
    #[must_use]
    pub fn with_handler(mut self, kind: ActivityKind, handler: Arc<dyn SideEffect>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Check that the activity carries the fields its type requires.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] describing the missing field.
    pub fn validate_shape(activity: &Activity) -> AppResult<()> {
        if activity.kind.requires_object() && activity.object.is_none() {
            return Err(AppError::Validation(format!(
                "{} requires an object",
                activity.kind
            )));
        }
        if activity.kind.requires_target() && activity.target.is_none() {
            return Err(AppError::Validation(format!(
                "{} requires a target",
                activity.kind
            )));
        }
        // Create materializes its object; a bare reference has nothing to
        // materialize.
        if activity.kind == ActivityKind::Create
            && !activity.object.as_ref().is_some_and(Value::is_object)
        {
            return Err(AppError::Validation(
                "Create requires an embedded object".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate shape, then run the type's handler under the per-actor lock.
    /// Types without a handler are stored-and-delivered only.
    pub async fn apply(&self, activity: &Activity) -> AppResult<()> {
        Self::validate_shape(activity)?;

        let key = self.lock_key(activity).await?;
        let _guard = self.locks.lock(&key).await;

        match self.handlers.get(&activity.kind) {
            Some(handler) => handler.apply(activity).await,
            None => {
                debug!(kind = %activity.kind, "No side effect for activity type");
                Ok(())
            }
        }
    }

    /// The actor whose relationships this activity mutates. Follow-family
    /// activities lock the followee so Follow/Accept/Undo on the same row
    /// never interleave.
    async fn lock_key(&self, activity: &Activity) -> AppResult<String> {
        Ok(match activity.kind {
            ActivityKind::Follow => activity.object_id().unwrap_or_else(|| activity.actor.clone()),
            ActivityKind::Undo => follow_pair(activity, &self.activity_repo)
                .await?
                .map_or_else(|| activity.actor.clone(), |(_, followee)| followee),
            _ => activity.actor.clone(),
        })
    }
}

/// Extract the `(follower, followee)` pair of the Follow an activity wraps,
/// either embedded (`"object": {"type": "Follow", ...}`) or referenced by
/// the id of a stored Follow activity. `None` when the object is not a
/// Follow.
pub(crate) async fn follow_pair(
    activity: &Activity,
    activity_repo: &ActivityRepository,
) -> AppResult<Option<(String, String)>> {
    let Some(ref object) = activity.object else {
        return Ok(None);
    };

    match object {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) != Some("Follow") {
                return Ok(None);
            }
            let follower = map.get("actor").and_then(id_of);
            let followee = map.get("object").and_then(id_of);
            Ok(follower.zip(followee))
        }
        Value::String(id) => {
            let Some(follow) = activity_repo.find_by_id(id).await? else {
                return Ok(None);
            };
            if follow.kind != ActivityKind::Follow {
                return Ok(None);
            }
            Ok(follow.object_id().map(|followee| (follow.actor, followee)))
        }
        _ => Ok(None),
    }
}

fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("id").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}
