//! Create activity processor.

use async_trait::async_trait;
use postbox_common::{AppError, AppResult, IdGenerator};
use postbox_store::{Activity, ActivityRepository, ObjectRepository, StoredObject};
use serde_json::{Value, json};
use tracing::{info, warn};
use url::Url;

use super::SideEffect;

/// Processor for Create: materializes the wrapped object as a first-class
/// stored record, attributed to the Create's actor, and rewrites the
/// activity's `object` field to the stored object's identifier.
pub struct CreateProcessor {
    object_repo: ObjectRepository,
    activity_repo: ActivityRepository,
    id_gen: IdGenerator,
    base_url: Url,
}

impl CreateProcessor {
    /// Create a new create processor.
    #[must_use]
    pub fn new(
        object_repo: ObjectRepository,
        activity_repo: ActivityRepository,
        base_url: Url,
    ) -> Self {
        Self {
            object_repo,
            activity_repo,
            id_gen: IdGenerator::new(),
            base_url,
        }
    }
}

#[async_trait]
impl SideEffect for CreateProcessor {
    async fn apply(&self, activity: &Activity) -> AppResult<()> {
        // Shape validation guarantees an embedded object.
        let Some(Value::Object(inner)) = activity.object.clone() else {
            return Err(AppError::Validation(
                "Create requires an embedded object".to_string(),
            ));
        };
        let mut inner = inner;

        // The actor owns what it creates; a mismatched attribution is
        // overridden, not trusted.
        if let Some(attributed) = inner.get("attributedTo").and_then(Value::as_str)
            && attributed != activity.actor
        {
            warn!(
                activity = %activity.id,
                attributed_to = %attributed,
                actor = %activity.actor,
                "Overriding mismatched attributedTo"
            );
        }
        inner.insert("attributedTo".to_string(), json!(activity.actor));

        let object_id = match inner.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = self
                    .base_url
                    .join(&format!("objects/{}", self.id_gen.generate()))
                    .map_err(|e| AppError::Internal(format!("Bad object id: {e}")))?
                    .to_string();
                inner.insert("id".to_string(), json!(id));
                id
            }
        };
        let kind = inner
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("Object")
            .to_string();

        self.object_repo
            .put(StoredObject {
                id: object_id.clone(),
                kind,
                attributed_to: Some(activity.actor.clone()),
                document: Value::Object(inner),
            })
            .await?;

        self.activity_repo
            .patch_object(&activity.id, json!(object_id))
            .await?;

        info!(activity = %activity.id, object = %object_id, "Object materialized");
        Ok(())
    }
}
