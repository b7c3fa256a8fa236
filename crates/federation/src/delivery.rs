//! Delivery dispatch.
//!
//! Sends a stored activity to every resolved endpoint, concurrently and
//! independently: one endpoint's failure never aborts the others, and no
//! retry happens at this layer. Local endpoints are an internal inbox
//! append, remote ones a signed HTTP POST.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use postbox_common::{AppError, AppResult};
use postbox_store::{
    Activity, ActivityRepository, ActorRepository, CollectionKind, CollectionRepository,
};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::ApTransport;
use crate::recipients::{RecipientResolver, is_public_sentinel};
use crate::signature::HttpSigner;

/// Serialize a document as canonical JSON: object keys sorted at every
/// depth. This is the only byte form that leaves the process.
///
/// # Errors
///
/// Returns [`AppError::Internal`] when serialization fails.
pub fn canonical_json(value: &Value) -> AppResult<Vec<u8>> {
    serde_json::to_vec(&sort_keys(value))
        .map_err(|e| AppError::Internal(format!("Serialization failed: {e}")))
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, sort_keys(v))).collect();
            serde_json::to_value(sorted).unwrap_or_else(|_| value.clone())
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Dispatches deliveries for stored activities.
pub struct DeliveryDispatcher {
    activity_repo: ActivityRepository,
    actor_repo: ActorRepository,
    collection_repo: CollectionRepository,
    resolver: Arc<RecipientResolver>,
    transport: Arc<dyn ApTransport>,
    base_url: Url,
}

impl DeliveryDispatcher {
    /// Create a new delivery dispatcher.
    #[must_use]
    pub fn new(
        activity_repo: ActivityRepository,
        actor_repo: ActorRepository,
        collection_repo: CollectionRepository,
        resolver: Arc<RecipientResolver>,
        transport: Arc<dyn ApTransport>,
        base_url: Url,
    ) -> Self {
        Self {
            activity_repo,
            actor_repo,
            collection_repo,
            resolver,
            transport,
            base_url,
        }
    }

    /// Deliver a stored activity.
    ///
    /// Outbound (`incoming == false`): the actor's own id is removed from
    /// the recipient set, recipients are resolved to inboxes, and the
    /// canonical wire body (blind fields stripped) is posted to each.
    /// Incoming fan-out (`incoming == true`): recipients are already
    /// inbox-shaped local identifiers; resolution is skipped and the body
    /// is not re-serialized.
    pub async fn deliver(&self, activity_id: &str, incoming: bool) -> AppResult<()> {
        let activity = self.activity_repo.get(activity_id).await?;

        if incoming {
            return self.fan_out_local(&activity).await;
        }

        let mut recipients = activity.recipients();
        // Actors are never notified of their own activity.
        recipients.remove(&activity.actor);
        if recipients.is_empty() {
            info!(activity = %activity.id, "No recipients, nothing to deliver");
            return Ok(());
        }

        let inboxes = self.resolver.resolve(&recipients).await?;
        if inboxes.is_empty() {
            info!(activity = %activity.id, "No reachable inboxes");
            return Ok(());
        }

        let body = canonical_json(&activity.to_document(true))?;
        let signer = self.signer_for(&activity.actor).await?;
        if signer.is_none() {
            warn!(activity = %activity.id, actor = %activity.actor, "No local signing key, delivering unsigned");
        }

        let sends = inboxes
            .iter()
            .map(|inbox| self.send_one(inbox, &body, signer.as_ref(), &activity.id));
        join_all(sends).await;

        Ok(())
    }

    /// Expand a just-received activity to the local inboxes it addresses.
    async fn fan_out_local(&self, activity: &Activity) -> AppResult<()> {
        for recipient in activity.recipients() {
            if is_public_sentinel(&recipient) {
                continue;
            }
            match self.actor_repo.find_by_id(&recipient).await? {
                Some(actor) if actor.local => {
                    self.collection_repo
                        .append(&actor.id, CollectionKind::Inbox, &activity.id)
                        .await?;
                    debug!(activity = %activity.id, actor = %actor.id, "Fanned out to local inbox");
                }
                _ => debug!(recipient = %recipient, "Fan-out recipient is not local"),
            }
        }
        Ok(())
    }

    /// One endpoint, success or failure independent of the others. Failures
    /// are logged and absorbed.
    async fn send_one(
        &self,
        inbox: &str,
        body: &[u8],
        signer: Option<&HttpSigner>,
        activity_id: &str,
    ) {
        // A local inbox is an internal call, no network round-trip.
        if inbox.starts_with(self.base_url.as_str()) {
            if let Some(owner) = inbox.strip_suffix("/inbox") {
                match self
                    .collection_repo
                    .append(owner, CollectionKind::Inbox, activity_id)
                    .await
                {
                    Ok(()) => info!(inbox = %inbox, activity = %activity_id, "Delivered locally"),
                    Err(e) => warn!(inbox = %inbox, error = %e, "Local delivery failed"),
                }
            } else {
                warn!(inbox = %inbox, "Unrecognized local inbox URL");
            }
            return;
        }

        let headers = match sign_headers(signer, inbox) {
            Ok(headers) => headers,
            Err(e) => {
                warn!(inbox = %inbox, error = %e, "Header signing failed");
                return;
            }
        };

        if let Err(e) = self.transport.deliver(inbox, body, &headers).await {
            warn!(inbox = %inbox, activity = %activity_id, error = %e, "Delivery failed");
        }
    }

    /// Signer for the activity's actor, when it is local with a private key.
    async fn signer_for(&self, actor_id: &str) -> AppResult<Option<HttpSigner>> {
        let Some(actor) = self.actor_repo.find_by_id(actor_id).await? else {
            return Ok(None);
        };
        if !actor.local {
            return Ok(None);
        }
        let Some(ref private_key_pem) = actor.private_key_pem else {
            return Ok(None);
        };
        Ok(Some(HttpSigner::new(private_key_pem, actor.key_id())?))
    }
}

fn sign_headers(signer: Option<&HttpSigner>, inbox: &str) -> AppResult<Vec<(String, String)>> {
    let Some(signer) = signer else {
        return Ok(Vec::new());
    };
    let url = Url::parse(inbox).map_err(|e| AppError::Federation(format!("Bad inbox URL: {e}")))?;
    signer.sign_request("POST", &url, "application/activity+json")
}
