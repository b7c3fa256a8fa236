//! Inbound message validation.
//!
//! Each quarantined message runs the state machine
//! Received → Validating → Accepted/Rejected, or parks as WaitingOnKey
//! until its actor's key fetch completes. On completion, all messages
//! waiting on that actor replay in receipt order.

use std::collections::HashMap;
use std::sync::Arc;

use postbox_common::AppResult;
use postbox_store::{
    Activity, ActivityRepository, ActorRepository, IncomingMessage, KeyCacheRepository,
    QuarantineRepository,
};
use tracing::{error, info, warn};

use crate::client::FetchOutcome;
use crate::jobs::{DeliveryJob, JobQueue, ValidateJob};
use crate::keys::{KeyResolution, KeyResolver, remote_actor_from_document};
use crate::processor::SideEffectEngine;
use crate::signature::HttpVerifier;

/// Terminal state of one validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Signature valid; side effects ran, activity stored, fan-out enqueued.
    Accepted,
    /// Validation failed; message deleted, no side effects.
    Rejected,
    /// Parked waiting on a key fetch.
    Waiting,
    /// Dropped without validation (vanished entry or fetch-loop guard).
    Dropped,
}

/// Runs the quarantine state machine.
pub struct InboxValidator {
    quarantine: QuarantineRepository,
    activity_repo: ActivityRepository,
    actor_repo: ActorRepository,
    key_cache: KeyCacheRepository,
    resolver: Arc<KeyResolver>,
    engine: Arc<SideEffectEngine>,
    jobs: Arc<dyn JobQueue>,
}

impl InboxValidator {
    /// Create a new inbox validator.
    #[must_use]
    pub fn new(
        quarantine: QuarantineRepository,
        activity_repo: ActivityRepository,
        actor_repo: ActorRepository,
        key_cache: KeyCacheRepository,
        resolver: Arc<KeyResolver>,
        engine: Arc<SideEffectEngine>,
        jobs: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            quarantine,
            activity_repo,
            actor_repo,
            key_cache,
            resolver,
            engine,
            jobs,
        }
    }

    /// Persist a structurally acceptable inbound message and enqueue its
    /// validation. The HTTP handler returns as soon as this does.
    pub async fn receive(&self, message: IncomingMessage) -> AppResult<()> {
        let message_id = message.id.clone();
        self.quarantine.insert(message).await?;
        self.jobs.enqueue_validation(ValidateJob { message_id }).await
    }

    /// Run one validation pass over a quarantined message.
    pub async fn validate(&self, message_id: &str) -> AppResult<ValidationOutcome> {
        let Some(message) = self.quarantine.find_by_id(message_id).await? else {
            return Ok(ValidationOutcome::Dropped);
        };

        match self.resolver.resolve(&message.actor, &message.key_id).await? {
            KeyResolution::Drop(reason) => {
                warn!(message = %message.id, actor = %message.actor, reason, "Message dropped");
                self.quarantine.delete(&message.id).await?;
                Ok(ValidationOutcome::Rejected)
            }
            KeyResolution::Gone => {
                warn!(message = %message.id, actor = %message.actor, "Actor is gone, message dropped");
                self.quarantine.delete(&message.id).await?;
                Ok(ValidationOutcome::Rejected)
            }
            KeyResolution::Pending => {
                // A message never waits on the same actor twice; a second
                // Pending is a fetch loop, not a retry.
                if message.waiting_for.as_deref() == Some(message.actor.as_str()) {
                    warn!(
                        message = %message.id,
                        actor = %message.actor,
                        "Already waited on this actor once, dropping"
                    );
                    self.quarantine.delete(&message.id).await?;
                    return Ok(ValidationOutcome::Dropped);
                }
                self.quarantine.set_waiting(&message.id, &message.actor).await?;
                info!(message = %message.id, actor = %message.actor, "Waiting on key fetch");
                Ok(ValidationOutcome::Waiting)
            }
            KeyResolution::Found(public_key_pem) => {
                if verify_message(&message, &public_key_pem) {
                    self.accept(&message).await
                } else {
                    warn!(message = %message.id, actor = %message.actor, "Signature invalid");
                    self.quarantine.delete(&message.id).await?;
                    Ok(ValidationOutcome::Rejected)
                }
            }
        }
    }

    /// Accept a message with a verified signature: reject on bad shape,
    /// otherwise store the activity (idempotent by id), run side effects,
    /// and enqueue local fan-out.
    async fn accept(&self, message: &IncomingMessage) -> AppResult<ValidationOutcome> {
        let activity = match Activity::from_document(&message.body) {
            Ok(activity) => activity,
            Err(e) => {
                warn!(message = %message.id, error = %e, "Activity does not parse");
                self.quarantine.delete(&message.id).await?;
                return Ok(ValidationOutcome::Rejected);
            }
        };

        // The actor in the body must be the one whose key signed the
        // request.
        if activity.actor != message.actor {
            warn!(
                message = %message.id,
                claimed = %message.actor,
                body_actor = %activity.actor,
                "Body actor does not match signing actor"
            );
            self.quarantine.delete(&message.id).await?;
            return Ok(ValidationOutcome::Rejected);
        }

        if let Err(e) = SideEffectEngine::validate_shape(&activity) {
            warn!(message = %message.id, error = %e, "Activity shape invalid");
            self.quarantine.delete(&message.id).await?;
            return Ok(ValidationOutcome::Rejected);
        }

        let activity_id = activity.id.clone();
        if self.activity_repo.insert(activity.clone()).await? {
            self.engine.apply(&activity).await?;
            self.jobs
                .enqueue_delivery(DeliveryJob {
                    activity_id: activity_id.clone(),
                    incoming: true,
                })
                .await?;
        } else {
            // Already validated once; never run side effects twice.
            info!(activity = %activity_id, "Duplicate activity, side effects skipped");
        }

        self.quarantine.delete(&message.id).await?;
        info!(message = %message.id, activity = %activity_id, "Message accepted");
        Ok(ValidationOutcome::Accepted)
    }

    /// Apply the result of a background actor fetch: write the cache, then
    /// replay or drop everything waiting on that actor.
    pub async fn handle_fetch_result(
        &self,
        actor_id: &str,
        outcome: FetchOutcome,
    ) -> AppResult<()> {
        match outcome {
            FetchOutcome::Document(doc) => match remote_actor_from_document(&doc) {
                Ok(actor) => {
                    let key_pem = actor.public_key_pem.clone();
                    self.actor_repo.put(actor).await?;
                    self.key_cache.put(actor_id, key_pem).await?;
                    self.resolver.finish_fetch(actor_id).await;
                    self.replay_waiters(actor_id).await
                }
                Err(e) => {
                    warn!(actor = %actor_id, error = %e, "Fetched actor document unusable");
                    self.resolver.finish_fetch(actor_id).await;
                    self.drop_waiters(actor_id).await
                }
            },
            FetchOutcome::Gone => {
                warn!(actor = %actor_id, "Actor is gone, caching tombstone");
                self.key_cache.put(actor_id, None).await?;
                self.resolver.finish_fetch(actor_id).await;
                self.drop_waiters(actor_id).await
            }
            FetchOutcome::Failed(reason) => {
                error!(actor = %actor_id, reason = %reason, "Key fetch failed");
                self.resolver.finish_fetch(actor_id).await;
                self.drop_waiters(actor_id).await
            }
        }
    }

    /// Re-validate all waiters in receipt order.
    async fn replay_waiters(&self, actor_id: &str) -> AppResult<()> {
        for message in self.quarantine.waiters_for(actor_id).await? {
            let outcome = self.validate(&message.id).await?;
            info!(message = %message.id, outcome = ?outcome, "Replayed waiting message");
        }
        Ok(())
    }

    async fn drop_waiters(&self, actor_id: &str) -> AppResult<()> {
        for message in self.quarantine.waiters_for(actor_id).await? {
            warn!(message = %message.id, actor = %actor_id, "Dropping message waiting on failed fetch");
            self.quarantine.delete(&message.id).await?;
        }
        Ok(())
    }
}

/// Verify the message's HTTP signature against a resolved key. Any
/// malformed header is a validation failure, never an error.
fn verify_message(message: &IncomingMessage, public_key_pem: &str) -> bool {
    let Ok(components) = HttpVerifier::parse_signature_header(&message.signature_header) else {
        warn!(message = %message.id, "Signature header does not parse");
        return false;
    };

    let headers = HashMap::from([
        ("host".to_string(), message.host.clone()),
        ("date".to_string(), message.date.clone()),
        ("content-type".to_string(), message.content_type.clone()),
    ]);

    HttpVerifier::verify(public_key_pem, &components, "POST", &message.path, &headers)
}
