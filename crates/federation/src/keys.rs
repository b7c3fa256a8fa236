//! Key resolution for inbound signature verification.
//!
//! Local keys come from the store synchronously; remote keys from the key
//! cache, falling back to an asynchronous background fetch. A cached `None`
//! is a sticky tombstone: the actor is known to be gone and is never
//! re-fetched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use postbox_common::{AppError, AppResult, IdGenerator};
use postbox_store::{Actor, ActorRepository, KeyCacheRepository};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::jobs::{FetchTicket, JobQueue};

/// Result of resolving an actor's public key.
#[derive(Debug)]
pub enum KeyResolution {
    /// Key available now (PEM).
    Found(String),
    /// The actor is known to be gone; the message must be dropped.
    Gone,
    /// A background fetch is outstanding; park the message.
    Pending,
    /// Terminal validation failure, never retried.
    Drop(&'static str),
}

#[derive(Default)]
struct InFlight {
    /// Actors with an outstanding fetch. The compare-and-set on this set is
    /// what guarantees exactly one fetch per actor.
    actors: HashSet<String>,
    /// Fetch tickets by uuid, for the `/asyncResult` callback.
    tickets: HashMap<String, String>,
}

/// Resolves actor public keys, deduplicating background fetches.
pub struct KeyResolver {
    actor_repo: ActorRepository,
    key_cache: KeyCacheRepository,
    jobs: Arc<dyn JobQueue>,
    base_url: Url,
    id_gen: IdGenerator,
    in_flight: Mutex<InFlight>,
}

impl KeyResolver {
    /// Create a new key resolver.
    #[must_use]
    pub fn new(
        actor_repo: ActorRepository,
        key_cache: KeyCacheRepository,
        jobs: Arc<dyn JobQueue>,
        base_url: Url,
    ) -> Self {
        Self {
            actor_repo,
            key_cache,
            jobs,
            base_url,
            id_gen: IdGenerator::new(),
            in_flight: Mutex::new(InFlight::default()),
        }
    }

    /// Whether an identifier belongs to this server.
    #[must_use]
    pub fn is_local(&self, id: &str) -> bool {
        id.starts_with(self.base_url.as_str())
    }

    /// Resolve the public key for `actor_id`, as claimed by `key_id`.
    ///
    /// Remote uncached actors pass a spoofing guard (the key id must be
    /// `actor_id + "#" + fragment`) and then trigger at most one background
    /// fetch across all concurrent callers.
    pub async fn resolve(&self, actor_id: &str, key_id: &str) -> AppResult<KeyResolution> {
        if self.is_local(actor_id) {
            // Local keys never touch the network. A missing local actor is a
            // terminal failure, not a fetch.
            return Ok(match self.actor_repo.find_by_id(actor_id).await? {
                Some(Actor {
                    public_key_pem: Some(pem),
                    ..
                }) => KeyResolution::Found(pem),
                _ => KeyResolution::Drop("unknown local actor"),
            });
        }

        if let Some(cached) = self.key_cache.find_by_owner(actor_id).await? {
            return Ok(cached
                .key_pem
                .map_or(KeyResolution::Gone, KeyResolution::Found));
        }

        if !key_owned_by_actor(key_id, actor_id) {
            warn!(actor = %actor_id, key_id = %key_id, "Key id not owned by claimed actor");
            return Ok(KeyResolution::Drop("key id not owned by claimed actor"));
        }

        // Compare-and-set: of N racing callers, only the one that inserts
        // the actor into the in-flight set enqueues the fetch.
        let ticket = {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.actors.insert(actor_id.to_string()) {
                let uuid = self.id_gen.generate_uuid();
                in_flight.tickets.insert(uuid.clone(), actor_id.to_string());
                Some(FetchTicket {
                    uuid,
                    actor_id: actor_id.to_string(),
                })
            } else {
                None
            }
        };

        if let Some(ticket) = ticket {
            debug!(actor = %ticket.actor_id, uuid = %ticket.uuid, "Enqueueing key fetch");
            self.jobs.enqueue_fetch(ticket).await?;
        }

        Ok(KeyResolution::Pending)
    }

    /// Resolve a fetch ticket to its actor and retire it. `None` for unknown
    /// or already-completed tickets.
    pub async fn take_ticket(&self, uuid: &str) -> Option<String> {
        self.in_flight.lock().await.tickets.remove(uuid)
    }

    /// Clear in-flight state for an actor after its fetch completed.
    pub async fn finish_fetch(&self, actor_id: &str) {
        let mut in_flight = self.in_flight.lock().await;
        in_flight.actors.remove(actor_id);
        in_flight.tickets.retain(|_, actor| actor != actor_id);
    }
}

/// Spoofing guard: the key id must be `actor_id + "#" + fragment`.
#[must_use]
pub fn key_owned_by_actor(key_id: &str, actor_id: &str) -> bool {
    key_id
        .strip_prefix(actor_id)
        .and_then(|rest| rest.strip_prefix('#'))
        .is_some_and(|fragment| !fragment.is_empty())
}

/// Build an [`Actor`] record from a fetched remote actor document.
///
/// # Errors
///
/// Returns [`AppError::Validation`] when `id`, `inbox`, or the public key
/// are missing.
pub fn remote_actor_from_document(doc: &Value) -> AppResult<Actor> {
    let id = doc
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Validation("Actor document has no id".to_string()))?
        .to_string();
    let inbox = doc
        .get("inbox")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Validation(format!("Actor {id} has no inbox")))?
        .to_string();
    let shared_inbox = doc
        .get("endpoints")
        .and_then(|e| e.get("sharedInbox"))
        .and_then(Value::as_str)
        .map(String::from);
    let public_key_pem = doc
        .get("publicKey")
        .and_then(|pk| pk.get("publicKeyPem"))
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Validation(format!("Actor {id} has no public key")))?
        .to_string();

    info!(actor = %id, "Materialized remote actor");

    Ok(Actor {
        id,
        local: false,
        preferred_username: doc
            .get("preferredUsername")
            .and_then(Value::as_str)
            .map(String::from),
        inbox,
        shared_inbox,
        public_key_pem: Some(public_key_pem),
        private_key_pem: None,
        auto_accept_followers: false,
        created_at: Utc::now(),
    })
}
