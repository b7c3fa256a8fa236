//! Recipient resolution.
//!
//! Expands a recipient identifier set into a deduplicated set of inbox
//! URLs: public sentinels are skipped, actors resolve to their shared inbox
//! when one is declared, and collections are paginated exactly one level
//! deep. A recipient that resolves to nothing contributes nothing; it never
//! aborts the overall resolution.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use postbox_common::AppResult;
use postbox_store::{ActorRepository, FollowingRepository};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::client::ApTransport;

/// The three equivalent spellings of the public addressing sentinel. None
/// of them ever resolves to an inbox.
pub const PUBLIC_SENTINELS: [&str; 3] = [
    "https://www.w3.org/ns/activitystreams#Public",
    "as:Public",
    "Public",
];

/// Whether an identifier is the public sentinel, in any spelling.
#[must_use]
pub fn is_public_sentinel(id: &str) -> bool {
    PUBLIC_SENTINELS.contains(&id)
}

const ACTOR_TYPES: [&str; 5] = ["Person", "Service", "Application", "Group", "Organization"];
const COLLECTION_TYPES: [&str; 2] = ["Collection", "OrderedCollection"];
const PAGE_TYPES: [&str; 2] = ["CollectionPage", "OrderedCollectionPage"];

/// Resolves recipient identifiers to inbox URLs.
pub struct RecipientResolver {
    actor_repo: ActorRepository,
    following_repo: FollowingRepository,
    transport: Arc<dyn ApTransport>,
    base_url: Url,
}

impl RecipientResolver {
    /// Create a new recipient resolver.
    #[must_use]
    pub fn new(
        actor_repo: ActorRepository,
        following_repo: FollowingRepository,
        transport: Arc<dyn ApTransport>,
        base_url: Url,
    ) -> Self {
        Self {
            actor_repo,
            following_repo,
            transport,
            base_url,
        }
    }

    /// Resolve a recipient set to a deduplicated set of inbox URLs.
    ///
    /// Iteration order over the input is deterministic (sorted); the result
    /// depends only on the input set and the state of the world.
    pub async fn resolve(&self, recipients: &BTreeSet<String>) -> AppResult<HashSet<String>> {
        let mut inboxes = HashSet::new();
        // Entries carry whether they were reached through a collection;
        // those are never expanded again.
        let mut worklist: VecDeque<(String, bool)> =
            recipients.iter().map(|id| (id.clone(), false)).collect();
        let mut seen: HashSet<String> = recipients.iter().cloned().collect();

        while let Some((id, nested)) = worklist.pop_front() {
            if is_public_sentinel(&id) {
                continue;
            }

            if let Some(inbox) = self.actor_inbox(&id).await? {
                inboxes.insert(inbox);
                continue;
            }

            if let Some(members) = self.local_collection_members(&id).await? {
                if nested {
                    debug!(collection = %id, "Nested collection not expanded");
                    continue;
                }
                for member in members {
                    if seen.insert(member.clone()) {
                        worklist.push_back((member, true));
                    }
                }
                continue;
            }

            // Remote document: actor or collection.
            let doc = match self.transport.fetch(&id).await {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(recipient = %id, error = %e, "Recipient unreachable");
                    continue;
                }
            };
            let kind = doc.get("type").and_then(Value::as_str).unwrap_or("");

            if ACTOR_TYPES.contains(&kind) {
                match remote_inbox(&doc) {
                    Some(inbox) => {
                        inboxes.insert(inbox);
                    }
                    None => warn!(recipient = %id, "Actor declares no inbox"),
                }
            } else if COLLECTION_TYPES.contains(&kind) {
                if nested {
                    debug!(collection = %id, "Nested collection not expanded");
                    continue;
                }
                for member in self.expand_collection(&id, &doc).await {
                    if seen.insert(member.clone()) {
                        worklist.push_back((member, true));
                    }
                }
            } else {
                warn!(recipient = %id, kind = %kind, "Recipient is neither actor nor collection");
            }
        }

        Ok(inboxes)
    }

    /// Inbox for a known actor, shared inbox preferred.
    async fn actor_inbox(&self, id: &str) -> AppResult<Option<String>> {
        Ok(self
            .actor_repo
            .find_by_id(id)
            .await?
            .map(|actor| actor.delivery_inbox().to_string()))
    }

    /// Members of a local followers/following collection, or `None` when
    /// the id is not one.
    async fn local_collection_members(&self, id: &str) -> AppResult<Option<Vec<String>>> {
        if !id.starts_with(self.base_url.as_str()) {
            return Ok(None);
        }
        if let Some(owner) = id.strip_suffix("/followers") {
            return Ok(Some(self.following_repo.followers_of(owner).await?));
        }
        if let Some(owner) = id.strip_suffix("/following") {
            return Ok(Some(self.following_repo.following_of(owner).await?));
        }
        Ok(None)
    }

    /// Paginate a remote collection through its `first`/`next` links,
    /// collecting member ids. Pages with the wrong type or a `partOf` not
    /// naming this collection are logged and skipped.
    async fn expand_collection(&self, collection_id: &str, doc: &Value) -> Vec<String> {
        let mut members = item_ids(doc);
        let mut visited: HashSet<String> = HashSet::new();
        let mut page_ref = doc.get("first").cloned();

        while let Some(page_value) = page_ref.take() {
            let page = match page_value {
                Value::Object(_) => page_value,
                Value::String(url) => {
                    if !visited.insert(url.clone()) {
                        warn!(collection = %collection_id, page = %url, "Page cycle detected");
                        break;
                    }
                    match self.transport.fetch(&url).await {
                        Ok(page) => page,
                        Err(e) => {
                            warn!(collection = %collection_id, page = %url, error = %e, "Page fetch failed");
                            break;
                        }
                    }
                }
                _ => break,
            };

            let kind = page.get("type").and_then(Value::as_str).unwrap_or("");
            if !PAGE_TYPES.contains(&kind) {
                warn!(collection = %collection_id, kind = %kind, "Not a collection page");
                break;
            }
            if page.get("partOf").and_then(Value::as_str) != Some(collection_id) {
                warn!(collection = %collection_id, "Page partOf mismatch");
                break;
            }

            members.extend(item_ids(&page));
            page_ref = page.get("next").cloned();
        }

        members
    }
}

/// Inbox URL from a remote actor document, shared inbox preferred.
fn remote_inbox(doc: &Value) -> Option<String> {
    doc.get("endpoints")
        .and_then(|e| e.get("sharedInbox"))
        .and_then(Value::as_str)
        .or_else(|| doc.get("inbox").and_then(Value::as_str))
        .map(String::from)
}

/// Member ids from a collection or page document.
fn item_ids(doc: &Value) -> Vec<String> {
    let items = doc
        .get("orderedItems")
        .or_else(|| doc.get("items"))
        .and_then(Value::as_array);
    items.map_or_else(Vec::new, |items| {
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(map) => map.get("id").and_then(Value::as_str).map(String::from),
                _ => None,
            })
            .collect()
    })
}
