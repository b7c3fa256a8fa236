//! Record types held by the object store.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use postbox_common::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Activity types understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityKind {
    Create,
    Update,
    Delete,
    Follow,
    Add,
    Remove,
    Like,
    Undo,
    Accept,
    Reject,
    Announce,
}

impl ActivityKind {
    /// Wire name of this activity type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Follow => "Follow",
            Self::Add => "Add",
            Self::Remove => "Remove",
            Self::Like => "Like",
            Self::Undo => "Undo",
            Self::Accept => "Accept",
            Self::Reject => "Reject",
            Self::Announce => "Announce",
        }
    }

    /// Whether an activity of this type must carry an `object` field.
    #[must_use]
    pub const fn requires_object(self) -> bool {
        // Every supported type wraps or references an object.
        true
    }

    /// Whether an activity of this type must carry a `target` field.
    #[must_use]
    pub const fn requires_target(self) -> bool {
        matches!(self, Self::Add | Self::Remove)
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Create" => Ok(Self::Create),
            "Update" => Ok(Self::Update),
            "Delete" => Ok(Self::Delete),
            "Follow" => Ok(Self::Follow),
            "Add" => Ok(Self::Add),
            "Remove" => Ok(Self::Remove),
            "Like" => Ok(Self::Like),
            "Undo" => Ok(Self::Undo),
            "Accept" => Ok(Self::Accept),
            "Reject" => Ok(Self::Reject),
            "Announce" => Ok(Self::Announce),
            other => Err(AppError::Validation(format!(
                "Unknown activity type: {other}"
            ))),
        }
    }
}

/// Addressing field kinds. The blind variants (`bto`, `bcc`) are used for
/// fan-out but stripped from any representation sent over the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AudienceField {
    Audience,
    To,
    Cc,
    Bto,
    Bcc,
}

impl AudienceField {
    /// All five field kinds, in wire order.
    pub const ALL: [Self; 5] = [Self::Audience, Self::To, Self::Cc, Self::Bto, Self::Bcc];

    /// Wire name of this field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audience => "audience",
            Self::To => "to",
            Self::Cc => "cc",
            Self::Bto => "bto",
            Self::Bcc => "bcc",
        }
    }

    /// Blind fields never appear in wire representations.
    #[must_use]
    pub const fn is_blind(self) -> bool {
        matches!(self, Self::Bto | Self::Bcc)
    }
}

/// A stored activity.
///
/// Immutable once delivered; idempotent by id. Well-known fields are typed,
/// extension fields live in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub kind: ActivityKind,
    pub actor: String,
    /// The wrapped or referenced object, as received.
    pub object: Option<Value>,
    pub target: Option<String>,
    /// Recipients by addressing field.
    pub audiences: BTreeMap<AudienceField, Vec<String>>,
    /// Extension fields preserved verbatim.
    pub extra: Map<String, Value>,
    pub published: DateTime<Utc>,
}

/// Fields lifted out of a document into typed storage rather than `extra`.
const KNOWN_FIELDS: [&str; 12] = [
    "@context",
    "id",
    "type",
    "actor",
    "object",
    "target",
    "to",
    "cc",
    "bto",
    "bcc",
    "audience",
    "published",
];

fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("id").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

fn id_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(id_of).collect(),
        other => id_of(other).into_iter().collect(),
    }
}

impl Activity {
    /// Parse an activity from an `ActivityPub` document.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] when `id`, `type`, or `actor` are
    /// missing or the type is unknown.
    pub fn from_document(doc: &Value) -> AppResult<Self> {
        let map = doc
            .as_object()
            .ok_or_else(|| AppError::Validation("Activity is not a JSON object".to_string()))?;

        let id = map
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Validation("Activity has no id".to_string()))?
            .to_string();

        let kind: ActivityKind = map
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Validation("Activity has no type".to_string()))?
            .parse()?;

        let actor = map
            .get("actor")
            .and_then(id_of)
            .ok_or_else(|| AppError::Validation("Activity has no actor".to_string()))?;

        let object = map.get("object").cloned();
        let target = map.get("target").and_then(id_of);

        let mut audiences = BTreeMap::new();
        for field in AudienceField::ALL {
            if let Some(value) = map.get(field.as_str()) {
                let ids = id_list(value);
                if !ids.is_empty() {
                    audiences.insert(field, ids);
                }
            }
        }

        let extra: Map<String, Value> = map
            .iter()
            .filter(|(k, _)| !KNOWN_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let published = map
            .get("published")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map_or_else(Utc::now, |d| d.with_timezone(&Utc));

        Ok(Self {
            id,
            kind,
            actor,
            object,
            target,
            audiences,
            extra,
            published,
        })
    }

    /// Recipients of this activity: the union of all five addressing fields.
    #[must_use]
    pub fn recipients(&self) -> BTreeSet<String> {
        self.audiences.values().flatten().cloned().collect()
    }

    /// Identifier of the wrapped object, when it has one.
    #[must_use]
    pub fn object_id(&self) -> Option<String> {
        self.object.as_ref().and_then(id_of)
    }

    /// Render this activity as an `ActivityPub` document.
    ///
    /// With `strip_blind`, the `bto`/`bcc` fields are omitted; this is the
    /// only form that may leave the process.
    #[must_use]
    pub fn to_document(&self, strip_blind: bool) -> Value {
        let mut map = Map::new();
        map.insert(
            "@context".to_string(),
            json!("https://www.w3.org/ns/activitystreams"),
        );
        map.insert("id".to_string(), json!(self.id));
        map.insert("type".to_string(), json!(self.kind.as_str()));
        map.insert("actor".to_string(), json!(self.actor));
        if let Some(ref object) = self.object {
            map.insert("object".to_string(), object.clone());
        }
        if let Some(ref target) = self.target {
            map.insert("target".to_string(), json!(target));
        }
        for (field, ids) in &self.audiences {
            if strip_blind && field.is_blind() {
                continue;
            }
            map.insert(field.as_str().to_string(), json!(ids));
        }
        map.insert(
            "published".to_string(),
            json!(self.published.to_rfc3339()),
        );
        for (k, v) in &self.extra {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}

/// An actor known to this server, local or remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    /// Actor identifier (URL).
    pub id: String,
    /// Whether this actor lives on this server.
    pub local: bool,
    /// Preferred username (local actors).
    pub preferred_username: Option<String>,
    /// Personal inbox URL.
    pub inbox: String,
    /// Server-wide shared inbox URL, if the actor declares one.
    pub shared_inbox: Option<String>,
    /// Public key in SPKI PEM (absent until fetched for remote actors).
    pub public_key_pem: Option<String>,
    /// Private key in PKCS#8 PEM (local actors only).
    pub private_key_pem: Option<String>,
    /// Whether incoming Follows are accepted without manual review.
    pub auto_accept_followers: bool,
    pub created_at: DateTime<Utc>,
}

impl Actor {
    /// Key id advertised for this actor's public key.
    #[must_use]
    pub fn key_id(&self) -> String {
        format!("{}#main-key", self.id)
    }

    /// Best inbox for delivery: shared inbox when declared.
    #[must_use]
    pub fn delivery_inbox(&self) -> &str {
        self.shared_inbox.as_deref().unwrap_or(&self.inbox)
    }
}

/// A quarantined inbound message awaiting validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Quarantine entry id (UUID).
    pub id: String,
    /// Actor claimed in the activity body.
    pub actor: String,
    /// Key id claimed in the `Signature` header.
    pub key_id: String,
    /// `Date` header as received.
    pub date: String,
    /// `Host` header as received.
    pub host: String,
    /// Request path the message was posted to.
    pub path: String,
    /// `Content-Type` header as received.
    pub content_type: String,
    /// Full `Signature` header as received.
    pub signature_header: String,
    /// Parsed activity document.
    pub body: Value,
    /// Actor id whose key this message is parked on, if any.
    pub waiting_for: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// A cached remote public key. `key_pem: None` is a tombstone meaning the
/// actor is known to be gone and must not be re-fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPublicKey {
    pub owner: String,
    pub key_pem: Option<String>,
    pub cached_at: DateTime<Utc>,
}

/// A follow relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Following {
    pub id: String,
    /// The actor who is following.
    pub follower_id: String,
    /// The actor being followed.
    pub followee_id: String,
    /// True until the followee (or auto-accept) accepts.
    pub pending: bool,
    pub created_at: DateTime<Utc>,
}

/// An object materialized by a Create activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    pub id: String,
    /// Wire type of the object (Note, Article, ...).
    pub kind: String,
    pub attributed_to: Option<String>,
    /// Full document as stored.
    pub document: Value,
}

/// Collection families kept per actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    Inbox,
    Outbox,
    Followers,
    Following,
}

impl CollectionKind {
    /// URL path segment for this collection.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Outbox => "outbox",
            Self::Followers => "followers",
            Self::Following => "following",
        }
    }
}

impl FromStr for CollectionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbox" => Ok(Self::Inbox),
            "outbox" => Ok(Self::Outbox),
            "followers" => Ok(Self::Followers),
            "following" => Ok(Self::Following),
            other => Err(AppError::NotFound(format!("No such collection: {other}"))),
        }
    }
}
