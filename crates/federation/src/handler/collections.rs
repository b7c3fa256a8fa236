//! `ActivityPub` collection handlers (inbox, outbox, followers, following).
//!
//! Collections paginate at a fixed 50 items through a 1-indexed `?page=N`
//! query parameter.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use postbox_store::CollectionKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::FederationState;

/// Fixed page length for every collection.
pub const PAGE_SIZE: usize = 50;

const AP_CONTENT_TYPE: (&str, &str) = ("Content-Type", "application/activity+json; charset=utf-8");

/// Query parameters for paginated collections.
#[derive(Debug, Deserialize)]
pub struct CollectionQuery {
    /// 1-indexed page number; absent for the collection summary.
    pub page: Option<usize>,
}

/// `ActivityPub` `OrderedCollection` summary.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollection {
    #[serde(rename = "@context")]
    pub context: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub total_items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
}

/// `ActivityPub` `OrderedCollectionPage`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollectionPage {
    #[serde(rename = "@context")]
    pub context: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub part_of: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    pub ordered_items: Vec<Value>,
}

const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// Handle GET /users/{name}/inbox.
pub async fn inbox_collection_handler(
    State(state): State<FederationState>,
    Path(name): Path<String>,
    Query(query): Query<CollectionQuery>,
) -> Response {
    render(&state, &name, CollectionKind::Inbox, query.page).await
}

/// Handle GET /users/{name}/outbox.
pub async fn outbox_handler(
    State(state): State<FederationState>,
    Path(name): Path<String>,
    Query(query): Query<CollectionQuery>,
) -> Response {
    render(&state, &name, CollectionKind::Outbox, query.page).await
}

/// Handle GET /users/{name}/followers.
pub async fn followers_handler(
    State(state): State<FederationState>,
    Path(name): Path<String>,
    Query(query): Query<CollectionQuery>,
) -> Response {
    render(&state, &name, CollectionKind::Followers, query.page).await
}

/// Handle GET /users/{name}/following.
pub async fn following_handler(
    State(state): State<FederationState>,
    Path(name): Path<String>,
    Query(query): Query<CollectionQuery>,
) -> Response {
    render(&state, &name, CollectionKind::Following, query.page).await
}

async fn render(
    state: &FederationState,
    name: &str,
    kind: CollectionKind,
    page: Option<usize>,
) -> Response {
    info!(username = %name, collection = kind.as_str(), "Collection lookup");

    let actor = match state.actor_repo.find_local_by_name(name).await {
        Ok(Some(actor)) => actor,
        Ok(None) => return (StatusCode::NOT_FOUND, "No such user").into_response(),
        Err(e) => return e.into_response(),
    };

    let members = match state.collection_repo.members(&actor.id, kind).await {
        Ok(members) => members,
        Err(e) => return e.into_response(),
    };

    let collection_url = format!("{}/{}", actor.id, kind.as_str());

    let Some(page) = page else {
        let collection = OrderedCollection {
            context: AS_CONTEXT,
            kind: "OrderedCollection",
            id: collection_url.clone(),
            total_items: members.len(),
            first: (!members.is_empty()).then(|| format!("{collection_url}?page=1")),
        };
        return (StatusCode::OK, [AP_CONTENT_TYPE], Json(collection)).into_response();
    };

    let Some((start, end)) = page_window(page, members.len()) else {
        return (StatusCode::NOT_FOUND, "No such page").into_response();
    };
    let items = members
        .get(start..end)
        .unwrap_or_default()
        .iter()
        .map(|id| Value::String(id.clone()))
        .collect();

    let page_doc = OrderedCollectionPage {
        context: AS_CONTEXT,
        kind: "OrderedCollectionPage",
        id: format!("{collection_url}?page={page}"),
        part_of: collection_url.clone(),
        prev: (page > 1).then(|| format!("{collection_url}?page={}", page - 1)),
        next: (end < members.len()).then(|| format!("{collection_url}?page={}", page + 1)),
        ordered_items: items,
    };

    (StatusCode::OK, [AP_CONTENT_TYPE], Json(page_doc)).into_response()
}

/// Item window `(start, end)` for a 1-indexed page over `len` members, or
/// `None` when the page is out of range. The page number comes off the wire,
/// so the offset arithmetic must not overflow.
fn page_window(page: usize, len: usize) -> Option<(usize, usize)> {
    let start = page.checked_sub(1)?.checked_mul(PAGE_SIZE)?;
    if start >= len && page != 1 {
        return None;
    }
    Some((start, start.saturating_add(PAGE_SIZE).min(len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_window_bounds() {
        assert_eq!(page_window(0, 120), None);
        assert_eq!(page_window(1, 120), Some((0, 50)));
        assert_eq!(page_window(3, 120), Some((100, 120)));
        assert_eq!(page_window(4, 120), None);
        // Page 1 of an empty collection is an empty page, not a 404.
        assert_eq!(page_window(1, 0), Some((0, 0)));
        assert_eq!(page_window(2, 0), None);
    }

    #[test]
    fn test_page_window_survives_huge_page_numbers() {
        assert_eq!(page_window(368_934_881_474_191_034, 120), None);
        assert_eq!(page_window(usize::MAX, 120), None);
    }
}
