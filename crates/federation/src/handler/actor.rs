//! Actor document handler.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::info;

use super::FederationState;

/// Handle GET /users/{name}: the `ActivityPub` Person document peers fetch
/// to verify our signatures and find our inboxes.
pub async fn actor_handler(
    State(state): State<FederationState>,
    Path(name): Path<String>,
) -> Response {
    info!(username = %name, "Actor document lookup");

    let actor = match state.actor_repo.find_local_by_name(&name).await {
        Ok(Some(actor)) => actor,
        Ok(None) => return (StatusCode::NOT_FOUND, "No such user").into_response(),
        Err(e) => return e.into_response(),
    };

    let document = json!({
        "@context": [
            "https://www.w3.org/ns/activitystreams",
            "https://w3id.org/security/v1",
        ],
        "id": actor.id,
        "type": "Person",
        "preferredUsername": actor.preferred_username,
        "inbox": format!("{}/inbox", actor.id),
        "outbox": format!("{}/outbox", actor.id),
        "followers": format!("{}/followers", actor.id),
        "following": format!("{}/following", actor.id),
        "endpoints": {
            "sharedInbox": state.base_url.join("sharedInbox").map(String::from).unwrap_or_default(),
        },
        "publicKey": {
            "id": actor.key_id(),
            "owner": actor.id,
            "publicKeyPem": actor.public_key_pem,
        },
    });

    (
        StatusCode::OK,
        [("Content-Type", "application/activity+json; charset=utf-8")],
        Json(document),
    )
        .into_response()
}
