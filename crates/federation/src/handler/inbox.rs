//! Inbox handlers.
//!
//! A structurally acceptable POST always gets `200 Thank you`, whatever the
//! eventual validation outcome; the only observable failures are `415` for
//! a wrong content type or unparsable body and `400` for invalid UTF-8.
//! Auth failures are absorbed so the response can't be used as an oracle.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use postbox_store::IncomingMessage;
use serde_json::Value;
use tracing::{info, warn};

use super::FederationState;
use crate::signature::HttpVerifier;

const THANK_YOU: (StatusCode, &str) = (StatusCode::OK, "Thank you");

fn acceptable_content_type(content_type: &str) -> bool {
    content_type.contains("application/activity+json")
        || content_type.contains("application/ld+json")
}

/// Handle POST /sharedInbox.
pub async fn shared_inbox_handler(
    State(state): State<FederationState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    receive(&state, &headers, &body, "/sharedInbox".to_string()).await
}

/// Handle POST /users/{name}/inbox.
pub async fn user_inbox_handler(
    State(state): State<FederationState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.actor_repo.find_local_by_name(&name).await {
        Ok(Some(_)) => {}
        Ok(None) => return (StatusCode::NOT_FOUND, "No such user").into_response(),
        Err(e) => return e.into_response(),
    }
    receive(&state, &headers, &body, format!("/users/{name}/inbox")).await
}

async fn receive(
    state: &FederationState,
    headers: &HeaderMap,
    body: &[u8],
    path: String,
) -> Response {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !acceptable_content_type(content_type) {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported content type").into_response();
    }

    let Ok(text) = std::str::from_utf8(body) else {
        return (StatusCode::BAD_REQUEST, "Body is not valid UTF-8").into_response();
    };
    let Ok(document) = serde_json::from_str::<Value>(text) else {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Body is not valid JSON").into_response();
    };

    // Everything past this point is absorbed: auth and validation failures
    // must not be observable by the sender.
    let Some(actor) = claimed_actor(&document) else {
        warn!(path = %path, "Activity has no actor, not persisted");
        return THANK_YOU.into_response();
    };

    let Some(signature_header) = headers.get("signature").and_then(|v| v.to_str().ok()) else {
        warn!(path = %path, actor = %actor, "Missing Signature header, not persisted");
        return THANK_YOU.into_response();
    };
    let Ok(components) = HttpVerifier::parse_signature_header(signature_header) else {
        warn!(path = %path, actor = %actor, "Malformed Signature header, not persisted");
        return THANK_YOU.into_response();
    };

    let message = IncomingMessage {
        id: state.id_gen.generate_uuid(),
        actor: actor.clone(),
        key_id: components.key_id,
        date: header_value(headers, "date"),
        host: header_value(headers, "host"),
        path,
        content_type: content_type.to_string(),
        signature_header: signature_header.to_string(),
        body: document,
        waiting_for: None,
        received_at: Utc::now(),
    };

    info!(message = %message.id, actor = %actor, "Received inbound message");

    if let Err(e) = state.validator.receive(message).await {
        warn!(error = %e, "Failed to quarantine message");
    }
    THANK_YOU.into_response()
}

fn claimed_actor(document: &Value) -> Option<String> {
    match document.get("actor")? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("id").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
