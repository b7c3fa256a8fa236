//! Background fetch completion callback.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{info, warn};

use super::FederationState;
use crate::client::FetchOutcome;

/// Query parameters for `POST /asyncResult`.
#[derive(Debug, Deserialize)]
pub struct AsyncResultQuery {
    pub uuid: String,
    /// `1` for a successful fetch (body = fetched document), `0` otherwise.
    pub success: u8,
}

/// Handle `POST /asyncResult?uuid={id}&success={0|1}`: resolve the fetch
/// ticket and feed the result into the quarantine replay.
pub async fn async_result_handler(
    State(state): State<FederationState>,
    Query(query): Query<AsyncResultQuery>,
    body: Bytes,
) -> Response {
    let Some(actor_id) = state.resolver.take_ticket(&query.uuid).await else {
        warn!(uuid = %query.uuid, "Unknown fetch ticket");
        return (StatusCode::NOT_FOUND, "Unknown ticket").into_response();
    };

    let outcome = if query.success == 1 {
        match serde_json::from_slice(&body) {
            Ok(document) => FetchOutcome::Document(document),
            Err(e) => {
                warn!(uuid = %query.uuid, error = %e, "Fetch result body is not JSON");
                return (StatusCode::BAD_REQUEST, "Body is not valid JSON").into_response();
            }
        }
    } else {
        FetchOutcome::Failed("reported via asyncResult".to_string())
    };

    info!(uuid = %query.uuid, actor = %actor_id, success = query.success, "Fetch result received");

    match state.validator.handle_fetch_result(&actor_id, outcome).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}
