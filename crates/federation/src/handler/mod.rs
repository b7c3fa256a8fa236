//! axum handlers for the federation HTTP surface.

mod actor;
mod async_result;
mod collections;
mod inbox;

pub use actor::actor_handler;
pub use async_result::async_result_handler;
pub use collections::{
    OrderedCollection, OrderedCollectionPage, PAGE_SIZE, followers_handler, following_handler,
    inbox_collection_handler, outbox_handler,
};
pub use inbox::{shared_inbox_handler, user_inbox_handler};

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use postbox_common::IdGenerator;
use postbox_store::{ActorRepository, CollectionRepository};
use url::Url;

use crate::keys::KeyResolver;
use crate::validation::InboxValidator;

/// Shared state for all federation handlers.
#[derive(Clone)]
pub struct FederationState {
    pub validator: Arc<InboxValidator>,
    pub resolver: Arc<KeyResolver>,
    pub actor_repo: ActorRepository,
    pub collection_repo: CollectionRepository,
    pub id_gen: IdGenerator,
    pub base_url: Url,
}

/// The federation routes, ready to merge into the server's router.
pub fn routes(state: FederationState) -> Router {
    Router::new()
        .route("/sharedInbox", post(shared_inbox_handler))
        .route("/asyncResult", post(async_result_handler))
        .route("/users/{name}", get(actor_handler))
        .route(
            "/users/{name}/inbox",
            post(user_inbox_handler).get(inbox_collection_handler),
        )
        .route("/users/{name}/outbox", get(outbox_handler))
        .route("/users/{name}/followers", get(followers_handler))
        .route("/users/{name}/following", get(following_handler))
        .with_state(state)
}
