//! End-to-end tests over the inbound validation and outbound delivery
//! pipeline, driven synchronously through recording stubs.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use postbox_common::{IdGenerator, RsaKeypair, generate_rsa_keypair};
use postbox_federation::client::{ApTransport, FetchOutcome};
use postbox_federation::delivery::DeliveryDispatcher;
use postbox_federation::jobs::JobQueue;
use postbox_federation::keys::KeyResolver;
use postbox_federation::processor::{
    AcceptProcessor, CreateProcessor, DeleteProcessor, FollowProcessor, LikeProcessor,
    RejectProcessor, SideEffectEngine, UndoProcessor, UpdateProcessor,
};
use postbox_federation::recipients::RecipientResolver;
use postbox_federation::signature::HttpSigner;
use postbox_federation::test_utils::{RecordingJobQueue, StubTransport};
use postbox_federation::validation::{InboxValidator, ValidationOutcome};
use postbox_store::{
    ActivityKind, ActivityRepository, Actor, ActorLocks, ActorRepository, CollectionKind,
    CollectionRepository, FollowingRepository, IncomingMessage, KeyCacheRepository, MemoryStore,
    ObjectRepository, QuarantineRepository,
};
use serde_json::{Value, json};
use url::Url;

const BASE: &str = "https://local.example/";

struct Harness {
    transport: Arc<StubTransport>,
    jobs: Arc<RecordingJobQueue>,
    validator: InboxValidator,
    dispatcher: DeliveryDispatcher,
    recipients: Arc<RecipientResolver>,
    actor_repo: ActorRepository,
    activity_repo: ActivityRepository,
    following_repo: FollowingRepository,
    collection_repo: CollectionRepository,
    object_repo: ObjectRepository,
    quarantine: QuarantineRepository,
    key_cache: KeyCacheRepository,
    id_gen: IdGenerator,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let base_url = Url::parse(BASE).unwrap();

    let actor_repo = ActorRepository::new(store.clone());
    let activity_repo = ActivityRepository::new(store.clone());
    let following_repo = FollowingRepository::new(store.clone());
    let collection_repo = CollectionRepository::new(store.clone());
    let object_repo = ObjectRepository::new(store.clone());
    let quarantine = QuarantineRepository::new(store.clone());
    let key_cache = KeyCacheRepository::new(store);

    let jobs = Arc::new(RecordingJobQueue::new());
    let jobs_dyn: Arc<dyn JobQueue> = jobs.clone();
    let transport = Arc::new(StubTransport::new());
    let transport_dyn: Arc<dyn ApTransport> = transport.clone();

    let resolver = Arc::new(KeyResolver::new(
        actor_repo.clone(),
        key_cache.clone(),
        jobs_dyn.clone(),
        base_url.clone(),
    ));

    let engine = Arc::new(
        SideEffectEngine::new(Arc::new(ActorLocks::new()), activity_repo.clone())
            .with_handler(
                ActivityKind::Follow,
                Arc::new(FollowProcessor::new(
                    actor_repo.clone(),
                    following_repo.clone(),
                    activity_repo.clone(),
                    collection_repo.clone(),
                    jobs_dyn.clone(),
                    base_url.clone(),
                )),
            )
            .with_handler(
                ActivityKind::Accept,
                Arc::new(AcceptProcessor::new(
                    actor_repo.clone(),
                    following_repo.clone(),
                    activity_repo.clone(),
                    collection_repo.clone(),
                )),
            )
            .with_handler(
                ActivityKind::Reject,
                Arc::new(RejectProcessor::new(
                    following_repo.clone(),
                    activity_repo.clone(),
                )),
            )
            .with_handler(
                ActivityKind::Create,
                Arc::new(CreateProcessor::new(
                    object_repo.clone(),
                    activity_repo.clone(),
                    base_url.clone(),
                )),
            )
            .with_handler(
                ActivityKind::Like,
                Arc::new(LikeProcessor::new(
                    object_repo.clone(),
                    actor_repo.clone(),
                    collection_repo.clone(),
                )),
            )
            .with_handler(
                ActivityKind::Undo,
                Arc::new(UndoProcessor::new(
                    following_repo.clone(),
                    activity_repo.clone(),
                )),
            )
            .with_handler(
                ActivityKind::Update,
                Arc::new(UpdateProcessor::new(object_repo.clone())),
            )
            .with_handler(
                ActivityKind::Delete,
                Arc::new(DeleteProcessor::new(object_repo.clone())),
            ),
    );

    let validator = InboxValidator::new(
        quarantine.clone(),
        activity_repo.clone(),
        actor_repo.clone(),
        key_cache.clone(),
        resolver,
        engine,
        jobs_dyn,
    );

    let recipients = Arc::new(RecipientResolver::new(
        actor_repo.clone(),
        following_repo.clone(),
        transport_dyn.clone(),
        base_url.clone(),
    ));

    let dispatcher = DeliveryDispatcher::new(
        activity_repo.clone(),
        actor_repo.clone(),
        collection_repo.clone(),
        recipients.clone(),
        transport_dyn,
        base_url,
    );

    Harness {
        transport,
        jobs,
        validator,
        dispatcher,
        recipients,
        actor_repo,
        activity_repo,
        following_repo,
        collection_repo,
        object_repo,
        quarantine,
        key_cache,
        id_gen: IdGenerator::new(),
    }
}

fn local_actor(name: &str, auto_accept: bool) -> (Actor, RsaKeypair) {
    let keypair = generate_rsa_keypair().unwrap();
    let id = format!("{BASE}users/{name}");
    let actor = Actor {
        id: id.clone(),
        local: true,
        preferred_username: Some(name.to_string()),
        inbox: format!("{id}/inbox"),
        shared_inbox: None,
        public_key_pem: Some(keypair.public_key_pem.clone()),
        private_key_pem: Some(keypair.private_key_pem.clone()),
        auto_accept_followers: auto_accept,
        created_at: Utc::now(),
    };
    (actor, keypair)
}

/// Register a remote actor with a cached key, as if already fetched.
async fn register_remote(h: &Harness, id: &str, shared_inbox: Option<&str>) -> RsaKeypair {
    let keypair = generate_rsa_keypair().unwrap();
    h.actor_repo
        .put(Actor {
            id: id.to_string(),
            local: false,
            preferred_username: None,
            inbox: format!("{id}/inbox"),
            shared_inbox: shared_inbox.map(String::from),
            public_key_pem: Some(keypair.public_key_pem.clone()),
            private_key_pem: None,
            auto_accept_followers: false,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    h.key_cache
        .put(id, Some(keypair.public_key_pem.clone()))
        .await
        .unwrap();
    keypair
}

/// Build an inbound message with a real signature over the fixed header set.
fn signed_message(actor_id: &str, keypair: &RsaKeypair, path: &str, body: Value) -> IncomingMessage {
    let signer = HttpSigner::new(
        &keypair.private_key_pem,
        format!("{actor_id}#main-key"),
    )
    .unwrap();
    let url = Url::parse(&format!("https://local.example{path}")).unwrap();
    let pairs = signer
        .sign_request("POST", &url, "application/activity+json")
        .unwrap();

    let mut date = String::new();
    let mut host = String::new();
    let mut signature_header = String::new();
    for (name, value) in pairs {
        match name.as_str() {
            "Date" => date = value,
            "Host" => host = value,
            "Signature" => signature_header = value,
            _ => {}
        }
    }

    IncomingMessage {
        id: IdGenerator::new().generate_uuid(),
        actor: actor_id.to_string(),
        key_id: format!("{actor_id}#main-key"),
        date,
        host,
        path: path.to_string(),
        content_type: "application/activity+json".to_string(),
        signature_header,
        body,
        waiting_for: None,
        received_at: Utc::now(),
    }
}

fn person_doc(id: &str, keypair: &RsaKeypair, shared_inbox: Option<&str>) -> Value {
    let mut doc = json!({
        "id": id,
        "type": "Person",
        "inbox": format!("{id}/inbox"),
        "publicKey": {
            "id": format!("{id}#main-key"),
            "owner": id,
            "publicKeyPem": keypair.public_key_pem,
        },
    });
    if let Some(shared) = shared_inbox {
        doc["endpoints"] = json!({"sharedInbox": shared});
    }
    doc
}

// --- key resolution and quarantine ---

#[tokio::test]
async fn test_signed_message_accepted_end_to_end() {
    let h = harness();
    let (alice, _) = local_actor("alice", false);
    let alice_id = alice.id.clone();
    h.actor_repo.put(alice).await.unwrap();

    let fred = "https://remote.example/users/fred";
    let fred_key = register_remote(&h, fred, None).await;

    let message = signed_message(
        fred,
        &fred_key,
        "/users/alice/inbox",
        json!({
            "id": "https://remote.example/act/1",
            "type": "Like",
            "actor": fred,
            "object": "https://local.example/notes/1",
            "to": [alice_id],
        }),
    );
    let message_id = message.id.clone();
    h.validator.receive(message).await.unwrap();

    let outcome = h.validator.validate(&message_id).await.unwrap();
    assert_eq!(outcome, ValidationOutcome::Accepted);

    // Activity stored, quarantine entry gone, local fan-out enqueued.
    assert!(
        h.activity_repo
            .find_by_id("https://remote.example/act/1")
            .await
            .unwrap()
            .is_some()
    );
    assert!(h.quarantine.find_by_id(&message_id).await.unwrap().is_none());
    let deliveries = h.jobs.take_deliveries();
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].incoming);
}

#[tokio::test]
async fn test_bad_signature_rejected() {
    let h = harness();
    let fred = "https://remote.example/users/fred";
    register_remote(&h, fred, None).await;

    // Signed with a key that is not the one cached for fred.
    let wrong_key = generate_rsa_keypair().unwrap();
    let message = signed_message(
        fred,
        &wrong_key,
        "/sharedInbox",
        json!({
            "id": "https://remote.example/act/2",
            "type": "Like",
            "actor": fred,
            "object": "https://local.example/notes/1",
        }),
    );
    let message_id = message.id.clone();
    h.validator.receive(message).await.unwrap();

    assert_eq!(
        h.validator.validate(&message_id).await.unwrap(),
        ValidationOutcome::Rejected
    );
    assert!(h.quarantine.find_by_id(&message_id).await.unwrap().is_none());
    assert!(
        h.activity_repo
            .find_by_id("https://remote.example/act/2")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_body_actor_must_match_signing_actor() {
    let h = harness();
    let fred = "https://remote.example/users/fred";
    let fred_key = register_remote(&h, fred, None).await;

    let message = signed_message(
        fred,
        &fred_key,
        "/sharedInbox",
        json!({
            "id": "https://remote.example/act/3",
            "type": "Like",
            "actor": "https://remote.example/users/barney",
            "object": "https://local.example/notes/1",
        }),
    );
    let message_id = message.id.clone();
    h.validator.receive(message).await.unwrap();

    assert_eq!(
        h.validator.validate(&message_id).await.unwrap(),
        ValidationOutcome::Rejected
    );
}

#[tokio::test]
async fn test_spoofed_key_id_dropped_without_fetch() {
    let h = harness();
    let fred = "https://remote.example/users/fred";
    let key = generate_rsa_keypair().unwrap();

    let mut message = signed_message(
        fred,
        &key,
        "/sharedInbox",
        json!({
            "id": "https://remote.example/act/4",
            "type": "Like",
            "actor": fred,
            "object": "https://local.example/notes/1",
        }),
    );
    // Key id belongs to someone else entirely.
    message.key_id = "https://evil.example/users/mallory#main-key".to_string();
    let message_id = message.id.clone();
    h.validator.receive(message).await.unwrap();

    assert_eq!(
        h.validator.validate(&message_id).await.unwrap(),
        ValidationOutcome::Rejected
    );
    assert!(h.jobs.take_fetches().is_empty());
}

#[tokio::test]
async fn test_concurrent_waiters_trigger_one_fetch() {
    let h = harness();
    let fred = "https://remote.example/users/fred";
    let key = generate_rsa_keypair().unwrap();

    let mut ids = Vec::new();
    for n in 0..3 {
        let message = signed_message(
            fred,
            &key,
            "/sharedInbox",
            json!({
                "id": format!("https://remote.example/act/{n}"),
                "type": "Like",
                "actor": fred,
                "object": "https://local.example/notes/1",
            }),
        );
        ids.push(message.id.clone());
        h.validator.receive(message).await.unwrap();
    }

    for id in &ids {
        assert_eq!(
            h.validator.validate(id).await.unwrap(),
            ValidationOutcome::Waiting
        );
    }

    let fetches = h.jobs.take_fetches();
    assert_eq!(fetches.len(), 1);
    assert_eq!(fetches[0].actor_id, fred);
}

#[tokio::test]
async fn test_waiters_replay_in_receipt_order() {
    let h = harness();
    let fred = "https://remote.example/users/fred";
    let key = generate_rsa_keypair().unwrap();

    let mut activity_ids = Vec::new();
    for n in 1..=3 {
        let activity_id = format!("https://remote.example/act/{n}");
        let message = signed_message(
            fred,
            &key,
            "/sharedInbox",
            json!({
                "id": activity_id,
                "type": "Like",
                "actor": fred,
                "object": "https://local.example/notes/1",
            }),
        );
        activity_ids.push(activity_id);
        let id = message.id.clone();
        h.validator.receive(message).await.unwrap();
        assert_eq!(
            h.validator.validate(&id).await.unwrap(),
            ValidationOutcome::Waiting
        );
    }
    h.jobs.take_fetches();

    h.validator
        .handle_fetch_result(fred, FetchOutcome::Document(person_doc(fred, &key, None)))
        .await
        .unwrap();

    // All three accepted, fan-out jobs enqueued in receipt order.
    let replayed: Vec<String> = h
        .jobs
        .take_deliveries()
        .into_iter()
        .map(|j| j.activity_id)
        .collect();
    assert_eq!(replayed, activity_ids);
    assert!(h.quarantine.waiters_for(fred).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_pending_on_same_actor_is_a_fetch_loop() {
    let h = harness();
    let fred = "https://remote.example/users/fred";
    let key = generate_rsa_keypair().unwrap();

    let message = signed_message(
        fred,
        &key,
        "/sharedInbox",
        json!({
            "id": "https://remote.example/act/1",
            "type": "Like",
            "actor": fred,
            "object": "https://local.example/notes/1",
        }),
    );
    let message_id = message.id.clone();
    h.validator.receive(message).await.unwrap();

    assert_eq!(
        h.validator.validate(&message_id).await.unwrap(),
        ValidationOutcome::Waiting
    );
    // Re-validated while the fetch is still outstanding: the message has
    // already waited on this actor once, so it is dropped, not re-parked.
    assert_eq!(
        h.validator.validate(&message_id).await.unwrap(),
        ValidationOutcome::Dropped
    );
    assert!(h.quarantine.find_by_id(&message_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_gone_actor_tombstone_is_sticky() {
    let h = harness();
    let fred = "https://remote.example/users/fred";
    let key = generate_rsa_keypair().unwrap();

    let first = signed_message(
        fred,
        &key,
        "/sharedInbox",
        json!({
            "id": "https://remote.example/act/1",
            "type": "Like",
            "actor": fred,
            "object": "https://local.example/notes/1",
        }),
    );
    let first_id = first.id.clone();
    h.validator.receive(first).await.unwrap();
    assert_eq!(
        h.validator.validate(&first_id).await.unwrap(),
        ValidationOutcome::Waiting
    );
    h.jobs.take_fetches();

    h.validator
        .handle_fetch_result(fred, FetchOutcome::Gone)
        .await
        .unwrap();
    assert!(h.quarantine.find_by_id(&first_id).await.unwrap().is_none());

    // Later messages from the same actor fail fast, with no new fetch.
    let second = signed_message(
        fred,
        &key,
        "/sharedInbox",
        json!({
            "id": "https://remote.example/act/2",
            "type": "Like",
            "actor": fred,
            "object": "https://local.example/notes/1",
        }),
    );
    let second_id = second.id.clone();
    h.validator.receive(second).await.unwrap();
    assert_eq!(
        h.validator.validate(&second_id).await.unwrap(),
        ValidationOutcome::Rejected
    );
    assert!(h.jobs.take_fetches().is_empty());
}

#[tokio::test]
async fn test_duplicate_activity_runs_side_effects_once() {
    let h = harness();
    let (alice, _) = local_actor("alice", true);
    let alice_id = alice.id.clone();
    h.actor_repo.put(alice).await.unwrap();
    let fred = "https://remote.example/users/fred";
    let fred_key = register_remote(&h, fred, None).await;

    let follow = json!({
        "id": "https://remote.example/act/follow-1",
        "type": "Follow",
        "actor": fred,
        "object": alice_id,
    });

    for _ in 0..2 {
        let message = signed_message(fred, &fred_key, "/sharedInbox", follow.clone());
        let id = message.id.clone();
        h.validator.receive(message).await.unwrap();
        assert_eq!(
            h.validator.validate(&id).await.unwrap(),
            ValidationOutcome::Accepted
        );
    }

    // One Accept synthesized and one fan-out job, not two of each.
    let outgoing: Vec<_> = h
        .jobs
        .take_deliveries()
        .into_iter()
        .filter(|j| !j.incoming)
        .collect();
    assert_eq!(outgoing.len(), 1);
}

// --- recipient resolution ---

#[tokio::test]
async fn test_public_sentinel_never_resolves() {
    let h = harness();
    let fred = "https://remote.example/users/fred";
    register_remote(&h, fred, None).await;

    let recipients: BTreeSet<String> = [
        "https://www.w3.org/ns/activitystreams#Public",
        "as:Public",
        "Public",
        fred,
    ]
    .iter()
    .map(ToString::to_string)
    .collect();

    let inboxes = h.recipients.resolve(&recipients).await.unwrap();
    assert_eq!(inboxes.len(), 1);
    assert!(inboxes.contains("https://remote.example/users/fred/inbox"));
    // Sentinels never hit the network.
    assert!(h.transport.fetches().is_empty());
}

#[tokio::test]
async fn test_shared_inbox_dedup() {
    let h = harness();
    let shared = "https://remote.example/sharedInbox";
    register_remote(&h, "https://remote.example/users/fred", Some(shared)).await;
    register_remote(&h, "https://remote.example/users/barney", Some(shared)).await;

    let recipients: BTreeSet<String> = [
        "https://remote.example/users/fred",
        "https://remote.example/users/barney",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();

    let inboxes = h.recipients.resolve(&recipients).await.unwrap();
    assert_eq!(inboxes.len(), 1);
    assert!(inboxes.contains(shared));
}

#[tokio::test]
async fn test_resolution_is_idempotent() {
    let h = harness();
    let (alice, _) = local_actor("alice", false);
    let alice_id = alice.id.clone();
    h.actor_repo.put(alice).await.unwrap();
    let shared = "https://remote.example/sharedInbox";
    register_remote(&h, "https://remote.example/users/fred", Some(shared)).await;
    register_remote(&h, "https://elsewhere.example/users/barney", None).await;

    let recipients: BTreeSet<String> = [
        alice_id.as_str(),
        "https://remote.example/users/fred",
        "https://elsewhere.example/users/barney",
        "https://www.w3.org/ns/activitystreams#Public",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();

    let first = h.recipients.resolve(&recipients).await.unwrap();
    let second = h.recipients.resolve(&recipients).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_collection_expansion_is_one_level_deep() {
    let h = harness();
    let collection = "https://remote.example/groups/stonecutters/members";
    let nested = "https://remote.example/groups/inner-circle/members";
    let fred = "https://remote.example/users/fred";
    let barney = "https://remote.example/users/barney";
    let fred_key = generate_rsa_keypair().unwrap();
    let barney_key = generate_rsa_keypair().unwrap();

    h.transport.respond_with(
        collection,
        json!({
            "id": collection,
            "type": "OrderedCollection",
            "orderedItems": [fred, nested],
        }),
    );
    h.transport.respond_with(
        nested,
        json!({
            "id": nested,
            "type": "OrderedCollection",
            "orderedItems": [barney],
        }),
    );
    h.transport.respond_with(fred, person_doc(fred, &fred_key, None));
    h.transport
        .respond_with(barney, person_doc(barney, &barney_key, None));

    let recipients: BTreeSet<String> = [collection.to_string()].into_iter().collect();
    let inboxes = h.recipients.resolve(&recipients).await.unwrap();

    assert_eq!(inboxes.len(), 1);
    assert!(inboxes.contains("https://remote.example/users/fred/inbox"));
    // The nested collection's members are never reached.
    assert_eq!(h.transport.fetch_count(barney), 0);
}

#[tokio::test]
async fn test_collection_pagination_stops_at_bad_page() {
    let h = harness();
    let collection = "https://remote.example/groups/stonecutters/members";
    let fred = "https://remote.example/users/fred";
    let barney = "https://remote.example/users/barney";
    let wilma = "https://remote.example/users/wilma";
    let fred_key = generate_rsa_keypair().unwrap();
    let barney_key = generate_rsa_keypair().unwrap();

    h.transport.respond_with(
        collection,
        json!({
            "id": collection,
            "type": "OrderedCollection",
            "first": format!("{collection}?page=1"),
        }),
    );
    h.transport.respond_with(
        &format!("{collection}?page=1"),
        json!({
            "type": "OrderedCollectionPage",
            "partOf": collection,
            "orderedItems": [fred],
            "next": format!("{collection}?page=2"),
        }),
    );
    h.transport.respond_with(
        &format!("{collection}?page=2"),
        json!({
            "type": "OrderedCollectionPage",
            "partOf": collection,
            "orderedItems": [barney],
            "next": format!("{collection}?page=3"),
        }),
    );
    // Claims to belong to a different collection; pagination stops here.
    h.transport.respond_with(
        &format!("{collection}?page=3"),
        json!({
            "type": "OrderedCollectionPage",
            "partOf": "https://remote.example/groups/other/members",
            "orderedItems": [wilma],
        }),
    );
    h.transport.respond_with(fred, person_doc(fred, &fred_key, None));
    h.transport
        .respond_with(barney, person_doc(barney, &barney_key, None));

    let recipients: BTreeSet<String> = [collection.to_string()].into_iter().collect();
    let inboxes = h.recipients.resolve(&recipients).await.unwrap();

    assert_eq!(inboxes.len(), 2);
    assert!(inboxes.contains("https://remote.example/users/fred/inbox"));
    assert!(inboxes.contains("https://remote.example/users/barney/inbox"));
    assert_eq!(h.transport.fetch_count(wilma), 0);
}

// --- follow flow ---

#[tokio::test]
async fn test_follow_without_auto_accept_stays_pending() {
    let h = harness();
    let (alice, _) = local_actor("alice", false);
    let alice_id = alice.id.clone();
    h.actor_repo.put(alice).await.unwrap();
    let fred = "https://remote.example/users/fred";
    let fred_key = register_remote(&h, fred, None).await;

    let message = signed_message(
        fred,
        &fred_key,
        "/users/alice/inbox",
        json!({
            "id": "https://remote.example/act/follow-1",
            "type": "Follow",
            "actor": fred,
            "object": alice_id,
        }),
    );
    let id = message.id.clone();
    h.validator.receive(message).await.unwrap();
    assert_eq!(
        h.validator.validate(&id).await.unwrap(),
        ValidationOutcome::Accepted
    );

    let row = h
        .following_repo
        .find_by_pair(fred, &alice_id)
        .await
        .unwrap()
        .unwrap();
    assert!(row.pending);
    // No Accept goes out while the follow awaits review.
    assert!(h.jobs.take_deliveries().iter().all(|j| j.incoming));
}

#[tokio::test]
async fn test_follow_auto_accept_sends_accept_back() {
    let h = harness();
    let (bob, _) = local_actor("bob", true);
    let bob_id = bob.id.clone();
    h.actor_repo.put(bob).await.unwrap();
    let fred = "https://remote.example/users/fred";
    let fred_key = register_remote(&h, fred, None).await;

    let message = signed_message(
        fred,
        &fred_key,
        "/users/bob/inbox",
        json!({
            "id": "https://remote.example/act/follow-2",
            "type": "Follow",
            "actor": fred,
            "object": bob_id,
        }),
    );
    let id = message.id.clone();
    h.validator.receive(message).await.unwrap();
    assert_eq!(
        h.validator.validate(&id).await.unwrap(),
        ValidationOutcome::Accepted
    );

    let row = h
        .following_repo
        .find_by_pair(fred, &bob_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!row.pending);
    assert_eq!(
        h.collection_repo
            .members(&bob_id, CollectionKind::Followers)
            .await
            .unwrap(),
        vec![fred.to_string()]
    );

    // Run the enqueued outbound delivery of the synthesized Accept.
    let accept_job = h
        .jobs
        .take_deliveries()
        .into_iter()
        .find(|j| !j.incoming)
        .unwrap();
    h.dispatcher
        .deliver(&accept_job.activity_id, false)
        .await
        .unwrap();

    let deliveries = h.transport.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].inbox, format!("{fred}/inbox"));
    assert_eq!(
        deliveries[0].body.get("type").and_then(Value::as_str),
        Some("Accept")
    );
    // Outbound requests carry the followee's signature.
    assert!(
        deliveries[0]
            .headers
            .iter()
            .any(|(name, _)| name == "Signature")
    );
}

#[tokio::test]
async fn test_inbound_accept_flips_pending_follow() {
    let h = harness();
    let (alice, _) = local_actor("alice", false);
    let alice_id = alice.id.clone();
    h.actor_repo.put(alice).await.unwrap();
    let fred = "https://remote.example/users/fred";
    let fred_key = register_remote(&h, fred, None).await;

    h.following_repo.create(&alice_id, fred, true).await.unwrap();

    let accept = signed_message(
        fred,
        &fred_key,
        "/users/alice/inbox",
        json!({
            "id": "https://remote.example/act/accept-1",
            "type": "Accept",
            "actor": fred,
            "object": {
                "type": "Follow",
                "actor": alice_id,
                "object": fred,
            },
        }),
    );
    let id = accept.id.clone();
    h.validator.receive(accept).await.unwrap();
    assert_eq!(
        h.validator.validate(&id).await.unwrap(),
        ValidationOutcome::Accepted
    );

    let row = h
        .following_repo
        .find_by_pair(&alice_id, fred)
        .await
        .unwrap()
        .unwrap();
    assert!(!row.pending);
    assert_eq!(
        h.collection_repo
            .members(&alice_id, CollectionKind::Following)
            .await
            .unwrap(),
        vec![fred.to_string()]
    );
}

#[tokio::test]
async fn test_inbound_reject_removes_pending_follow() {
    let h = harness();
    let (alice, _) = local_actor("alice", false);
    let alice_id = alice.id.clone();
    h.actor_repo.put(alice).await.unwrap();
    let fred = "https://remote.example/users/fred";
    let fred_key = register_remote(&h, fred, None).await;

    h.following_repo.create(&alice_id, fred, true).await.unwrap();

    let reject = signed_message(
        fred,
        &fred_key,
        "/users/alice/inbox",
        json!({
            "id": "https://remote.example/act/reject-1",
            "type": "Reject",
            "actor": fred,
            "object": {
                "type": "Follow",
                "actor": alice_id,
                "object": fred,
            },
        }),
    );
    let id = reject.id.clone();
    h.validator.receive(reject).await.unwrap();
    assert_eq!(
        h.validator.validate(&id).await.unwrap(),
        ValidationOutcome::Accepted
    );

    assert!(
        h.following_repo
            .find_by_pair(&alice_id, fred)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_accept_guards_leave_follow_state_alone() {
    let h = harness();
    let (alice, _) = local_actor("alice", false);
    let alice_id = alice.id.clone();
    h.actor_repo.put(alice).await.unwrap();
    let fred = "https://remote.example/users/fred";
    let fred_key = register_remote(&h, fred, None).await;
    let barney = "https://elsewhere.example/users/barney";
    let barney_key = register_remote(&h, barney, None).await;

    h.following_repo.create(&alice_id, fred, true).await.unwrap();

    // Accept wrapping a Like mutates nothing.
    let accept_of_like = signed_message(
        fred,
        &fred_key,
        "/users/alice/inbox",
        json!({
            "id": "https://remote.example/act/accept-2",
            "type": "Accept",
            "actor": fred,
            "object": {
                "type": "Like",
                "actor": alice_id,
                "object": fred,
            },
        }),
    );
    let id = accept_of_like.id.clone();
    h.validator.receive(accept_of_like).await.unwrap();
    assert_eq!(
        h.validator.validate(&id).await.unwrap(),
        ValidationOutcome::Accepted
    );

    // Only the followee may accept; a third party's Accept is ignored.
    let accept_by_stranger = signed_message(
        barney,
        &barney_key,
        "/users/alice/inbox",
        json!({
            "id": "https://elsewhere.example/act/accept-3",
            "type": "Accept",
            "actor": barney,
            "object": {
                "type": "Follow",
                "actor": alice_id,
                "object": fred,
            },
        }),
    );
    let id = accept_by_stranger.id.clone();
    h.validator.receive(accept_by_stranger).await.unwrap();
    assert_eq!(
        h.validator.validate(&id).await.unwrap(),
        ValidationOutcome::Accepted
    );

    let row = h
        .following_repo
        .find_by_pair(&alice_id, fred)
        .await
        .unwrap()
        .unwrap();
    assert!(row.pending);
}

#[tokio::test]
async fn test_undo_follow_removes_relationship() {
    let h = harness();
    let (bob, _) = local_actor("bob", true);
    let bob_id = bob.id.clone();
    h.actor_repo.put(bob).await.unwrap();
    let fred = "https://remote.example/users/fred";
    let fred_key = register_remote(&h, fred, None).await;

    let follow = json!({
        "id": "https://remote.example/act/follow-3",
        "type": "Follow",
        "actor": fred,
        "object": bob_id,
    });
    let message = signed_message(fred, &fred_key, "/users/bob/inbox", follow.clone());
    let id = message.id.clone();
    h.validator.receive(message).await.unwrap();
    h.validator.validate(&id).await.unwrap();
    assert!(
        h.following_repo
            .find_by_pair(fred, &bob_id)
            .await
            .unwrap()
            .is_some()
    );

    let undo = signed_message(
        fred,
        &fred_key,
        "/users/bob/inbox",
        json!({
            "id": "https://remote.example/act/undo-1",
            "type": "Undo",
            "actor": fred,
            "object": follow,
        }),
    );
    let undo_id = undo.id.clone();
    h.validator.receive(undo).await.unwrap();
    assert_eq!(
        h.validator.validate(&undo_id).await.unwrap(),
        ValidationOutcome::Accepted
    );

    assert!(
        h.following_repo
            .find_by_pair(fred, &bob_id)
            .await
            .unwrap()
            .is_none()
    );
}

// --- delivery ---

#[tokio::test]
async fn test_delivery_excludes_sender_and_splits_local_remote() {
    let h = harness();
    let (alice, _) = local_actor("alice", false);
    let (bob, _) = local_actor("bob", false);
    let alice_id = alice.id.clone();
    let bob_id = bob.id.clone();
    h.actor_repo.put(alice).await.unwrap();
    h.actor_repo.put(bob).await.unwrap();
    let fred = "https://remote.example/users/fred";
    let shared = "https://remote.example/sharedInbox";
    register_remote(&h, fred, Some(shared)).await;

    let activity_id = format!("{BASE}activities/{}", h.id_gen.generate());
    let doc = json!({
        "id": activity_id,
        "type": "Create",
        "actor": alice_id,
        "object": {
            "id": format!("{BASE}notes/1"),
            "type": "Note",
            "content": "hello",
            "attributedTo": alice_id,
        },
        // The sender addresses itself too; that never produces a delivery.
        "to": [fred, bob_id, alice_id],
    });
    h.activity_repo
        .insert(postbox_store::Activity::from_document(&doc).unwrap())
        .await
        .unwrap();

    h.dispatcher.deliver(&activity_id, false).await.unwrap();

    // Exactly one remote POST, to fred's shared inbox.
    assert_eq!(h.transport.delivered_inboxes(), vec![shared.to_string()]);
    // Bob got a local inbox append; alice did not.
    assert_eq!(
        h.collection_repo
            .members(&bob_id, CollectionKind::Inbox)
            .await
            .unwrap(),
        vec![activity_id.clone()]
    );
    assert!(
        h.collection_repo
            .members(&alice_id, CollectionKind::Inbox)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_wire_body_has_no_blind_fields() {
    let h = harness();
    let (alice, _) = local_actor("alice", false);
    let alice_id = alice.id.clone();
    h.actor_repo.put(alice).await.unwrap();
    let fred = "https://remote.example/users/fred";
    register_remote(&h, fred, None).await;

    let activity_id = format!("{BASE}activities/{}", h.id_gen.generate());
    let doc = json!({
        "id": activity_id,
        "type": "Like",
        "actor": alice_id,
        "object": "https://remote.example/notes/9",
        "to": [fred],
        "bcc": ["https://other.example/users/hidden"],
    });
    h.activity_repo
        .insert(postbox_store::Activity::from_document(&doc).unwrap())
        .await
        .unwrap();

    h.dispatcher.deliver(&activity_id, false).await.unwrap();

    let deliveries = h.transport.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].body.get("bcc").is_none());
    assert!(deliveries[0].body.get("to").is_some());
}

// --- object side effects ---

#[tokio::test]
async fn test_create_materializes_object() {
    let h = harness();
    let fred = "https://remote.example/users/fred";
    let fred_key = register_remote(&h, fred, None).await;

    let note_id = "https://remote.example/notes/42";
    let message = signed_message(
        fred,
        &fred_key,
        "/sharedInbox",
        json!({
            "id": "https://remote.example/act/create-1",
            "type": "Create",
            "actor": fred,
            "object": {
                "id": note_id,
                "type": "Note",
                "content": "hi there",
                "attributedTo": fred,
            },
        }),
    );
    let id = message.id.clone();
    h.validator.receive(message).await.unwrap();
    assert_eq!(
        h.validator.validate(&id).await.unwrap(),
        ValidationOutcome::Accepted
    );

    let object = h.object_repo.find_by_id(note_id).await.unwrap().unwrap();
    assert_eq!(object.kind, "Note");
    assert_eq!(object.attributed_to.as_deref(), Some(fred));

    // The stored activity now references the object by id.
    let activity = h
        .activity_repo
        .get("https://remote.example/act/create-1")
        .await
        .unwrap();
    assert_eq!(activity.object_id().as_deref(), Some(note_id));
}

#[tokio::test]
async fn test_delete_leaves_tombstone() {
    let h = harness();
    let fred = "https://remote.example/users/fred";
    let fred_key = register_remote(&h, fred, None).await;

    let note_id = "https://remote.example/notes/43";
    let create = signed_message(
        fred,
        &fred_key,
        "/sharedInbox",
        json!({
            "id": "https://remote.example/act/create-2",
            "type": "Create",
            "actor": fred,
            "object": {"id": note_id, "type": "Note", "content": "soon gone", "attributedTo": fred},
        }),
    );
    let create_msg_id = create.id.clone();
    h.validator.receive(create).await.unwrap();
    h.validator.validate(&create_msg_id).await.unwrap();

    let delete = signed_message(
        fred,
        &fred_key,
        "/sharedInbox",
        json!({
            "id": "https://remote.example/act/delete-1",
            "type": "Delete",
            "actor": fred,
            "object": note_id,
        }),
    );
    let delete_msg_id = delete.id.clone();
    h.validator.receive(delete).await.unwrap();
    assert_eq!(
        h.validator.validate(&delete_msg_id).await.unwrap(),
        ValidationOutcome::Accepted
    );

    let object = h.object_repo.find_by_id(note_id).await.unwrap().unwrap();
    assert_eq!(object.kind, "Tombstone");
}
