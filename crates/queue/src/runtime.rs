//! Pipeline assembly.
//!
//! Wires the repositories, resolver, side-effect engine, validator, and
//! dispatcher together over the channel queues, and spawns the worker pools.

use std::sync::Arc;

use postbox_common::{AppError, AppResult, Config, IdGenerator};
use postbox_federation::client::ApTransport;
use postbox_federation::delivery::DeliveryDispatcher;
use postbox_federation::handler::FederationState;
use postbox_federation::jobs::JobQueue;
use postbox_federation::keys::KeyResolver;
use postbox_federation::processor::{
    AcceptProcessor, CreateProcessor, DeleteProcessor, FollowProcessor, LikeProcessor,
    RejectProcessor, SideEffectEngine, UndoProcessor, UpdateProcessor,
};
use postbox_federation::recipients::RecipientResolver;
use postbox_federation::validation::InboxValidator;
use postbox_store::{
    ActivityKind, ActivityRepository, ActorLocks, ActorRepository, CollectionRepository,
    FollowingRepository, KeyCacheRepository, MemoryStore, ObjectRepository, QuarantineRepository,
};
use tracing::info;
use url::Url;

use crate::queue_impl::ChannelJobQueue;
use crate::retry::RetryConfig;
use crate::workers::{
    DeliverContext, FetchContext, ValidateContext, deliver_worker, fetch_worker, validate_worker,
};

/// The running pipeline: handler state plus the queues feeding the workers.
pub struct Pipeline {
    /// State for the federation HTTP surface.
    pub state: FederationState,
    /// The queues, for shutdown and for tests that drive workers directly.
    pub jobs: Arc<ChannelJobQueue>,
}

impl Pipeline {
    /// Assemble the pipeline and spawn the worker pools sized by
    /// `config.queue`. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when the instance URL does not parse.
    pub fn start(
        config: &Config,
        store: Arc<MemoryStore>,
        transport: Arc<dyn ApTransport>,
    ) -> AppResult<Self> {
        let base_url = Url::parse(&config.server.url)
            .map_err(|e| AppError::Config(format!("Bad instance URL {}: {e}", config.server.url)))?;

        let actor_repo = ActorRepository::new(store.clone());
        let activity_repo = ActivityRepository::new(store.clone());
        let following_repo = FollowingRepository::new(store.clone());
        let collection_repo = CollectionRepository::new(store.clone());
        let object_repo = ObjectRepository::new(store.clone());
        let quarantine = QuarantineRepository::new(store.clone());
        let key_cache = KeyCacheRepository::new(store);

        let jobs = Arc::new(ChannelJobQueue::new(config.queue.capacity));
        let jobs_dyn: Arc<dyn JobQueue> = jobs.clone();

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
                    Arc::new(DeleteProcessor::new(object_repo)),
                ),
        );

        let validator = Arc::new(InboxValidator::new(
            quarantine,
            activity_repo.clone(),
            actor_repo.clone(),
            key_cache,
            resolver.clone(),
            engine,
            jobs_dyn,
        ));

        let recipients = Arc::new(RecipientResolver::new(
            actor_repo.clone(),
            following_repo,
            transport.clone(),
            base_url.clone(),
        ));
        let dispatcher = Arc::new(DeliveryDispatcher::new(
            activity_repo,
            actor_repo.clone(),
            collection_repo.clone(),
            recipients,
            transport.clone(),
            base_url.clone(),
        ));

        let retry = RetryConfig {
            max_retries: config.federation.fetch_max_retries,
            ..RetryConfig::default()
        };

        for _ in 0..config.queue.validate_workers {
            tokio::spawn(validate_worker(
                jobs.validate_queue(),
                ValidateContext {
                    validator: validator.clone(),
                },
            ));
        }
        for _ in 0..config.queue.fetch_workers {
            tokio::spawn(fetch_worker(
                jobs.fetch_queue(),
                FetchContext {
                    transport: transport.clone(),
                    resolver: resolver.clone(),
                    validator: validator.clone(),
                    retry: retry.clone(),
                },
            ));
        }
        for _ in 0..config.queue.deliver_workers {
            tokio::spawn(deliver_worker(
                jobs.deliver_queue(),
                DeliverContext {
                    dispatcher: dispatcher.clone(),
                },
            ));
        }

        info!(
            validate = config.queue.validate_workers,
            fetch = config.queue.fetch_workers,
            deliver = config.queue.deliver_workers,
            "Pipeline workers started"
        );

        Ok(Self {
            state: FederationState {
                validator,
                resolver,
                actor_repo,
                collection_repo,
                id_gen: IdGenerator::new(),
                base_url,
            },
            jobs,
        })
    }
}
