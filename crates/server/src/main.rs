//! postbox server entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::Utc;
use postbox_common::{Config, generate_rsa_keypair};
use postbox_federation::client::{ApClient, ApTransport};
use postbox_federation::handler;
use postbox_queue::Pipeline;
use postbox_store::{Actor, ActorRepository, MemoryStore};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Create the actors named in `server.local_users`, generating a keypair
/// for each. Existing actors are left untouched.
async fn bootstrap_local_users(
    config: &Config,
    base_url: &Url,
    actor_repo: &ActorRepository,
) -> Result<(), Box<dyn std::error::Error>> {
    for name in &config.server.local_users {
        if actor_repo.find_local_by_name(name).await?.is_some() {
            continue;
        }
        let keypair = generate_rsa_keypair()?;
        let id = base_url.join(&format!("users/{name}"))?.to_string();
        actor_repo
            .put(Actor {
                inbox: format!("{id}/inbox"),
                id,
                local: true,
                preferred_username: Some(name.clone()),
                shared_inbox: Some(base_url.join("sharedInbox")?.to_string()),
                public_key_pem: Some(keypair.public_key_pem),
                private_key_pem: Some(keypair.private_key_pem),
                auto_accept_followers: true,
                created_at: Utc::now(),
            })
            .await?;
        info!(user = %name, "Created local user");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postbox=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting postbox server...");

    let config = Config::load()?;
    let base_url = Url::parse(&config.server.url)?;

    let store = Arc::new(MemoryStore::new());
    let actor_repo = ActorRepository::new(store.clone());
    bootstrap_local_users(&config, &base_url, &actor_repo).await?;

    let transport: Arc<dyn ApTransport> = Arc::new(ApClient::new(
        &config.server.url,
        Duration::from_secs(config.federation.fetch_timeout_secs),
        Duration::from_secs(config.federation.delivery_timeout_secs),
    ));

    let pipeline = Pipeline::start(&config, store, transport)?;

    let app = if config.federation.enabled {
        handler::routes(pipeline.state.clone())
    } else {
        info!("Federation is disabled; serving no federation routes");
        Router::new()
    }
    .layer(TraceLayer::new_for_http())
    .layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(addr = %addr, url = %base_url, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}
