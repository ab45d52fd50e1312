//! Beacon Server - config propagation endpoint.
//!
//! Hosts a config router behind the HTTP peer interface, persists accepted
//! mutations to an append-only file, and reconciles with configured peers
//! through anti-entropy pollers.

use beacon_engine::TypeRegistry;
use beacon_server::ServerConfig as Config;
use beacon_server::{AofDb, AppState, ClientRegistry, ConfigDb, Handler, NullDb, Poller, Router};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Beacon Server on {}:{}", config.host, config.port);

    // Payload types accepted by this endpoint. Registered as raw JSON; a
    // library consumer would register concrete payload structs instead.
    let mut registry = TypeRegistry::new();
    for name in &config.payload_types {
        registry.register::<serde_json::Value>(name.clone());
    }
    let registry = Arc::new(registry);

    // Open the database and seed the router with its contents.
    let db: Arc<dyn ConfigDb> = match &config.aof_path {
        Some(path) => {
            tracing::info!("Loading append-only file {path}");
            Arc::new(AofDb::open(path)?)
        }
        None => Arc::new(NullDb),
    };

    let loaded = db.load()?;
    if loaded.corrupted {
        tracing::warn!("Append-only file contained corrupted entries; continuing with the rest");
    }
    tracing::info!("Seeding router with {} records", loaded.store.len());

    let db_handler: Arc<dyn Handler> = db.clone() as Arc<dyn Handler>;
    let router = Router::builder()
        .store(loaded.store)
        .handler(db_handler)
        .spawn();

    // Anti-entropy against every configured peer.
    let clients = ClientRegistry::new();
    let mut pollers = Vec::new();
    for peer in &config.peers {
        tracing::info!("Polling peer {peer}");
        let remote = clients.open(peer)?;

        let poller = Poller::builder()
            .local(Arc::new(router.clone()))
            .remote(remote)
            .push(config.poll_push)
            .pull(config.poll_pull)
            .rate(config.poll_rate)
            .build();
        poller.start();
        pollers.push(poller);
    }

    // Build the HTTP surface
    let state = AppState {
        router: router.clone(),
        registry,
    };

    let app = beacon_server::routes::create_routes()
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
