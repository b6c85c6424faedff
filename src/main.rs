use std::net::SocketAddr;
use std::sync::Arc;

use mongodb::Client;
use tracing_subscriber::EnvFilter;

use daytrader::{
    config::{self, StorageBackend},
    routes,
    services::{
        db_init, mongo_store::{MongoEventStore, MongoLedgerStore}, EventStore, InMemoryEventStore,
        InMemoryLedgerStore, LedgerStore, TcpQuoteClient,
    },
    AppState,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = config::load();

    let (store, events): (Arc<dyn LedgerStore>, Arc<dyn EventStore>) = match settings.storage {
        StorageBackend::Mongo => {
            let client = Client::with_uri_str(&settings.mongodb_uri)
                .await
                .expect("Failed to connect to MongoDB");
            let db = client.database(&settings.mongodb_db);
            db_init::ensure_indexes(&db)
                .await
                .expect("Failed to create MongoDB indexes");
            (
                Arc::new(MongoLedgerStore::new(&db)),
                Arc::new(MongoEventStore::new(&db)),
            )
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory ledger, nothing survives a restart");
            (
                Arc::new(InMemoryLedgerStore::new()),
                Arc::new(InMemoryEventStore::new()),
            )
        }
    };

    let quotes = Arc::new(TcpQuoteClient::new(
        settings.quote_server_addr.clone(),
        settings.quote_max_attempts,
        settings.quote_retry_delay,
    ));

    let state = AppState::new(settings.clone(), store, events, quotes);
    let _pollers = state.spawn_pollers();

    let app = routes::app(state);

    let addr = SocketAddr::from((
        settings
            .host
            .parse::<std::net::IpAddr>()
            .expect("HOST must be an IP address"),
        settings.port,
    ));
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.expect("bind failed");
    axum::serve(listener, app).await.expect("server error");
}
