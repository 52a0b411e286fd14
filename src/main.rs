use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use support_access_broker::app::{self, AppState};
use support_access_broker::broker::{spawn_reaper, Broker};
use support_access_broker::clock::SystemClock;
use support_access_broker::config::{self, StoreBackend};
use support_access_broker::database::DatabaseManager;
use support_access_broker::directory::{AccountDirectory, PgDirectory, StaticDirectory};
use support_access_broker::notify::StateHub;
use support_access_broker::store::{ElevationStore, MemoryStore, PgStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::config();
    tracing::info!("Starting support access broker in {:?} mode", config.environment);

    if config.security.jwt_secret.is_empty() {
        anyhow::bail!("JWT_SECRET must be set");
    }
    if support_access_broker::is_production!() && config.store == StoreBackend::Memory {
        anyhow::bail!("the in-memory store is not allowed in production");
    }

    let (store, directory): (Arc<dyn ElevationStore>, Arc<dyn AccountDirectory>) = match config.store {
        StoreBackend::Postgres => {
            let db = DatabaseManager::connect(&config.database)
                .await
                .context("failed to connect to the database")?;
            (Arc::new(PgStore::new(db.pool())), Arc::new(PgDirectory::new(db.pool())))
        }
        StoreBackend::Memory => {
            let seed = std::env::var("MEMORY_ACCOUNTS").unwrap_or_default();
            let directory = StaticDirectory::from_seed(&seed)
                .map_err(|e| anyhow::anyhow!("invalid MEMORY_ACCOUNTS: {}", e))?;
            tracing::warn!(
                "Using the in-memory store with {} seeded account(s); state is lost on restart",
                directory.len()
            );
            (Arc::new(MemoryStore::new()), Arc::new(directory))
        }
    };

    let broker = Broker::new(
        store,
        directory.clone(),
        Arc::new(SystemClock),
        StateHub::default(),
        config.elevation.clone(),
    );
    let reaper = spawn_reaper(broker.clone(), config.elevation.sweep_interval());

    let state = AppState::new(broker.clone(), directory, &config.security.jwt_secret);
    let app = app::app(state, config);

    let bind_addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Support access broker listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    reaper.abort();
    broker.shutdown();
    tracing::info!("Support access broker stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
