use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shop_backend::config::{Config, StoreBackend};
use shop_backend::store::{MemoryOrderStore, OrderStore, PgOrderStore};
use shop_backend::{router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shop_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    let store: Arc<dyn OrderStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or("DATABASE_URL must be set for the postgres store")?;

            tracing::info!("Connecting to database...");
            let db = Database::connect(database_url).await?;

            if config.run_migrations {
                tracing::info!("Running migrations...");
                migration::Migrator::up(&db, None).await?;
            }

            Arc::new(PgOrderStore::new(db))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, nothing will survive a restart");
            Arc::new(MemoryOrderStore::new())
        }
    };

    let (state, worker) = AppState::new(store, &config);
    tokio::spawn(worker.run());

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
