//! Shared application state

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use crate::changelog::ChangeLogRecorder;
use crate::config::Config;
use crate::pog::PogService;
use crate::shelf::{EngineConfig, ShelfEngine};
use crate::store::Store;
use crate::store::pg::PgStore;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Handler state, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub engine: Arc<ShelfEngine>,
    pub pog: PogService,
}

impl AppState {
    /// Connect to PostgreSQL, run migrations and wire the services.
    pub async fn new(config: &Config) -> Result<Self, BoxError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(&config.database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database connected and migrations applied");

        let store: Arc<dyn Store> = Arc::new(PgStore::new(pool, config.shelf_lock_timeout));
        Ok(Self::with_store(store, EngineConfig::from(config)))
    }

    /// Wire the services over an existing store.
    pub fn with_store(store: Arc<dyn Store>, engine_config: EngineConfig) -> Self {
        let engine = Arc::new(ShelfEngine::new(store.clone(), engine_config));
        let pog = PogService::new(store.clone(), engine.clone());
        Self { store, engine, pog }
    }

    pub fn recorder(&self) -> &ChangeLogRecorder {
        self.engine.recorder()
    }
}
