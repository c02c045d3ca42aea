//! Graph store selection.

use anyhow::{Context, Result};
use channel_crawler::{GraphCatalog, MemoryGraphStore, PostgresGraphStore};
use sqlx::PgPool;
use std::sync::Arc;

use crate::config::{Config, StoreKind};

/// The configured store plus its pool, when database-backed.
#[derive(Clone)]
pub struct StoreHandle {
    pub store: Arc<dyn GraphCatalog>,
    pub db_pool: Option<PgPool>,
}

impl StoreHandle {
    pub fn memory() -> Self {
        Self {
            store: Arc::new(MemoryGraphStore::new()),
            db_pool: None,
        }
    }
}

/// Open the store named by `GRAPH_STORE`, running migrations for PostgreSQL.
pub async fn connect_store(config: &Config) -> Result<StoreHandle> {
    match config.graph_store {
        StoreKind::Memory => {
            tracing::warn!("Using in-memory graph store; the graph is lost on exit");
            Ok(StoreHandle::memory())
        }
        StoreKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set")?;

            tracing::info!("Connecting to database...");
            let store = PostgresGraphStore::connect(url)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Database connected, schema ready");

            let pool = store.pool().clone();
            Ok(StoreHandle {
                store: Arc::new(store),
                db_pool: Some(pool),
            })
        }
    }
}
