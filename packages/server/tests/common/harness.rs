//! Test harness with testcontainers for PostgreSQL store tests.
//!
//! One container is started for the whole test binary; every test gets its
//! own freshly migrated database inside it.

use anyhow::{Context, Result};
use channel_crawler::PostgresGraphStore;
use sqlx::PgPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container that persists across all tests in the binary.
struct SharedTestInfra {
    base_url: String,
    admin_pool: PgPool,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();
static NEXT_DATABASE: AtomicUsize = AtomicUsize::new(0);

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --ignored --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let base_url = format!("postgresql://postgres:postgres@{}:{}", host, port);

        let admin_pool = PgPool::connect(&format!("{}/postgres", base_url))
            .await
            .context("Failed to connect to Postgres")?;

        Ok(Self {
            base_url,
            admin_pool,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// A migrated store on a database private to one test.
pub struct TestHarness {
    pub store: Arc<PostgresGraphStore>,
    pub db_pool: PgPool,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;

        let name = format!(
            "graph_test_{}_{}",
            std::process::id(),
            NEXT_DATABASE.fetch_add(1, Ordering::SeqCst)
        );
        sqlx::query(&format!("CREATE DATABASE {}", name))
            .execute(&infra.admin_pool)
            .await
            .with_context(|| format!("Failed to create database {}", name))?;

        let store = PostgresGraphStore::connect(&format!("{}/{}", infra.base_url, name))
            .await
            .context("Failed to open test store")?;
        let db_pool = store.pool().clone();

        Ok(Self {
            store: Arc::new(store),
            db_pool,
        })
    }
}
