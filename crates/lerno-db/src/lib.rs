//! # lerno-db
//!
//! PostgreSQL persistence layer for the lerno task pipeline: the queue
//! transport, the job history store, and the catalog/billing/chat
//! repositories the job handlers and the dedup engine read and write.

pub mod billing;
pub mod catalog;
pub mod chat;
pub mod history;
pub mod pool;
pub mod queue;

pub use billing::PgBillingRepository;
pub use catalog::PgCatalogRepository;
pub use chat::PgChatRepository;
pub use history::PgJobHistoryStore;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use queue::PgJobTransport;

use lerno_core::Result;
use sqlx::PgPool;

/// Facade bundling every repository over one connection pool.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: PgPool,
    /// Queue transport for background jobs.
    pub transport: PgJobTransport,
    /// Durable job history store.
    pub history: PgJobHistoryStore,
    /// Catalog content and embeddings.
    pub catalog: PgCatalogRepository,
    /// Payment-provider customer mapping.
    pub billing: PgBillingRepository,
    /// AI conversation persistence.
    pub chat: PgChatRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            transport: PgJobTransport::new(pool.clone()),
            history: PgJobHistoryStore::new(pool.clone()),
            catalog: PgCatalogRepository::new(pool.clone()),
            billing: PgBillingRepository::new(pool.clone()),
            chat: PgChatRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect with default pool configuration.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| lerno_core::Error::Config(format!("migration failed: {e}")))?;
        Ok(())
    }
}
