use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub mod memory;
pub mod postgres;
pub mod repository;
pub mod schema;

pub use memory::InMemoryMarketStore;
pub use postgres::PgMarketStore;

use repository::{
    DeviceRepository, OrderRepository, PricingAuditSink, QualityRepository, SettlementStore,
    TradeRepository, YieldRepository,
};

pub type DatabasePool = Pool<Postgres>;

/// Every storage capability the services consume, all backed by one store.
#[derive(Clone)]
pub struct MarketStores {
    pub orders: Arc<dyn OrderRepository>,
    pub trades: Arc<dyn TradeRepository>,
    pub settlement: Arc<dyn SettlementStore>,
    pub devices: Arc<dyn DeviceRepository>,
    pub quality: Arc<dyn QualityRepository>,
    pub audit: Arc<dyn PricingAuditSink>,
    pub yields: Arc<dyn YieldRepository>,
}

impl MarketStores {
    pub fn from_store<S>(store: S) -> Self
    where
        S: OrderRepository
            + TradeRepository
            + SettlementStore
            + DeviceRepository
            + QualityRepository
            + PricingAuditSink
            + YieldRepository
            + Clone
            + 'static,
    {
        Self {
            orders: Arc::new(store.clone()),
            trades: Arc::new(store.clone()),
            settlement: Arc::new(store.clone()),
            devices: Arc::new(store.clone()),
            quality: Arc::new(store.clone()),
            audit: Arc::new(store.clone()),
            yields: Arc::new(store),
        }
    }
}

pub async fn setup_database(database_url: &str, max_connections: u32) -> Result<DatabasePool> {
    info!("Connecting to database (max connections: {})", max_connections);

    if !(database_url.contains("sslmode=require")
        || database_url.contains("sslmode=verify-ca")
        || database_url.contains("sslmode=verify-full"))
    {
        warn!("Database connection does not enforce SSL. Consider adding sslmode=require to connection string");
    }

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(3))
        .idle_timeout(Duration::from_secs(180))
        .max_lifetime(Duration::from_secs(900))
        .test_before_acquire(true)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("SET timezone = 'UTC'").execute(&mut *conn).await?;
                // Settlement transactions touch two rows; anything longer is stuck.
                sqlx::query("SET lock_timeout = '5s'").execute(&mut *conn).await?;
                sqlx::query("SET idle_in_transaction_session_timeout = '10s'")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await?;

    let start_time = std::time::Instant::now();
    sqlx::query("SELECT 1").execute(&pool).await?;
    info!("✅ Database connection established in {:?}", start_time.elapsed());

    Ok(pool)
}

pub async fn run_migrations(pool: &DatabasePool) -> Result<()> {
    info!("Running database migrations");

    sqlx::migrate!("./migrations").run(pool).await?;

    info!("Database migrations completed successfully");
    Ok(())
}
