use std::path::Path;
use std::sync::Arc;

use sqlx::migrate::Migrator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ledger_core::adapters::PgLedgerStore;
use ledger_core::config::Config;
use ledger_core::ports::{Clock, LedgerStore, SystemClock};
use ledger_core::services::{Scheduler, TransferService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Setup logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Database pool
    let pool = ledger_core::db::create_pool(&config).await?;

    // Run migrations
    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let transfers = Arc::new(
        TransferService::new(store.clone(), clock.clone())
            .with_settlement_expiry_days(config.settlement_expiry_days),
    );

    let scheduler = Scheduler::new(
        store,
        transfers,
        clock,
        config.scheduler_poll_secs,
        config.scheduler_batch_size,
    );
    scheduler.run().await;

    Ok(())
}
