//! Settlement scheduler.
//!
//! Polls for due scheduled transfers and hands each to the transfer
//! engine's settlement path. Safe under concurrent instances: the engine
//! checks the SCHEDULED status under the row lock and flips it atomically
//! with the balance change, so a second visit to the same id is a no-op.

use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use crate::error::LedgerResult;
use crate::ports::{Clock, LedgerStore};
use crate::services::transfer::{SettleOutcome, TransferService};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub settled: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub skipped: u64,
    pub errors: u64,
}

pub struct Scheduler {
    store: Arc<dyn LedgerStore>,
    transfers: Arc<TransferService>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    batch_size: i64,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        transfers: Arc<TransferService>,
        clock: Arc<dyn Clock>,
        poll_secs: u64,
        batch_size: i64,
    ) -> Self {
        Self {
            store,
            transfers,
            clock,
            poll_interval: Duration::from_secs(poll_secs),
            batch_size,
        }
    }

    /// Run the settlement loop forever. Tick failures are logged and the
    /// loop continues; a scheduled transfer missed on one tick is simply
    /// picked up on the next.
    pub async fn run(&self) {
        info!(
            poll_secs = self.poll_interval.as_secs(),
            batch_size = self.batch_size,
            "settlement scheduler started"
        );
        loop {
            if let Err(e) = self.tick().await {
                error!("scheduler tick failed: {e}");
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Settle one batch of due scheduled transfers.
    pub async fn tick(&self) -> LedgerResult<TickStats> {
        let now = self.clock.now();
        let due = self.store.find_due_scheduled(now, self.batch_size).await?;
        let mut stats = TickStats::default();
        if due.is_empty() {
            return Ok(stats);
        }
        debug!("settling {} due scheduled transfer(s)", due.len());

        for id in due {
            match self.transfers.settle_scheduled(id).await {
                Ok(SettleOutcome::Settled) => stats.settled += 1,
                Ok(SettleOutcome::Retry) => stats.retried += 1,
                Ok(SettleOutcome::DeadLettered) => stats.dead_lettered += 1,
                Ok(SettleOutcome::AlreadyFinal) => stats.skipped += 1,
                Err(e) => {
                    error!(transaction_id = id, "settlement failed: {e}");
                    stats.errors += 1;
                }
            }
        }

        info!(
            settled = stats.settled,
            retried = stats.retried,
            dead_lettered = stats.dead_lettered,
            skipped = stats.skipped,
            errors = stats.errors,
            "settlement tick finished"
        );
        Ok(stats)
    }
}
