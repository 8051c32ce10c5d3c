use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    /// Seconds between settlement scheduler ticks.
    pub scheduler_poll_secs: u64,
    /// Maximum due scheduled transfers settled per tick.
    pub scheduler_batch_size: i64,
    /// Days past the schedule date after which an unfunded scheduled
    /// transfer is dead-lettered instead of retried.
    pub settlement_expiry_days: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            scheduler_poll_secs: env::var("SCHEDULER_POLL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            scheduler_batch_size: env::var("SCHEDULER_BATCH_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            settlement_expiry_days: env::var("SETTLEMENT_EXPIRY_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()?,
        })
    }
}
