//! Postgres adapter tests.
//!
//! These need a running Postgres with the migrations applied; set
//! DATABASE_URL and run with `cargo test -- --ignored`.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sqlx::migrate::Migrator;
use sqlx::PgPool;

use ledger_core::adapters::PgLedgerStore;
use ledger_core::domain::TransactionStatus;
use ledger_core::ports::{Clock, CredentialVerifier, LedgerStore, SystemClock};
use ledger_core::services::{AccountService, TransferService};

struct PlainVerifier;

impl CredentialVerifier for PlainVerifier {
    fn hash(&self, secret: &str) -> String {
        format!("hashed:{secret}")
    }

    fn verify(&self, secret: &str, stored_hash: &str) -> bool {
        stored_hash == format!("hashed:{secret}")
    }
}

async fn setup() -> (Arc<dyn LedgerStore>, AccountService, Arc<TransferService>) {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");
    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to test DB");
    let migrator = Migrator::new(Path::new("./migrations"))
        .await
        .expect("Failed to load migrations");
    migrator
        .run(&pool)
        .await
        .expect("Failed to run migrations on test DB");

    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let accounts = AccountService::new(store.clone(), Arc::new(PlainVerifier), clock.clone());
    let transfers = Arc::new(TransferService::new(store.clone(), clock));
    (store, accounts, transfers)
}

#[tokio::test]
#[ignore] // needs a running Postgres
async fn account_round_trips_through_the_row_mapping() {
    let (store, accounts, _) = setup().await;

    let owner = Utc::now().timestamp_micros();
    let created = accounts
        .create_account(owner, "integration checking", 5_000, Some(1_000), "pw")
        .await
        .unwrap();
    assert!(created.account_number.starts_with("1234-"));

    // created_at is not compared: timestamptz truncates to microseconds
    let fetched = store.get_account(created.id).await.unwrap().unwrap();
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.account_number, created.account_number);
    assert_eq!(fetched.balance, 5_000);
    assert_eq!(fetched.transfer_limit, Some(1_000));
    assert_eq!(fetched.status, created.status);

    let by_number = store
        .find_account_by_number(&created.account_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_number.id, created.id);
}

#[tokio::test]
#[ignore] // needs a running Postgres
async fn transfer_commits_debit_credit_and_record_together() {
    let (store, accounts, transfers) = setup().await;

    let owner = Utc::now().timestamp_micros();
    let a = accounts
        .create_account(owner, "sender", 10_000, None, "pw")
        .await
        .unwrap();
    let b = accounts
        .create_account(owner + 1, "recipient", 0, None, "pw")
        .await
        .unwrap();

    let receipt = transfers
        .execute_immediate_transfer(a.id, &b.account_number, 4_000, None, owner)
        .await
        .unwrap();
    assert_eq!(receipt.balance_after, 6_000);

    assert_eq!(store.get_account(a.id).await.unwrap().unwrap().balance, 6_000);
    assert_eq!(store.get_account(b.id).await.unwrap().unwrap().balance, 4_000);
    let record = store
        .get_transaction(receipt.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, TransactionStatus::Completed);
}

#[tokio::test]
#[ignore] // needs a running Postgres
async fn row_locks_serialize_concurrent_debits() {
    let (store, accounts, transfers) = setup().await;

    let owner = Utc::now().timestamp_micros();
    let a = accounts
        .create_account(owner, "sender", 5_000, None, "pw")
        .await
        .unwrap();
    let b = accounts
        .create_account(owner + 1, "recipient", 0, None, "pw")
        .await
        .unwrap();

    let t1 = tokio::spawn({
        let transfers = transfers.clone();
        let number = b.account_number.clone();
        async move {
            transfers
                .execute_immediate_transfer(a.id, &number, 3_000, None, owner)
                .await
        }
    });
    let t2 = tokio::spawn({
        let transfers = transfers.clone();
        let number = b.account_number.clone();
        async move {
            transfers
                .execute_immediate_transfer(a.id, &number, 3_000, None, owner)
                .await
        }
    });

    let results = [t1.await.unwrap(), t2.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(store.get_account(a.id).await.unwrap().unwrap().balance, 2_000);
    assert_eq!(store.get_account(b.id).await.unwrap().unwrap().balance, 3_000);
}
