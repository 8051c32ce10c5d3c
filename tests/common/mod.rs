//! Shared harness for integration tests: in-memory store, fixed clock,
//! plaintext-tagging credential verifier.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};

use ledger_core::adapters::MemoryLedgerStore;
use ledger_core::domain::{Account, AccountStatus};
use ledger_core::ports::{Clock, CredentialVerifier, LedgerStore};
use ledger_core::services::{AccountService, TransferService};

pub const SECRET: &str = "pw-1234";

#[derive(Clone)]
pub struct TestClock(Arc<Mutex<DateTime<Utc>>>);

impl TestClock {
    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

pub struct PlainVerifier;

impl CredentialVerifier for PlainVerifier {
    fn hash(&self, secret: &str) -> String {
        format!("hashed:{secret}")
    }

    fn verify(&self, secret: &str, stored_hash: &str) -> bool {
        stored_hash == format!("hashed:{secret}")
    }
}

pub struct Harness {
    pub store: Arc<dyn LedgerStore>,
    pub clock: TestClock,
    pub accounts: AccountService,
    pub transfers: Arc<TransferService>,
}

pub fn harness() -> Harness {
    let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::new());
    let clock = TestClock(Arc::new(Mutex::new(
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(),
    )));
    let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
    let accounts = AccountService::new(store.clone(), Arc::new(PlainVerifier), clock_arc.clone());
    let transfers = Arc::new(TransferService::new(store.clone(), clock_arc));
    Harness {
        store,
        clock,
        accounts,
        transfers,
    }
}

pub async fn open_account(
    h: &Harness,
    owner_id: i64,
    name: &str,
    balance: i64,
    limit: Option<i64>,
) -> Account {
    h.accounts
        .create_account(owner_id, name, balance, limit, SECRET)
        .await
        .unwrap()
}

pub async fn balance_of(h: &Harness, account_id: i64) -> i64 {
    h.store
        .get_account(account_id)
        .await
        .unwrap()
        .unwrap()
        .balance
}

pub async fn set_status(h: &Harness, account_id: i64, status: AccountStatus) {
    let mut uow = h.store.begin().await.unwrap();
    let mut account = uow.account_for_update(account_id).await.unwrap().unwrap();
    account.status = status;
    uow.save_account(&account).await.unwrap();
    uow.commit().await.unwrap();
}
