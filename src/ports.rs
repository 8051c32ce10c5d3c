//! Boundary traits the core depends on.
//!
//! Persistence, time, and credential hashing are injected so the transfer
//! engine stays storage- and transport-agnostic. Adapters live in
//! [`crate::adapters`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Account, NewTransaction, Transaction, TransactionStatus, TransactionType};
use crate::error::StorageError;

pub type StoreResult<T> = Result<T, StorageError>;

/// Optional narrowing of a transaction history query.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryFilter {
    pub entry_type: Option<TransactionType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Account handed to the store for insertion; the store assigns the durable
/// id and the record starts with the sentinel account number.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub owner_id: i64,
    pub account_name: String,
    pub initial_balance: i64,
    pub transfer_limit: Option<i64>,
    pub auth_credential: String,
    pub created_at: DateTime<Utc>,
}

/// Durable store for accounts and the transaction ledger.
///
/// Reads on this trait take no locks. Anything that mutates balances or
/// transaction status must go through a [`LedgerTx`] unit of work. While a
/// unit of work is open the caller must not issue store-level reads; the
/// in-memory adapter serializes units of work and would deadlock.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>>;

    async fn create_account(&self, new: NewAccount) -> StoreResult<Account>;
    async fn get_account(&self, id: i64) -> StoreResult<Option<Account>>;
    async fn find_account_by_number(&self, number: &str) -> StoreResult<Option<Account>>;
    async fn accounts_for_owner(&self, owner_id: i64) -> StoreResult<Vec<Account>>;

    async fn get_transaction(&self, id: i64) -> StoreResult<Option<Transaction>>;

    /// Ids of SCHEDULED transactions whose schedule date is at or before
    /// `now`, earliest first. The scan takes no locks; settlement re-checks
    /// status under the row lock, so re-visits are harmless.
    async fn find_due_scheduled(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<i64>>;

    /// All transactions in which the account is sender or recipient,
    /// newest first, narrowed by `filter`.
    async fn find_by_account(
        &self,
        account_id: i64,
        filter: &HistoryFilter,
    ) -> StoreResult<Vec<Transaction>>;

    /// Outgoing transfers of the account still in SCHEDULED status,
    /// earliest schedule date first.
    async fn find_scheduled_by_sender(&self, account_id: i64) -> StoreResult<Vec<Transaction>>;
}

/// All-or-nothing unit of work. `*_for_update` acquires an exclusive lock
/// on the row that blocks other lockers until commit or drop; dropping the
/// unit of work without committing rolls every staged write back.
#[async_trait]
pub trait LedgerTx: Send {
    async fn account_for_update(&mut self, id: i64) -> StoreResult<Option<Account>>;
    async fn save_account(&mut self, account: &Account) -> StoreResult<()>;

    async fn append_transaction(&mut self, new: NewTransaction) -> StoreResult<Transaction>;
    async fn transaction_for_update(&mut self, id: i64) -> StoreResult<Option<Transaction>>;

    /// Flip a SCHEDULED transaction to a terminal status, correcting the
    /// audited balance when given. Returns `false` if the record was no
    /// longer SCHEDULED, without touching it.
    async fn finish_scheduled(
        &mut self,
        id: i64,
        status: TransactionStatus,
        balance_after: Option<i64>,
    ) -> StoreResult<bool>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Injected time source so settlement-due checks are deterministic in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Opaque credential hashing capability. The request layer owns the actual
/// primitive; the core only ever handles hashes.
pub trait CredentialVerifier: Send + Sync {
    fn hash(&self, secret: &str) -> String;
    fn verify(&self, secret: &str, stored_hash: &str) -> bool;
}
