//! In-memory ledger store.
//!
//! One mutex guards the whole state and is held for the lifetime of a unit
//! of work, so units of work serialize completely. That is coarser than the
//! per-account contract requires but satisfies it, and keeps the adapter
//! small enough to double as the test harness for the transfer engine.
//! Writes are staged on the unit of work and applied on commit; dropping
//! without commit discards them.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{
    Account, AccountStatus, NewTransaction, Transaction, TransactionStatus, UNASSIGNED_NUMBER,
};
use crate::error::StorageError;
use crate::ports::{HistoryFilter, LedgerStore, LedgerTx, NewAccount, StoreResult};

#[derive(Default)]
struct MemState {
    accounts: BTreeMap<i64, Account>,
    transactions: BTreeMap<i64, Transaction>,
    next_account_id: i64,
    next_transaction_id: i64,
}

#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<MemState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(tx: &Transaction, account_id: i64, filter: &HistoryFilter) -> bool {
    let involved =
        tx.sender_account_id == account_id || tx.recipient_account_id == Some(account_id);
    if !involved {
        return false;
    }
    if let Some(entry_type) = filter.entry_type {
        if tx.type_for(account_id) != entry_type {
            return false;
        }
    }
    if let Some(from) = filter.from {
        if tx.created_at < from {
            return false;
        }
    }
    if let Some(to) = filter.to {
        if tx.created_at > to {
            return false;
        }
    }
    true
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryTx {
            guard,
            staged_accounts: BTreeMap::new(),
            staged_transactions: BTreeMap::new(),
        }))
    }

    async fn create_account(&self, new: NewAccount) -> StoreResult<Account> {
        if new.initial_balance < 0 {
            return Err(StorageError::Internal(
                "initial balance must be non-negative".to_string(),
            ));
        }
        let mut state = self.state.lock().await;
        state.next_account_id += 1;
        let account = Account {
            id: state.next_account_id,
            owner_id: new.owner_id,
            account_number: UNASSIGNED_NUMBER.to_string(),
            account_name: new.account_name,
            balance: new.initial_balance,
            transfer_limit: new.transfer_limit,
            auth_credential: new.auth_credential,
            status: AccountStatus::Active,
            created_at: new.created_at,
        };
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: i64) -> StoreResult<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_number(&self, number: &str) -> StoreResult<Option<Account>> {
        if number == UNASSIGNED_NUMBER {
            return Ok(None);
        }
        Ok(self
            .state
            .lock()
            .await
            .accounts
            .values()
            .find(|a| a.account_number == number)
            .cloned())
    }

    async fn accounts_for_owner(&self, owner_id: i64) -> StoreResult<Vec<Account>> {
        Ok(self
            .state
            .lock()
            .await
            .accounts
            .values()
            .filter(|a| a.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn get_transaction(&self, id: i64) -> StoreResult<Option<Transaction>> {
        Ok(self.state.lock().await.transactions.get(&id).cloned())
    }

    async fn find_due_scheduled(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<i64>> {
        let state = self.state.lock().await;
        let mut due: Vec<(DateTime<Utc>, i64)> = state
            .transactions
            .values()
            .filter(|tx| tx.status == TransactionStatus::Scheduled)
            .filter_map(|tx| {
                tx.schedule()
                    .filter(|s| s.schedule_date <= now)
                    .map(|s| (s.schedule_date, tx.id))
            })
            .collect();
        due.sort();
        due.truncate(limit.max(0) as usize);
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn find_by_account(
        &self,
        account_id: i64,
        filter: &HistoryFilter,
    ) -> StoreResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        let mut found: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| matches(tx, account_id, filter))
            .cloned()
            .collect();
        found.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(found)
    }

    async fn find_scheduled_by_sender(&self, account_id: i64) -> StoreResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        let mut found: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| {
                tx.sender_account_id == account_id && tx.status == TransactionStatus::Scheduled
            })
            .cloned()
            .collect();
        found.sort_by_key(|tx| (tx.schedule().map(|s| s.schedule_date), tx.id));
        Ok(found)
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemState>,
    staged_accounts: BTreeMap<i64, Account>,
    staged_transactions: BTreeMap<i64, Transaction>,
}

impl MemoryTx {
    fn current_transaction(&self, id: i64) -> Option<&Transaction> {
        self.staged_transactions
            .get(&id)
            .or_else(|| self.guard.transactions.get(&id))
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn account_for_update(&mut self, id: i64) -> StoreResult<Option<Account>> {
        Ok(self
            .staged_accounts
            .get(&id)
            .or_else(|| self.guard.accounts.get(&id))
            .cloned())
    }

    async fn save_account(&mut self, account: &Account) -> StoreResult<()> {
        if account.balance < 0 {
            return Err(StorageError::Internal(format!(
                "account {} balance would go negative",
                account.id
            )));
        }
        self.staged_accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn append_transaction(&mut self, new: NewTransaction) -> StoreResult<Transaction> {
        if new.amount <= 0 {
            return Err(StorageError::Internal(
                "transaction amount must be positive".to_string(),
            ));
        }
        self.guard.next_transaction_id += 1;
        let tx = Transaction {
            id: self.guard.next_transaction_id,
            sender_account_id: new.sender_account_id,
            recipient_account_id: new.recipient_account_id,
            amount: new.amount,
            balance_after: new.balance_after,
            kind: new.kind,
            status: new.status,
            created_at: new.created_at,
        };
        self.staged_transactions.insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn transaction_for_update(&mut self, id: i64) -> StoreResult<Option<Transaction>> {
        Ok(self.current_transaction(id).cloned())
    }

    async fn finish_scheduled(
        &mut self,
        id: i64,
        status: TransactionStatus,
        balance_after: Option<i64>,
    ) -> StoreResult<bool> {
        let Some(current) = self.current_transaction(id) else {
            return Ok(false);
        };
        if current.status != TransactionStatus::Scheduled || !status.is_terminal() {
            return Ok(false);
        }
        let mut updated = current.clone();
        updated.status = status;
        if let Some(balance_after) = balance_after {
            updated.balance_after = balance_after;
        }
        self.staged_transactions.insert(id, updated);
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx {
            mut guard,
            staged_accounts,
            staged_transactions,
        } = *self;
        for (id, account) in staged_accounts {
            guard.accounts.insert(id, account);
        }
        for (id, tx) in staged_transactions {
            guard.transactions.insert(id, tx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionKind;

    fn new_account(owner: i64) -> NewAccount {
        NewAccount {
            owner_id: owner,
            account_name: "checking".to_string(),
            initial_balance: 1000,
            transfer_limit: None,
            auth_credential: "hash".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids_and_sentinel_number() {
        let store = MemoryLedgerStore::new();
        let a = store.create_account(new_account(1)).await.unwrap();
        let b = store.create_account(new_account(1)).await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.account_number, UNASSIGNED_NUMBER);
        assert!(store
            .find_account_by_number(UNASSIGNED_NUMBER)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn dropping_a_unit_of_work_rolls_back() {
        let store = MemoryLedgerStore::new();
        let created = store.create_account(new_account(1)).await.unwrap();

        {
            let mut uow = store.begin().await.unwrap();
            let mut account = uow.account_for_update(created.id).await.unwrap().unwrap();
            account.balance = 0;
            uow.save_account(&account).await.unwrap();
            // no commit
        }

        let reread = store.get_account(created.id).await.unwrap().unwrap();
        assert_eq!(reread.balance, 1000);
    }

    #[tokio::test]
    async fn finish_scheduled_refuses_terminal_records() {
        let store = MemoryLedgerStore::new();
        let sender = store.create_account(new_account(1)).await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let tx = uow
            .append_transaction(NewTransaction {
                sender_account_id: sender.id,
                recipient_account_id: None,
                amount: 100,
                balance_after: 900,
                kind: TransactionKind::CardPayment {
                    merchant_name: "Kiosk".to_string(),
                },
                status: TransactionStatus::Completed,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(!uow
            .finish_scheduled(tx.id, TransactionStatus::Cancelled, None)
            .await
            .unwrap());
        uow.commit().await.unwrap();

        let stored = store.get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
    }
}
