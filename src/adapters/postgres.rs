//! Postgres implementation of the ledger store.
//!
//! Per-account locking is `SELECT ... FOR UPDATE` inside an sqlx
//! transaction: the row lock blocks every other locker on the same id until
//! commit or rollback, which is exactly the contract the transfer engine's
//! critical section needs. Row structs stay private to the adapter and
//! convert to domain types at the edge.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction as SqlxTransaction};

use crate::domain::{
    Account, AccountStatus, NewTransaction, ScheduledTransfer, Transaction, TransactionKind,
    TransactionStatus, UNASSIGNED_NUMBER,
};
use crate::error::StorageError;
use crate::ports::{HistoryFilter, LedgerStore, LedgerTx, NewAccount, StoreResult};

const KIND_TRANSFER: &str = "TRANSFER";
const KIND_CARD_PAYMENT: &str = "CARD_PAYMENT";

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn create_account(&self, new: NewAccount) -> StoreResult<Account> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO accounts (
                owner_id, account_number, account_name, balance,
                transfer_limit, auth_credential, status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(new.owner_id)
        .bind(UNASSIGNED_NUMBER)
        .bind(&new.account_name)
        .bind(new.initial_balance)
        .bind(new.transfer_limit)
        .bind(&new.auth_credential)
        .bind(AccountStatus::Active.as_str())
        .bind(new.created_at)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    async fn get_account(&self, id: i64) -> StoreResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AccountRow::into_domain).transpose()
    }

    async fn find_account_by_number(&self, number: &str) -> StoreResult<Option<Account>> {
        if number == UNASSIGNED_NUMBER {
            return Ok(None);
        }
        let row =
            sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE account_number = $1")
                .bind(number)
                .fetch_optional(&self.pool)
                .await?;
        row.map(AccountRow::into_domain).transpose()
    }

    async fn accounts_for_owner(&self, owner_id: i64) -> StoreResult<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts WHERE owner_id = $1 ORDER BY id",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AccountRow::into_domain).collect()
    }

    async fn get_transaction(&self, id: i64) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TransactionRow::into_domain).transpose()
    }

    async fn find_due_scheduled(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM transactions
            WHERE status = 'SCHEDULED' AND schedule_date <= $1
            ORDER BY schedule_date, id
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn find_by_account(
        &self,
        account_id: i64,
        filter: &HistoryFilter,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT * FROM transactions
            WHERE (sender_account_id = $1 OR recipient_account_id = $1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at <= $3)
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(account_id)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_all(&self.pool)
        .await?;

        let mut found = rows
            .into_iter()
            .map(TransactionRow::into_domain)
            .collect::<StoreResult<Vec<_>>>()?;
        // direction is derived per account, so the type filter applies here
        if let Some(entry_type) = filter.entry_type {
            found.retain(|tx| tx.type_for(account_id) == entry_type);
        }
        Ok(found)
    }

    async fn find_scheduled_by_sender(&self, account_id: i64) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT * FROM transactions
            WHERE sender_account_id = $1 AND status = 'SCHEDULED'
            ORDER BY schedule_date, id
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TransactionRow::into_domain).collect()
    }
}

struct PgLedgerTx {
    tx: SqlxTransaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn account_for_update(&mut self, id: i64) -> StoreResult<Option<Account>> {
        let row =
            sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        row.map(AccountRow::into_domain).transpose()
    }

    async fn save_account(&mut self, account: &Account) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET account_number = $2, account_name = $3, balance = $4,
                transfer_limit = $5, auth_credential = $6, status = $7
            WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(&account.account_number)
        .bind(&account.account_name)
        .bind(account.balance)
        .bind(account.transfer_limit)
        .bind(&account.auth_credential)
        .bind(account.status.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_transaction(&mut self, new: NewTransaction) -> StoreResult<Transaction> {
        let (kind, schedule_date, memo, merchant_name) = match &new.kind {
            TransactionKind::Transfer { schedule } => (
                KIND_TRANSFER,
                schedule.as_ref().map(|s| s.schedule_date),
                schedule.as_ref().and_then(|s| s.memo.clone()),
                None,
            ),
            TransactionKind::CardPayment { merchant_name } => {
                (KIND_CARD_PAYMENT, None, None, Some(merchant_name.clone()))
            }
        };

        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            INSERT INTO transactions (
                sender_account_id, recipient_account_id, amount, balance_after,
                kind, status, schedule_date, memo, merchant_name, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(new.sender_account_id)
        .bind(new.recipient_account_id)
        .bind(new.amount)
        .bind(new.balance_after)
        .bind(kind)
        .bind(new.status.as_str())
        .bind(schedule_date)
        .bind(memo)
        .bind(merchant_name)
        .bind(new.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        row.into_domain()
    }

    async fn transaction_for_update(&mut self, id: i64) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(TransactionRow::into_domain).transpose()
    }

    async fn finish_scheduled(
        &mut self,
        id: i64,
        status: TransactionStatus,
        balance_after: Option<i64>,
    ) -> StoreResult<bool> {
        if !status.is_terminal() {
            return Ok(false);
        }
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2, balance_after = COALESCE($3, balance_after)
            WHERE id = $1 AND status = 'SCHEDULED'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(balance_after)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: i64,
    owner_id: i64,
    account_number: String,
    account_name: String,
    balance: i64,
    transfer_limit: Option<i64>,
    auth_credential: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl AccountRow {
    fn into_domain(self) -> StoreResult<Account> {
        let status = AccountStatus::parse(&self.status).ok_or_else(|| {
            StorageError::Internal(format!("unknown account status {:?}", self.status))
        })?;
        Ok(Account {
            id: self.id,
            owner_id: self.owner_id,
            account_number: self.account_number,
            account_name: self.account_name,
            balance: self.balance,
            transfer_limit: self.transfer_limit,
            auth_credential: self.auth_credential,
            status,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: i64,
    sender_account_id: i64,
    recipient_account_id: Option<i64>,
    amount: i64,
    balance_after: i64,
    kind: String,
    status: String,
    schedule_date: Option<DateTime<Utc>>,
    memo: Option<String>,
    merchant_name: Option<String>,
    created_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> StoreResult<Transaction> {
        let status = TransactionStatus::parse(&self.status).ok_or_else(|| {
            StorageError::Internal(format!("unknown transaction status {:?}", self.status))
        })?;
        let kind = match self.kind.as_str() {
            KIND_TRANSFER => TransactionKind::Transfer {
                schedule: self.schedule_date.map(|schedule_date| ScheduledTransfer {
                    schedule_date,
                    memo: self.memo,
                }),
            },
            KIND_CARD_PAYMENT => TransactionKind::CardPayment {
                merchant_name: self.merchant_name.ok_or_else(|| {
                    StorageError::Internal(format!(
                        "card payment {} is missing a merchant name",
                        self.id
                    ))
                })?,
            },
            other => {
                return Err(StorageError::Internal(format!(
                    "unknown transaction kind {other:?}"
                )))
            }
        };
        Ok(Transaction {
            id: self.id,
            sender_account_id: self.sender_account_id,
            recipient_account_id: self.recipient_account_id,
            amount: self.amount,
            balance_after: self.balance_after,
            kind,
            status,
            created_at: self.created_at,
        })
    }
}
