//! Transfer engine: the sole path through which money moves.
//!
//! Every balance mutation happens inside one unit of work, with the
//! affected account rows locked for the duration. Two-account transfers
//! lock sender and recipient in ascending id order so that transfers
//! crossing the same pair in opposite directions cannot deadlock.
//! Settlement and cancellation additionally lock the transaction row
//! first, and serialize through its SCHEDULED status check.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{
    Account, NewTransaction, ScheduledTransfer, Transaction, TransactionKind, TransactionStatus,
    TransactionType,
};
use crate::error::{LedgerError, LedgerResult};
use crate::ports::{Clock, HistoryFilter, LedgerStore, LedgerTx};

const DEFAULT_SETTLEMENT_EXPIRY_DAYS: i64 = 7;

/// Projection returned for a recorded transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReceipt {
    pub transaction_id: i64,
    pub sender_name: String,
    pub sender_account: String,
    pub recipient_name: Option<String>,
    pub recipient_account: Option<String>,
    pub merchant_name: Option<String>,
    pub amount: i64,
    pub balance_after: i64,
    pub status: TransactionStatus,
    pub transaction_date: DateTime<Utc>,
}

/// One entry of an account's transaction history, direction-resolved for
/// the queried account.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub transaction_id: i64,
    pub entry_type: TransactionType,
    pub counterparty_name: Option<String>,
    pub counterparty_account: Option<String>,
    pub merchant_name: Option<String>,
    pub amount: i64,
    /// Sender's audited post-transaction balance; absent on the receiving
    /// side, where the row says nothing about this account's balance.
    pub balance_after: Option<i64>,
    pub status: TransactionStatus,
    pub transaction_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionHistory {
    pub total_in: i64,
    pub total_out: i64,
    pub net_change: i64,
    pub entries: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTransferView {
    pub transfer_id: i64,
    pub account_id: i64,
    pub recipient_name: Option<String>,
    pub amount: i64,
    pub schedule_date: DateTime<Utc>,
    pub memo: Option<String>,
}

/// Result of one settlement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Funds moved and the record is COMPLETED.
    Settled,
    /// The record was already terminal; nothing was mutated.
    AlreadyFinal,
    /// Insufficient funds; the record stays SCHEDULED for a later tick.
    Retry,
    /// Settlement can never succeed; the record moved to FAILED.
    DeadLettered,
}

pub struct TransferService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    settlement_expiry: Duration,
}

impl TransferService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            settlement_expiry: Duration::days(DEFAULT_SETTLEMENT_EXPIRY_DAYS),
        }
    }

    pub fn with_settlement_expiry_days(mut self, days: i64) -> Self {
        self.settlement_expiry = Duration::days(days);
        self
    }

    /// Debit the sender, credit the recipient, and append one COMPLETED
    /// TRANSFER_OUT record, all in one unit of work. The memo is accepted
    /// for interface parity but only scheduled transfers persist one.
    pub async fn execute_immediate_transfer(
        &self,
        sender_account_id: i64,
        recipient_account_number: &str,
        amount: i64,
        _memo: Option<&str>,
        user_id: i64,
    ) -> LedgerResult<TransferReceipt> {
        let recipient_id = self
            .resolve_recipient_id(sender_account_id, recipient_account_number)
            .await?;

        let mut uow = self.store.begin().await?;
        let (mut sender, mut recipient) =
            lock_pair_required(uow.as_mut(), sender_account_id, recipient_id).await?;
        self.validate_outgoing(&sender, user_id, amount)?;
        ensure_active(&recipient)?;

        sender.withdraw(amount)?;
        recipient.deposit(amount);
        uow.save_account(&sender).await?;
        uow.save_account(&recipient).await?;

        let record = uow
            .append_transaction(NewTransaction {
                sender_account_id: sender.id,
                recipient_account_id: Some(recipient.id),
                amount,
                balance_after: sender.balance,
                kind: TransactionKind::Transfer { schedule: None },
                status: TransactionStatus::Completed,
                created_at: self.clock.now(),
            })
            .await?;
        uow.commit().await?;

        info!(
            transaction_id = record.id,
            sender = sender.id,
            recipient = recipient.id,
            amount,
            "immediate transfer completed"
        );
        Ok(receipt(&record, &sender, Some(&recipient)))
    }

    /// Record a transfer to be settled at `schedule_date`. Validation is
    /// identical to an immediate transfer, but no funds move or are
    /// reserved; settlement re-validates the balance.
    pub async fn schedule_transfer(
        &self,
        sender_account_id: i64,
        recipient_account_number: &str,
        amount: i64,
        schedule_date: DateTime<Utc>,
        memo: Option<&str>,
        user_id: i64,
    ) -> LedgerResult<TransferReceipt> {
        let recipient_id = self
            .resolve_recipient_id(sender_account_id, recipient_account_number)
            .await?;

        let mut uow = self.store.begin().await?;
        let (sender, recipient) =
            lock_pair_required(uow.as_mut(), sender_account_id, recipient_id).await?;
        self.validate_outgoing(&sender, user_id, amount)?;
        ensure_active(&recipient)?;

        let record = uow
            .append_transaction(NewTransaction {
                sender_account_id: sender.id,
                recipient_account_id: Some(recipient.id),
                amount,
                balance_after: sender.balance - amount,
                kind: TransactionKind::Transfer {
                    schedule: Some(ScheduledTransfer {
                        schedule_date,
                        memo: memo.map(str::to_string),
                    }),
                },
                status: TransactionStatus::Scheduled,
                created_at: self.clock.now(),
            })
            .await?;
        uow.commit().await?;

        info!(
            transaction_id = record.id,
            sender = sender.id,
            recipient = recipient.id,
            amount,
            schedule_date = %schedule_date,
            "transfer scheduled"
        );
        Ok(receipt(&record, &sender, Some(&recipient)))
    }

    /// Settle one scheduled transfer. Invoked by the scheduler; idempotent
    /// because the SCHEDULED check and the balance movement commit together.
    pub async fn settle_scheduled(&self, transaction_id: i64) -> LedgerResult<SettleOutcome> {
        let now = self.clock.now();
        let mut uow = self.store.begin().await?;

        let record = uow
            .transaction_for_update(transaction_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {transaction_id}")))?;
        if record.status != TransactionStatus::Scheduled {
            return Ok(SettleOutcome::AlreadyFinal);
        }
        let schedule_date = record
            .schedule()
            .map(|s| s.schedule_date)
            .ok_or_else(|| {
                LedgerError::InvalidState(format!(
                    "transaction {transaction_id} is scheduled but carries no schedule"
                ))
            })?;
        let Some(recipient_id) = record.recipient_account_id else {
            return Err(LedgerError::InvalidState(format!(
                "transaction {transaction_id} has no recipient"
            )));
        };

        let pair = lock_pair(uow.as_mut(), record.sender_account_id, recipient_id).await?;
        let Some((mut sender, mut recipient)) = pair else {
            return self
                .dead_letter(uow, &record, "sender or recipient account is gone")
                .await;
        };
        if !sender.is_active() || !recipient.is_active() {
            return self
                .dead_letter(uow, &record, "sender or recipient account is not active")
                .await;
        }
        if sender.balance < record.amount {
            if now > schedule_date + self.settlement_expiry {
                return self
                    .dead_letter(uow, &record, "insufficient funds past the expiry window")
                    .await;
            }
            // stays SCHEDULED; the next tick retries once funds arrive
            info!(
                transaction_id = record.id,
                sender = sender.id,
                "settlement deferred: insufficient funds"
            );
            return Ok(SettleOutcome::Retry);
        }

        sender.withdraw(record.amount)?;
        recipient.deposit(record.amount);
        uow.save_account(&sender).await?;
        uow.save_account(&recipient).await?;
        let flipped = uow
            .finish_scheduled(record.id, TransactionStatus::Completed, Some(sender.balance))
            .await?;
        if !flipped {
            // the row lock makes this unreachable; bail without committing
            return Err(LedgerError::InvalidState(format!(
                "transaction {} changed state during settlement",
                record.id
            )));
        }
        uow.commit().await?;

        info!(
            transaction_id = record.id,
            sender = sender.id,
            recipient = recipient.id,
            amount = record.amount,
            "scheduled transfer settled"
        );
        Ok(SettleOutcome::Settled)
    }

    /// Cancel a scheduled transfer. Purely a status flip: scheduling never
    /// debited the sender, so there is nothing to credit back.
    pub async fn cancel_scheduled(&self, transaction_id: i64, user_id: i64) -> LedgerResult<()> {
        let mut uow = self.store.begin().await?;

        let record = uow
            .transaction_for_update(transaction_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {transaction_id}")))?;
        let sender = uow
            .account_for_update(record.sender_account_id)
            .await?
            .ok_or_else(|| {
                LedgerError::NotFound(format!("account {}", record.sender_account_id))
            })?;
        if sender.owner_id != user_id {
            return Err(LedgerError::Forbidden(
                "transaction does not belong to the caller".to_string(),
            ));
        }
        record.ensure_can_transition(TransactionStatus::Cancelled)?;

        let flipped = uow
            .finish_scheduled(record.id, TransactionStatus::Cancelled, None)
            .await?;
        if !flipped {
            return Err(LedgerError::InvalidState(format!(
                "transaction {} changed state during cancellation",
                record.id
            )));
        }
        uow.commit().await?;

        info!(transaction_id, "scheduled transfer cancelled");
        Ok(())
    }

    /// Withdraw for a card payment: single-account debit plus one COMPLETED
    /// CARD_PAYMENT record.
    pub async fn execute_card_payment(
        &self,
        account_id: i64,
        amount: i64,
        merchant_name: &str,
    ) -> LedgerResult<TransferReceipt> {
        ensure_positive_amount(amount)?;

        let mut uow = self.store.begin().await?;
        let mut account = uow
            .account_for_update(account_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {account_id}")))?;
        ensure_active(&account)?;

        account.withdraw(amount)?;
        uow.save_account(&account).await?;
        let record = uow
            .append_transaction(NewTransaction {
                sender_account_id: account.id,
                recipient_account_id: None,
                amount,
                balance_after: account.balance,
                kind: TransactionKind::CardPayment {
                    merchant_name: merchant_name.to_string(),
                },
                status: TransactionStatus::Completed,
                created_at: self.clock.now(),
            })
            .await?;
        uow.commit().await?;

        info!(
            transaction_id = record.id,
            account = account.id,
            amount,
            merchant = merchant_name,
            "card payment completed"
        );
        Ok(receipt(&record, &account, None))
    }

    /// Transaction history for an account the caller owns, with in/out
    /// aggregates over the completed entries of the filtered set.
    pub async fn transaction_history(
        &self,
        account_id: i64,
        user_id: i64,
        filter: HistoryFilter,
    ) -> LedgerResult<TransactionHistory> {
        let account = self.owned_account(account_id, user_id).await?;
        let records = self.store.find_by_account(account.id, &filter).await?;
        let names = self.counterparty_names(account.id, &records).await?;

        let mut total_in = 0;
        let mut total_out = 0;
        let mut entries = Vec::with_capacity(records.len());
        for record in &records {
            let entry_type = record.type_for(account.id);
            if record.status == TransactionStatus::Completed {
                match entry_type {
                    TransactionType::TransferIn => total_in += record.amount,
                    TransactionType::TransferOut | TransactionType::CardPayment => {
                        total_out += record.amount
                    }
                }
            }
            let counterparty_id = match entry_type {
                TransactionType::TransferIn => Some(record.sender_account_id),
                TransactionType::TransferOut => record.recipient_account_id,
                TransactionType::CardPayment => None,
            };
            let counterparty = counterparty_id.and_then(|id| names.get(&id));
            entries.push(HistoryEntry {
                transaction_id: record.id,
                entry_type,
                counterparty_name: counterparty.map(|(name, _)| name.clone()),
                counterparty_account: counterparty.map(|(_, number)| number.clone()),
                merchant_name: record.merchant_name().map(str::to_string),
                amount: record.amount,
                balance_after: (entry_type != TransactionType::TransferIn)
                    .then_some(record.balance_after),
                status: record.status,
                transaction_date: record.created_at,
            });
        }

        Ok(TransactionHistory {
            total_in,
            total_out,
            net_change: total_in - total_out,
            entries,
        })
    }

    /// Pending scheduled transfers going out of an account the caller owns.
    pub async fn scheduled_transfers(
        &self,
        account_id: i64,
        user_id: i64,
    ) -> LedgerResult<Vec<ScheduledTransferView>> {
        let account = self.owned_account(account_id, user_id).await?;
        let records = self.store.find_scheduled_by_sender(account.id).await?;
        let names = self.counterparty_names(account.id, &records).await?;

        let mut views = Vec::with_capacity(records.len());
        for record in &records {
            let Some(schedule) = record.schedule() else {
                continue;
            };
            views.push(ScheduledTransferView {
                transfer_id: record.id,
                account_id: account.id,
                recipient_name: record
                    .recipient_account_id
                    .and_then(|id| names.get(&id))
                    .map(|(name, _)| name.clone()),
                amount: record.amount,
                schedule_date: schedule.schedule_date,
                memo: schedule.memo.clone(),
            });
        }
        Ok(views)
    }

    async fn resolve_recipient_id(
        &self,
        sender_account_id: i64,
        recipient_account_number: &str,
    ) -> LedgerResult<i64> {
        let recipient = self
            .store
            .find_account_by_number(recipient_account_number)
            .await?
            .ok_or_else(|| {
                LedgerError::NotFound(format!("recipient account {recipient_account_number}"))
            })?;
        if recipient.id == sender_account_id {
            return Err(LedgerError::Validation(
                "cannot transfer to the sending account".to_string(),
            ));
        }
        Ok(recipient.id)
    }

    fn validate_outgoing(&self, sender: &Account, user_id: i64, amount: i64) -> LedgerResult<()> {
        ensure_positive_amount(amount)?;
        if sender.owner_id != user_id {
            return Err(LedgerError::Forbidden(
                "account is not owned by the caller".to_string(),
            ));
        }
        ensure_active(sender)?;
        if let Some(limit) = sender.transfer_limit {
            if amount > limit {
                return Err(LedgerError::LimitExceeded { limit });
            }
        }
        if sender.balance < amount {
            return Err(LedgerError::InsufficientBalance);
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        mut uow: Box<dyn LedgerTx>,
        record: &Transaction,
        reason: &str,
    ) -> LedgerResult<SettleOutcome> {
        let flipped = uow
            .finish_scheduled(record.id, TransactionStatus::Failed, None)
            .await?;
        if !flipped {
            return Ok(SettleOutcome::AlreadyFinal);
        }
        uow.commit().await?;
        warn!(transaction_id = record.id, reason, "scheduled transfer dead-lettered");
        Ok(SettleOutcome::DeadLettered)
    }

    async fn owned_account(&self, account_id: i64, user_id: i64) -> LedgerResult<Account> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {account_id}")))?;
        if account.owner_id != user_id {
            return Err(LedgerError::Forbidden(
                "account is not owned by the caller".to_string(),
            ));
        }
        Ok(account)
    }

    /// Name and number of every counterparty appearing in `records`, keyed
    /// by account id. Accounts deleted since are simply absent.
    async fn counterparty_names(
        &self,
        account_id: i64,
        records: &[Transaction],
    ) -> LedgerResult<HashMap<i64, (String, String)>> {
        let mut names = HashMap::new();
        for record in records {
            for id in [Some(record.sender_account_id), record.recipient_account_id]
                .into_iter()
                .flatten()
            {
                if id == account_id || names.contains_key(&id) {
                    continue;
                }
                if let Some(other) = self.store.get_account(id).await? {
                    names.insert(id, (other.account_name, other.account_number));
                }
            }
        }
        Ok(names)
    }
}

fn ensure_positive_amount(amount: i64) -> LedgerResult<()> {
    if amount <= 0 {
        return Err(LedgerError::Validation(
            "amount must be positive".to_string(),
        ));
    }
    Ok(())
}

fn ensure_active(account: &Account) -> LedgerResult<()> {
    if !account.is_active() {
        return Err(LedgerError::InvalidState(format!(
            "account {} is {}",
            account.id,
            account.status.as_str()
        )));
    }
    Ok(())
}

/// Lock two distinct accounts in ascending id order and return them as
/// (first, second) in the order the ids were passed. `None` if either row
/// is missing.
async fn lock_pair(
    uow: &mut dyn LedgerTx,
    first_id: i64,
    second_id: i64,
) -> Result<Option<(Account, Account)>, LedgerError> {
    debug_assert_ne!(first_id, second_id);
    let (lo, hi) = if first_id < second_id {
        (first_id, second_id)
    } else {
        (second_id, first_id)
    };
    let Some(lo_account) = uow.account_for_update(lo).await? else {
        return Ok(None);
    };
    let Some(hi_account) = uow.account_for_update(hi).await? else {
        return Ok(None);
    };
    if lo == first_id {
        Ok(Some((lo_account, hi_account)))
    } else {
        Ok(Some((hi_account, lo_account)))
    }
}

async fn lock_pair_required(
    uow: &mut dyn LedgerTx,
    sender_id: i64,
    recipient_id: i64,
) -> LedgerResult<(Account, Account)> {
    lock_pair(uow, sender_id, recipient_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("account {sender_id} or {recipient_id}")))
}

fn receipt(record: &Transaction, sender: &Account, recipient: Option<&Account>) -> TransferReceipt {
    TransferReceipt {
        transaction_id: record.id,
        sender_name: sender.account_name.clone(),
        sender_account: sender.account_number.clone(),
        recipient_name: recipient.map(|r| r.account_name.clone()),
        recipient_account: recipient.map(|r| r.account_number.clone()),
        merchant_name: record.merchant_name().map(str::to_string),
        amount: record.amount,
        balance_after: record.balance_after,
        status: record.status,
        transaction_date: record.created_at,
    }
}
