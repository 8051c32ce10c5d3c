//! Transaction domain entity.
//!
//! The ledger is append-mostly: a record is created either directly in a
//! terminal status (immediate transfer, card payment) or as SCHEDULED, and
//! a SCHEDULED record makes exactly one further transition. Detail payloads
//! are a sum type on the transaction kind so that a card payment with a
//! schedule, or both details at once, cannot be represented.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Scheduled,
    Completed,
    Cancelled,
    /// Dead-letter status for settlements that can never succeed (missing
    /// or inactive counterparty, or insufficient funds past the expiry
    /// window). Terminal like COMPLETED and CANCELLED.
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        self != TransactionStatus::Scheduled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Scheduled => "SCHEDULED",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SCHEDULED" => Some(TransactionStatus::Scheduled),
            "COMPLETED" => Some(TransactionStatus::Completed),
            "CANCELLED" => Some(TransactionStatus::Cancelled),
            "FAILED" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

/// Direction of a ledger entry as seen from one account's history. A
/// transfer is stored once, on the sender's side; the recipient reads the
/// same row as TRANSFER_IN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    TransferOut,
    TransferIn,
    CardPayment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTransfer {
    pub schedule_date: DateTime<Utc>,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Account-to-account transfer. `schedule` is present for scheduled
    /// transfers and stays on the record after settlement for audit.
    Transfer { schedule: Option<ScheduledTransfer> },
    CardPayment { merchant_name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub sender_account_id: i64,
    /// Absent for card payments.
    pub recipient_account_id: Option<i64>,
    pub amount: i64,
    /// Sender's post-transaction balance, stored for audit. For a scheduled
    /// transfer this is a projection at schedule time, corrected at
    /// settlement.
    pub balance_after: i64,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn schedule(&self) -> Option<&ScheduledTransfer> {
        match &self.kind {
            TransactionKind::Transfer { schedule } => schedule.as_ref(),
            TransactionKind::CardPayment { .. } => None,
        }
    }

    pub fn merchant_name(&self) -> Option<&str> {
        match &self.kind {
            TransactionKind::CardPayment { merchant_name } => Some(merchant_name),
            TransactionKind::Transfer { .. } => None,
        }
    }

    /// How this entry reads from `account_id`'s point of view. Only
    /// meaningful for accounts that are party to the transaction.
    pub fn type_for(&self, account_id: i64) -> TransactionType {
        if self.recipient_account_id == Some(account_id) && self.sender_account_id != account_id {
            TransactionType::TransferIn
        } else {
            match self.kind {
                TransactionKind::Transfer { .. } => TransactionType::TransferOut,
                TransactionKind::CardPayment { .. } => TransactionType::CardPayment,
            }
        }
    }

    /// Check a status transition without applying it. SCHEDULED may move to
    /// any terminal status; terminal records are immutable.
    pub fn ensure_can_transition(&self, next: TransactionStatus) -> LedgerResult<()> {
        if self.status.is_terminal() || next == TransactionStatus::Scheduled {
            return Err(LedgerError::InvalidState(format!(
                "transaction {} cannot move from {} to {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        Ok(())
    }
}

/// Record handed to the store for insertion; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub sender_account_id: i64,
    pub recipient_account_id: Option<i64>,
    pub amount: i64,
    pub balance_after: i64,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(status: TransactionStatus) -> Transaction {
        Transaction {
            id: 1,
            sender_account_id: 10,
            recipient_account_id: Some(20),
            amount: 500,
            balance_after: 1500,
            kind: TransactionKind::Transfer { schedule: None },
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn type_depends_on_which_side_asks() {
        let tx = transfer(TransactionStatus::Completed);
        assert_eq!(tx.type_for(10), TransactionType::TransferOut);
        assert_eq!(tx.type_for(20), TransactionType::TransferIn);
    }

    #[test]
    fn card_payment_has_no_schedule_and_no_recipient_side() {
        let tx = Transaction {
            recipient_account_id: None,
            kind: TransactionKind::CardPayment {
                merchant_name: "Corner Deli".to_string(),
            },
            ..transfer(TransactionStatus::Completed)
        };
        assert_eq!(tx.type_for(10), TransactionType::CardPayment);
        assert!(tx.schedule().is_none());
        assert_eq!(tx.merchant_name(), Some("Corner Deli"));
    }

    #[test]
    fn terminal_statuses_admit_no_transition() {
        for status in [
            TransactionStatus::Completed,
            TransactionStatus::Cancelled,
            TransactionStatus::Failed,
        ] {
            let tx = transfer(status);
            assert!(tx.ensure_can_transition(TransactionStatus::Cancelled).is_err());
        }
        let scheduled = transfer(TransactionStatus::Scheduled);
        assert!(scheduled
            .ensure_can_transition(TransactionStatus::Completed)
            .is_ok());
        assert!(scheduled
            .ensure_can_transition(TransactionStatus::Scheduled)
            .is_err());
    }
}
