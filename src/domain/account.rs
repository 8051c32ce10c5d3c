//! Account domain entity.
//!
//! Balances are integers in the smallest currency unit and may never go
//! negative. Balance mutation happens only inside the transfer engine's
//! locked unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Institution prefix baked into every external account number.
pub const BANK_CODE: &str = "1234";

/// Sentinel account number carried between row creation and number
/// assignment. Never visible to callers.
pub const UNASSIGNED_NUMBER: &str = "temp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Frozen,
    Closed,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Frozen => "FROZEN",
            AccountStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ACTIVE" => Some(AccountStatus::Active),
            "FROZEN" => Some(AccountStatus::Frozen),
            "CLOSED" => Some(AccountStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub owner_id: i64,
    pub account_number: String,
    pub account_name: String,
    pub balance: i64,
    pub transfer_limit: Option<i64>,
    /// Opaque hashed secret; the core never sees plaintext comparison.
    pub auth_credential: String,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn deposit(&mut self, amount: i64) {
        self.balance += amount;
    }

    pub fn withdraw(&mut self, amount: i64) -> LedgerResult<()> {
        if self.balance < amount {
            return Err(LedgerError::InsufficientBalance);
        }
        self.balance -= amount;
        Ok(())
    }

    /// Derive the external account number from the durable id. Legal exactly
    /// once, after the store has assigned the id; a second call is a
    /// programming error and fails fast.
    pub fn assign_account_number(&mut self) -> LedgerResult<()> {
        if self.account_number != UNASSIGNED_NUMBER {
            return Err(LedgerError::InvalidState(format!(
                "account {} already has number {}",
                self.id, self.account_number
            )));
        }
        self.account_number = account_number_for_id(self.id);
        Ok(())
    }
}

/// Injective for ids below 10^9; beyond that the middle digits wrap, which
/// is a documented scale limit rather than a supported range.
pub fn account_number_for_id(id: i64) -> String {
    let middle = (id / 1_000_000) % 1000;
    let last = id % 1_000_000;
    format!("{BANK_CODE}-{middle:03}-{last:06}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn account(balance: i64) -> Account {
        Account {
            id: 7,
            owner_id: 1,
            account_number: UNASSIGNED_NUMBER.to_string(),
            account_name: "checking".to_string(),
            balance,
            transfer_limit: None,
            auth_credential: "hash".to_string(),
            status: AccountStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn number_format_splits_id_into_middle_and_last() {
        assert_eq!(account_number_for_id(1), "1234-000-000001");
        assert_eq!(account_number_for_id(999_999), "1234-000-999999");
        assert_eq!(account_number_for_id(1_000_000), "1234-001-000000");
        assert_eq!(account_number_for_id(987_654_321), "1234-987-654321");
    }

    #[test]
    fn numbers_are_distinct_for_sequential_ids() {
        let numbers: HashSet<String> = (1..=10_000).map(account_number_for_id).collect();
        assert_eq!(numbers.len(), 10_000);
    }

    #[test]
    fn assigning_twice_fails_fast() {
        let mut acct = account(0);
        acct.assign_account_number().unwrap();
        assert_eq!(acct.account_number, "1234-000-000007");
        assert!(matches!(
            acct.assign_account_number(),
            Err(LedgerError::InvalidState(_))
        ));
    }

    #[test]
    fn withdraw_refuses_to_go_negative() {
        let mut acct = account(100);
        assert!(matches!(
            acct.withdraw(101),
            Err(LedgerError::InsufficientBalance)
        ));
        assert_eq!(acct.balance, 100);
        acct.withdraw(100).unwrap();
        assert_eq!(acct.balance, 0);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            AccountStatus::Active,
            AccountStatus::Frozen,
            AccountStatus::Closed,
        ] {
            assert_eq!(AccountStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AccountStatus::parse("DORMANT"), None);
    }
}
