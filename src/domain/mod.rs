pub mod account;
pub mod transaction;

pub use account::{account_number_for_id, Account, AccountStatus, BANK_CODE, UNASSIGNED_NUMBER};
pub use transaction::{
    NewTransaction, ScheduledTransfer, Transaction, TransactionKind, TransactionStatus,
    TransactionType,
};
