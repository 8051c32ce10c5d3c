//! Account lifecycle and settings.
//!
//! Account numbers are derived from the durable id, so creation is
//! two-step: insert with the sentinel number to obtain the id, then assign
//! the number exactly once under the row lock.

use std::sync::Arc;

use tracing::info;

use crate::domain::Account;
use crate::error::{LedgerError, LedgerResult};
use crate::ports::{Clock, CredentialVerifier, LedgerStore, NewAccount};

/// Settings change request. Either field may be absent; a credential change
/// re-authenticates against the current secret.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub transfer_limit: Option<i64>,
    pub credential_change: Option<CredentialChange>,
}

#[derive(Debug, Clone)]
pub struct CredentialChange {
    pub current: String,
    pub new_secret: String,
}

pub struct AccountService {
    store: Arc<dyn LedgerStore>,
    verifier: Arc<dyn CredentialVerifier>,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        verifier: Arc<dyn CredentialVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            verifier,
            clock,
        }
    }

    pub async fn create_account(
        &self,
        owner_id: i64,
        account_name: &str,
        initial_balance: i64,
        transfer_limit: Option<i64>,
        secret: &str,
    ) -> LedgerResult<Account> {
        if account_name.trim().is_empty() {
            return Err(LedgerError::Validation(
                "account name must not be empty".to_string(),
            ));
        }
        if initial_balance < 0 {
            return Err(LedgerError::Validation(
                "initial balance must be non-negative".to_string(),
            ));
        }
        if transfer_limit.is_some_and(|limit| limit < 0) {
            return Err(LedgerError::Validation(
                "transfer limit must be non-negative".to_string(),
            ));
        }

        let created = self
            .store
            .create_account(NewAccount {
                owner_id,
                account_name: account_name.to_string(),
                initial_balance,
                transfer_limit,
                auth_credential: self.verifier.hash(secret),
                created_at: self.clock.now(),
            })
            .await?;

        let mut uow = self.store.begin().await?;
        let mut account = uow
            .account_for_update(created.id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {}", created.id)))?;
        account.assign_account_number()?;
        uow.save_account(&account).await?;
        uow.commit().await?;

        info!(
            account_id = account.id,
            account_number = %account.account_number,
            "account created"
        );
        Ok(account)
    }

    pub async fn accounts_for_owner(&self, owner_id: i64) -> LedgerResult<Vec<Account>> {
        Ok(self.store.accounts_for_owner(owner_id).await?)
    }

    pub async fn account_by_number(&self, number: &str) -> LedgerResult<Account> {
        self.store
            .find_account_by_number(number)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {number}")))
    }

    pub async fn transfer_limit(&self, account_id: i64, user_id: i64) -> LedgerResult<Option<i64>> {
        let account = self.owned_account(account_id, user_id).await?;
        Ok(account.transfer_limit)
    }

    pub async fn update_settings(
        &self,
        account_id: i64,
        user_id: i64,
        update: SettingsUpdate,
    ) -> LedgerResult<()> {
        if update.transfer_limit.is_some_and(|limit| limit < 0) {
            return Err(LedgerError::Validation(
                "transfer limit must be non-negative".to_string(),
            ));
        }

        let mut uow = self.store.begin().await?;
        let mut account = uow
            .account_for_update(account_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {account_id}")))?;
        if account.owner_id != user_id {
            return Err(LedgerError::Forbidden(
                "account is not owned by the caller".to_string(),
            ));
        }

        if let Some(limit) = update.transfer_limit {
            account.transfer_limit = Some(limit);
        }
        if let Some(change) = &update.credential_change {
            if !self.verifier.verify(&change.current, &account.auth_credential) {
                return Err(LedgerError::CredentialMismatch);
            }
            account.auth_credential = self.verifier.hash(&change.new_secret);
        }

        uow.save_account(&account).await?;
        uow.commit().await?;

        info!(account_id, "account settings updated");
        Ok(())
    }

    /// Re-authenticate a sensitive action against the account's credential.
    pub async fn verify_credential(&self, account_id: i64, secret: &str) -> LedgerResult<()> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {account_id}")))?;
        if !self.verifier.verify(secret, &account.auth_credential) {
            return Err(LedgerError::CredentialMismatch);
        }
        Ok(())
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
}
