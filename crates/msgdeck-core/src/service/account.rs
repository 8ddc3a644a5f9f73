//! Account management service.
//!
//! CRUD over the account directory, coordinated with the session controller
//! so that suspending or deleting an account never leaves a live session
//! behind.

use chrono::Utc;

use msgdeck_types::account::{
    Account, AccountId, AccountStatus, CreateAccountRequest, UpdateAccountRequest,
};
use msgdeck_types::error::{AccountError, RepositoryError};

use crate::repository::account::{AccountDirectory, AccountFilter};
use crate::repository::credential::CredentialStore;
use crate::session::SessionController;
use crate::session::controller::account_key;

fn storage_error(e: RepositoryError) -> AccountError {
    match e {
        RepositoryError::NotFound => AccountError::NotFound,
        RepositoryError::Conflict(msg) => AccountError::Conflict(msg),
        other => AccountError::StorageError(other.to_string()),
    }
}

/// Service orchestrating the account lifecycle.
pub struct AccountService<D: AccountDirectory, C: CredentialStore> {
    sessions: SessionController<D, C>,
}

impl<D, C> AccountService<D, C>
where
    D: AccountDirectory + 'static,
    C: CredentialStore + 'static,
{
    pub fn new(sessions: SessionController<D, C>) -> Self {
        Self { sessions }
    }

    fn directory(&self) -> &D {
        self.sessions.directory()
    }

    /// Register an account. Fails with `Conflict` if `(phone, platform)` is
    /// already registered.
    pub async fn create_account(&self, request: CreateAccountRequest) -> Result<Account, AccountError> {
        let key = account_key(request.platform, &request.phone_number)
            .map_err(|e| AccountError::Validation(e.to_string()))?;

        let mut account = Account::new(&key);
        account.country_code = non_empty(request.country_code);
        account.display_name = non_empty(request.display_name);
        account.notes = non_empty(request.notes);

        let account = self
            .directory()
            .create(&account)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => AccountError::Conflict(key.to_string()),
                other => storage_error(other),
            })?;
        tracing::info!(account = %key, id = %account.id, "account registered");
        Ok(account)
    }

    pub async fn list_accounts(&self, filter: AccountFilter) -> Result<Vec<Account>, AccountError> {
        self.directory().list(Some(filter)).await.map_err(storage_error)
    }

    pub async fn get_account(&self, id: &AccountId) -> Result<Account, AccountError> {
        self.directory()
            .get_by_id(id)
            .await
            .map_err(storage_error)?
            .ok_or(AccountError::NotFound)
    }

    /// Apply a partial update.
    ///
    /// A suspension is stored before the session is torn down, so a racing
    /// `start_auth` already sees it. Lifting a suspension leaves the account
    /// `inactive` until it authenticates again. Status and `last_active`
    /// are never written back from the copy read here.
    pub async fn update_account(
        &self,
        id: &AccountId,
        request: UpdateAccountRequest,
    ) -> Result<Account, AccountError> {
        let mut account = self.get_account(id).await?;

        if let Some(interval) = request.keep_alive_interval {
            if interval <= 0 {
                return Err(AccountError::Validation(
                    "keep_alive_interval must be positive".to_string(),
                ));
            }
            account.keep_alive_interval = interval;
        }
        if let Some(enabled) = request.keep_alive_enabled {
            account.keep_alive_enabled = enabled;
        }
        if let Some(display_name) = request.display_name {
            account.display_name = non_empty(Some(display_name));
        }
        if let Some(notes) = request.notes {
            account.notes = non_empty(Some(notes));
        }

        match request.suspended {
            Some(true) if account.status != AccountStatus::Suspended => {
                self.directory()
                    .set_suspended(id, true)
                    .await
                    .map_err(storage_error)?;
                self.sessions.disconnect(&account.key()).await?;
                tracing::info!(account = %account.key(), "account suspended");
            }
            Some(false) if account.status == AccountStatus::Suspended => {
                self.directory()
                    .set_suspended(id, false)
                    .await
                    .map_err(storage_error)?;
                tracing::info!(account = %account.key(), "account suspension lifted");
            }
            _ => {}
        }

        account.updated_at = Utc::now();
        self.directory().update(&account).await.map_err(storage_error)
    }

    /// Disconnect any session, then delete the account.
    pub async fn delete_account(&self, id: &AccountId) -> Result<(), AccountError> {
        let account = self.get_account(id).await?;
        self.sessions.disconnect(&account.key()).await?;
        self.directory().delete(id).await.map_err(storage_error)?;
        tracing::info!(account = %account.key(), %id, "account deleted");
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
