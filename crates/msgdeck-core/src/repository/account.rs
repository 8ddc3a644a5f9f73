//! Account directory trait definition.

use msgdeck_types::account::{Account, AccountId, AccountKey, AccountStatus, Platform};
use msgdeck_types::error::RepositoryError;

use super::SortOrder;

/// Filter criteria for listing accounts.
#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    pub platform: Option<Platform>,
    pub status: Option<AccountStatus>,
    /// Sort by registration time.
    pub sort_order: Option<SortOrder>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Durable store of registered accounts.
///
/// The session controller only touches the lifecycle half of this trait
/// (`upsert_account`, `set_status`, `touch_last_active`,
/// `delete_stored_credentials`); the CRUD half and `set_suspended` back the
/// account service.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait AccountDirectory: Send + Sync {
    /// Insert a new account. Fails with `Conflict` on a duplicate key.
    fn create(
        &self,
        account: &Account,
    ) -> impl std::future::Future<Output = Result<Account, RepositoryError>> + Send;

    fn get_by_id(
        &self,
        id: &AccountId,
    ) -> impl std::future::Future<Output = Result<Option<Account>, RepositoryError>> + Send;

    fn get_by_key(
        &self,
        key: &AccountKey,
    ) -> impl std::future::Future<Output = Result<Option<Account>, RepositoryError>> + Send;

    fn list(
        &self,
        filter: Option<AccountFilter>,
    ) -> impl std::future::Future<Output = Result<Vec<Account>, RepositoryError>> + Send;

    /// Persist the operator-edited fields of an existing account and return
    /// the stored row. `status` and `last_active` belong to the session
    /// lifecycle and are left as stored.
    fn update(
        &self,
        account: &Account,
    ) -> impl std::future::Future<Output = Result<Account, RepositoryError>> + Send;

    fn delete(
        &self,
        id: &AccountId,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Return the account for `key`, registering it with defaults if absent.
    fn upsert_account(
        &self,
        key: &AccountKey,
    ) -> impl std::future::Future<Output = Result<Account, RepositoryError>> + Send;

    /// Set the persisted status projected from the session phase. A key with
    /// no account is a no-op, and a `suspended` account keeps its status.
    fn set_status(
        &self,
        key: &AccountKey,
        status: AccountStatus,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Place or lift an operator suspension. Placing one overrides any
    /// projected status; lifting one leaves the account `inactive`.
    fn set_suspended(
        &self,
        id: &AccountId,
        suspended: bool,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Stamp `last_active` with the current time.
    fn touch_last_active(
        &self,
        key: &AccountKey,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Remove every durable transport credential (session files, auth
    /// state) held for `key`. Succeeds when there is nothing to remove.
    fn delete_stored_credentials(
        &self,
        key: &AccountKey,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
