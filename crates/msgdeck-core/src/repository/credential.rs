//! Credential store trait definition.

use msgdeck_types::account::{AccountKey, Platform};
use msgdeck_types::error::RepositoryError;

/// Read/delete access to the transport credentials persisted per account
/// (e.g. a WhatsApp multi-file auth state or a Telegram session file).
///
/// Used to reconcile dashboards against accounts that can reconnect without
/// re-authenticating but have no live session.
pub trait CredentialStore: Send + Sync {
    fn has_credentials(
        &self,
        key: &AccountKey,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Keys with stored credentials, optionally restricted to one platform.
    fn list_keys(
        &self,
        platform: Option<Platform>,
    ) -> impl std::future::Future<Output = Result<Vec<AccountKey>, RepositoryError>> + Send;

    fn delete(
        &self,
        key: &AccountKey,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
