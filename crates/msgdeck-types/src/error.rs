use thiserror::Error;

/// Errors surfaced by session lifecycle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport provider could not be reached or refused to connect.
    #[error("transport provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The operation requires a connected session.
    #[error("account is not connected")]
    NotConnected,

    /// A verification code or 2FA password was rejected.
    #[error("credential rejected: {0}")]
    CredentialRejected(String),

    /// There is no pending credential of the kind being submitted.
    #[error("no pending {0} for this account")]
    NoPendingCredential(&'static str),

    /// The remote logout failed. Local teardown still happened; this is
    /// only ever logged.
    #[error("logout failed: {0}")]
    LogoutFailure(String),

    /// The phone number is empty after normalization.
    #[error("invalid account key: {0}")]
    InvalidAccountKey(String),

    /// The account is administratively suspended.
    #[error("account is suspended")]
    AccountSuspended,

    /// A transport call on a connected session failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The account directory failed.
    #[error("account directory error: {0}")]
    Directory(String),
}

/// Errors returned by a transport provider or its session handle.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("credential rejected: {0}")]
    CredentialRejected(String),

    #[error("session closed")]
    Closed,

    #[error("request timed out")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

/// Errors related to account management.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account not found")]
    NotFound,

    #[error("account {0} already exists")]
    Conflict(String),

    #[error("invalid account: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Errors from repository operations (used by trait definitions in msgdeck-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}
