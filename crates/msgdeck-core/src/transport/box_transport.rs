//! Object-safe dynamic dispatch wrappers for the transport traits.
//!
//! Same blanket-impl pattern for both traits:
//! 1. An object-safe `*Dyn` trait with boxed futures
//! 2. Blanket impl of the `*Dyn` trait for every implementor
//! 3. A `Box*` wrapper over `Box<dyn *Dyn>` that delegates

use std::future::Future;
use std::pin::Pin;

use msgdeck_types::account::{AccountKey, Platform};
use msgdeck_types::error::TransportError;
use msgdeck_types::message::{ChatSummary, SendReceipt};
use msgdeck_types::session::{AuthMethod, UserInfo};

use super::provider::{SignInOutcome, TransportConnection, TransportProvider, TransportSession};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`TransportProvider`].
pub trait TransportProviderDyn: Send + Sync {
    fn platform(&self) -> Platform;

    fn connect_boxed<'a>(
        &'a self,
        key: &'a AccountKey,
        method: AuthMethod,
    ) -> BoxFuture<'a, Result<TransportConnection, TransportError>>;
}

impl<T: TransportProvider> TransportProviderDyn for T {
    fn platform(&self) -> Platform {
        TransportProvider::platform(self)
    }

    fn connect_boxed<'a>(
        &'a self,
        key: &'a AccountKey,
        method: AuthMethod,
    ) -> BoxFuture<'a, Result<TransportConnection, TransportError>> {
        Box::pin(self.connect(key, method))
    }
}

/// Type-erased transport provider, selected per platform at runtime.
pub struct BoxTransportProvider {
    inner: Box<dyn TransportProviderDyn + Send + Sync>,
}

impl BoxTransportProvider {
    pub fn new<T: TransportProvider + 'static>(provider: T) -> Self {
        Self {
            inner: Box::new(provider),
        }
    }

    pub fn platform(&self) -> Platform {
        self.inner.platform()
    }

    pub async fn connect(
        &self,
        key: &AccountKey,
        method: AuthMethod,
    ) -> Result<TransportConnection, TransportError> {
        self.inner.connect_boxed(key, method).await
    }
}

/// Object-safe version of [`TransportSession`].
pub trait TransportSessionDyn: Send + Sync {
    fn send_boxed<'a>(
        &'a self,
        chat_id: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<SendReceipt, TransportError>>;

    fn list_chats_boxed(&self, limit: usize) -> BoxFuture<'_, Result<Vec<ChatSummary>, TransportError>>;

    fn submit_code_boxed<'a>(&'a self, code: &'a str)
    -> BoxFuture<'a, Result<SignInOutcome, TransportError>>;

    fn submit_password_boxed<'a>(
        &'a self,
        password: &'a str,
    ) -> BoxFuture<'a, Result<UserInfo, TransportError>>;

    fn logout_boxed(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    fn close_boxed(&self) -> BoxFuture<'_, ()>;
}

impl<T: TransportSession> TransportSessionDyn for T {
    fn send_boxed<'a>(
        &'a self,
        chat_id: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, Result<SendReceipt, TransportError>> {
        Box::pin(self.send(chat_id, text))
    }

    fn list_chats_boxed(&self, limit: usize) -> BoxFuture<'_, Result<Vec<ChatSummary>, TransportError>> {
        Box::pin(self.list_chats(limit))
    }

    fn submit_code_boxed<'a>(
        &'a self,
        code: &'a str,
    ) -> BoxFuture<'a, Result<SignInOutcome, TransportError>> {
        Box::pin(self.submit_code(code))
    }

    fn submit_password_boxed<'a>(
        &'a self,
        password: &'a str,
    ) -> BoxFuture<'a, Result<UserInfo, TransportError>> {
        Box::pin(self.submit_password(password))
    }

    fn logout_boxed(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(self.logout())
    }

    fn close_boxed(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.close())
    }
}

/// Type-erased connection handle.
pub struct BoxTransportSession {
    inner: Box<dyn TransportSessionDyn + Send + Sync>,
}

impl BoxTransportSession {
    pub fn new<T: TransportSession + 'static>(session: T) -> Self {
        Self {
            inner: Box::new(session),
        }
    }

    pub async fn send(&self, chat_id: &str, text: &str) -> Result<SendReceipt, TransportError> {
        self.inner.send_boxed(chat_id, text).await
    }

    pub async fn list_chats(&self, limit: usize) -> Result<Vec<ChatSummary>, TransportError> {
        self.inner.list_chats_boxed(limit).await
    }

    pub async fn submit_code(&self, code: &str) -> Result<SignInOutcome, TransportError> {
        self.inner.submit_code_boxed(code).await
    }

    pub async fn submit_password(&self, password: &str) -> Result<UserInfo, TransportError> {
        self.inner.submit_password_boxed(password).await
    }

    pub async fn logout(&self) -> Result<(), TransportError> {
        self.inner.logout_boxed().await
    }

    pub async fn close(&self) {
        self.inner.close_boxed().await
    }
}

impl std::fmt::Debug for BoxTransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTransportSession").finish_non_exhaustive()
    }
}
