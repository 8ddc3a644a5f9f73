//! Session lifecycle controller.
//!
//! Drives each account's state machine:
//!
//! ```text
//! idle -> authenticating -> awaiting_credential_scan -> connected
//!                                      connected <-> reconnecting
//!                              connected -> closing -> idle
//! any non-idle phase -> logged_out
//! ```
//!
//! Every mutation for one account runs under that account's lock. Transport
//! I/O (connect, logout, send, code submission) happens outside the lock so
//! that the connection's event pump is never starved while a request waits
//! for its reply.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use msgdeck_types::account::{AccountKey, AccountStatus, Platform};
use msgdeck_types::config::GlobalConfig;
use msgdeck_types::error::{SessionError, TransportError};
use msgdeck_types::event::{LifecycleEvent, LifecycleEventKind};
use msgdeck_types::message::{ChatSummary, SendReceipt};
use msgdeck_types::session::{
    AuthMethod, AuthStart, PendingCredential, SessionPhase, SessionStatus, SessionSummary,
    VerificationOutcome,
};

use crate::event::EventBus;
use crate::repository::account::AccountDirectory;
use crate::repository::credential::CredentialStore;
use crate::transport::{ProviderRegistry, SignInOutcome};

use super::backoff::ReconnectPolicy;
use super::gate::KeyedLocks;
use super::registry::SessionRegistry;
use super::{Session, TimerKind};
use super::reconcile::ConnectOutcome;

/// Default number of chats returned by `list_chats`.
pub const DEFAULT_CHAT_LIMIT: usize = 20;

/// Timing knobs of the lifecycle.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long `start_auth` waits for the first credential.
    pub credential_wait: Duration,
    /// How long `awaiting_credential_scan` may last without a fresh credential.
    pub credential_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl SessionConfig {
    pub fn from_global(config: &GlobalConfig) -> Self {
        Self {
            credential_wait: Duration::from_millis(config.auth.credential_wait_ms),
            credential_timeout: Duration::from_secs(config.auth.credential_timeout_secs),
            reconnect: ReconnectPolicy::from_config(&config.reconnect),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_global(&GlobalConfig::default())
    }
}

/// In-flight connect for one key, cancellable by `disconnect` or a newer
/// `start_auth`.
pub(super) struct ConnectIntent {
    pub(super) generation: u64,
    pub(super) token: CancellationToken,
}

pub(super) struct Inner<D, C> {
    pub(super) registry: SessionRegistry,
    pub(super) providers: ProviderRegistry,
    pub(super) directory: D,
    pub(super) credentials: C,
    pub(super) bus: EventBus,
    pub(super) locks: KeyedLocks,
    pub(super) intents: DashMap<AccountKey, ConnectIntent>,
    pub(super) generations: AtomicU64,
    pub(super) config: SessionConfig,
}

/// Owner of every session and the only writer to the [`SessionRegistry`].
///
/// Cheap to clone; clones share state.
pub struct SessionController<D, C> {
    pub(super) inner: Arc<Inner<D, C>>,
}

impl<D, C> Clone for SessionController<D, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Build a normalized account key, rejecting numbers without digits.
pub fn account_key(platform: Platform, phone_number: &str) -> Result<AccountKey, SessionError> {
    AccountKey::new(platform, phone_number)
        .ok_or_else(|| SessionError::InvalidAccountKey(format!("'{phone_number}' has no digits")))
}

/// Map a transport failure on a credential submission.
fn credential_error(err: TransportError) -> SessionError {
    match err {
        TransportError::CredentialRejected(reason) => SessionError::CredentialRejected(reason),
        TransportError::Closed => SessionError::NotConnected,
        other => SessionError::Transport(other.to_string()),
    }
}

fn transport_error(err: TransportError) -> SessionError {
    match err {
        TransportError::Closed => SessionError::NotConnected,
        other => SessionError::Transport(other.to_string()),
    }
}

impl<D, C> SessionController<D, C>
where
    D: AccountDirectory + 'static,
    C: CredentialStore + 'static,
{
    pub fn new(
        providers: ProviderRegistry,
        directory: D,
        credentials: C,
        bus: EventBus,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: SessionRegistry::new(),
                providers,
                directory,
                credentials,
                bus,
                locks: KeyedLocks::new(),
                intents: DashMap::new(),
                generations: AtomicU64::new(0),
                config,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn directory(&self) -> &D {
        &self.inner.directory
    }

    pub fn credentials(&self) -> &C {
        &self.inner.credentials
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.inner.providers
    }

    /// Begin authenticating `key`.
    ///
    /// Returns the existing phase when a session is already live. A session
    /// waiting to reconnect is replaced by a fresh attempt. On success waits
    /// up to `credential_wait` so the answer can carry the first QR/pairing
    /// code.
    pub async fn start_auth(
        &self,
        key: &AccountKey,
        method: AuthMethod,
    ) -> Result<AuthStart, SessionError> {
        // Subscribe before connecting so the first credential cannot be missed.
        let mut events = self.inner.bus.subscribe();

        let (generation, token) = {
            let _guard = self.inner.locks.lock(key).await;

            if let Some(existing) = self.inner.registry.get(key) {
                if existing.phase != SessionPhase::Reconnecting {
                    tracing::debug!(account = %key, phase = %existing.phase, "session already in progress");
                    return Ok(AuthStart {
                        phase: existing.phase,
                        started: false,
                        pending_credential: existing.pending_credential,
                    });
                }
            }

            if self.inner.providers.get(key.platform).is_none() {
                return Err(SessionError::ProviderUnavailable(format!(
                    "no transport configured for {}",
                    key.platform
                )));
            }

            let account = self
                .inner
                .directory
                .upsert_account(key)
                .await
                .map_err(|e| SessionError::Directory(e.to_string()))?;
            if account.status == AccountStatus::Suspended {
                return Err(SessionError::AccountSuspended);
            }

            self.cancel_intent(key);
            if let Some(stale) = self.inner.registry.remove(key) {
                tracing::info!(account = %key, "replacing reconnecting session");
                self.release(stale).await;
            }
            self.inner.registry.clear_logged_out(key);

            let generation = self.next_generation();
            let mut session = Session::new(key.clone(), method, generation);
            // A transport that never answers must not pin the account.
            session.timer = Some(self.arm_timer(
                key,
                TimerKind::CredentialExpiry,
                self.inner.config.credential_timeout,
            ));
            self.inner.registry.upsert(session);
            let token = self.register_intent(key, generation);
            self.project_status(key, AccountStatus::Pending).await;
            (generation, token)
        };

        tracing::info!(account = %key, %method, generation, "starting authentication");

        let (guard, outcome) = self.connect_generation(key, method, generation, token).await;
        match outcome {
            ConnectOutcome::Attached => {}
            ConnectOutcome::Failed(err) => {
                self.inner.registry.remove(key);
                self.project_status(key, AccountStatus::Inactive).await;
                drop(guard);
                self.prune_lock(key);
                tracing::warn!(account = %key, error = %err, "transport connect failed");
                return Err(SessionError::ProviderUnavailable(err.to_string()));
            }
            ConnectOutcome::Superseded => {
                drop(guard);
                let status = self.inner.registry.status(key);
                return Ok(AuthStart {
                    phase: status.phase,
                    started: false,
                    pending_credential: status.pending_credential,
                });
            }
        }
        drop(guard);

        self.await_first_credential(key, &mut events).await;

        let status = self.inner.registry.status(key);
        Ok(AuthStart {
            phase: status.phase,
            started: true,
            pending_credential: status.pending_credential,
        })
    }

    async fn await_first_credential(
        &self,
        key: &AccountKey,
        events: &mut broadcast::Receiver<LifecycleEvent>,
    ) {
        let wait = self.inner.config.credential_wait;
        if wait.is_zero() {
            return;
        }
        let still_authenticating =
            || self.inner.registry.get(key).map(|s| s.phase) == Some(SessionPhase::Authenticating);
        if !still_authenticating() {
            return;
        }

        let waited = tokio::time::timeout(wait, async {
            loop {
                match events.recv().await {
                    Ok(event) if event.account_key == *key => match event.kind {
                        LifecycleEventKind::MessageReceived { .. } => {}
                        _ => return,
                    },
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if !still_authenticating() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
        .await;

        if waited.is_err() {
            tracing::debug!(account = %key, ?wait, "no credential issued yet");
        }
    }

    /// Submit the verification code sent to the phone.
    pub async fn submit_verification_code(
        &self,
        key: &AccountKey,
        code: &str,
    ) -> Result<VerificationOutcome, SessionError> {
        let (handle, generation) = {
            let _guard = self.inner.locks.lock(key).await;
            self.inner
                .registry
                .update(key, |s| {
                    let awaiting_code = s.phase == SessionPhase::AwaitingCredentialScan
                        && matches!(
                            s.pending_credential,
                            Some(PendingCredential::VerificationCode { .. })
                        );
                    if awaiting_code {
                        s.handle.clone().map(|h| (h, s.generation))
                    } else {
                        None
                    }
                })
                .flatten()
                .ok_or(SessionError::NoPendingCredential("verification code"))?
        };

        let result = handle.transport().submit_code(code).await;

        let _guard = self.inner.locks.lock(key).await;
        if !self.is_current(key, generation) {
            return Err(SessionError::NoPendingCredential("verification code"));
        }
        match result.map_err(credential_error)? {
            SignInOutcome::Complete(user_info) => {
                self.apply_open(key, Some(user_info)).await;
                Ok(self.verification_outcome(key, false))
            }
            SignInOutcome::PasswordRequired { hint } => {
                tracing::info!(account = %key, "two-factor password required");
                self.apply_credential(key, PendingCredential::Password { hint }, None)
                    .await;
                Ok(self.verification_outcome(key, true))
            }
        }
    }

    /// Submit the two-factor password after a code was accepted.
    pub async fn submit_password(
        &self,
        key: &AccountKey,
        password: &str,
    ) -> Result<VerificationOutcome, SessionError> {
        let (handle, generation) = {
            let _guard = self.inner.locks.lock(key).await;
            self.inner
                .registry
                .update(key, |s| {
                    let awaiting_password = s.phase == SessionPhase::AwaitingCredentialScan
                        && matches!(s.pending_credential, Some(PendingCredential::Password { .. }));
                    if awaiting_password {
                        s.handle.clone().map(|h| (h, s.generation))
                    } else {
                        None
                    }
                })
                .flatten()
                .ok_or(SessionError::NoPendingCredential("password"))?
        };

        let result = handle.transport().submit_password(password).await;

        let _guard = self.inner.locks.lock(key).await;
        if !self.is_current(key, generation) {
            return Err(SessionError::NoPendingCredential("password"));
        }
        let user_info = result.map_err(credential_error)?;
        self.apply_open(key, Some(user_info)).await;
        Ok(self.verification_outcome(key, false))
    }

    fn verification_outcome(&self, key: &AccountKey, requires_password: bool) -> VerificationOutcome {
        let status = self.inner.registry.status(key);
        VerificationOutcome {
            phase: status.phase,
            requires_password,
            user_info: status.user_info,
        }
    }

    /// Send a text message from a connected account.
    pub async fn send_message(
        &self,
        key: &AccountKey,
        chat_id: &str,
        text: &str,
    ) -> Result<SendReceipt, SessionError> {
        let handle = self.connected_handle(key).await?;
        let receipt = handle
            .transport()
            .send(chat_id, text)
            .await
            .map_err(transport_error)?;
        tracing::debug!(account = %key, chat_id, message_id = %receipt.message_id, "message sent");
        Ok(receipt)
    }

    /// Most recent chats of a connected account.
    pub async fn list_chats(
        &self,
        key: &AccountKey,
        limit: usize,
    ) -> Result<Vec<ChatSummary>, SessionError> {
        let handle = self.connected_handle(key).await?;
        handle
            .transport()
            .list_chats(limit.max(1))
            .await
            .map_err(transport_error)
    }

    async fn connected_handle(
        &self,
        key: &AccountKey,
    ) -> Result<Arc<super::TransportHandle>, SessionError> {
        let _guard = self.inner.locks.lock(key).await;
        self.inner
            .registry
            .update(key, |s| {
                if s.phase.is_connected() {
                    s.handle.clone()
                } else {
                    None
                }
            })
            .flatten()
            .ok_or(SessionError::NotConnected)
    }

    /// Log out and tear down the session for `key`.
    ///
    /// Always deletes stored credentials. A remote logout failure is logged
    /// and the local teardown still happens. Calling it again succeeds
    /// without reaching the transport.
    pub async fn disconnect(&self, key: &AccountKey) -> Result<(), SessionError> {
        self.cancel_intent(key);

        let (handle, closing_generation) = {
            let guard = self.inner.locks.lock(key).await;
            let closing_generation = self.next_generation();
            let closing = self.inner.registry.update(key, |s| {
                if s.phase == SessionPhase::Closing {
                    return None;
                }
                s.transition(SessionPhase::Closing);
                s.timer = None;
                s.pending_credential = None;
                // Late events of the closing connection must not race the teardown.
                s.generation = closing_generation;
                Some(s.handle.take())
            });
            match closing {
                None => {
                    let deleted = self.delete_credentials(key).await;
                    self.project_status(key, AccountStatus::Inactive).await;
                    drop(guard);
                    self.prune_lock(key);
                    tracing::debug!(account = %key, "disconnect without a live session");
                    return deleted;
                }
                Some(None) => {
                    tracing::debug!(account = %key, "disconnect already in progress");
                    return Ok(());
                }
                Some(Some(handle)) => (handle, closing_generation),
            }
        };

        if let Some(handle) = &handle {
            if let Err(e) = handle.transport().logout().await {
                let err = SessionError::LogoutFailure(e.to_string());
                tracing::warn!(account = %key, error = %err, "remote logout failed, tearing down locally");
            }
            handle.close().await;
        }

        let guard = self.inner.locks.lock(key).await;
        if self.is_current(key, closing_generation) {
            self.inner.registry.remove(key);
        }
        self.inner.registry.mark_logged_out(key);
        let deleted = self.delete_credentials(key).await;
        self.inner.bus.emit(key, LifecycleEventKind::LoggedOut);
        self.project_status(key, AccountStatus::Inactive).await;
        drop(guard);
        self.prune_lock(key);
        tracing::info!(account = %key, "session disconnected");
        deleted
    }

    /// Current phase of `key`. Never waits on a session operation.
    pub fn get_status(&self, key: &AccountKey) -> SessionStatus {
        self.inner.registry.status(key)
    }

    /// Whether `key` has transport credentials on disk. Store errors read as
    /// `false`.
    pub async fn has_stored_credentials(&self, key: &AccountKey) -> bool {
        match self.inner.credentials.has_credentials(key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(account = %key, error = %e, "failed to check stored credentials");
                false
            }
        }
    }

    /// Every live session, plus every account that has stored credentials but
    /// no session (`has_session_file` without `is_connected`).
    pub async fn list_sessions(&self, platform: Option<Platform>) -> Vec<SessionSummary> {
        let live = match platform {
            Some(p) => self.inner.registry.list_platform(p),
            None => self.inner.registry.list_all(),
        };
        let stored: BTreeSet<AccountKey> = match self.inner.credentials.list_keys(platform).await {
            Ok(keys) => keys.into_iter().collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to list stored credentials");
                BTreeSet::new()
            }
        };

        let mut summaries: Vec<SessionSummary> = live
            .into_iter()
            .map(|status| SessionSummary {
                has_session_file: stored.contains(&status.account_key),
                has_credential_pending: status.pending_credential.is_some(),
                is_connected: status.is_connected,
                phase: status.phase,
                pending_credential: status.pending_credential,
                user_info: status.user_info,
                account_key: status.account_key,
            })
            .collect();

        for key in stored {
            if self.inner.registry.contains(&key) {
                continue;
            }
            summaries.push(SessionSummary {
                phase: self.inner.registry.status(&key).phase,
                account_key: key,
                is_connected: false,
                has_credential_pending: false,
                has_session_file: true,
                pending_credential: None,
                user_info: None,
            });
        }
        summaries.sort_by(|a, b| a.account_key.cmp(&b.account_key));
        summaries
    }

    /// Close every connection without logging out, keeping credentials for
    /// the next start.
    pub async fn shutdown(&self) {
        let pending: Vec<AccountKey> = self.inner.intents.iter().map(|i| i.key().clone()).collect();
        for key in &pending {
            self.cancel_intent(key);
        }

        let sessions = self.inner.registry.drain();
        let count = sessions.len();
        for session in sessions {
            let key = session.key.clone();
            self.release(session).await;
            self.project_status(&key, AccountStatus::Inactive).await;
        }
        tracing::info!(sessions = count, "session controller shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBehavior, harness, settle, wa_key, tg_key};
    use crate::transport::TransportEvent;
    use msgdeck_types::event::DisconnectReason;
    use msgdeck_types::message::{InboundMessage, MessageKind};
    use msgdeck_types::session::UserInfo;

    fn qr(data: &str) -> TransportEvent {
        TransportEvent::Qr {
            data: data.to_string(),
        }
    }

    fn open() -> TransportEvent {
        TransportEvent::ConnectionOpen {
            user_info: Some(UserInfo {
                id: Some("42".to_string()),
                name: Some("Alice".to_string()),
                username: None,
            }),
        }
    }

    fn close(logged_out: bool) -> TransportEvent {
        TransportEvent::ConnectionClose {
            reason: "stream errored".to_string(),
            logged_out,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    fn count(kinds: &[LifecycleEventKind], name: &str) -> usize {
        kinds.iter().filter(|k| k.name() == name).count()
    }

    #[tokio::test(start_paused = true)]
    async fn qr_scan_then_connection_open() {
        let h = harness(MockBehavior {
            on_connect: vec![qr("data:image/png;base64,AAA")],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");
        let mut rx = h.controller.event_bus().subscribe();

        let started = h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        assert!(started.started);
        assert_eq!(started.phase, SessionPhase::AwaitingCredentialScan);
        assert_eq!(
            started.pending_credential.as_ref().and_then(|c| c.qr()),
            Some("data:image/png;base64,AAA")
        );

        let status = h.controller.get_status(&key);
        assert_eq!(status.phase, SessionPhase::AwaitingCredentialScan);
        assert!(status.pending_credential.is_some());
        assert_eq!(h.directory.status_of(&key), Some(AccountStatus::Pending));

        h.provider.emit(open()).await;
        settle().await;

        let status = h.controller.get_status(&key);
        assert_eq!(status.phase, SessionPhase::Connected);
        assert!(status.is_connected);
        assert!(status.pending_credential.is_none());
        assert_eq!(status.user_info.unwrap().name.as_deref(), Some("Alice"));

        let kinds = drain(&mut rx);
        assert_eq!(count(&kinds, "qr_issued"), 1);
        assert_eq!(count(&kinds, "connected"), 1);
        assert_eq!(h.directory.status_of(&key), Some(AccountStatus::Active));
        assert!(h.directory.last_active_of(&key).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_connection_open_is_a_no_op() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");
        let mut rx = h.controller.event_bus().subscribe();

        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        h.provider.emit(open()).await;
        settle().await;

        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Connected);
        assert_eq!(count(&drain(&mut rx), "connected"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_auth_is_idempotent_for_live_sessions() {
        let h = harness(MockBehavior {
            on_connect: vec![qr("qr-1")],
            ..MockBehavior::default()
        });
        let key = wa_key("+1 555 0100");

        let first = h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        let second = h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();

        assert!(first.started);
        assert!(!second.started);
        assert_eq!(second.phase, SessionPhase::AwaitingCredentialScan);
        assert_eq!(second.pending_credential, first.pending_credential);
        assert_eq!(h.provider.connects(), 1);
        assert_eq!(h.controller.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_start_auth_opens_one_connection() {
        let h = harness(MockBehavior {
            connect_delay: Duration::from_millis(50),
            on_connect: vec![qr("qr-1")],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");

        let (a, b) = tokio::join!(
            h.controller.start_auth(&key, AuthMethod::Qr),
            h.controller.start_auth(&key, AuthMethod::Qr)
        );
        let started = [a.unwrap().started, b.unwrap().started];
        assert_eq!(started.iter().filter(|s| **s).count(), 1);
        assert_eq!(h.provider.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_provider_is_unavailable_and_leaves_idle() {
        let h = harness(MockBehavior::default());
        let key = tg_key("15550100");

        let err = h.controller.start_auth(&key, AuthMethod::PhoneCode).await.unwrap_err();
        assert!(matches!(err, SessionError::ProviderUnavailable(_)));
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Idle);
        assert!(h.controller.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_retains_no_session() {
        let h = harness(MockBehavior {
            connect_error: Some(TransportError::Unavailable("bridge crashed".to_string())),
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");

        let err = h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap_err();
        assert!(matches!(err, SessionError::ProviderUnavailable(_)));
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Idle);
        assert!(h.controller.registry().is_empty());
        assert_eq!(h.directory.status_of(&key), Some(AccountStatus::Inactive));
    }

    #[tokio::test(start_paused = true)]
    async fn suspended_account_cannot_authenticate() {
        let h = harness(MockBehavior::default());
        let key = wa_key("15550100");
        h.directory.seed_status(&key, AccountStatus::Suspended);

        let err = h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap_err();
        assert!(matches!(err, SessionError::AccountSuspended));
        assert_eq!(h.provider.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_connected_session() {
        let h = harness(MockBehavior {
            on_connect: vec![qr("qr-1")],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");

        let err = h.controller.send_message(&key, "chat", "hi").await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));

        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        let err = h.controller.send_message(&key, "chat", "hi").await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));
        assert_eq!(h.provider.sends(), 0);

        h.provider.emit(open()).await;
        settle().await;
        let receipt = h.controller.send_message(&key, "chat", "hi").await.unwrap();
        assert_eq!(receipt.message_id, "msg-1");
        assert_eq!(h.provider.sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn list_chats_from_connected_session() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");
        assert!(matches!(
            h.controller.list_chats(&key, DEFAULT_CHAT_LIMIT).await,
            Err(SessionError::NotConnected)
        ));

        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        let chats = h.controller.list_chats(&key, 1).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].name, "Chat 0");
    }

    #[tokio::test(start_paused = true)]
    async fn logged_out_close_removes_session_and_credentials() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");
        h.credentials.insert(&key);
        let mut rx = h.controller.event_bus().subscribe();

        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        h.provider.emit(close(true)).await;
        settle().await;

        let status = h.controller.get_status(&key);
        assert_eq!(status.phase, SessionPhase::LoggedOut);
        assert!(status.pending_credential.is_none());
        assert!(h.controller.registry().is_empty());
        assert_eq!(h.directory.status_of(&key), Some(AccountStatus::Inactive));
        assert_eq!(h.directory.credential_deletes(), 1);
        assert!(!h.credentials.contains(&key));
        assert_eq!(count(&drain(&mut rx), "logged_out"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_close_reconnects_after_backoff() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");
        let mut rx = h.controller.event_bus().subscribe();

        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        drain(&mut rx);

        h.provider.emit(close(false)).await;
        settle().await;

        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Reconnecting);
        assert_eq!(h.directory.status_of(&key), Some(AccountStatus::Pending));
        assert_eq!(h.provider.closes(), 1);
        match drain(&mut rx).as_slice() {
            [LifecycleEventKind::Disconnected {
                will_retry: true,
                retry_in_ms: Some(5000),
                reason: DisconnectReason::Transport { .. },
            }] => {}
            other => panic!("unexpected events {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(h.provider.connects(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;

        assert_eq!(h.provider.connects(), 2);
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Connected);
        assert_eq!(h.directory.status_of(&key), Some(AccountStatus::Active));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhaust_into_idle() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            max_attempts: 2,
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");
        let mut rx = h.controller.event_bus().subscribe();

        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        h.provider
            .fail_connects(TransportError::Unavailable("offline".to_string()));
        h.provider.emit(close(false)).await;
        settle().await;

        // 5 s for the first retry, 10 s for the second.
        tokio::time::sleep(Duration::from_secs(16)).await;
        settle().await;

        assert_eq!(h.provider.connects(), 3);
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Idle);
        assert!(h.controller.registry().is_empty());
        assert_eq!(h.directory.status_of(&key), Some(AccountStatus::Inactive));

        let kinds = drain(&mut rx);
        let last = kinds.last().unwrap();
        assert!(matches!(
            last,
            LifecycleEventKind::Disconnected {
                will_retry: false,
                reason: DisconnectReason::RetriesExhausted { attempts: 2 },
                ..
            }
        ));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.provider.connects(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_end_counts_as_transient_close() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");

        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        h.provider.drop_streams();
        settle().await;

        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn start_auth_replaces_reconnecting_session() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");

        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        h.provider.emit(close(false)).await;
        settle().await;
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Reconnecting);

        let restarted = h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        assert!(restarted.started);
        assert_eq!(restarted.phase, SessionPhase::Connected);
        assert_eq!(h.provider.connects(), 2);

        // The replaced retry timer never fires.
        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(h.provider.connects(), 2);
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn events_from_replaced_connection_are_dropped() {
        let h = harness(MockBehavior {
            on_connect: vec![qr("qr-1")],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");

        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        h.provider.emit(close(false)).await;
        settle().await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(h.provider.connects(), 2);

        // A late open on the first connection must not mark the account connected.
        h.provider.emit_to(0, open()).await;
        settle().await;
        assert_eq!(
            h.controller.get_status(&key).phase,
            SessionPhase::AwaitingCredentialScan
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_twice_logs_out_once() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");
        h.credentials.insert(&key);
        let mut rx = h.controller.event_bus().subscribe();

        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        h.controller.disconnect(&key).await.unwrap();
        h.controller.disconnect(&key).await.unwrap();

        assert_eq!(h.provider.logouts(), 1);
        assert_eq!(h.provider.closes(), 1);
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::LoggedOut);
        assert!(h.controller.registry().is_empty());
        assert!(!h.credentials.contains(&key));
        assert_eq!(h.directory.credential_deletes(), 2);
        assert_eq!(h.directory.status_of(&key), Some(AccountStatus::Inactive));
        assert_eq!(count(&drain(&mut rx), "logged_out"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_failure_still_tears_down() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            logout_error: Some(TransportError::Timeout),
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");

        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        h.controller.disconnect(&key).await.unwrap();

        assert_eq!(h.provider.logouts(), 1);
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::LoggedOut);
        assert!(h.controller.registry().is_empty());
        assert_eq!(h.directory.credential_deletes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_preempts_in_flight_connect() {
        let h = harness(MockBehavior {
            connect_delay: Duration::from_secs(10),
            on_connect: vec![open()],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");

        let controller = h.controller.clone();
        let auth_key = key.clone();
        let auth = tokio::spawn(async move { controller.start_auth(&auth_key, AuthMethod::Qr).await });
        settle().await;
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Authenticating);

        h.controller.disconnect(&key).await.unwrap();
        let outcome = auth.await.unwrap().unwrap();

        assert!(!outcome.started);
        assert_eq!(h.provider.logouts(), 0);
        assert!(h.controller.registry().is_empty());
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_ne!(h.controller.get_status(&key).phase, SessionPhase::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn unscanned_credential_expires() {
        let h = harness(MockBehavior {
            on_connect: vec![qr("qr-1")],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");
        let mut rx = h.controller.event_bus().subscribe();

        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();

        tokio::time::sleep(Duration::from_secs(100)).await;
        h.provider.emit(qr("qr-2")).await;
        settle().await;

        // The fresh QR re-armed the timer.
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(
            h.controller.get_status(&key).phase,
            SessionPhase::AwaitingCredentialScan
        );

        tokio::time::sleep(Duration::from_secs(80)).await;
        settle().await;
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Idle);
        assert!(h.controller.registry().is_empty());
        assert_eq!(h.provider.closes(), 1);
        assert_eq!(h.directory.status_of(&key), Some(AccountStatus::Inactive));

        let kinds = drain(&mut rx);
        assert!(matches!(
            kinds.last(),
            Some(LifecycleEventKind::Disconnected {
                reason: DisconnectReason::CredentialExpired,
                will_retry: false,
                ..
            })
        ));

        // The next start issues a new credential rather than hanging.
        let again = h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        assert!(again.started);
        assert_eq!(again.phase, SessionPhase::AwaitingCredentialScan);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_transport_expires_authentication() {
        let h = harness(MockBehavior::default());
        let key = wa_key("15550100");
        let mut rx = h.controller.event_bus().subscribe();

        let started = h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        assert!(started.started);
        assert_eq!(started.phase, SessionPhase::Authenticating);

        tokio::time::sleep(Duration::from_secs(110)).await;
        let blocked = h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        assert!(!blocked.started);
        assert_eq!(h.provider.connects(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Idle);
        assert!(h.controller.registry().is_empty());
        assert_eq!(h.provider.closes(), 1);
        assert_eq!(h.directory.status_of(&key), Some(AccountStatus::Inactive));
        assert_eq!(h.controller.inner.locks.len(), 0);
        assert!(matches!(
            drain(&mut rx).last(),
            Some(LifecycleEventKind::Disconnected {
                reason: DisconnectReason::CredentialExpired,
                will_retry: false,
                ..
            })
        ));

        h.provider.set_on_connect(vec![qr("qr-1")]);
        let again = h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        assert!(again.started);
        assert_eq!(again.phase, SessionPhase::AwaitingCredentialScan);
        assert_eq!(h.provider.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_connect_is_abandoned_after_timeout() {
        let h = harness(MockBehavior {
            connect_delay: Duration::from_secs(3_600),
            on_connect: vec![open()],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");

        let outcome = h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();

        assert!(!outcome.started);
        assert_eq!(outcome.phase, SessionPhase::Idle);
        assert!(h.controller.registry().is_empty());
        assert_eq!(h.directory.status_of(&key), Some(AccountStatus::Inactive));
        assert_eq!(h.provider.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_reconnect_counts_as_failed_attempt() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            max_attempts: 2,
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");
        let mut rx = h.controller.event_bus().subscribe();

        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Connected);
        h.provider.set_on_connect(Vec::new());
        h.provider.emit(close(false)).await;
        settle().await;

        // Retry at 5 s attaches but never opens; 120 s later it is given up.
        tokio::time::sleep(Duration::from_secs(130)).await;
        settle().await;
        assert_eq!(h.provider.connects(), 2);
        assert_eq!(h.provider.closes(), 2);
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Reconnecting);
        let kinds = drain(&mut rx);
        assert!(kinds.iter().any(|k| matches!(
            k,
            LifecycleEventKind::Disconnected {
                reason: DisconnectReason::Transport { message },
                will_retry: true,
                retry_in_ms: Some(10_000),
            } if message == "reconnect handshake timed out"
        )));

        // Second retry at 135 s, timed out at 255 s.
        tokio::time::sleep(Duration::from_secs(130)).await;
        settle().await;
        assert_eq!(h.provider.connects(), 3);
        assert_eq!(h.provider.closes(), 3);
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Idle);
        assert_eq!(h.directory.status_of(&key), Some(AccountStatus::Inactive));
        assert!(matches!(
            drain(&mut rx).last(),
            Some(LifecycleEventKind::Disconnected {
                reason: DisconnectReason::RetriesExhausted { attempts: 2 },
                will_retry: false,
                ..
            })
        ));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.provider.connects(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");

        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        h.provider.emit(close(false)).await;
        settle().await;
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::Reconnecting);

        h.controller.disconnect(&key).await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;

        assert_eq!(h.provider.connects(), 1);
        assert_eq!(h.provider.logouts(), 0);
        assert_eq!(h.controller.get_status(&key).phase, SessionPhase::LoggedOut);
        assert!(h.controller.registry().is_empty());
        assert_eq!(h.directory.status_of(&key), Some(AccountStatus::Inactive));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_sessions_release_their_lock() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            ..MockBehavior::default()
        });
        for phone in ["15550100", "15550101", "15550102"] {
            let key = wa_key(phone);
            h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        }
        assert_eq!(h.controller.inner.locks.len(), 3);

        h.controller.disconnect(&wa_key("15550100")).await.unwrap();
        h.provider.emit_to(1, close(true)).await;
        settle().await;

        assert_eq!(h.controller.inner.locks.len(), 1);
        assert_eq!(
            h.controller.get_status(&wa_key("15550102")).phase,
            SessionPhase::Connected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_traffic_is_not_forwarded() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");
        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        let mut rx = h.controller.event_bus().subscribe();

        let message = |chat_id: &str, text: &str| {
            TransportEvent::MessageReceived(InboundMessage {
                chat_id: chat_id.to_string(),
                message_id: "m".to_string(),
                sender_id: None,
                from_me: false,
                text: Some(text.to_string()),
                kind: MessageKind::Text,
                payload: None,
                is_broadcast: false,
                timestamp: chrono::Utc::now(),
            })
        };
        h.provider.emit(message("status@broadcast", "story")).await;
        h.provider.emit(message("15550199@s.whatsapp.net", "hello")).await;
        settle().await;

        let kinds = drain(&mut rx);
        assert_eq!(kinds.len(), 1);
        match &kinds[0] {
            LifecycleEventKind::MessageReceived { message } => {
                assert_eq!(message.text.as_deref(), Some("hello"))
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn captionless_media_is_forwarded() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");
        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        let mut rx = h.controller.event_bus().subscribe();

        let media = |kind: MessageKind| {
            TransportEvent::MessageReceived(InboundMessage {
                chat_id: "15550199@s.whatsapp.net".to_string(),
                message_id: "m".to_string(),
                sender_id: Some("15550199@s.whatsapp.net".to_string()),
                from_me: false,
                text: None,
                kind,
                payload: Some(serde_json::json!({"imageMessage": {"mimetype": "image/jpeg"}})),
                is_broadcast: false,
                timestamp: chrono::Utc::now(),
            })
        };
        h.provider.emit(media(MessageKind::Image)).await;
        // A receipt with neither text nor body stays internal.
        h.provider
            .emit(TransportEvent::MessageReceived(InboundMessage {
                chat_id: "15550199@s.whatsapp.net".to_string(),
                message_id: "r".to_string(),
                sender_id: None,
                from_me: false,
                text: None,
                kind: MessageKind::Text,
                payload: None,
                is_broadcast: false,
                timestamp: chrono::Utc::now(),
            }))
            .await;
        settle().await;

        let kinds = drain(&mut rx);
        assert_eq!(kinds.len(), 1);
        match &kinds[0] {
            LifecycleEventKind::MessageReceived { message } => {
                assert_eq!(message.kind, MessageKind::Image);
                assert!(message.text.is_none());
                assert!(message.payload.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn phone_code_flow_with_two_factor_password() {
        let h = harness(MockBehavior {
            on_connect: vec![TransportEvent::CodeSent {
                phone_code_hash: "hash".to_string(),
            }],
            code_outcome: Some(SignInOutcome::PasswordRequired {
                hint: Some("pet".to_string()),
            }),
            password: Some("hunter2".to_string()),
            ..MockBehavior::default()
        });
        let key = tg_key("447700900123");
        let h = h.with_platform(Platform::Telegram);
        let mut rx = h.controller.event_bus().subscribe();

        let started = h.controller.start_auth(&key, AuthMethod::PhoneCode).await.unwrap();
        assert_eq!(started.phase, SessionPhase::AwaitingCredentialScan);
        assert!(matches!(
            started.pending_credential,
            Some(PendingCredential::VerificationCode { .. })
        ));

        let err = h.controller.submit_password(&key, "hunter2").await.unwrap_err();
        assert!(matches!(err, SessionError::NoPendingCredential(_)));

        let outcome = h.controller.submit_verification_code(&key, "12345").await.unwrap();
        assert!(outcome.requires_password);
        assert_eq!(outcome.phase, SessionPhase::AwaitingCredentialScan);

        let err = h.controller.submit_password(&key, "wrong").await.unwrap_err();
        assert!(matches!(err, SessionError::CredentialRejected(_)));
        assert!(matches!(
            h.controller.get_status(&key).pending_credential,
            Some(PendingCredential::Password { .. })
        ));

        let outcome = h.controller.submit_password(&key, "hunter2").await.unwrap();
        assert_eq!(outcome.phase, SessionPhase::Connected);
        assert!(!outcome.requires_password);
        assert!(h.controller.get_status(&key).pending_credential.is_none());

        let kinds = drain(&mut rx);
        assert_eq!(count(&kinds, "code_requested"), 1);
        assert_eq!(count(&kinds, "connected"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_code_keeps_phase() {
        let h = harness(MockBehavior {
            on_connect: vec![TransportEvent::CodeSent {
                phone_code_hash: "hash".to_string(),
            }],
            code_error: Some(TransportError::CredentialRejected("PHONE_CODE_INVALID".to_string())),
            ..MockBehavior::default()
        })
        .with_platform(Platform::Telegram);
        let key = tg_key("447700900123");

        h.controller.start_auth(&key, AuthMethod::PhoneCode).await.unwrap();
        let err = h.controller.submit_verification_code(&key, "00000").await.unwrap_err();

        assert!(matches!(err, SessionError::CredentialRejected(_)));
        let status = h.controller.get_status(&key);
        assert_eq!(status.phase, SessionPhase::AwaitingCredentialScan);
        assert!(matches!(
            status.pending_credential,
            Some(PendingCredential::VerificationCode { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn list_sessions_includes_stored_credentials() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            ..MockBehavior::default()
        });
        let live = wa_key("15550100");
        let dormant = wa_key("15550199");
        h.credentials.insert(&live);
        h.credentials.insert(&dormant);
        h.credentials.insert(&tg_key("447700900123"));

        h.controller.start_auth(&live, AuthMethod::Qr).await.unwrap();
        let sessions = h.controller.list_sessions(Some(Platform::Whatsapp)).await;

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].account_key, live);
        assert!(sessions[0].is_connected);
        assert!(sessions[0].has_session_file);
        assert_eq!(sessions[1].account_key, dormant);
        assert!(!sessions[1].is_connected);
        assert!(sessions[1].has_session_file);
        assert_eq!(sessions[1].phase, SessionPhase::Idle);

        assert_eq!(h.controller.list_sessions(None).await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_without_logout() {
        let h = harness(MockBehavior {
            on_connect: vec![open()],
            ..MockBehavior::default()
        });
        let key = wa_key("15550100");
        h.credentials.insert(&key);

        h.controller.start_auth(&key, AuthMethod::Qr).await.unwrap();
        h.controller.shutdown().await;

        assert_eq!(h.provider.logouts(), 0);
        assert_eq!(h.provider.closes(), 1);
        assert!(h.controller.registry().is_empty());
        assert!(h.credentials.contains(&key));
        assert_eq!(h.directory.status_of(&key), Some(AccountStatus::Inactive));
    }

    #[test]
    fn account_key_rejects_numbers_without_digits() {
        assert!(matches!(
            account_key(Platform::Whatsapp, "+"),
            Err(SessionError::InvalidAccountKey(_))
        ));
        assert_eq!(
            account_key(Platform::Whatsapp, "+1 555").unwrap().phone_number,
            "1555"
        );
    }
}
