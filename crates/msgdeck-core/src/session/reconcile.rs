//! Transport event handling, timers, and connect plumbing.
//!
//! Each connection gets one event pump task that funnels its events into
//! `handle_transport_event`, one at a time, under the account lock. Events
//! tagged with a generation other than the session's current one are stale
//! and dropped, so a replaced or closed connection can never move the state
//! machine.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio_util::sync::CancellationToken;

use msgdeck_types::account::{AccountKey, AccountStatus};
use msgdeck_types::error::{SessionError, TransportError};
use msgdeck_types::event::{DisconnectReason, LifecycleEventKind};
use msgdeck_types::session::{AuthMethod, PendingCredential, SessionPhase, UserInfo};

use crate::repository::account::AccountDirectory;
use crate::repository::credential::CredentialStore;
use crate::transport::TransportEvent;

use super::controller::{ConnectIntent, SessionController};
use super::{Session, SessionTimer, TimerKind, TransportHandle};

pub(super) enum ConnectOutcome {
    /// The connection is attached to the session and its pump is running.
    Attached,
    Failed(TransportError),
    /// The session was removed or replaced while connecting.
    Superseded,
}

impl<D, C> SessionController<D, C>
where
    D: AccountDirectory + 'static,
    C: CredentialStore + 'static,
{
    pub(super) fn next_generation(&self) -> u64 {
        self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(super) fn is_current(&self, key: &AccountKey, generation: u64) -> bool {
        self.inner.registry.generation(key) == Some(generation)
    }

    pub(super) fn register_intent(&self, key: &AccountKey, generation: u64) -> CancellationToken {
        let token = CancellationToken::new();
        let intent = ConnectIntent {
            generation,
            token: token.clone(),
        };
        if let Some(previous) = self.inner.intents.insert(key.clone(), intent) {
            previous.token.cancel();
        }
        token
    }

    pub(super) fn cancel_intent(&self, key: &AccountKey) {
        if let Some((_, intent)) = self.inner.intents.remove(key) {
            tracing::debug!(account = %key, generation = intent.generation, "cancelling in-flight connect");
            intent.token.cancel();
        }
    }

    /// Connect outside the account lock, then re-take it and attach the
    /// connection if `generation` is still current.
    ///
    /// Returns with the lock held so the caller can settle the outcome
    /// atomically.
    pub(super) async fn connect_generation(
        &self,
        key: &AccountKey,
        method: AuthMethod,
        generation: u64,
        token: CancellationToken,
    ) -> (OwnedMutexGuard<()>, ConnectOutcome) {
        let result = match self.inner.providers.get(key.platform) {
            Some(provider) => {
                tokio::select! {
                    _ = token.cancelled() => None,
                    result = provider.connect(key, method) => Some(result),
                }
            }
            None => Some(Err(TransportError::Unavailable(format!(
                "no transport configured for {}",
                key.platform
            )))),
        };

        let guard = self.inner.locks.lock(key).await;
        self.inner
            .intents
            .remove_if(key, |_, intent| intent.generation == generation);
        let current = self.is_current(key, generation);

        let outcome = match (result, current) {
            (None, _) | (Some(Err(_)), false) => ConnectOutcome::Superseded,
            (Some(Ok(connection)), false) => {
                connection.session.close().await;
                ConnectOutcome::Superseded
            }
            (Some(Err(err)), true) => ConnectOutcome::Failed(err),
            (Some(Ok(connection)), true) => {
                let handle = Arc::new(TransportHandle::new(connection.session, generation));
                self.inner
                    .registry
                    .update(key, |s| s.handle = Some(Arc::clone(&handle)));
                self.spawn_pump(key.clone(), generation, connection.events);
                tracing::debug!(account = %key, generation, "transport connected");
                ConnectOutcome::Attached
            }
        };
        (guard, outcome)
    }

    fn spawn_pump(&self, key: AccountKey, generation: u64, mut events: mpsc::Receiver<TransportEvent>) {
        let controller = self.clone();
        tokio::spawn(async move {
            loop {
                let Some(event) = events.recv().await else {
                    let ended = TransportEvent::ConnectionClose {
                        reason: "transport event stream ended".to_string(),
                        logged_out: false,
                    };
                    controller.handle_transport_event(&key, generation, ended).await;
                    break;
                };
                if !controller.handle_transport_event(&key, generation, event).await {
                    break;
                }
            }
            controller.prune_lock(&key);
        });
    }

    /// Apply one transport event. Returns false once the connection is done
    /// (closed or stale) and its pump should stop.
    pub(super) async fn handle_transport_event(
        &self,
        key: &AccountKey,
        generation: u64,
        event: TransportEvent,
    ) -> bool {
        let _guard = self.inner.locks.lock(key).await;
        if !self.is_current(key, generation) {
            tracing::debug!(account = %key, generation, "dropping event from stale connection");
            return false;
        }

        match event {
            TransportEvent::Qr { data } => {
                let kind = LifecycleEventKind::QrIssued { qr: data.clone() };
                self.apply_credential(key, PendingCredential::Qr { data }, Some(kind))
                    .await;
                true
            }
            TransportEvent::PairingCode { code } => {
                let kind = LifecycleEventKind::PairingIssued { code: code.clone() };
                self.apply_credential(key, PendingCredential::PairingCode { code }, Some(kind))
                    .await;
                true
            }
            TransportEvent::CodeSent { phone_code_hash } => {
                self.apply_credential(
                    key,
                    PendingCredential::VerificationCode { phone_code_hash },
                    Some(LifecycleEventKind::CodeRequested),
                )
                .await;
                true
            }
            TransportEvent::ConnectionOpen { user_info } => {
                self.apply_open(key, user_info).await;
                true
            }
            TransportEvent::ConnectionClose { reason, logged_out } => {
                if logged_out {
                    self.apply_logged_out(key).await;
                } else {
                    self.apply_transient_close(key, reason).await;
                }
                false
            }
            TransportEvent::MessageReceived(message) => {
                if message.is_system_traffic() {
                    tracing::trace!(account = %key, chat_id = %message.chat_id, "skipping broadcast/system message");
                } else {
                    self.inner
                        .bus
                        .emit(key, LifecycleEventKind::MessageReceived { message });
                }
                true
            }
        }
    }

    /// Record a credential the operator must act on and (re)arm its expiry.
    pub(super) async fn apply_credential(
        &self,
        key: &AccountKey,
        credential: PendingCredential,
        kind: Option<LifecycleEventKind>,
    ) {
        let timer = self.arm_timer(
            key,
            TimerKind::CredentialExpiry,
            self.inner.config.credential_timeout,
        );
        let previous = self.inner.registry.update(key, |s| {
            if s.phase.is_connected() {
                return None;
            }
            let previous = s.phase;
            s.transition(SessionPhase::AwaitingCredentialScan);
            s.pending_credential = Some(credential);
            s.timer = Some(timer);
            Some(previous)
        });

        match previous.flatten() {
            Some(previous) => {
                if previous != SessionPhase::AwaitingCredentialScan {
                    self.project_status(key, AccountStatus::Pending).await;
                }
                if let Some(kind) = kind {
                    tracing::info!(account = %key, credential = kind.name(), "credential issued");
                    self.inner.bus.emit(key, kind);
                }
            }
            None => {
                tracing::warn!(account = %key, "ignoring credential for a connected session");
            }
        }
    }

    /// Mark the session connected. Duplicate opens are no-ops.
    pub(super) async fn apply_open(&self, key: &AccountKey, user_info: Option<UserInfo>) {
        let opened = self.inner.registry.update(key, |s| {
            if s.phase.is_connected() {
                return None;
            }
            s.transition(SessionPhase::Connected);
            s.timer = None;
            s.reconnect_attempts = 0;
            if user_info.is_some() {
                s.user_info = user_info;
            }
            Some(s.user_info.clone())
        });

        let Some(Some(user_info)) = opened else {
            tracing::debug!(account = %key, "ignoring duplicate connection open");
            return;
        };

        tracing::info!(account = %key, "session connected");
        self.inner
            .bus
            .emit(key, LifecycleEventKind::Connected { user_info });
        self.project_status(key, AccountStatus::Active).await;
        if let Err(e) = self.inner.directory.touch_last_active(key).await {
            tracing::warn!(account = %key, error = %e, "failed to update last_active");
        }
    }

    /// The credentials are gone: tear everything down for good.
    pub(super) async fn apply_logged_out(&self, key: &AccountKey) {
        if let Some(session) = self.inner.registry.remove(key) {
            self.release(session).await;
        }
        self.inner.registry.mark_logged_out(key);
        // Failure is logged inside; nobody awaits this path.
        let _ = self.delete_credentials(key).await;
        self.inner.bus.emit(key, LifecycleEventKind::LoggedOut);
        self.project_status(key, AccountStatus::Inactive).await;
        tracing::info!(account = %key, "session logged out");
    }

    /// A non-logout close: schedule the next retry or give up.
    pub(super) async fn apply_transient_close(&self, key: &AccountKey, reason: String) {
        let Some((retries, handle)) = self
            .inner
            .registry
            .update(key, |s| (s.reconnect_attempts, s.handle.take()))
        else {
            return;
        };
        if let Some(handle) = handle {
            handle.close().await;
        }

        let policy = &self.inner.config.reconnect;
        if !policy.allows(retries) {
            if let Some(session) = self.inner.registry.remove(key) {
                self.release(session).await;
            }
            tracing::warn!(account = %key, attempts = retries, %reason, "reconnect attempts exhausted");
            self.inner.bus.emit(
                key,
                LifecycleEventKind::Disconnected {
                    reason: DisconnectReason::RetriesExhausted { attempts: retries },
                    will_retry: false,
                    retry_in_ms: None,
                },
            );
            self.project_status(key, AccountStatus::Inactive).await;
            return;
        }

        let attempt = retries + 1;
        let delay = policy.delay_for(attempt);
        let timer = self.arm_timer(key, TimerKind::Retry, delay);
        // Anything still queued on the closed connection is stale from here.
        let fresh = self.next_generation();
        self.inner.registry.update(key, |s| {
            s.transition(SessionPhase::Reconnecting);
            s.reconnect_attempts = attempt;
            s.pending_credential = None;
            s.generation = fresh;
            s.timer = Some(timer);
        });

        tracing::info!(
            account = %key,
            attempt,
            delay_ms = delay.as_millis() as u64,
            %reason,
            "connection lost, scheduling reconnect"
        );
        self.inner.bus.emit(
            key,
            LifecycleEventKind::Disconnected {
                reason: DisconnectReason::Transport { message: reason },
                will_retry: true,
                retry_in_ms: Some(delay.as_millis() as u64),
            },
        );
        self.project_status(key, AccountStatus::Pending).await;
    }

    /// Spawn a timer task. Dropping the returned `SessionTimer` cancels it.
    pub(super) fn arm_timer(&self, key: &AccountKey, kind: TimerKind, delay: Duration) -> SessionTimer {
        let token = CancellationToken::new();
        let fired = token.clone();
        let controller = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = fired.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    controller.on_timer(&key, kind, fired).await;
                    controller.prune_lock(&key);
                }
            }
        });
        SessionTimer {
            _guard: token.drop_guard(),
        }
    }

    async fn on_timer(&self, key: &AccountKey, kind: TimerKind, token: CancellationToken) {
        let guard = self.inner.locks.lock(key).await;
        // Replaced or dropped while we waited for the lock.
        if token.is_cancelled() {
            return;
        }

        match kind {
            TimerKind::CredentialExpiry => {
                let expired = self
                    .inner
                    .registry
                    .update(key, |s| {
                        matches!(
                            s.phase,
                            SessionPhase::Authenticating | SessionPhase::AwaitingCredentialScan
                        )
                    })
                    .unwrap_or(false);
                if !expired {
                    return;
                }
                self.cancel_intent(key);
                if let Some(session) = self.inner.registry.remove(key) {
                    self.release(session).await;
                }
                tracing::info!(account = %key, "authentication attempt expired");
                self.inner.bus.emit(
                    key,
                    LifecycleEventKind::Disconnected {
                        reason: DisconnectReason::CredentialExpired,
                        will_retry: false,
                        retry_in_ms: None,
                    },
                );
                self.project_status(key, AccountStatus::Inactive).await;
            }
            TimerKind::Handshake => {
                let stalled = self
                    .inner
                    .registry
                    .update(key, |s| s.phase == SessionPhase::Reconnecting)
                    .unwrap_or(false);
                if !stalled {
                    return;
                }
                self.cancel_intent(key);
                tracing::warn!(account = %key, "reconnect did not open in time");
                self.apply_transient_close(key, "reconnect handshake timed out".to_string())
                    .await;
            }
            TimerKind::Retry => {
                let generation = self.next_generation();
                let handshake = self.arm_timer(
                    key,
                    TimerKind::Handshake,
                    self.inner.config.credential_timeout,
                );
                let retry = self
                    .inner
                    .registry
                    .update(key, |s| {
                        if s.phase != SessionPhase::Reconnecting {
                            return None;
                        }
                        s.generation = generation;
                        s.timer = Some(handshake);
                        Some((s.method, s.reconnect_attempts))
                    })
                    .flatten();
                let Some((method, attempt)) = retry else {
                    return;
                };
                let token = self.register_intent(key, generation);
                drop(guard);

                tracing::info!(account = %key, attempt, generation, "reconnecting");
                let (_guard, outcome) = self.connect_generation(key, method, generation, token).await;
                if let ConnectOutcome::Failed(err) = outcome {
                    self.apply_transient_close(key, err.to_string()).await;
                }
            }
        }
    }

    /// Drop a removed session's timer and close its connection.
    pub(super) async fn release(&self, session: Session) {
        drop(session.timer);
        if let Some(handle) = session.handle {
            handle.close().await;
        }
    }

    /// Forget `key`'s lock once it has no session left.
    pub(super) fn prune_lock(&self, key: &AccountKey) {
        if self.inner.registry.generation(key).is_none() {
            self.inner.locks.prune(key);
        }
    }

    pub(super) async fn project_status(&self, key: &AccountKey, status: AccountStatus) {
        if let Err(e) = self.inner.directory.set_status(key, status).await {
            tracing::warn!(account = %key, %status, error = %e, "failed to update account status");
        }
    }

    pub(super) async fn delete_credentials(&self, key: &AccountKey) -> Result<(), SessionError> {
        self.inner
            .directory
            .delete_stored_credentials(key)
            .await
            .map_err(|e| {
                tracing::warn!(account = %key, error = %e, "failed to delete stored credentials");
                SessionError::Directory(e.to_string())
            })
    }
}
