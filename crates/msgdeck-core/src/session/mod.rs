//! Session lifecycle: registry, state machine, and reconciliation.
//!
//! A `Session` is the live, in-memory connection of one account. The
//! `SessionRegistry` owns every session; only the `SessionController`
//! mutates it, each change under the account's `KeyedLocks` entry.

pub mod backoff;
pub mod controller;
pub(crate) mod gate;
mod reconcile;
pub mod registry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio_util::sync::DropGuard;

use msgdeck_types::account::AccountKey;
use msgdeck_types::session::{AuthMethod, PendingCredential, SessionPhase, SessionStatus, UserInfo};

use crate::transport::BoxTransportSession;

pub use backoff::ReconnectPolicy;
pub use controller::{SessionConfig, SessionController};
pub use registry::SessionRegistry;

/// One open transport connection, tagged with the generation it belongs to.
///
/// Closing is idempotent; a closed handle is never reused.
pub(crate) struct TransportHandle {
    session: BoxTransportSession,
    generation: u64,
    closed: AtomicBool,
}

impl TransportHandle {
    pub(crate) fn new(session: BoxTransportSession, generation: u64) -> Self {
        Self {
            session,
            generation,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn transport(&self) -> &BoxTransportSession {
        &self.session
    }

    /// Close the connection once. Later calls return immediately.
    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.session.close().await;
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("generation", &self.generation)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    Retry,
    /// Bounds an authentication attempt, from allocation until it connects.
    CredentialExpiry,
    /// Bounds a reconnect, from the retry firing until the connection opens.
    Handshake,
}

/// The one pending timer of a session. Dropping it cancels the timer task.
#[derive(Debug)]
pub(crate) struct SessionTimer {
    pub(crate) _guard: DropGuard,
}

/// Live state of one account's session.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) key: AccountKey,
    pub(crate) phase: SessionPhase,
    pub(crate) method: AuthMethod,
    pub(crate) pending_credential: Option<PendingCredential>,
    pub(crate) user_info: Option<UserInfo>,
    pub(crate) last_event_at: DateTime<Utc>,
    pub(crate) reconnect_attempts: u32,
    /// Generation of the current (or pending) connection. Events tagged with
    /// any other generation are stale.
    pub(crate) generation: u64,
    pub(crate) handle: Option<Arc<TransportHandle>>,
    pub(crate) timer: Option<SessionTimer>,
}

impl Session {
    pub(crate) fn new(key: AccountKey, method: AuthMethod, generation: u64) -> Self {
        Self {
            key,
            phase: SessionPhase::Authenticating,
            method,
            pending_credential: None,
            user_info: None,
            last_event_at: Utc::now(),
            reconnect_attempts: 0,
            generation,
            handle: None,
            timer: None,
        }
    }

    /// Move to `next`, logging transitions the state machine does not allow.
    pub(crate) fn transition(&mut self, next: SessionPhase) {
        if self.phase != next && !self.phase.can_transition_to(next) {
            tracing::warn!(
                account = %self.key,
                from = %self.phase,
                to = %next,
                "unexpected session transition"
            );
        }
        self.phase = next;
        self.last_event_at = Utc::now();
        if next.is_connected() {
            self.pending_credential = None;
        }
    }

    pub(crate) fn status(&self) -> SessionStatus {
        SessionStatus {
            account_key: self.key.clone(),
            phase: self.phase,
            is_connected: self.phase.is_connected(),
            pending_credential: self.pending_credential.clone(),
            user_info: self.user_info.clone(),
            last_event_at: Some(self.last_event_at),
        }
    }
}
