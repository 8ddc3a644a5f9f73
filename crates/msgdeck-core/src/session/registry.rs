//! Session registry: the single authority on which accounts have a session.
//!
//! Reads are public and never wait on a session operation. All writes are
//! crate-private and issued by the controller while holding the account's
//! lock, so no other component can diverge from its view.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use msgdeck_types::account::{AccountKey, Platform};
use msgdeck_types::session::{SessionPhase, SessionStatus};

use super::Session;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<AccountKey, Session>,
    /// Keys whose last session ended in a logout. Cleared by the next
    /// authentication attempt.
    logged_out: DashMap<AccountKey, DateTime<Utc>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the session for `key`, if one exists.
    pub fn get(&self, key: &AccountKey) -> Option<SessionStatus> {
        self.sessions.get(key).map(|s| s.status())
    }

    /// Status for `key`, falling back to `logged_out` or `idle`.
    pub fn status(&self, key: &AccountKey) -> SessionStatus {
        if let Some(status) = self.get(key) {
            return status;
        }
        let mut status = SessionStatus::idle(key.clone());
        if let Some(at) = self.logged_out.get(key) {
            status.phase = SessionPhase::LoggedOut;
            status.last_event_at = Some(*at);
        }
        status
    }

    /// Snapshots of every session, ordered by key.
    pub fn list_all(&self) -> Vec<SessionStatus> {
        let mut all: Vec<SessionStatus> = self.sessions.iter().map(|s| s.status()).collect();
        all.sort_by(|a, b| a.account_key.cmp(&b.account_key));
        all
    }

    pub fn list_platform(&self, platform: Platform) -> Vec<SessionStatus> {
        self.list_all()
            .into_iter()
            .filter(|s| s.account_key.platform == platform)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of sessions currently connected.
    pub fn connected_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.phase.is_connected()).count()
    }

    pub(crate) fn generation(&self, key: &AccountKey) -> Option<u64> {
        self.sessions.get(key).map(|s| s.generation)
    }

    pub(crate) fn contains(&self, key: &AccountKey) -> bool {
        self.sessions.contains_key(key)
    }

    /// Insert or replace the session for its key, returning the old one.
    pub(crate) fn upsert(&self, session: Session) -> Option<Session> {
        self.sessions.insert(session.key.clone(), session)
    }

    /// Run `f` against the session for `key`.
    pub(crate) fn update<R>(&self, key: &AccountKey, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.get_mut(key).map(|mut s| f(&mut s))
    }

    pub(crate) fn remove(&self, key: &AccountKey) -> Option<Session> {
        self.sessions.remove(key).map(|(_, s)| s)
    }

    /// Remove and return every session.
    pub(crate) fn drain(&self) -> Vec<Session> {
        let keys: Vec<AccountKey> = self.sessions.iter().map(|s| s.key().clone()).collect();
        keys.iter().filter_map(|k| self.remove(k)).collect()
    }

    pub(crate) fn mark_logged_out(&self, key: &AccountKey) {
        self.logged_out.insert(key.clone(), Utc::now());
    }

    pub(crate) fn clear_logged_out(&self, key: &AccountKey) {
        self.logged_out.remove(key);
    }
}
