//! In-memory collaborators and a scriptable transport for controller and
//! service tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use msgdeck_types::account::{Account, AccountId, AccountKey, AccountStatus, Platform};
use msgdeck_types::error::{RepositoryError, TransportError};
use msgdeck_types::message::{ChatKind, ChatSummary, SendReceipt};
use msgdeck_types::session::{AuthMethod, UserInfo};

use crate::event::EventBus;
use crate::repository::account::{AccountDirectory, AccountFilter};
use crate::repository::credential::CredentialStore;
use crate::session::{ReconnectPolicy, SessionConfig, SessionController};
use crate::transport::{
    BoxTransportProvider, BoxTransportSession, ProviderRegistry, SignInOutcome, TransportConnection,
    TransportEvent, TransportProvider, TransportSession,
};

pub fn wa_key(phone: &str) -> AccountKey {
    AccountKey::new(Platform::Whatsapp, phone).unwrap()
}

pub fn tg_key(phone: &str) -> AccountKey {
    AccountKey::new(Platform::Telegram, phone).unwrap()
}

/// Let every runnable task finish its work.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ---------------------------------------------------------------------------
// Scriptable transport
// ---------------------------------------------------------------------------

/// How the mock transport answers, plus the retry ceiling of the harness.
#[derive(Clone)]
pub struct MockBehavior {
    /// Events queued on every new connection before it is returned.
    pub on_connect: Vec<TransportEvent>,
    pub connect_delay: Duration,
    pub connect_error: Option<TransportError>,
    pub logout_delay: Duration,
    pub logout_error: Option<TransportError>,
    pub code_outcome: Option<SignInOutcome>,
    pub code_error: Option<TransportError>,
    /// Accepted 2FA password; `None` accepts anything.
    pub password: Option<String>,
    pub max_attempts: u32,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            on_connect: Vec::new(),
            connect_delay: Duration::ZERO,
            connect_error: None,
            logout_delay: Duration::ZERO,
            logout_error: None,
            code_outcome: None,
            code_error: None,
            password: None,
            max_attempts: 8,
        }
    }
}

#[derive(Default)]
struct MockState {
    behavior: Mutex<MockBehavior>,
    senders: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
    connects: AtomicUsize,
    sends: AtomicUsize,
    logouts: AtomicUsize,
    closes: AtomicUsize,
}

#[derive(Clone)]
pub struct MockProvider {
    platform: Platform,
    state: Arc<MockState>,
}

impl MockProvider {
    pub fn new(platform: Platform, behavior: MockBehavior) -> Self {
        let state = MockState {
            behavior: Mutex::new(behavior),
            ..MockState::default()
        };
        Self {
            platform,
            state: Arc::new(state),
        }
    }

    /// Push an event on the newest connection.
    pub async fn emit(&self, event: TransportEvent) {
        let sender = self.state.senders.lock().unwrap().last().cloned();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Push an event on the `index`-th connection ever opened.
    pub async fn emit_to(&self, index: usize, event: TransportEvent) {
        let sender = self.state.senders.lock().unwrap().get(index).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// End every event stream, as a crashed transport would.
    pub fn drop_streams(&self) {
        self.state.senders.lock().unwrap().clear();
    }

    /// Make every later connect fail with `err`.
    pub fn fail_connects(&self, err: TransportError) {
        self.state.behavior.lock().unwrap().connect_error = Some(err);
    }

    /// Replace the events queued on later connections.
    pub fn set_on_connect(&self, events: Vec<TransportEvent>) {
        self.state.behavior.lock().unwrap().on_connect = events;
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> usize {
        self.state.sends.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.state.logouts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    fn behavior(&self) -> MockBehavior {
        self.state.behavior.lock().unwrap().clone()
    }
}

impl TransportProvider for MockProvider {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn connect(
        &self,
        _key: &AccountKey,
        _method: AuthMethod,
    ) -> Result<TransportConnection, TransportError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior();
        if !behavior.connect_delay.is_zero() {
            tokio::time::sleep(behavior.connect_delay).await;
        }
        if let Some(err) = behavior.connect_error {
            return Err(err);
        }

        let (tx, rx) = mpsc::channel(64);
        for event in behavior.on_connect {
            let _ = tx.try_send(event);
        }
        self.state.senders.lock().unwrap().push(tx);
        Ok(TransportConnection {
            session: BoxTransportSession::new(MockSession {
                state: Arc::clone(&self.state),
            }),
            events: rx,
        })
    }
}

struct MockSession {
    state: Arc<MockState>,
}

impl MockSession {
    fn behavior(&self) -> MockBehavior {
        self.state.behavior.lock().unwrap().clone()
    }
}

impl TransportSession for MockSession {
    async fn send(&self, _chat_id: &str, _text: &str) -> Result<SendReceipt, TransportError> {
        let n = self.state.sends.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SendReceipt {
            message_id: format!("msg-{n}"),
            timestamp: Utc::now(),
        })
    }

    async fn list_chats(&self, limit: usize) -> Result<Vec<ChatSummary>, TransportError> {
        Ok((0..limit.min(3))
            .map(|i| ChatSummary {
                id: i.to_string(),
                name: format!("Chat {i}"),
                kind: ChatKind::Private,
                unread_count: 0,
                last_message: None,
                last_message_at: None,
            })
            .collect())
    }

    async fn submit_code(&self, _code: &str) -> Result<SignInOutcome, TransportError> {
        let behavior = self.behavior();
        if let Some(err) = behavior.code_error {
            return Err(err);
        }
        Ok(behavior
            .code_outcome
            .unwrap_or_else(|| SignInOutcome::Complete(UserInfo::default())))
    }

    async fn submit_password(&self, password: &str) -> Result<UserInfo, TransportError> {
        match self.behavior().password {
            Some(expected) if expected != password => Err(TransportError::CredentialRejected(
                "PASSWORD_HASH_INVALID".to_string(),
            )),
            _ => Ok(UserInfo {
                id: Some("7".to_string()),
                name: Some("Bob".to_string()),
                username: Some("bob".to_string()),
            }),
        }
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.state.logouts.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior();
        if !behavior.logout_delay.is_zero() {
            tokio::time::sleep(behavior.logout_delay).await;
        }
        match behavior.logout_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn close(&self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// In-memory stores
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    keys: Arc<Mutex<BTreeSet<AccountKey>>>,
}

impl MemoryCredentialStore {
    pub fn insert(&self, key: &AccountKey) {
        self.keys.lock().unwrap().insert(key.clone());
    }

    pub fn contains(&self, key: &AccountKey) -> bool {
        self.keys.lock().unwrap().contains(key)
    }
}

impl CredentialStore for MemoryCredentialStore {
    async fn has_credentials(&self, key: &AccountKey) -> Result<bool, RepositoryError> {
        Ok(self.contains(key))
    }

    async fn list_keys(&self, platform: Option<Platform>) -> Result<Vec<AccountKey>, RepositoryError> {
        Ok(self
            .keys
            .lock()
            .unwrap()
            .iter()
            .filter(|k| platform.is_none_or(|p| k.platform == p))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &AccountKey) -> Result<(), RepositoryError> {
        self.keys.lock().unwrap().remove(key);
        Ok(())
    }
}

#[derive(Default)]
struct DirectoryState {
    accounts: Mutex<Vec<Account>>,
    credential_deletes: AtomicUsize,
}

/// Account directory over a `Vec`, deleting credentials from a shared
/// [`MemoryCredentialStore`].
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<DirectoryState>,
    credentials: MemoryCredentialStore,
}

impl MemoryDirectory {
    pub fn new(credentials: MemoryCredentialStore) -> Self {
        Self {
            state: Arc::default(),
            credentials,
        }
    }

    pub fn status_of(&self, key: &AccountKey) -> Option<AccountStatus> {
        self.find(key).map(|a| a.status)
    }

    pub fn last_active_of(&self, key: &AccountKey) -> Option<DateTime<Utc>> {
        self.find(key).and_then(|a| a.last_active)
    }

    pub fn seed_status(&self, key: &AccountKey, status: AccountStatus) {
        let mut account = Account::new(key);
        account.status = status;
        let mut accounts = self.state.accounts.lock().unwrap();
        accounts.retain(|a| a.key() != *key);
        accounts.push(account);
    }

    pub fn credential_deletes(&self) -> usize {
        self.state.credential_deletes.load(Ordering::SeqCst)
    }

    fn find(&self, key: &AccountKey) -> Option<Account> {
        self.state
            .accounts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.key() == *key)
            .cloned()
    }

    fn modify(&self, key: &AccountKey, f: impl FnOnce(&mut Account)) {
        let mut accounts = self.state.accounts.lock().unwrap();
        if let Some(account) = accounts.iter_mut().find(|a| a.key() == *key) {
            f(account);
        }
    }
}

impl AccountDirectory for MemoryDirectory {
    async fn create(&self, account: &Account) -> Result<Account, RepositoryError> {
        let mut accounts = self.state.accounts.lock().unwrap();
        if accounts.iter().any(|a| a.key() == account.key()) {
            return Err(RepositoryError::Conflict(account.key().to_string()));
        }
        accounts.push(account.clone());
        Ok(account.clone())
    }

    async fn get_by_id(&self, id: &AccountId) -> Result<Option<Account>, RepositoryError> {
        let accounts = self.state.accounts.lock().unwrap();
        Ok(accounts.iter().find(|a| a.id == *id).cloned())
    }

    async fn get_by_key(&self, key: &AccountKey) -> Result<Option<Account>, RepositoryError> {
        Ok(self.find(key))
    }

    async fn list(&self, filter: Option<AccountFilter>) -> Result<Vec<Account>, RepositoryError> {
        let filter = filter.unwrap_or_default();
        let accounts = self.state.accounts.lock().unwrap();
        Ok(accounts
            .iter()
            .filter(|a| filter.platform.is_none_or(|p| a.platform == p))
            .filter(|a| filter.status.is_none_or(|s| a.status == s))
            .cloned()
            .collect())
    }

    async fn update(&self, account: &Account) -> Result<Account, RepositoryError> {
        let mut accounts = self.state.accounts.lock().unwrap();
        let slot = accounts
            .iter_mut()
            .find(|a| a.id == account.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = Account {
            status: slot.status,
            last_active: slot.last_active,
            ..account.clone()
        };
        Ok(slot.clone())
    }

    async fn delete(&self, id: &AccountId) -> Result<(), RepositoryError> {
        let mut accounts = self.state.accounts.lock().unwrap();
        let before = accounts.len();
        accounts.retain(|a| a.id != *id);
        if accounts.len() == before {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn upsert_account(&self, key: &AccountKey) -> Result<Account, RepositoryError> {
        if let Some(existing) = self.find(key) {
            return Ok(existing);
        }
        let account = Account::new(key);
        self.state.accounts.lock().unwrap().push(account.clone());
        Ok(account)
    }

    async fn set_status(&self, key: &AccountKey, status: AccountStatus) -> Result<(), RepositoryError> {
        self.modify(key, |a| {
            if a.status != AccountStatus::Suspended {
                a.status = status;
            }
        });
        Ok(())
    }

    async fn set_suspended(&self, id: &AccountId, suspended: bool) -> Result<(), RepositoryError> {
        let mut accounts = self.state.accounts.lock().unwrap();
        let account = accounts
            .iter_mut()
            .find(|a| a.id == *id)
            .ok_or(RepositoryError::NotFound)?;
        if suspended {
            account.status = AccountStatus::Suspended;
        } else if account.status == AccountStatus::Suspended {
            account.status = AccountStatus::Inactive;
        }
        Ok(())
    }

    async fn touch_last_active(&self, key: &AccountKey) -> Result<(), RepositoryError> {
        self.modify(key, |a| a.last_active = Some(Utc::now()));
        Ok(())
    }

    async fn delete_stored_credentials(&self, key: &AccountKey) -> Result<(), RepositoryError> {
        self.state.credential_deletes.fetch_add(1, Ordering::SeqCst);
        self.credentials.delete(key).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub type TestController = SessionController<MemoryDirectory, MemoryCredentialStore>;

pub struct Harness {
    pub controller: TestController,
    pub provider: MockProvider,
    pub directory: MemoryDirectory,
    pub credentials: MemoryCredentialStore,
}

/// Controller with a mock WhatsApp transport, zero jitter, and the default
/// 2 s credential wait / 120 s credential timeout.
pub fn harness(behavior: MockBehavior) -> Harness {
    let provider = MockProvider::new(Platform::Whatsapp, behavior);
    let credentials = MemoryCredentialStore::default();
    let directory = MemoryDirectory::new(credentials.clone());
    Harness::build(provider, directory, credentials)
}

impl Harness {
    fn build(
        provider: MockProvider,
        directory: MemoryDirectory,
        credentials: MemoryCredentialStore,
    ) -> Self {
        let mut providers = ProviderRegistry::new();
        providers.register(BoxTransportProvider::new(provider.clone()));
        let config = SessionConfig {
            reconnect: ReconnectPolicy {
                jitter: 0.0,
                max_attempts: provider.behavior().max_attempts,
                ..ReconnectPolicy::default()
            },
            ..SessionConfig::default()
        };
        let controller = SessionController::new(
            providers,
            directory.clone(),
            credentials.clone(),
            EventBus::new(256),
            config,
        );
        Self {
            controller,
            provider,
            directory,
            credentials,
        }
    }

    /// Rebuild with the mock transport serving `platform` instead.
    pub fn with_platform(self, platform: Platform) -> Self {
        let provider = MockProvider {
            platform,
            state: self.provider.state,
        };
        Self::build(provider, self.directory, self.credentials)
    }
}
