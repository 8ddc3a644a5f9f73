//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both CLI and REST API.
//! The session controller and account service are generic over the storage
//! traits; AppState pins them to the concrete infra implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use msgdeck_core::event::EventBus;
use msgdeck_core::service::account::AccountService;
use msgdeck_core::session::{SessionConfig, SessionController};
use msgdeck_core::transport::{BoxTransportProvider, ProviderRegistry};
use msgdeck_infra::config::{load_global_config, resolve_session_dir};
use msgdeck_infra::credentials::FsCredentialStore;
use msgdeck_infra::filesystem::resolve_data_dir;
use msgdeck_infra::sqlite::account::SqliteAccountDirectory;
use msgdeck_infra::sqlite::pool::DatabasePool;
use msgdeck_infra::transport::SubprocessTransportProvider;
use msgdeck_types::account::Platform;
use msgdeck_types::config::GlobalConfig;

/// Concrete type aliases for the service generics pinned to infra implementations.
pub type ConcreteSessionController = SessionController<SqliteAccountDirectory, FsCredentialStore>;

pub type ConcreteAccountService = AccountService<SqliteAccountDirectory, FsCredentialStore>;

/// Shared application state holding all services.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: ConcreteSessionController,
    pub account_service: Arc<ConcreteAccountService>,
    pub event_bus: EventBus,
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize the application state from the resolved data directory.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_global_config(&data_dir).await;
        Self::open(data_dir, config).await
    }

    /// Wire services for `data_dir` with an already loaded config.
    pub async fn open(data_dir: PathBuf, config: GlobalConfig) -> anyhow::Result<Self> {
        let db_url = format!(
            "sqlite://{}?mode=rwc",
            data_dir.join("msgdeck.db").display()
        );
        let db_pool = DatabasePool::new(&db_url).await?;

        let session_dir = resolve_session_dir(&config, &data_dir);
        tokio::fs::create_dir_all(&session_dir).await?;

        let credentials = FsCredentialStore::new(&session_dir);
        let directory = SqliteAccountDirectory::new(db_pool.clone(), credentials.clone());
        let providers = build_providers(&config, &session_dir);
        let event_bus = EventBus::new(config.events.capacity);

        let sessions = SessionController::new(
            providers,
            directory,
            credentials,
            event_bus.clone(),
            SessionConfig::from_global(&config),
        );
        let account_service = AccountService::new(sessions.clone());

        Ok(Self {
            sessions,
            account_service: Arc::new(account_service),
            event_bus,
            config: Arc::new(config),
            data_dir,
            db_pool,
        })
    }
}

/// One subprocess provider per platform that has a bridge configured.
fn build_providers(config: &GlobalConfig, session_dir: &Path) -> ProviderRegistry {
    let mut providers = ProviderRegistry::new();
    for platform in Platform::ALL {
        match config.transport.bridge(platform) {
            Some(bridge) => {
                tracing::info!(%platform, command = %bridge.command, "transport bridge configured");
                providers.register(BoxTransportProvider::new(SubprocessTransportProvider::new(
                    platform,
                    bridge.clone(),
                    session_dir,
                )));
            }
            None => {
                tracing::info!(%platform, "no transport bridge configured, platform unavailable");
            }
        }
    }
    providers
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use msgdeck_types::config::BridgeConfig;

    /// State over a throwaway data directory. Keep the returned guard alive
    /// for the duration of the test.
    pub(crate) async fn test_state(config: GlobalConfig) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path().to_path_buf(), config).await.unwrap();
        (state, dir)
    }

    #[tokio::test]
    async fn test_open_creates_database_and_session_dir() {
        let (state, dir) = test_state(GlobalConfig::default()).await;
        assert!(dir.path().join("msgdeck.db").exists());
        assert!(dir.path().join("sessions").is_dir());
        assert!(state.sessions.providers().platforms().is_empty());
    }

    #[test]
    fn test_build_providers_only_for_configured_bridges() {
        let mut config = GlobalConfig::default();
        config.transport.whatsapp = Some(BridgeConfig {
            command: "node".to_string(),
            args: vec!["bridge.js".to_string()],
            env: Default::default(),
            request_timeout_secs: 30,
        });

        let providers = build_providers(&config, Path::new("/tmp/sessions"));
        assert_eq!(providers.platforms(), vec![Platform::Whatsapp]);
        assert!(providers.get(Platform::Telegram).is_none());
    }
}
