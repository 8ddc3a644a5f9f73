//! On-disk transport credentials.
//!
//! Bridges persist their auth state (WhatsApp multi-file auth state, a
//! Telegram session file) under `{session_dir}/{platform}/{phone_number}/`.
//! A directory with at least one entry counts as stored credentials.

use std::path::{Path, PathBuf};

use msgdeck_core::repository::credential::CredentialStore;
use msgdeck_types::account::{AccountKey, Platform};
use msgdeck_types::error::RepositoryError;

use crate::filesystem::credential_dir;

/// Filesystem-backed [`CredentialStore`].
#[derive(Debug, Clone)]
pub struct FsCredentialStore {
    root: PathBuf,
}

impl FsCredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a bridge should use for `key`'s auth state.
    pub fn dir_for(&self, key: &AccountKey) -> PathBuf {
        credential_dir(&self.root, key)
    }
}

async fn has_entries(dir: &Path) -> Result<bool, std::io::Error> {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => Ok(entries.next_entry().await?.is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn io_error(e: std::io::Error) -> RepositoryError {
    RepositoryError::Query(format!("credential store: {e}"))
}

impl CredentialStore for FsCredentialStore {
    async fn has_credentials(&self, key: &AccountKey) -> Result<bool, RepositoryError> {
        has_entries(&self.dir_for(key)).await.map_err(io_error)
    }

    async fn list_keys(&self, platform: Option<Platform>) -> Result<Vec<AccountKey>, RepositoryError> {
        let platforms = match platform {
            Some(p) => vec![p],
            None => Platform::ALL.to_vec(),
        };

        let mut keys = Vec::new();
        for platform in platforms {
            let platform_dir = self.root.join(platform.as_str());
            let mut entries = match tokio::fs::read_dir(&platform_dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(e)),
            };

            while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
                if !entry.file_type().await.map_err(io_error)?.is_dir() {
                    continue;
                }
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                // Only directories named by a normalized number are ours.
                let Some(key) = AccountKey::new(platform, name) else {
                    continue;
                };
                if key.phone_number != name {
                    continue;
                }
                if has_entries(&entry.path()).await.map_err(io_error)? {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &AccountKey) -> Result<(), RepositoryError> {
        let dir = self.dir_for(key);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!(account = %key, path = %dir.display(), "deleted stored credentials");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e)),
        }
    }
}
