//! Data directory layout for msgdeck.
//!
//! ```text
//! {data_dir}/
//!   config.toml
//!   msgdeck.db
//!   sessions/{platform}/{phone_number}/   transport credentials
//! ```

use std::path::{Path, PathBuf};

use msgdeck_types::account::AccountKey;

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `MSGDECK_DATA_DIR` environment variable
/// 2. `~/.msgdeck` under the user's home directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MSGDECK_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".msgdeck");
    }

    // Last resort: current directory
    PathBuf::from(".msgdeck")
}

/// Credential directory of one account: `{session_dir}/{platform}/{phone}/`.
pub fn credential_dir(session_dir: &Path, key: &AccountKey) -> PathBuf {
    session_dir
        .join(key.platform.as_str())
        .join(&key.phone_number)
}
