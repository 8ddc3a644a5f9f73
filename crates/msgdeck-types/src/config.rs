//! Global configuration types for msgdeck.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls the
//! HTTP listener, authentication timing, reconnect policy, event fan-out, and
//! the per-platform transport bridges.

use serde::{Deserialize, Serialize};

use crate::account::Platform;

/// Top-level configuration.
///
/// Loaded from `~/.msgdeck/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    /// Directory holding per-account transport credentials. Relative paths
    /// are resolved against the data directory.
    #[serde(default = "default_session_dir")]
    pub session_dir: String,
}

fn default_session_dir() -> String {
    "sessions".to_string()
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8002
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Authentication timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// How long `start_auth` waits for the first QR/pairing code before
    /// answering without one.
    #[serde(default = "default_credential_wait_ms")]
    pub credential_wait_ms: u64,

    /// How long a session may sit in `awaiting_credential_scan` without a
    /// fresh credential before it is torn down.
    #[serde(default = "default_credential_timeout_secs")]
    pub credential_timeout_secs: u64,
}

fn default_credential_wait_ms() -> u64 {
    2_000
}

fn default_credential_timeout_secs() -> u64 {
    120
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credential_wait_ms: default_credential_wait_ms(),
            credential_timeout_secs: default_credential_timeout_secs(),
        }
    }
}

/// Reconnect backoff after a non-logout connection close.
///
/// Attempt `n` (1-based) waits `min(initial * multiplier^(n-1), max)`,
/// spread by `jitter` (a fraction, 0.2 = ±20%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

fn default_max_attempts() -> u32 {
    8
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Event broadcaster settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Per-subscriber buffer; slower subscribers lose the oldest events.
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

/// Per-platform transport bridges. A platform without a bridge has no
/// provider and every `start_auth` for it fails as unavailable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    pub telegram: Option<BridgeConfig>,
    pub whatsapp: Option<BridgeConfig>,
}

impl TransportConfig {
    pub fn bridge(&self, platform: Platform) -> Option<&BridgeConfig> {
        match platform {
            Platform::Telegram => self.telegram.as_ref(),
            Platform::Whatsapp => self.whatsapp.as_ref(),
        }
    }
}

/// External bridge process speaking newline-delimited JSON over stdio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Executable to spawn (e.g. `node`).
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the bridge (API ids, hashes).
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
    /// Timeout for a single bridge request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}
