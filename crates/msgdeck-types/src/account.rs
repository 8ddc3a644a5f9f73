use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Default keep-alive interval for new accounts (one day, in seconds).
pub const DEFAULT_KEEP_ALIVE_INTERVAL: i64 = 86_400;

/// Unique identifier for an account, wrapping a UUID v7 (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub Uuid);

impl AccountId {
    /// Create a new AccountId using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create an AccountId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Messaging platform an account lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Telegram,
    Whatsapp,
}

impl Platform {
    /// All supported platforms, in display order.
    pub const ALL: [Platform; 2] = [Platform::Telegram, Platform::Whatsapp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Telegram => "telegram",
            Platform::Whatsapp => "whatsapp",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "telegram" => Ok(Platform::Telegram),
            "whatsapp" => Ok(Platform::Whatsapp),
            other => Err(format!("invalid platform: '{other}'")),
        }
    }
}

/// Persisted, coarse projection of an account's session state.
///
/// - Active: a session is connected
/// - Inactive: no session (idle, logged out, or torn down)
/// - Pending: authentication or reconnection in progress
/// - Suspended: administratively blocked from authenticating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
    Pending,
    Suspended,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountStatus::Active => write!(f, "active"),
            AccountStatus::Inactive => write!(f, "inactive"),
            AccountStatus::Pending => write!(f, "pending"),
            AccountStatus::Suspended => write!(f, "suspended"),
        }
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            "pending" => Ok(AccountStatus::Pending),
            "suspended" => Ok(AccountStatus::Suspended),
            other => Err(format!("invalid account status: '{other}'")),
        }
    }
}

impl Default for AccountStatus {
    fn default() -> Self {
        AccountStatus::Inactive
    }
}

/// Identity of one platform account: `(platform, phone_number)`.
///
/// The phone number is always stored normalized (digits only), so
/// `+1 (555) 010-2000` and `15550102000` address the same session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountKey {
    pub platform: Platform,
    pub phone_number: String,
}

impl AccountKey {
    /// Build a key, normalizing the phone number.
    ///
    /// Returns `None` if the number contains no digits.
    pub fn new(platform: Platform, phone_number: &str) -> Option<Self> {
        let phone_number = normalize_phone_number(phone_number);
        if phone_number.is_empty() {
            return None;
        }
        Some(Self {
            platform,
            phone_number,
        })
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.phone_number)
    }
}

/// Strip everything but ASCII digits from a phone number.
///
/// # Examples
///
/// ```
/// use msgdeck_types::account::normalize_phone_number;
///
/// assert_eq!(normalize_phone_number("+1 (555) 010-2000"), "15550102000");
/// assert_eq!(normalize_phone_number("abc"), "");
/// ```
pub fn normalize_phone_number(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// A registered messaging account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Normalized phone number (digits only).
    pub phone_number: String,
    /// Dialing prefix as entered by the operator (e.g. "+44"), informational.
    pub country_code: Option<String>,
    pub platform: Platform,
    pub display_name: Option<String>,
    pub status: AccountStatus,
    pub notes: Option<String>,
    pub keep_alive_enabled: bool,
    /// Keep-alive interval in seconds.
    pub keep_alive_interval: i64,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last time a session for this account was connected.
    pub last_active: Option<DateTime<Utc>>,
}

impl Account {
    /// A fresh, inactive account for the given key with default settings.
    pub fn new(key: &AccountKey) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::new(),
            phone_number: key.phone_number.clone(),
            country_code: None,
            platform: key.platform,
            display_name: None,
            status: AccountStatus::Inactive,
            notes: None,
            keep_alive_enabled: true,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            registered_at: now,
            updated_at: now,
            last_active: None,
        }
    }

    pub fn key(&self) -> AccountKey {
        AccountKey {
            platform: self.platform,
            phone_number: self.phone_number.clone(),
        }
    }
}

/// Request to register a new account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub phone_number: String,
    pub platform: Platform,
    pub country_code: Option<String>,
    pub display_name: Option<String>,
    pub notes: Option<String>,
}

/// Partial update for an account. `None` fields are left unchanged.
///
/// Status is not directly writable: it follows the session phase. The only
/// administrative lever is `suspended`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAccountRequest {
    pub display_name: Option<String>,
    pub notes: Option<String>,
    pub keep_alive_enabled: Option<bool>,
    pub keep_alive_interval: Option<i64>,
    pub suspended: Option<bool>,
}
