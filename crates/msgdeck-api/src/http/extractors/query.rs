//! Query parameter extractors for list endpoints.

use serde::Deserialize;

/// Query parameters for the account list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct AccountListQuery {
    /// Filter by platform (telegram, whatsapp).
    pub platform: Option<String>,
    /// Filter by status (active, inactive, pending, suspended).
    pub status: Option<String>,
    /// Sort order by registration time (asc, desc).
    #[serde(default = "default_order")]
    pub order: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn default_order() -> String {
    "desc".to_string()
}

/// Query parameters for the chat list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct ChatListQuery {
    pub limit: Option<usize>,
}
