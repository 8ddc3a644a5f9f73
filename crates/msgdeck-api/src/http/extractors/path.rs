//! Parsing of `{platform}` and `{phone_number}` path segments.

use msgdeck_core::session::controller::account_key;
use msgdeck_types::account::{AccountKey, Platform};

use crate::http::error::AppError;

pub fn parse_platform(raw: &str) -> Result<Platform, AppError> {
    raw.parse::<Platform>().map_err(AppError::Validation)
}

/// Account key from raw path segments. The phone number is normalized.
pub fn parse_account_key(platform: &str, phone_number: &str) -> Result<AccountKey, AppError> {
    let platform = parse_platform(platform)?;
    Ok(account_key(platform, phone_number)?)
}
