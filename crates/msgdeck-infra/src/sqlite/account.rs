//! SQLite account directory implementation.
//!
//! Implements `AccountDirectory` from `msgdeck-core` using sqlx with split
//! read/write pools. Stored transport credentials live on disk, so
//! credential deletion is delegated to an [`FsCredentialStore`].

use msgdeck_core::repository::SortOrder;
use msgdeck_core::repository::account::{AccountDirectory, AccountFilter};
use msgdeck_core::repository::credential::CredentialStore;
use msgdeck_types::account::{Account, AccountId, AccountKey, AccountStatus, Platform};
use msgdeck_types::error::RepositoryError;
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::pool::DatabasePool;
use crate::credentials::FsCredentialStore;

/// SQLite-backed implementation of `AccountDirectory`.
#[derive(Clone)]
pub struct SqliteAccountDirectory {
    pool: DatabasePool,
    credentials: FsCredentialStore,
}

impl SqliteAccountDirectory {
    pub fn new(pool: DatabasePool, credentials: FsCredentialStore) -> Self {
        Self { pool, credentials }
    }
}

/// Internal row type for mapping SQLite rows to domain Account.
struct AccountRow {
    id: String,
    phone_number: String,
    country_code: Option<String>,
    platform: String,
    display_name: Option<String>,
    status: String,
    notes: Option<String>,
    keep_alive_enabled: bool,
    keep_alive_interval: i64,
    registered_at: String,
    updated_at: String,
    last_active: Option<String>,
}

impl AccountRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            phone_number: row.try_get("phone_number")?,
            country_code: row.try_get("country_code")?,
            platform: row.try_get("platform")?,
            display_name: row.try_get("display_name")?,
            status: row.try_get("status")?,
            notes: row.try_get("notes")?,
            keep_alive_enabled: row.try_get("keep_alive_enabled")?,
            keep_alive_interval: row.try_get("keep_alive_interval")?,
            registered_at: row.try_get("registered_at")?,
            updated_at: row.try_get("updated_at")?,
            last_active: row.try_get("last_active")?,
        })
    }

    fn into_account(self) -> Result<Account, RepositoryError> {
        let id = self
            .id
            .parse::<AccountId>()
            .map_err(|e| RepositoryError::Query(format!("invalid account id: {e}")))?;

        let platform: Platform = self
            .platform
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;

        let status: AccountStatus = self
            .status
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;

        Ok(Account {
            id,
            phone_number: self.phone_number,
            country_code: self.country_code,
            platform,
            display_name: self.display_name,
            status,
            notes: self.notes,
            keep_alive_enabled: self.keep_alive_enabled,
            keep_alive_interval: self.keep_alive_interval,
            registered_at: parse_datetime(&self.registered_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            last_active: self
                .last_active
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn map_row(row: Option<sqlx::sqlite::SqliteRow>) -> Result<Option<Account>, RepositoryError> {
    match row {
        Some(row) => {
            let account_row =
                AccountRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            Ok(Some(account_row.into_account()?))
        }
        None => Ok(None),
    }
}

impl AccountDirectory for SqliteAccountDirectory {
    async fn create(&self, account: &Account) -> Result<Account, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO accounts (id, phone_number, country_code, platform, display_name, status, notes, keep_alive_enabled, keep_alive_interval, registered_at, updated_at, last_active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(account.id.to_string())
        .bind(&account.phone_number)
        .bind(&account.country_code)
        .bind(account.platform.as_str())
        .bind(&account.display_name)
        .bind(account.status.to_string())
        .bind(&account.notes)
        .bind(account.keep_alive_enabled)
        .bind(account.keep_alive_interval)
        .bind(format_datetime(&account.registered_at))
        .bind(format_datetime(&account.updated_at))
        .bind(account.last_active.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(account.clone()),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("UNIQUE") => {
                Err(RepositoryError::Conflict(format!(
                    "{} account {} already exists",
                    account.platform, account.phone_number
                )))
            }
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn get_by_id(&self, id: &AccountId) -> Result<Option<Account>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        map_row(row)
    }

    async fn get_by_key(&self, key: &AccountKey) -> Result<Option<Account>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE platform = ? AND phone_number = ?")
            .bind(key.platform.as_str())
            .bind(&key.phone_number)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        map_row(row)
    }

    async fn list(&self, filter: Option<AccountFilter>) -> Result<Vec<Account>, RepositoryError> {
        let mut sql = String::from("SELECT * FROM accounts");
        let mut conditions: Vec<String> = Vec::new();

        let filter = filter.unwrap_or_default();

        // Both values come from closed enums, never from raw input.
        if let Some(platform) = filter.platform {
            conditions.push(format!("platform = '{}'", platform.as_str()));
        }
        if let Some(status) = filter.status {
            conditions.push(format!("status = '{status}'"));
        }

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        let order = match filter.sort_order.unwrap_or_default() {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        sql.push_str(&format!(" ORDER BY registered_at {order}, id {order}"));

        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = filter.offset {
            if filter.limit.is_none() {
                sql.push_str(" LIMIT -1");
            }
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in &rows {
            let account_row =
                AccountRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            accounts.push(account_row.into_account()?);
        }

        Ok(accounts)
    }

    async fn update(&self, account: &Account) -> Result<Account, RepositoryError> {
        let result = sqlx::query(
            "UPDATE accounts SET country_code = ?, display_name = ?, notes = ?, keep_alive_enabled = ?, keep_alive_interval = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&account.country_code)
        .bind(&account.display_name)
        .bind(&account.notes)
        .bind(account.keep_alive_enabled)
        .bind(account.keep_alive_interval)
        .bind(format_datetime(&account.updated_at))
        .bind(account.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(account.id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        map_row(row)?.ok_or(RepositoryError::NotFound)
    }

    async fn delete(&self, id: &AccountId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn upsert_account(&self, key: &AccountKey) -> Result<Account, RepositoryError> {
        let fresh = Account::new(key);
        sqlx::query(
            "INSERT INTO accounts (id, phone_number, platform, status, keep_alive_enabled, keep_alive_interval, registered_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (platform, phone_number) DO NOTHING",
        )
        .bind(fresh.id.to_string())
        .bind(&fresh.phone_number)
        .bind(fresh.platform.as_str())
        .bind(fresh.status.to_string())
        .bind(fresh.keep_alive_enabled)
        .bind(fresh.keep_alive_interval)
        .bind(format_datetime(&fresh.registered_at))
        .bind(format_datetime(&fresh.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // Read back through the writer so the row is visible immediately.
        let row = sqlx::query("SELECT * FROM accounts WHERE platform = ? AND phone_number = ?")
            .bind(key.platform.as_str())
            .bind(&key.phone_number)
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        map_row(row)?.ok_or(RepositoryError::NotFound)
    }

    async fn set_status(&self, key: &AccountKey, status: AccountStatus) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE accounts SET status = ?, updated_at = ?
             WHERE platform = ? AND phone_number = ? AND status != 'suspended'",
        )
        .bind(status.to_string())
        .bind(format_datetime(&Utc::now()))
        .bind(key.platform.as_str())
        .bind(&key.phone_number)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn set_suspended(&self, id: &AccountId, suspended: bool) -> Result<(), RepositoryError> {
        let sql = if suspended {
            "UPDATE accounts SET status = 'suspended', updated_at = ? WHERE id = ?"
        } else {
            "UPDATE accounts SET status = 'inactive', updated_at = ? WHERE id = ? AND status = 'suspended'"
        };
        let result = sqlx::query(sql)
            .bind(format_datetime(&Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if suspended && result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn touch_last_active(&self, key: &AccountKey) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE accounts SET last_active = ? WHERE platform = ? AND phone_number = ?")
            .bind(format_datetime(&Utc::now()))
            .bind(key.platform.as_str())
            .bind(&key.phone_number)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn delete_stored_credentials(&self, key: &AccountKey) -> Result<(), RepositoryError> {
        self.credentials.delete(key).await
    }
}
