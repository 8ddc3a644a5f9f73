//! System status dashboard command.

use anyhow::Result;
use console::style;

use msgdeck_core::repository::account::AccountFilter;
use msgdeck_types::account::{AccountStatus, Platform};

use crate::state::AppState;

/// Display the system status dashboard.
///
/// Shows account counts by status, stored credentials, configured bridges,
/// and where data lives.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let accounts = state
        .account_service
        .list_accounts(AccountFilter::default())
        .await?;
    let count = |status: AccountStatus| accounts.iter().filter(|a| a.status == status).count();
    let active = count(AccountStatus::Active);
    let pending = count(AccountStatus::Pending);
    let inactive = count(AccountStatus::Inactive);
    let suspended = count(AccountStatus::Suspended);

    // No sessions are live in a CLI process; this counts credentials on disk.
    let stored = state
        .sessions
        .list_sessions(None)
        .await
        .into_iter()
        .filter(|s| s.has_session_file)
        .count();

    let bridges: Vec<(Platform, Option<String>)> = Platform::ALL
        .iter()
        .map(|p| (*p, state.config.transport.bridge(*p).map(|b| b.command.clone())))
        .collect();

    if json {
        let bridge_json: serde_json::Map<String, serde_json::Value> = bridges
            .iter()
            .map(|(p, cmd)| (p.to_string(), serde_json::json!(cmd)))
            .collect();
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "accounts": {
                "total": accounts.len(),
                "active": active,
                "pending": pending,
                "inactive": inactive,
                "suspended": suspended,
            },
            "stored_credentials": stored,
            "bridges": bridge_json,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} msgdeck v{}",
        style("⚡").bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();

    println!("  {}", style("── Accounts ──").dim());
    println!("  Total:     {}", style(accounts.len()).bold());
    println!("  Active:    {}", style(active).green());
    if pending > 0 {
        println!("  Pending:   {}", style(pending).cyan());
    }
    println!("  Inactive:  {}", style(inactive).yellow());
    if suspended > 0 {
        println!("  Suspended: {}", style(suspended).red());
    }
    println!();

    println!("  {}", style("── Sessions ──").dim());
    println!("  Stored credentials: {}", style(stored).bold());
    println!();

    println!("  {}", style("── Bridges ──").dim());
    for (platform, command) in &bridges {
        match command {
            Some(cmd) => println!("  {:<9} {}", format!("{platform}:"), style(cmd).green()),
            None => println!(
                "  {:<9} {}",
                format!("{platform}:"),
                style("not configured").dim()
            ),
        }
    }
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Database: {}", style("SQLite (WAL mode)").dim());
    println!();

    Ok(())
}
