//! Account management CLI commands: add, list, remove.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use msgdeck_core::repository::account::AccountFilter;
use msgdeck_types::account::{Account, AccountId, AccountStatus, CreateAccountRequest, Platform};

use crate::state::AppState;

/// Account management subcommands.
#[derive(Subcommand)]
pub enum AccountCommand {
    /// Register a new account.
    Add {
        /// Platform: telegram or whatsapp.
        platform: String,

        /// Phone number; formatting characters are stripped.
        phone_number: String,

        /// Country calling code, e.g. "+1".
        #[arg(long)]
        country_code: Option<String>,

        /// Display name shown on the dashboard.
        #[arg(long)]
        name: Option<String>,

        /// Free-form notes.
        #[arg(long)]
        notes: Option<String>,
    },

    /// List registered accounts.
    #[command(alias = "ls")]
    List {
        /// Filter by platform.
        #[arg(long)]
        platform: Option<String>,

        /// Filter by status (active, inactive, pending, suspended).
        #[arg(long)]
        status: Option<String>,
    },

    /// Remove an account, logging out any live session.
    #[command(alias = "rm")]
    Remove {
        /// Account id.
        id: String,
    },
}

pub async fn run(state: &AppState, action: AccountCommand, json: bool) -> Result<()> {
    match action {
        AccountCommand::Add {
            platform,
            phone_number,
            country_code,
            name,
            notes,
        } => add_account(state, &platform, phone_number, country_code, name, notes, json).await,
        AccountCommand::List { platform, status } => {
            list_accounts(state, platform.as_deref(), status.as_deref(), json).await
        }
        AccountCommand::Remove { id } => remove_account(state, &id, json).await,
    }
}

async fn add_account(
    state: &AppState,
    platform: &str,
    phone_number: String,
    country_code: Option<String>,
    display_name: Option<String>,
    notes: Option<String>,
    json: bool,
) -> Result<()> {
    let platform: Platform = platform.parse().map_err(|e| anyhow::anyhow!("{e}"))?;

    let account = state
        .account_service
        .create_account(CreateAccountRequest {
            phone_number,
            platform,
            country_code,
            display_name,
            notes,
        })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&account)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Registered {} account {}",
        style("✓").green().bold(),
        account.platform,
        style(&account.phone_number).cyan()
    );
    println!("  {}", style(format!("id: {}", account.id)).dim());
    println!(
        "  Authenticate it with: {}",
        style(format!("POST /api/v1/{}/auth/start", account.platform)).yellow()
    );
    println!();
    Ok(())
}

async fn list_accounts(
    state: &AppState,
    platform: Option<&str>,
    status: Option<&str>,
    json: bool,
) -> Result<()> {
    let platform = platform
        .map(str::parse::<Platform>)
        .transpose()
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let status = status
        .map(str::parse::<AccountStatus>)
        .transpose()
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let accounts = state
        .account_service
        .list_accounts(AccountFilter {
            platform,
            status,
            ..AccountFilter::default()
        })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&accounts)?);
        return Ok(());
    }

    if accounts.is_empty() {
        println!();
        println!(
            "  {} No accounts found. Register one with: {}",
            style("i").blue().bold(),
            style("mdeck account add <platform> <phone>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Platform").fg(Color::White),
        Cell::new("Phone").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Last Active").fg(Color::White),
        Cell::new("Id").fg(Color::White),
    ]);

    for account in &accounts {
        table.add_row(account_row(account));
    }

    println!();
    println!("{table}");
    println!(
        "  {}",
        style(format!("{} account(s)", accounts.len())).dim()
    );
    println!();
    Ok(())
}

fn account_row(account: &Account) -> Vec<Cell> {
    let status_cell = match account.status {
        AccountStatus::Active => Cell::new("● active").fg(Color::Green),
        AccountStatus::Pending => Cell::new("◐ pending").fg(Color::Cyan),
        AccountStatus::Inactive => Cell::new("○ inactive").fg(Color::Yellow),
        AccountStatus::Suspended => Cell::new("⊘ suspended").fg(Color::Red),
    };

    let last_active = match &account.last_active {
        Some(dt) => format_relative_time(dt),
        None => "never".to_string(),
    };

    vec![
        Cell::new(account.platform.as_str()),
        Cell::new(&account.phone_number),
        Cell::new(account.display_name.as_deref().unwrap_or("-")),
        status_cell,
        Cell::new(last_active),
        Cell::new(account.id.to_string()).fg(Color::DarkGrey),
    ]
}

async fn remove_account(state: &AppState, id: &str, json: bool) -> Result<()> {
    let id: AccountId = id
        .parse()
        .with_context(|| format!("invalid account id '{id}'"))?;
    let account = state.account_service.get_account(&id).await?;

    state.account_service.delete_account(&id).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({"deleted": true, "id": id.to_string()})
        );
    } else {
        println!(
            "  {} Removed {} account {}",
            style("✓").green().bold(),
            account.platform,
            style(&account.phone_number).cyan()
        );
    }
    Ok(())
}

fn format_relative_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    let diff = chrono::Utc::now() - *dt;

    if diff.num_minutes() < 1 {
        "just now".to_string()
    } else if diff.num_hours() < 1 {
        format!("{}m ago", diff.num_minutes())
    } else if diff.num_days() < 1 {
        format!("{}h ago", diff.num_hours())
    } else if diff.num_days() < 30 {
        format!("{}d ago", diff.num_days())
    } else {
        dt.format("%Y-%m-%d").to_string()
    }
}
