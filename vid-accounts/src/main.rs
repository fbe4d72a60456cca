//! vid-accounts - Manage connected platform accounts
//!
//! Tokens normally come from each platform's OAuth consent flow; this tool
//! stores them, lists what is connected and keeps access tokens fresh.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use libvidcast::config::Config;
use libvidcast::platforms::create_adapters;
use libvidcast::tokens::{refresh_and_store, NewAccount, SqliteTokenStore, TokenStore};
use libvidcast::types::{Platform, PlatformAccount};
use libvidcast::{logging, VidcastError};
use serde::Serialize;
use std::io::Read;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "vid-accounts")]
#[command(version, about = "Manage connected YouTube, Instagram and TikTok accounts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Account owner (defaults to [defaults] user)
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected accounts (tokens are never printed)
    List {
        /// Output format
        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Store tokens for a platform
    Set {
        /// Platform name (youtube, instagram, tiktok)
        platform: Platform,

        /// Access token (read from stdin when omitted)
        #[arg(long)]
        access_token: Option<String>,

        #[arg(long)]
        refresh_token: Option<String>,

        /// Access token lifetime, e.g. "1h" or "60days"
        #[arg(long, value_parser = humantime::parse_duration)]
        expires_in: Option<Duration>,

        /// Platform-side account id (Instagram professional account)
        #[arg(long)]
        platform_user_id: Option<String>,
    },

    /// Disconnect a platform
    Remove {
        /// Platform name (youtube, instagram, tiktok)
        platform: Platform,
    },

    /// Exchange the stored refresh credentials for a new access token
    Refresh {
        /// Platform name (youtube, instagram, tiktok)
        platform: Platform,
    },
}

/// What `list` shows about one account
#[derive(Debug, Serialize)]
struct AccountSummary {
    platform: Platform,
    platform_user_id: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    expired: bool,
    refreshable: bool,
}

impl From<&PlatformAccount> for AccountSummary {
    fn from(account: &PlatformAccount) -> Self {
        Self {
            platform: account.platform,
            platform_user_id: account.platform_user_id.clone(),
            expires_at: account.expires_at,
            expired: account.expires_within(Utc::now(), chrono::Duration::zero()),
            refreshable: account.refresh_token.is_some() || account.platform == Platform::Instagram,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_from_env("warn", cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<VidcastError>()
            .map(VidcastError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let user = cli.user.unwrap_or_else(|| config.defaults.user.clone());
    let store = SqliteTokenStore::new(&config.database.path).await?;

    match cli.command {
        Commands::List { format } => list_accounts(&store, &user, &format).await,
        Commands::Set {
            platform,
            access_token,
            refresh_token,
            expires_in,
            platform_user_id,
        } => {
            let access_token = match access_token {
                Some(token) => token,
                None => read_token_from_stdin()?,
            };
            if access_token.trim().is_empty() {
                return Err(VidcastError::InvalidInput(
                    "Access token cannot be empty".to_string(),
                )
                .into());
            }
            let expires_at = expires_in
                .map(|lifetime| {
                    chrono::Duration::from_std(lifetime).map(|lifetime| Utc::now() + lifetime)
                })
                .transpose()
                .context("Token lifetime is out of range")?;

            store
                .save(NewAccount {
                    user_id: user.clone(),
                    platform,
                    access_token: access_token.trim().to_string(),
                    refresh_token,
                    expires_at,
                    platform_user_id,
                })
                .await?;
            println!("✓ Connected {} for user '{}'", platform.display_name(), user);
            Ok(())
        }
        Commands::Remove { platform } => {
            if store.delete(&user, platform).await? {
                println!("✓ Disconnected {} for user '{}'", platform.display_name(), user);
                Ok(())
            } else {
                anyhow::bail!(
                    "No {} account connected for user '{}'",
                    platform.display_name(),
                    user
                )
            }
        }
        Commands::Refresh { platform } => refresh_account(&config, &store, &user, platform).await,
    }
}

fn read_token_from_stdin() -> Result<String> {
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read access token from stdin")?;
    Ok(buffer.trim().to_string())
}

async fn list_accounts(store: &SqliteTokenStore, user: &str, format: &str) -> Result<()> {
    let accounts = store.list(user).await?;
    let summaries: Vec<AccountSummary> = accounts.iter().map(AccountSummary::from).collect();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("No accounts connected for user '{}'", user);
        return Ok(());
    }

    for summary in summaries {
        let expiry = match summary.expires_at {
            Some(at) if summary.expired => format!("expired {}", at.format("%Y-%m-%d %H:%M")),
            Some(at) => format!("expires {}", at.format("%Y-%m-%d %H:%M")),
            None => "no expiry".to_string(),
        };
        let refresh = if summary.refreshable {
            "refreshable"
        } else {
            "no refresh token"
        };
        match summary.platform_user_id {
            Some(id) => println!("{:<10} {} ({}, {})", summary.platform, id, expiry, refresh),
            None => println!("{:<10} ({}, {})", summary.platform, expiry, refresh),
        }
    }
    Ok(())
}

async fn refresh_account(
    config: &Config,
    store: &SqliteTokenStore,
    user: &str,
    platform: Platform,
) -> Result<()> {
    let adapters = create_adapters(config)?;
    let adapter = adapters.get(&platform).ok_or_else(|| {
        VidcastError::InvalidInput(format!(
            "{} is not enabled in configuration",
            platform.display_name()
        ))
    })?;
    let account = store.find(user, platform).await?.ok_or_else(|| {
        VidcastError::InvalidInput(format!(
            "No {} account connected for user '{}'",
            platform.display_name(),
            user
        ))
    })?;

    let updated = refresh_and_store(adapter.as_ref(), store, &account).await?;
    match updated.expires_at {
        Some(at) => println!(
            "✓ Refreshed {} token, expires {}",
            platform.display_name(),
            at.format("%Y-%m-%d %H:%M")
        ),
        None => println!("✓ Refreshed {} token", platform.display_name()),
    }
    Ok(())
}
