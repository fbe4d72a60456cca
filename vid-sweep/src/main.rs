//! vid-sweep - Delete leftover media from temporary storage
//!
//! Uploads that failed everywhere keep their media so they can be retried.
//! Run this periodically to clear them out.

use anyhow::{Context, Result};
use clap::Parser;
use libvidcast::config::Config;
use libvidcast::storage::{create_storage, sweep_storage};
use libvidcast::{logging, VidcastError};

#[derive(Parser, Debug)]
#[command(name = "vid-sweep")]
#[command(version, about = "Delete every object in the temporary media storage")]
#[command(long_about = r#"Walk the configured temporary media storage page by page and delete
every stored object.

EXAMPLES:
    # See what would be deleted
    vid-sweep --dry-run

    # Delete everything
    vid-sweep

EXIT CODES:
    0 - Every listed object was deleted (or listed, with --dry-run)
    1 - Some deletes failed, or the storage could not be listed
"#)]
struct Cli {
    /// List objects without deleting them
    #[arg(long)]
    dry_run: bool,

    /// Output format
    #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_from_env("info", cli.verbose);
    tracing::debug!("vid-sweep started with args: {:?}", cli);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<VidcastError>()
                .map(VidcastError::exit_code)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = Config::load()?;
    let storage = create_storage(&config.storage)?;
    let report = sweep_storage(storage.as_ref(), cli.dry_run)
        .await
        .with_context(|| format!("Sweep of {} storage failed", storage.backend_name()))?;

    match cli.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ if cli.dry_run => println!("Would delete {} objects", report.listed),
        _ => println!(
            "Deleted {} of {} objects ({} failed)",
            report.deleted, report.listed, report.failed
        ),
    }

    Ok(if report.failed > 0 { 1 } else { 0 })
}
