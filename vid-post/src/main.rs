//! vid-post - Publish one video to YouTube, Instagram and TikTok

use anyhow::{Context, Result};
use clap::Parser;
use libvidcast::config::Config;
use libvidcast::logging;
use libvidcast::types::parse_platform_list;
use libvidcast::{
    SessionReport, SqliteTokenStore, UploadRequest, UploadSession, VidcastError, VideoMetadata,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "vid-post")]
#[command(version, about = "Publish one video to several platforms")]
#[command(long_about = r#"Upload a video to temporary storage and publish it to YouTube,
Instagram and TikTok, waiting until every platform has finished.

EXAMPLES:
    # Publish to the default platforms from the config file
    vid-post launch.mp4 --title "Launch day"

    # Pick platforms explicitly
    vid-post launch.mp4 --title "Launch day" --caption "We shipped it" -p youtube,tiktok

    # Machine-readable report
    vid-post launch.mp4 --title "Launch day" --format json | jq '.outcomes[].status'

EXIT CODES:
    0 - Every attempted platform published
    1 - At least one platform failed
    2 - Every failure needs the account reconnected
    3 - Invalid input, or no selected platform could be attempted
"#)]
struct Cli {
    /// Video file to publish
    file: PathBuf,

    /// Video title (defaults to the file name)
    #[arg(short, long)]
    title: Option<String>,

    /// Caption or description
    #[arg(short, long, default_value = "")]
    caption: String,

    /// Target platform(s), comma-separated (youtube, instagram, tiktok)
    #[arg(short, long)]
    platform: Option<String>,

    /// Account owner in the token store (defaults to [defaults] user)
    #[arg(short, long)]
    user: Option<String>,

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

    logging::init_from_env("warn", cli.verbose);
    tracing::debug!("vid-post started with args: {:?}", cli);

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
    if !cli.file.is_file() {
        return Err(VidcastError::InvalidInput(format!(
            "File not found: {}",
            cli.file.display()
        ))
        .into());
    }

    let selected = cli
        .platform
        .as_deref()
        .map(parse_platform_list)
        .transpose()
        .map_err(VidcastError::InvalidInput)?;

    let config = Config::load()?;
    let platforms = selected.unwrap_or_else(|| config.default_platforms().into_iter().collect());
    if platforms.is_empty() {
        return Err(VidcastError::InvalidInput(
            "No platforms selected. Use --platform or set [defaults] platforms".to_string(),
        )
        .into());
    }

    let user = cli.user.unwrap_or_else(|| config.defaults.user.clone());
    let title = cli.title.unwrap_or_else(|| default_title(&cli.file));

    let store = Arc::new(SqliteTokenStore::new(&config.database.path).await?);
    let cancel = CancellationToken::new();
    let session = UploadSession::from_config(&config, store)?.with_cancellation(cancel.clone());

    let request = UploadRequest::from_path(
        &cli.file,
        VideoMetadata::new(title, cli.caption),
        platforms,
        user,
    )
    .await?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling, waiting for platforms to stop...");
            cancel.cancel();
        }
    });

    let report = session.run(request).await?;
    print_report(&report, &cli.format)?;

    Ok(report.exit_code())
}

fn default_title(file: &Path) -> String {
    file.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("Untitled")
        .to_string()
}

fn print_report(report: &SessionReport, format: &str) -> Result<()> {
    match format {
        "json" => {
            let json = serde_json::to_string_pretty(report).context("Failed to encode report")?;
            println!("{}", json);
        }
        _ => {
            for banner in report.banners() {
                println!("{}", banner);
            }
            if !report.attempted() {
                eprintln!("Error: none of the selected platforms could be attempted");
            }
        }
    }
    Ok(())
}
