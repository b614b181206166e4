use anyhow::{Context, Result};
use clap::Parser;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use instagram_sync::{ServiceConfig, SyncRequest, SyncService};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "sync-cli",
    version = "0.1.0",
    about = "Fetch Instagram profiles and recent posts as JSON lines"
)]
struct Args {
    /// Usernames to sync, with or without a leading "@"
    #[arg(required = true)]
    usernames: Vec<String>,

    /// Source backend (web or private_api); defaults to SCRAPER_SOURCE
    #[arg(short, long)]
    source: Option<String>,

    /// Write results to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Posts per profile, at most 10
    #[arg(short, long)]
    max_posts: Option<usize>,

    /// Number of syncs in flight at once
    #[arg(short, long, default_value = "1")]
    concurrency: usize,

    /// Caller id attached to every sync for log correlation
    #[arg(long, default_value = "cli")]
    caller_id: String,

    /// Continue on error
    #[arg(long)]
    skip_errors: bool,
}

fn setup_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,sync_cli=info,instagram_sync=info"));

    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Environment config with command line flags layered on top
fn load_config(args: &Args) -> Result<ServiceConfig> {
    let max_posts = args.max_posts.map(|n| n.to_string());
    ServiceConfig::from_lookup(|key| match key {
        "SCRAPER_SOURCE" if args.source.is_some() => args.source.clone(),
        "MAX_POSTS" if max_posts.is_some() => max_posts.clone(),
        _ => std::env::var(key).ok(),
    })
    .context("Failed to load configuration")
}

async fn sync_usernames(
    service: &SyncService,
    args: &Args,
    out: &mut dyn Write,
) -> Result<(u64, u64)> {
    let progress_bar = ProgressBar::new(args.usernames.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} profiles ({eta}) {msg}")?
            .progress_chars("#>-"),
    );

    let mut success_count = 0u64;
    let mut error_count = 0u64;

    // Results arrive in input order
    let mut results = stream::iter(args.usernames.iter())
        .map(|username| async move {
            let request = SyncRequest {
                username: username.clone(),
                user_id: args.caller_id.clone(),
            };
            (username, service.sync(&request).await)
        })
        .buffered(args.concurrency.max(1));

    while let Some((username, result)) = results.next().await {
        progress_bar.set_message(username.clone());
        match result {
            Ok(response) => {
                success_count += 1;
                serde_json::to_writer(&mut *out, &response)
                    .context("Failed to serialize sync response")?;
                writeln!(out)?;
                progress_bar.inc(1);
                progress_bar.println(format!(
                    "✓ @{} ({} posts)",
                    response.profile.username,
                    response.posts.len()
                ));
            }
            Err(e) => {
                error_count += 1;
                progress_bar.inc(1);
                let message = format!("{username}: {} ({})", e.detail(), e.status_code());
                if args.skip_errors {
                    progress_bar.println(format!("⚠ {message}"));
                } else {
                    progress_bar.println(format!("✗ {message}"));
                    progress_bar.finish_with_message("Failed");
                    return Err(anyhow::anyhow!("Sync failed for {}", message));
                }
            }
        }
    }

    out.flush()?;
    progress_bar.finish_with_message("Sync complete");
    Ok((success_count, error_count))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    setup_tracing();
    let _ = rustls::crypto::ring::default_provider().install_default();
    let args = Args::parse();

    let config = load_config(&args)?;
    let service = SyncService::from_config(&config)?;
    info!(
        "Syncing {} profiles via {} source",
        args.usernames.len(),
        service.source_name()
    );

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path)
                .with_context(|| format!("Failed to create output file {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };

    let (success_count, error_count) = sync_usernames(&service, &args, out.as_mut()).await?;
    info!(
        "Sync finished: {} successful, {} errors",
        success_count, error_count
    );
    Ok(())
}
