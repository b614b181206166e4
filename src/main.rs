use anyhow::{Context, Result};
use instagram_sync::{router, AppState, ServiceConfig, SyncService};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

fn setup_tracing() {
    // Check if we should enable tokio-console
    if std::env::var("TOKIO_CONSOLE").is_ok() {
        console_subscriber::init();
        info!("tokio-console enabled on port 6669");
    } else {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,instagram_sync=debug"));
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}

/// Periodically log proxy health while the server runs
fn spawn_proxy_health_logger(
    service: Arc<SyncService>,
    task_tracker: &TaskTracker,
    token: CancellationToken,
) {
    if service.proxy_pool().is_none() {
        return;
    }

    task_tracker.spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Proxy health logger cancelled, exiting");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(300)) => {
                    let Some(pool) = service.proxy_pool() else { break };
                    for endpoint in pool.report() {
                        info!(
                            "Proxy {}: {} ok, {} failed ({} consecutive){}",
                            endpoint.label,
                            endpoint.total_successes,
                            endpoint.total_failures,
                            endpoint.consecutive_failures,
                            if endpoint.benched { ", benched" } else { "" }
                        );
                    }
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();
    setup_tracing();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let config = ServiceConfig::from_env().context("Failed to load configuration")?;
    let sync_service = Arc::new(SyncService::from_config(&config)?);

    let cancellation_token = CancellationToken::new();
    let task_tracker = TaskTracker::new();
    spawn_proxy_health_logger(
        sync_service.clone(),
        &task_tracker,
        cancellation_token.clone(),
    );

    let app = router(AppState {
        sync_service: sync_service.clone(),
    });

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid BIND_ADDR '{}'", config.bind_addr))?;

    println!("\nInstagram sync service starting");
    println!("HTTP: http://{addr}");
    println!("\nConfiguration:");
    println!("- Source: {}", sync_service.source_name());
    println!("- Max posts per sync: {}", sync_service.max_posts());
    println!(
        "- Pacing: {:?}",
        config.pacing.policy_for(config.source)
    );
    println!(
        "- Rate limit: {} requests/min per egress, wait budget {}s",
        config.requests_per_minute,
        config.max_throttle_wait.as_secs()
    );
    match sync_service.proxy_pool() {
        Some(pool) => println!(
            "- Proxies: {} ({:?} rotation)",
            pool.len(),
            pool.strategy()
        ),
        None => println!("- Proxies: none (direct)"),
    }

    // Handle shutdown signal
    let shutdown_token = cancellation_token.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Shutdown signal received, stopping services...");
        shutdown_token.cancel();
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server stopped, shutting down services...");
    cancellation_token.cancel();
    task_tracker.close();

    match tokio::time::timeout(Duration::from_secs(30), task_tracker.wait()).await {
        Ok(()) => info!("All background tasks completed successfully"),
        Err(_) => {
            error!("Timeout waiting for background tasks to complete");
            std::process::exit(1);
        }
    }

    info!("Clean shutdown complete");
    Ok(())
}
