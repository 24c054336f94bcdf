//! Poolrota - Entry Point
//!
//! Crawls the URLs given on the command line through the configured proxy
//! pools and prints the crawl summary and final rotation snapshot.

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use poolrota::config::LogConfig;
use poolrota::crawl::{marker_predicate, Crawler};
use poolrota::fetch::HttpFetcher;
use poolrota::rotation::RotationController;
use poolrota::{Config, Result, RotaError};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting Poolrota");

    let urls = std::env::args()
        .skip(1)
        .map(|arg| {
            Url::parse(&arg).map_err(|e| RotaError::InvalidConfig(format!("invalid URL {}: {}", arg, e)))
        })
        .collect::<Result<Vec<_>>>()?;
    if urls.is_empty() {
        return Err(RotaError::InvalidConfig(
            "usage: poolrota <url> [<url> ...]".into(),
        ));
    }

    let controller = Arc::new(RotationController::new(
        config.build_pools(),
        config.rotation.clone(),
    )?);
    info!(
        "Loaded {} pools: {}",
        controller.pool_count(),
        config
            .pools
            .iter()
            .map(|p| format!("{} ({} proxies)", p.name, p.endpoints.len()))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let cancel = CancellationToken::new();
    let crawler = Crawler::new(
        controller.clone(),
        Arc::new(HttpFetcher::new(config.fetcher_config())),
        marker_predicate(config.crawl.ban_markers.clone()),
        config.crawler_config(),
        cancel.clone(),
    );

    // Cancel in-flight acquisitions and cooldowns on shutdown
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_cancel.cancel();
    });

    let summary = crawler.run(urls).await;

    let report = serde_json::json!({
        "summary": summary,
        "rotation": controller.snapshot(),
    });
    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{}", text),
        Err(e) => error!("Failed to serialize report: {}", e),
    }

    info!("Poolrota stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("poolrota={}", log.level).into());

    let json = log.format.eq_ignore_ascii_case("json");
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr)))
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
