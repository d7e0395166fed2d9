use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use dirscraper_core::config::AppConfig;
use dirscraper_core::Directory;
use dirscraper_engine::WorkerPool;
use dirscraper_fetcher::build_proxy_pool;
use dirscraper_filter::FilterEngine;
use dirscraper_parser::YellowPages;
use dirscraper_storage::Storage;

pub async fn run(config: AppConfig, graceful_secs: u64) -> Result<()> {
    // Filter configuration is fatal when broken; load it before touching
    // the network or the database.
    let filter = Arc::new(FilterEngine::load(
        Path::new(&config.filter.allowlist_path),
        Path::new(&config.filter.blocklist_path),
        Path::new(&config.filter.anti_keywords_path),
        Path::new(&config.filter.positive_hints_path),
        Path::new(&config.filter.deny_domains_path),
        config.filter.min_score,
        config.filter.include_sponsored,
    )?);

    let pool_size = (config.general.workers as u32 + 5).max(10);
    let storage = Storage::with_pool_size(&config.database.url, pool_size).await?;
    storage.run_migrations().await?;

    let proxies = Arc::new(build_proxy_pool(&config)?);
    let directory: Arc<dyn Directory> = Arc::new(YellowPages::new(&config.directory.base_url));

    let pool = WorkerPool::start(
        &config,
        storage,
        directory,
        filter,
        proxies,
    )
    .await?;

    info!(
        workers = config.general.workers,
        states = ?config.general.states,
        browser = config.fetch.use_browser,
        "pool running, press Ctrl+C to stop"
    );

    wait_for_stop_signal().await?;
    info!("stop signal received");
    pool.stop_all(Duration::from_secs(graceful_secs)).await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_stop_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
