use anyhow::Result;

use dirscraper_core::config::AppConfig;
use dirscraper_storage::Storage;

pub async fn run(config: AppConfig) -> Result<()> {
    let storage = Storage::new(&config.database.url).await?;
    storage.run_migrations().await?;
    let recovered = storage
        .recover_orphans(config.general.orphan_timeout_minutes, None)
        .await?;
    let retried = storage
        .requeue_retryable(config.general.max_attempts)
        .await?;
    println!(
        "Recovered {} orphaned targets (heartbeat older than {} minutes), requeued {} retryable failures.",
        recovered, config.general.orphan_timeout_minutes, retried
    );
    Ok(())
}

pub async fn reset_failed(config: AppConfig) -> Result<()> {
    let storage = Storage::new(&config.database.url).await?;
    let reset = storage.reset_failed().await?;
    println!("Returned {} failed targets to the queue.", reset);
    Ok(())
}

pub async fn park(config: AppConfig, state: &str) -> Result<()> {
    let storage = Storage::new(&config.database.url).await?;
    let parked = storage.park_state(&state.to_ascii_uppercase()).await?;
    println!("Parked {} planned targets in {}.", parked, state);
    Ok(())
}
