//! The per-target crawl procedure: walk pages from the checkpoint to the
//! page budget, filtering and persisting as we go.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};
use url::Url;

use dirscraper_core::{CrawlOutcome, Directory, FilterDecision, Listing, Target};
use dirscraper_fetcher::PageFetcher;
use dirscraper_filter::FilterEngine;
use dirscraper_health::HealthMonitor;
use dirscraper_storage::Storage;

use crate::cooldown::cooldown;

/// Everything a worker hands the crawl procedure besides the target itself.
pub struct CrawlDeps {
    pub storage: Storage,
    pub fetcher: Arc<dyn PageFetcher>,
    pub directory: Arc<dyn Directory>,
    pub filter: Arc<FilterEngine>,
    pub source: String,
    pub include_sponsored: bool,
    /// When set, caps every target's page budget.
    pub max_pages_override: Option<i16>,
}

fn page_url_for(deps: &CrawlDeps, target: &Target, page: i16) -> Option<Url> {
    match deps.directory.page_url(&target.primary_url, page) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(
                target_id = target.id,
                page,
                "primary URL unusable ({e}), using fallback"
            );
            deps.directory.page_url(&target.fallback_url, page).ok()
        }
    }
}

/// Crawl one claimed target. The stop signal is honored between pages;
/// a page in flight always runs to its checkpoint.
pub async fn crawl_target(
    deps: &CrawlDeps,
    monitor: &mut HealthMonitor,
    target: &Target,
    stop: &AtomicBool,
) -> Result<CrawlOutcome> {
    let page_target = match deps.max_pages_override {
        Some(cap) => target.page_target.min(cap).max(1),
        None => target.page_target,
    };
    let mut page = target.page_current + 1;
    let mut consecutive_failures = 0u32;

    info!(
        target_id = target.id,
        state = %target.state,
        city = %target.city,
        category = %target.category,
        resume_page = page,
        page_target,
        "crawling target"
    );

    while page <= page_target {
        if stop.load(Ordering::Relaxed) {
            deps.storage.release_target(target.id).await?;
            return Ok(CrawlOutcome::Stopped);
        }

        let Some(url) = page_url_for(deps, target, page) else {
            deps.storage
                .fail_target(target.id, "no usable request url")
                .await?;
            return Ok(CrawlOutcome::Failed);
        };

        let fetch = match deps
            .fetcher
            .fetch(&url, target.attempts as u32, monitor.current_delay())
            .await
        {
            Ok(fetch) => fetch,
            Err(e) => {
                monitor.record_request(false, false, false);
                consecutive_failures += 1;
                warn!(target_id = target.id, page, "page fetch failed: {e}");
                if consecutive_failures >= 2 {
                    deps.storage.fail_target(target.id, &e.to_string()).await?;
                    return Ok(CrawlOutcome::Failed);
                }
                page += 1;
                continue;
            }
        };

        monitor.record_request(fetch.ok(), fetch.captcha, fetch.blocked);

        if fetch.captcha || fetch.blocked {
            let kind = if fetch.captcha { "captcha" } else { "blocked" };
            warn!(
                target_id = target.id,
                page,
                status = fetch.status,
                kind,
                "target requeued for cool-down"
            );
            deps.storage.requeue_cooldown(target.id).await?;
            let mut rng = StdRng::seed_from_u64(target.id as u64 ^ target.attempts as u64);
            let pause = cooldown(target.attempts, &mut rng);
            tokio::time::sleep(pause).await;
            return Ok(CrawlOutcome::Requeued);
        }

        if !fetch.ok() {
            consecutive_failures += 1;
            warn!(
                target_id = target.id,
                page,
                status = fetch.status,
                "soft page failure"
            );
            if consecutive_failures >= 2 {
                deps.storage
                    .fail_target(target.id, &format!("http status {}", fetch.status))
                    .await?;
                return Ok(CrawlOutcome::Failed);
            }
            page += 1;
            continue;
        }
        consecutive_failures = 0;

        let listings = deps
            .directory
            .parse_page(&fetch.body, &url, deps.include_sponsored);
        let found = listings.len();

        let mut accepted: Vec<(Listing, FilterDecision)> = Vec::new();
        let mut rejected_reasons: Vec<String> = Vec::new();
        for listing in listings {
            let decision = deps.filter.decide(&listing);
            if decision.accepted {
                accepted.push((listing, decision));
            } else {
                rejected_reasons.push(decision.reason);
            }
        }

        deps.storage
            .checkpoint_page(target.id, page, &accepted, &rejected_reasons, &deps.source)
            .await?;
        monitor.record_page(found, accepted.len());

        info!(
            target_id = target.id,
            page,
            found,
            accepted = accepted.len(),
            "page done"
        );

        if page == 1 && accepted.is_empty() {
            deps.storage
                .complete_target(target.id, Some("early_exit_no_results_page1"))
                .await?;
            return Ok(CrawlOutcome::DoneEarly);
        }

        page += 1;
    }

    deps.storage.complete_target(target.id, None).await?;
    Ok(CrawlOutcome::Done)
}
