//! Worker pool: shards states across N workers, supervises their
//! lifecycle, and owns the shared stop signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use dirscraper_core::config::AppConfig;
use dirscraper_core::{CrawlOutcome, Directory};
use dirscraper_fetcher::{build_fetcher, PageFetcher, ProxyPool};
use dirscraper_filter::FilterEngine;
use dirscraper_health::{HealthLevel, HealthMonitor};
use dirscraper_storage::Storage;

use crate::crawl::{crawl_target, CrawlDeps};
use crate::wal::{WalEvent, WorkerWal};

/// Round-robin split: worker `i` owns every `n`-th state. A worker can
/// end up with an empty shard when there are more workers than states.
pub fn shard_states(states: &[String], workers: usize) -> Vec<Vec<String>> {
    let mut shards = vec![Vec::new(); workers.max(1)];
    for (i, state) in states.iter().enumerate() {
        shards[i % workers.max(1)].push(state.clone());
    }
    shards
}

#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub worker_id: String,
    pub states: Vec<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub targets_processed: u64,
    pub current_target: Option<i64>,
    pub alive: bool,
}

#[derive(serde::Serialize)]
struct RunSummary {
    started_at: DateTime<Utc>,
    stopped_at: DateTime<Utc>,
    planned: i64,
    in_progress: i64,
    done: i64,
    failed: i64,
    stuck: i64,
    parked: i64,
    companies: i64,
    workers: Vec<(String, u64)>,
}

pub struct WorkerPool {
    stop: Arc<AtomicBool>,
    registry: Arc<DashMap<String, WorkerSnapshot>>,
    handles: Vec<(String, JoinHandle<()>)>,
    storage: Storage,
    wal_dir: String,
    started_at: DateTime<Utc>,
}

impl WorkerPool {
    /// Spawn the configured number of workers, staggered ~2 s apart so
    /// they don't hit the site (or the claim query) in lockstep.
    pub async fn start(
        config: &AppConfig,
        storage: Storage,
        directory: Arc<dyn Directory>,
        filter: Arc<FilterEngine>,
        proxies: Arc<ProxyPool>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let registry: Arc<DashMap<String, WorkerSnapshot>> = Arc::new(DashMap::new());
        let shards = shard_states(&config.general.states, config.general.workers);

        let mut handles = Vec::new();
        for (i, shard) in shards.into_iter().enumerate() {
            let worker_id = format!("w{}-{}", i, std::process::id());
            if shard.is_empty() {
                info!(worker_id = %worker_id, "no states in shard, worker not started");
                continue;
            }
            info!(worker_id = %worker_id, states = ?shard, "worker shard assigned");

            let seed = (std::process::id() as u64) << 8 | i as u64;
            let fetcher = build_fetcher(config, Arc::clone(&proxies), seed)?;
            let deps = CrawlDeps {
                storage: storage.clone(),
                fetcher: Arc::clone(&fetcher),
                directory: Arc::clone(&directory),
                filter: Arc::clone(&filter),
                source: config.directory.source.clone(),
                include_sponsored: config.filter.include_sponsored,
                max_pages_override: config.general.max_pages_override,
            };

            registry.insert(
                worker_id.clone(),
                WorkerSnapshot {
                    worker_id: worker_id.clone(),
                    states: shard.clone(),
                    last_heartbeat: Utc::now(),
                    targets_processed: 0,
                    current_target: None,
                    alive: true,
                },
            );

            let handle = tokio::spawn(worker_main(
                worker_id.clone(),
                shard,
                deps,
                fetcher,
                config.clone(),
                Arc::clone(&stop),
                Arc::clone(&registry),
                seed,
            ));
            handles.push((worker_id, handle));

            // Staggered start.
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        if handles.is_empty() {
            anyhow::bail!("no workers started: every shard was empty");
        }

        Ok(Self {
            stop,
            registry,
            handles,
            storage,
            wal_dir: config.general.wal_dir.clone(),
            started_at: Utc::now(),
        })
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Live view of the pool: identities, heartbeats, liveness.
    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let mut snaps: Vec<WorkerSnapshot> = self
            .registry
            .iter()
            .map(|entry| {
                let mut snap = entry.value().clone();
                if let Some((_, handle)) = self.handles.iter().find(|(id, _)| *id == snap.worker_id)
                {
                    snap.alive = !handle.is_finished();
                }
                snap
            })
            .collect();
        snaps.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        snaps
    }

    /// Set the stop signal, wait up to `graceful` for workers to finish
    /// their current page/target, then force-terminate the rest. Orphan
    /// recovery picks up anything force-terminated mid-target.
    pub async fn stop_all(mut self, graceful: Duration) -> Result<()> {
        info!("stop signal set, waiting for workers");
        self.stop.store(true, Ordering::Relaxed);

        let deadline = tokio::time::Instant::now() + graceful;
        for (worker_id, mut handle) in self.handles.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(worker_id = %worker_id, "worker ended abnormally: {e}"),
                Err(_) => {
                    warn!(worker_id = %worker_id, "graceful window expired, aborting worker");
                    handle.abort();
                }
            }
        }

        self.write_run_summary().await;
        info!("pool stopped");
        Ok(())
    }

    /// Operator artifact: a last-run summary next to the WALs.
    async fn write_run_summary(&self) {
        let counts = match self.storage.status_counts().await {
            Ok(c) => c,
            Err(e) => {
                warn!("run summary skipped: {e}");
                return;
            }
        };
        let companies = self.storage.company_count().await.unwrap_or(0);
        let summary = RunSummary {
            started_at: self.started_at,
            stopped_at: Utc::now(),
            planned: counts.planned,
            in_progress: counts.in_progress,
            done: counts.done,
            failed: counts.failed,
            stuck: counts.stuck,
            parked: counts.parked,
            companies,
            workers: self
                .registry
                .iter()
                .map(|e| (e.key().clone(), e.value().targets_processed))
                .collect(),
        };
        let path = std::path::Path::new(&self.wal_dir).join("last_run.json");
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    warn!(path = %path.display(), "run summary write failed: {e}");
                }
            }
            Err(e) => warn!("run summary serialize failed: {e}"),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_main(
    worker_id: String,
    shard: Vec<String>,
    deps: CrawlDeps,
    fetcher: Arc<dyn PageFetcher>,
    config: AppConfig,
    stop: Arc<AtomicBool>,
    registry: Arc<DashMap<String, WorkerSnapshot>>,
    seed: u64,
) {
    let mut wal = match WorkerWal::open(std::path::Path::new(&config.general.wal_dir), &worker_id)
    {
        Ok(wal) => wal,
        Err(e) => {
            error!(worker_id = %worker_id, "cannot open WAL, worker exiting: {e}");
            return;
        }
    };
    let _ = wal.append(&WalEvent::WorkerStart {
        worker_id: worker_id.clone(),
        states: shard.clone(),
        ts: Utc::now(),
    });

    // Reclaim anything a dead predecessor left behind in our shard, and
    // give failed targets that still have retry budget another chance.
    match deps
        .storage
        .recover_orphans(config.general.orphan_timeout_minutes, Some(&shard))
        .await
    {
        Ok(0) => {}
        Ok(n) => info!(worker_id = %worker_id, recovered = n, "orphans recovered at startup"),
        Err(e) => error!(worker_id = %worker_id, "orphan recovery failed: {e}"),
    }
    if let Err(e) = deps
        .storage
        .requeue_retryable(config.general.max_attempts)
        .await
    {
        error!(worker_id = %worker_id, "retry requeue failed: {e}");
    }

    let mut monitor = HealthMonitor::new(config.limiter.clone());
    let mut rng = StdRng::seed_from_u64(seed ^ 0xda7a);
    let nominal = config.fetch.context_rotation_every.max(1);
    let mut rotation_limit: u32 = rng.gen_range((nominal * 3 / 4).max(1)..=nominal * 5 / 4);
    let mut targets_since_rotation = 0u32;
    let mut targets_processed = 0u64;
    let idle_backoff = Duration::from_secs(config.general.idle_backoff_seconds);

    info!(worker_id = %worker_id, "worker started");
    while !stop.load(Ordering::Relaxed) {
        let target = match deps
            .storage
            .claim_target(&shard, &worker_id, config.general.max_per_state)
            .await
        {
            Ok(Some(target)) => target,
            Ok(None) => {
                tokio::time::sleep(idle_backoff).await;
                continue;
            }
            Err(e) => {
                error!(worker_id = %worker_id, "claim failed: {e}");
                tokio::time::sleep(idle_backoff).await;
                continue;
            }
        };

        if let Some(mut snap) = registry.get_mut(&worker_id) {
            snap.current_target = Some(target.id);
            snap.last_heartbeat = Utc::now();
        }
        let _ = wal.append(&WalEvent::TargetStart {
            worker_id: worker_id.clone(),
            target_id: target.id,
            ts: Utc::now(),
        });

        let outcome = match crawl_target(&deps, &mut monitor, &target, &stop).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Checkpoint-level DB failure: leave the target in progress
                // for orphan recovery and keep going.
                error!(worker_id = %worker_id, target_id = target.id, "crawl error: {e}");
                CrawlOutcome::Failed
            }
        };

        let _ = wal.append(&WalEvent::TargetComplete {
            worker_id: worker_id.clone(),
            target_id: target.id,
            outcome: outcome.as_str().to_string(),
            ts: Utc::now(),
        });
        targets_processed += 1;
        if let Some(mut snap) = registry.get_mut(&worker_id) {
            snap.current_target = None;
            snap.last_heartbeat = Utc::now();
            snap.targets_processed = targets_processed;
        }

        let report = monitor.report();
        if report.level == HealthLevel::Critical {
            error!(worker_id = %worker_id, issues = ?report.issues, suggestions = ?report.suggestions, "worker health critical");
        }

        targets_since_rotation += 1;
        let forced = matches!(outcome, CrawlOutcome::Requeued);
        if forced || targets_since_rotation >= rotation_limit {
            if let Err(e) = fetcher.rotate_context().await {
                warn!(worker_id = %worker_id, "context rotation failed: {e}");
            }
            targets_since_rotation = 0;
            rotation_limit = rng.gen_range((nominal * 3 / 4).max(1)..=nominal * 5 / 4);
        }
    }

    let _ = wal.append(&WalEvent::WorkerStop {
        worker_id: worker_id.clone(),
        targets_processed,
        ts: Utc::now(),
    });
    if let Some(mut snap) = registry.get_mut(&worker_id) {
        snap.alive = false;
    }
    info!(worker_id = %worker_id, targets_processed, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn round_robin_sharding_covers_all_states_once() {
        let all = states(&["TX", "OK", "NM", "AR", "LA", "KS", "MO"]);
        let shards = shard_states(&all, 3);
        assert_eq!(shards.len(), 3);
        assert_eq!(shards[0], states(&["TX", "AR", "MO"]));
        assert_eq!(shards[1], states(&["OK", "LA"]));
        assert_eq!(shards[2], states(&["NM", "KS"]));

        let mut flattened: Vec<String> = shards.into_iter().flatten().collect();
        flattened.sort();
        let mut expected = all.clone();
        expected.sort();
        assert_eq!(flattened, expected);
    }

    #[test]
    fn more_workers_than_states_leaves_empty_shards() {
        let shards = shard_states(&states(&["TX", "OK"]), 5);
        assert_eq!(shards.len(), 5);
        assert!(shards[2].is_empty());
        assert!(shards[3].is_empty());
        assert!(shards[4].is_empty());
    }

    #[test]
    fn zero_workers_does_not_panic() {
        let shards = shard_states(&states(&["TX"]), 0);
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0], states(&["TX"]));
    }
}
