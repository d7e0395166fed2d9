//! Outbound identity pool. One process-wide pool shared by every worker;
//! all mutation happens under the internal mutex.

use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{info, warn};

use dirscraper_core::ScrapeError;

/// Sentinel identity used when no proxy is available: go out directly.
pub const DIRECT: &str = "direct";

const BLACKLIST_AFTER: u32 = 10;
const BLACKLIST_FOR: Duration = Duration::from_secs(60 * 60);
const FAILURE_WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    LeastUsed,
    Random,
    StickySession,
}

impl Strategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "round_robin" => Some(Strategy::RoundRobin),
            "least_used" => Some(Strategy::LeastUsed),
            "random" => Some(Strategy::Random),
            "sticky_session" => Some(Strategy::StickySession),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct ProxyEntry {
    endpoint: String,
    kind: String,
    uses: u64,
    consecutive_failures: u32,
    /// Failure timestamps within the last hour.
    failure_window: Vec<Instant>,
    blacklisted_until: Option<Instant>,
    last_failure_reason: Option<String>,
}

impl ProxyEntry {
    fn eligible(&self, now: Instant) -> bool {
        match self.blacklisted_until {
            Some(until) => now >= until,
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyStats {
    pub total: usize,
    pub eligible: usize,
    pub blacklisted: usize,
    pub last_failure_reasons: Vec<(String, String)>,
}

struct PoolState {
    entries: Vec<ProxyEntry>,
    cursor: usize,
    sticky: Option<usize>,
}

pub struct ProxyPool {
    strategy: Strategy,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    pub fn new(endpoints: Vec<String>, strategy: Strategy) -> Self {
        let entries = endpoints
            .into_iter()
            .map(|endpoint| {
                let kind = endpoint
                    .split("://")
                    .next()
                    .filter(|scheme| *scheme != endpoint)
                    .unwrap_or("http")
                    .to_string();
                ProxyEntry {
                    endpoint,
                    kind,
                    uses: 0,
                    consecutive_failures: 0,
                    failure_window: Vec::new(),
                    blacklisted_until: None,
                    last_failure_reason: None,
                }
            })
            .collect();
        Self {
            strategy,
            state: Mutex::new(PoolState {
                entries,
                cursor: 0,
                sticky: None,
            }),
        }
    }

    /// Empty pool: every acquire returns the direct sentinel.
    pub fn disabled() -> Self {
        Self::new(Vec::new(), Strategy::RoundRobin)
    }

    /// One endpoint per line; blank lines and `#` comments skipped.
    pub fn from_file(path: &Path, strategy: Strategy) -> Result<Self, ScrapeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ScrapeError::Proxy(format!("cannot read {}: {e}", path.display())))?;
        let endpoints: Vec<String> = content
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| l.to_string())
            .collect();
        info!(count = endpoints.len(), path = %path.display(), "proxy pool loaded");
        Ok(Self::new(endpoints, strategy))
    }

    /// Pick an eligible endpoint by the configured policy, or `DIRECT` when
    /// the pool is empty or fully blacklisted.
    pub fn acquire(&self) -> String {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let eligible: Vec<usize> = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.eligible(now))
            .map(|(i, _)| i)
            .collect();
        if eligible.is_empty() {
            return DIRECT.to_string();
        }

        let chosen = match self.strategy {
            Strategy::RoundRobin => {
                let idx = eligible[state.cursor % eligible.len()];
                state.cursor = state.cursor.wrapping_add(1);
                idx
            }
            Strategy::LeastUsed => *eligible
                .iter()
                .min_by_key(|i| state.entries[**i].uses)
                .unwrap_or(&eligible[0]),
            Strategy::Random => {
                let pick = rand::thread_rng().gen_range(0..eligible.len());
                eligible[pick]
            }
            Strategy::StickySession => match state.sticky {
                Some(i) if state.entries[i].eligible(now) => i,
                _ => {
                    let idx = eligible[state.cursor % eligible.len()];
                    state.cursor = state.cursor.wrapping_add(1);
                    state.sticky = Some(idx);
                    idx
                }
            },
        };

        state.entries[chosen].uses += 1;
        state.entries[chosen].endpoint.clone()
    }

    pub fn report_success(&self, endpoint: &str) {
        if endpoint == DIRECT {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = state.entries.iter_mut().find(|e| e.endpoint == endpoint) {
            entry.consecutive_failures = 0;
        }
    }

    pub fn report_failure(&self, endpoint: &str, kind: &str) {
        if endpoint == DIRECT {
            return;
        }
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let sticky_broken = {
            let Some(entry) = state.entries.iter_mut().find(|e| e.endpoint == endpoint) else {
                return;
            };
            entry.consecutive_failures += 1;
            entry.failure_window.push(now);
            entry
                .failure_window
                .retain(|t| now.duration_since(*t) <= FAILURE_WINDOW);
            entry.last_failure_reason = Some(kind.to_string());
            if entry.consecutive_failures >= BLACKLIST_AFTER {
                entry.blacklisted_until = Some(now + BLACKLIST_FOR);
                entry.consecutive_failures = 0;
                warn!(endpoint, kind, "proxy blacklisted for 60 minutes");
                true
            } else {
                false
            }
        };
        if sticky_broken {
            if let Some(i) = state.sticky {
                if state.entries[i].endpoint == endpoint {
                    state.sticky = None;
                }
            }
        }
    }

    pub fn stats(&self) -> ProxyStats {
        let now = Instant::now();
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let eligible = state.entries.iter().filter(|e| e.eligible(now)).count();
        ProxyStats {
            total: state.entries.len(),
            eligible,
            blacklisted: state.entries.len() - eligible,
            last_failure_reasons: state
                .entries
                .iter()
                .filter_map(|e| {
                    e.last_failure_reason
                        .as_ref()
                        .map(|r| (e.endpoint.clone(), r.clone()))
                })
                .collect(),
        }
    }

    pub fn kind_of(&self, endpoint: &str) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .entries
            .iter()
            .find(|e| e.endpoint == endpoint)
            .map(|e| e.kind.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(strategy: Strategy) -> ProxyPool {
        ProxyPool::new(
            vec![
                "socks5://10.0.0.1:1080".into(),
                "socks5://10.0.0.2:1080".into(),
                "http://10.0.0.3:8080".into(),
            ],
            strategy,
        )
    }

    #[test]
    fn round_robin_cycles() {
        let p = pool(Strategy::RoundRobin);
        let a = p.acquire();
        let b = p.acquire();
        let c = p.acquire();
        let d = p.acquire();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(a, d);
    }

    #[test]
    fn least_used_balances() {
        let p = pool(Strategy::LeastUsed);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..9 {
            *counts.entry(p.acquire()).or_insert(0) += 1;
        }
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|c| *c == 3));
    }

    #[test]
    fn sticky_session_repeats_until_failure() {
        let p = pool(Strategy::StickySession);
        let first = p.acquire();
        assert_eq!(p.acquire(), first);
        assert_eq!(p.acquire(), first);

        for _ in 0..10 {
            p.report_failure(&first, "captcha");
        }
        let next = p.acquire();
        assert_ne!(next, first);
    }

    #[test]
    fn ten_consecutive_failures_blacklists() {
        let p = pool(Strategy::RoundRobin);
        let victim = "socks5://10.0.0.1:1080";
        for _ in 0..9 {
            p.report_failure(victim, "timeout");
        }
        assert_eq!(p.stats().blacklisted, 0);
        p.report_failure(victim, "timeout");
        let stats = p.stats();
        assert_eq!(stats.blacklisted, 1);
        assert_eq!(stats.eligible, 2);

        for _ in 0..12 {
            assert_ne!(p.acquire(), victim);
        }
    }

    #[test]
    fn success_resets_failure_streak() {
        let p = pool(Strategy::RoundRobin);
        let victim = "socks5://10.0.0.1:1080";
        for _ in 0..9 {
            p.report_failure(victim, "timeout");
        }
        p.report_success(victim);
        p.report_failure(victim, "timeout");
        assert_eq!(p.stats().blacklisted, 0);
    }

    #[test]
    fn exhausted_pool_falls_back_to_direct() {
        let p = ProxyPool::new(vec!["socks5://10.0.0.1:1080".into()], Strategy::Random);
        for _ in 0..10 {
            p.report_failure("socks5://10.0.0.1:1080", "blocked");
        }
        assert_eq!(p.acquire(), DIRECT);

        let empty = ProxyPool::disabled();
        assert_eq!(empty.acquire(), DIRECT);
        empty.report_failure(DIRECT, "x");
        assert_eq!(empty.stats().total, 0);
    }

    #[test]
    fn stats_carry_failure_reasons() {
        let p = pool(Strategy::RoundRobin);
        p.report_failure("http://10.0.0.3:8080", "captcha");
        let stats = p.stats();
        assert_eq!(
            stats.last_failure_reasons,
            vec![("http://10.0.0.3:8080".to_string(), "captcha".to_string())]
        );
    }
}
