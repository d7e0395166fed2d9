//! Per-worker health tracking: rolling outcome windows, CAPTCHA/block
//! classification, and the adaptive request delay.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::warn;

use dirscraper_core::config::LimiterConfig;

/// Rolling window length for recent-outcome rates.
const WINDOW: usize = 100;

/// Markers that identify an interstitial challenge rather than results.
const CAPTCHA_MARKERS: &[&str] = &[
    "g-recaptcha",
    "grecaptcha",
    "recaptcha/api",
    "h-captcha",
    "hcaptcha.com",
    "cf-turnstile",
    "cf-chl-widget",
    "challenge-platform",
    "checking your browser before accessing",
    "verify you are human",
    "prove you're human",
    "unusual traffic from your computer",
];

const BLOCK_MARKERS: &[&str] = &[
    "access denied",
    "you are blocked",
    "you have been blocked",
    "rate limit exceeded",
];

const BLOCK_STATUSES: &[u16] = &[403, 429, 503, 504];

pub fn is_captcha(html: &str) -> bool {
    let lower = html.to_ascii_lowercase();
    CAPTCHA_MARKERS.iter().any(|m| lower.contains(m))
}

pub fn is_blocked(status: u16, html: &str) -> bool {
    if BLOCK_STATUSES.contains(&status) {
        return true;
    }
    let lower = html.to_ascii_lowercase();
    BLOCK_MARKERS.iter().any(|m| lower.contains(m))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub level: HealthLevel,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Cumulative counters since worker start.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub blocks: u64,
    pub captchas: u64,
    pub results_found: u64,
    pub results_accepted: u64,
    pub results_filtered: u64,
}

pub struct HealthMonitor {
    cfg: LimiterConfig,
    recent_success: VecDeque<bool>,
    recent_failure: VecDeque<bool>,
    recent_captcha: VecDeque<bool>,
    consecutive_failures: u32,
    delay_ms: u64,
    counters: Counters,
}

fn push_bounded(buf: &mut VecDeque<bool>, value: bool) {
    if buf.len() == WINDOW {
        buf.pop_front();
    }
    buf.push_back(value);
}

fn rate(buf: &VecDeque<bool>) -> f64 {
    if buf.is_empty() {
        return 0.0;
    }
    buf.iter().filter(|b| **b).count() as f64 / buf.len() as f64
}

impl HealthMonitor {
    pub fn new(cfg: LimiterConfig) -> Self {
        let delay_ms = cfg.base_delay_ms;
        Self {
            cfg,
            recent_success: VecDeque::with_capacity(WINDOW),
            recent_failure: VecDeque::with_capacity(WINDOW),
            recent_captcha: VecDeque::with_capacity(WINDOW),
            consecutive_failures: 0,
            delay_ms,
            counters: Counters::default(),
        }
    }

    /// Record one request outcome and recompute the adaptive delay.
    pub fn record_request(&mut self, success: bool, captcha: bool, blocked: bool) {
        self.counters.requests += 1;
        if success {
            self.counters.successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.counters.failures += 1;
            self.consecutive_failures += 1;
        }
        if captcha {
            self.counters.captchas += 1;
        }
        if blocked {
            self.counters.blocks += 1;
        }
        push_bounded(&mut self.recent_success, success);
        push_bounded(&mut self.recent_failure, !success);
        push_bounded(&mut self.recent_captcha, captcha);
        self.recompute_delay();
    }

    pub fn record_page(&mut self, found: usize, accepted: usize) {
        self.counters.results_found += found as u64;
        self.counters.results_accepted += accepted as u64;
        self.counters.results_filtered += (found - accepted.min(found)) as u64;
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    fn recompute_delay(&mut self) {
        let e = rate(&self.recent_failure);
        let c = rate(&self.recent_captcha);
        let s = rate(&self.recent_success);

        if e > self.cfg.error_threshold || c > self.cfg.captcha_threshold {
            self.delay_ms = ((self.delay_ms as f64 * 1.5) as u64).min(self.cfg.max_delay_ms);
        } else if s > 0.95 && c < 0.01 && self.delay_ms > self.cfg.base_delay_ms {
            self.delay_ms = ((self.delay_ms as f64 * 0.75) as u64).max(self.cfg.min_delay_ms);
        }
    }

    /// Advisory classification. The worker is free to ignore everything
    /// except critical, which it must at least log.
    pub fn report(&self) -> HealthReport {
        let e = rate(&self.recent_failure);
        let c = rate(&self.recent_captcha);

        let mut issues = Vec::new();
        let mut suggestions = Vec::new();

        if e > self.cfg.error_threshold {
            issues.push(format!("elevated failure rate ({:.0}%)", e * 100.0));
            suggestions.push("slow down: raise base delay or cut workers".to_string());
        }
        if c > self.cfg.captcha_threshold {
            issues.push(format!("elevated captcha rate ({:.0}%)", c * 100.0));
            suggestions.push("rotate fingerprint and take a session break".to_string());
        }
        if self.delay_ms >= self.cfg.max_delay_ms {
            issues.push("adaptive delay pinned at maximum".to_string());
            suggestions.push("take a longer session break before resuming".to_string());
        }
        if self.consecutive_failures >= 10 {
            issues.push(format!(
                "{} consecutive failed requests",
                self.consecutive_failures
            ));
            suggestions.push("rotate proxy and browser context".to_string());
        }
        if self.counters.successes >= 20 && self.counters.results_found == 0 {
            issues.push("requests succeed but no listings parsed".to_string());
            suggestions.push("investigate selector drift on the results page".to_string());
        }

        let level = if self.consecutive_failures >= 50 || issues.len() >= 4 {
            HealthLevel::Critical
        } else if issues.len() >= 2 {
            HealthLevel::Unhealthy
        } else if issues.len() == 1 {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };

        if level == HealthLevel::Critical {
            warn!(issues = ?issues, "worker health critical");
        }

        HealthReport {
            level,
            issues,
            suggestions,
        }
    }
}
