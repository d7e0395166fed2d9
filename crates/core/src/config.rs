use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub database: DatabaseConfig,
    pub directory: DirectoryConfig,
    pub fetch: FetchConfig,
    pub limiter: LimiterConfig,
    pub filter: FilterConfig,
    pub proxy: ProxyConfig,
    pub seed: SeedConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Two-letter state codes to shard across workers.
    pub states: Vec<String>,
    #[serde(default = "default_max_per_state")]
    pub max_per_state: i64,
    /// When set, overrides every target's page_target at claim time.
    #[serde(default)]
    pub max_pages_override: Option<i16>,
    #[serde(default = "default_orphan_timeout")]
    pub orphan_timeout_minutes: i64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_idle_backoff")]
    pub idle_backoff_seconds: u64,
    #[serde(default = "default_wal_dir")]
    pub wal_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DirectoryConfig {
    /// Source tag written on every Company row.
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default)]
    pub use_browser: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_session_break")]
    pub session_break_every: u32,
    #[serde(default = "default_context_rotation")]
    pub context_rotation_every: u32,
    #[serde(default = "default_max_body_mb")]
    pub max_body_size_mb: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimiterConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Recent failure rate that triggers slow-down (0..1).
    #[serde(default = "default_error_threshold")]
    pub error_threshold: f64,
    /// Recent CAPTCHA rate that triggers slow-down (0..1).
    #[serde(default = "default_captcha_threshold")]
    pub captcha_threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    pub allowlist_path: String,
    pub blocklist_path: String,
    pub anti_keywords_path: String,
    pub positive_hints_path: String,
    pub deny_domains_path: String,
    #[serde(default = "default_min_score")]
    pub min_score: u8,
    #[serde(default)]
    pub include_sponsored: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    #[serde(default)]
    pub proxy_file: Option<String>,
    #[serde(default = "default_proxy_strategy")]
    pub proxy_strategy: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedConfig {
    pub cities_path: String,
    pub categories_path: String,
}

fn default_workers() -> usize { 5 }
fn default_max_per_state() -> i64 { 5 }
fn default_orphan_timeout() -> i64 { 60 }
fn default_max_attempts() -> i32 { 3 }
fn default_idle_backoff() -> u64 { 15 }
fn default_wal_dir() -> String { "data/wal".into() }
fn default_source() -> String { "yellowpages".into() }
fn default_base_url() -> String { "https://www.yellowpages.com".into() }
fn default_request_timeout() -> u64 { 45 }
fn default_session_break() -> u32 { 50 }
fn default_context_rotation() -> u32 { 20 }
fn default_max_body_mb() -> usize { 10 }
fn default_base_delay() -> u64 { 5_000 }
fn default_min_delay() -> u64 { 2_000 }
fn default_max_delay() -> u64 { 30_000 }
fn default_error_threshold() -> f64 { 0.20 }
fn default_captcha_threshold() -> f64 { 0.05 }
fn default_min_score() -> u8 { 50 }
fn default_proxy_strategy() -> String { "round_robin".into() }

impl AppConfig {
    /// Startup validation. Anything wrong here is fatal before workers spawn.
    pub fn validate(&self) -> Result<(), crate::ScrapeError> {
        if self.general.workers == 0 {
            return Err(crate::ScrapeError::Config("workers must be > 0".into()));
        }
        if self.general.states.is_empty() {
            return Err(crate::ScrapeError::Config("no states configured".into()));
        }
        for s in &self.general.states {
            if s.len() != 2 || !s.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(crate::ScrapeError::Config(format!(
                    "invalid state code: {s:?}"
                )));
            }
        }
        if self.general.max_per_state < 1 {
            return Err(crate::ScrapeError::Config(
                "max_per_state must be >= 1".into(),
            ));
        }
        if self.limiter.min_delay_ms > self.limiter.max_delay_ms {
            return Err(crate::ScrapeError::Config(
                "min_delay_ms exceeds max_delay_ms".into(),
            ));
        }
        match self.proxy.proxy_strategy.as_str() {
            "round_robin" | "least_used" | "random" | "sticky_session" => {}
            other => {
                return Err(crate::ScrapeError::Config(format!(
                    "unknown proxy_strategy: {other}"
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            [general]
            states = ["TX", "OK"]

            [database]
            url = "postgres://localhost/dirscraper"

            [directory]

            [fetch]

            [limiter]

            [filter]
            allowlist_path = "config/filters/allowlist.txt"
            blocklist_path = "config/filters/blocklist.txt"
            anti_keywords_path = "config/filters/anti_keywords.txt"
            positive_hints_path = "config/filters/positive_hints.txt"
            deny_domains_path = "config/filters/deny_domains.txt"

            [proxy]

            [seed]
            cities_path = "config/cities.csv"
            categories_path = "config/categories.txt"
        "#
    }

    #[test]
    fn defaults_fill_in() {
        let cfg: AppConfig = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(cfg.general.workers, 5);
        assert_eq!(cfg.general.max_per_state, 5);
        assert_eq!(cfg.limiter.base_delay_ms, 5_000);
        assert_eq!(cfg.fetch.session_break_every, 50);
        assert_eq!(cfg.proxy.proxy_strategy, "round_robin");
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_bad_state_code() {
        let mut cfg: AppConfig = toml::from_str(minimal_toml()).unwrap();
        cfg.general.states = vec!["TEX".into()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unknown_proxy_strategy() {
        let mut cfg: AppConfig = toml::from_str(minimal_toml()).unwrap();
        cfg.proxy.proxy_strategy = "fastest".into();
        assert!(cfg.validate().is_err());
    }
}
