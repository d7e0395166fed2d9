pub mod fingerprint;
pub mod http;
pub mod humanize;
pub mod proxy;

#[cfg(feature = "browser")]
pub mod browser;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use dirscraper_core::config::AppConfig;
use dirscraper_core::{FetchResponse, ScrapeError};

pub use http::HttpFetcher;
pub use proxy::{ProxyPool, ProxyStats, Strategy, DIRECT};

/// Contract shared by both fetch modes. `pacing` is the health monitor's
/// current adaptive delay; the fetcher adds jitter, session breaks and
/// per-page dwell on top of it.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    fn mode(&self) -> &'static str;

    async fn fetch(
        &self,
        url: &Url,
        attempt: u32,
        pacing: Duration,
    ) -> Result<FetchResponse, ScrapeError>;

    /// Tear down the current outbound identity (fingerprint, cookie jars,
    /// browser context) and start fresh on the next request.
    async fn rotate_context(&self) -> Result<(), ScrapeError>;
}

/// Build the fetch mode the config asks for. `use_browser` requires the
/// `browser` cargo feature; without it the request is a config error
/// rather than a silent downgrade.
pub fn build_fetcher(
    config: &AppConfig,
    pool: Arc<ProxyPool>,
    seed: u64,
) -> Result<Arc<dyn PageFetcher>, ScrapeError> {
    let timeout = Duration::from_secs(config.fetch.request_timeout_seconds);
    let max_body = config.fetch.max_body_size_mb * 1024 * 1024;
    let session_nominal = config.fetch.session_break_every.max(1);

    if config.fetch.use_browser {
        #[cfg(feature = "browser")]
        {
            return Ok(Arc::new(browser::BrowserFetcher::new(
                pool,
                timeout,
                max_body,
                session_nominal,
                seed,
            )));
        }
        #[cfg(not(feature = "browser"))]
        {
            return Err(ScrapeError::Config(
                "use_browser=true but built without the `browser` feature".into(),
            ));
        }
    }
    Ok(Arc::new(HttpFetcher::new(
        pool,
        timeout,
        max_body,
        session_nominal,
        seed,
    )))
}

pub fn build_proxy_pool(config: &AppConfig) -> Result<ProxyPool, ScrapeError> {
    let strategy = Strategy::parse(&config.proxy.proxy_strategy).ok_or_else(|| {
        ScrapeError::Config(format!(
            "unknown proxy_strategy: {}",
            config.proxy.proxy_strategy
        ))
    })?;
    match &config.proxy.proxy_file {
        Some(path) => ProxyPool::from_file(std::path::Path::new(path), strategy),
        None => Ok(ProxyPool::disabled()),
    }
}
