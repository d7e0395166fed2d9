//! Plain-HTTP fetch mode. One reqwest client per proxy endpoint; the
//! fingerprint rides on per-request headers and is rebuilt on context
//! rotation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};
use url::Url;

use dirscraper_core::{FetchResponse, ScrapeError};
use dirscraper_health::{is_blocked, is_captcha};

use crate::fingerprint::Fingerprint;
use crate::humanize;
use crate::proxy::{ProxyPool, DIRECT};
use crate::PageFetcher;

struct HttpState {
    rng: StdRng,
    fingerprint: Fingerprint,
    clients: HashMap<String, reqwest::Client>,
    session_requests: u32,
    session_limit: u32,
}

pub struct HttpFetcher {
    pool: Arc<ProxyPool>,
    timeout: Duration,
    max_body: usize,
    session_nominal: u32,
    state: Mutex<HttpState>,
}

impl HttpFetcher {
    pub fn new(
        pool: Arc<ProxyPool>,
        timeout: Duration,
        max_body: usize,
        session_nominal: u32,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let fingerprint = Fingerprint::random(&mut rng);
        let session_limit = humanize::session_length(session_nominal, &mut rng);
        Self {
            pool,
            timeout,
            max_body,
            session_nominal,
            state: Mutex::new(HttpState {
                rng,
                fingerprint,
                clients: HashMap::new(),
                session_requests: 0,
                session_limit,
            }),
        }
    }

    fn build_client(&self, endpoint: &str) -> Result<reqwest::Client, ScrapeError> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(Duration::from_secs(15))
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(5));
        if endpoint != DIRECT {
            let proxy = reqwest::Proxy::all(endpoint)
                .map_err(|e| ScrapeError::Proxy(format!("{endpoint}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|e| ScrapeError::Network(e.to_string()))
    }

    fn client_for(&self, endpoint: &str) -> Result<reqwest::Client, ScrapeError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = state.clients.get(endpoint) {
            return Ok(client.clone());
        }
        let client = self.build_client(endpoint)?;
        state.clients.insert(endpoint.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    fn mode(&self) -> &'static str {
        "http"
    }

    async fn fetch(
        &self,
        url: &Url,
        attempt: u32,
        pacing: Duration,
    ) -> Result<FetchResponse, ScrapeError> {
        // Decide all randomized waits under the lock, sleep after.
        let (session_pause, wait, fingerprint) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.session_requests += 1;
            let pause = if state.session_requests >= state.session_limit {
                state.session_requests = 0;
                state.session_limit =
                    humanize::session_length(self.session_nominal, &mut state.rng);
                Some(humanize::session_break(&mut state.rng))
            } else {
                None
            };
            let wait = humanize::jittered(pacing, &mut state.rng);
            (pause, wait, state.fingerprint.clone())
        };

        if let Some(pause) = session_pause {
            info!(pause_secs = pause.as_secs(), "session break");
            tokio::time::sleep(pause).await;
        }
        tokio::time::sleep(wait).await;

        let endpoint = self.pool.acquire();
        let client = self.client_for(&endpoint)?;

        debug!(url = %url, proxy = %endpoint, attempt, "fetching");
        let start = Instant::now();
        let response = client
            .get(url.as_str())
            .header("User-Agent", &fingerprint.user_agent)
            .header("Accept-Language", &fingerprint.accept_language)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(|e| {
                self.pool.report_failure(&endpoint, "network");
                warn!(url = %url, proxy = %endpoint, "fetch failed: {e}");
                if e.is_timeout() {
                    ScrapeError::Timeout(self.timeout.as_secs())
                } else {
                    ScrapeError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (k, v) in response.headers() {
            if let Ok(val) = v.to_str() {
                headers.insert(k.as_str().to_string(), val.to_string());
            }
        }

        let body = response.text().await.map_err(|e| {
            self.pool.report_failure(&endpoint, "network");
            ScrapeError::Network(e.to_string())
        })?;
        if body.len() > self.max_body {
            return Err(ScrapeError::BodyTooLarge {
                size: body.len(),
                max: self.max_body,
            });
        }

        let captcha = is_captcha(&body);
        let blocked = is_blocked(status, &body);
        if captcha {
            self.pool.report_failure(&endpoint, "captcha");
        } else if blocked {
            self.pool.report_failure(&endpoint, "blocked");
        } else if status < 400 {
            self.pool.report_success(&endpoint);
        }

        Ok(FetchResponse {
            url: url.to_string(),
            status,
            headers,
            body,
            elapsed_ms: start.elapsed().as_millis() as u64,
            fetched_at: chrono::Utc::now(),
            captcha,
            blocked,
            proxy: endpoint,
        })
    }

    async fn rotate_context(&self) -> Result<(), ScrapeError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.fingerprint = Fingerprint::random(&mut state.rng);
        state.clients.clear();
        debug!(ua = %state.fingerprint.user_agent, "http context rotated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rotation_changes_fingerprint_eventually() {
        let fetcher = HttpFetcher::new(
            Arc::new(ProxyPool::disabled()),
            Duration::from_secs(30),
            10 * 1024 * 1024,
            50,
            42,
        );
        let before = fetcher
            .state
            .lock()
            .unwrap()
            .fingerprint
            .user_agent
            .clone();
        // With 22 user agents a run of 10 rotations landing on the same one
        // is ~1e-13; treat any change as success.
        let mut changed = false;
        for _ in 0..10 {
            fetcher.rotate_context().await.unwrap();
            if fetcher.state.lock().unwrap().fingerprint.user_agent != before {
                changed = true;
                break;
            }
        }
        assert!(changed);
        assert!(fetcher.state.lock().unwrap().clients.is_empty());
    }

    #[test]
    fn builds_clients_for_direct_and_proxy() {
        let fetcher = HttpFetcher::new(
            Arc::new(ProxyPool::disabled()),
            Duration::from_secs(30),
            1024,
            50,
            1,
        );
        assert!(fetcher.client_for(DIRECT).is_ok());
        assert!(fetcher.client_for("socks5://127.0.0.1:1080").is_ok());
        assert!(fetcher.client_for("not a proxy url").is_err());
    }
}
