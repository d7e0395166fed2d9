//! Headless-browser fetch mode (the anti-bot-resistant path). The proxy
//! identity is bound to the browser context at launch; fingerprint
//! camouflage is injected before any page script runs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use futures::StreamExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use dirscraper_core::{FetchResponse, ScrapeError};
use dirscraper_health::{is_blocked, is_captcha};

use crate::fingerprint::Fingerprint;
use crate::humanize;
use crate::proxy::{ProxyPool, DIRECT};
use crate::PageFetcher;

struct BrowserContext {
    browser: Browser,
    handler: JoinHandle<()>,
    proxy: String,
    fingerprint: Fingerprint,
}

struct BrowserState {
    rng: StdRng,
    context: Option<BrowserContext>,
    session_requests: u32,
    session_limit: u32,
}

pub struct BrowserFetcher {
    pool: Arc<ProxyPool>,
    timeout: Duration,
    max_body: usize,
    session_nominal: u32,
    state: tokio::sync::Mutex<BrowserState>,
}

impl BrowserFetcher {
    pub fn new(
        pool: Arc<ProxyPool>,
        timeout: Duration,
        max_body: usize,
        session_nominal: u32,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let session_limit = humanize::session_length(session_nominal, &mut rng);
        Self {
            pool,
            timeout,
            max_body,
            session_nominal,
            state: tokio::sync::Mutex::new(BrowserState {
                rng,
                context: None,
                session_requests: 0,
                session_limit,
            }),
        }
    }

    async fn launch_context(
        &self,
        fingerprint: Fingerprint,
        proxy: String,
    ) -> Result<BrowserContext, ScrapeError> {
        let (width, height) = fingerprint.viewport;
        let mut builder = BrowserConfig::builder()
            .window_size(width, height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--mute-audio")
            .arg(format!("--lang={}", fingerprint.accept_language));
        if proxy != DIRECT {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }
        let config = builder
            .build()
            .map_err(|e| ScrapeError::Browser(format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::Browser(format!("launch failed: {e}")))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler: {e:?}");
                }
            }
        });

        info!(proxy = %proxy, ua = %fingerprint.user_agent, "browser context up");
        Ok(BrowserContext {
            browser,
            handler,
            proxy,
            fingerprint,
        })
    }

    async fn teardown(&self, mut ctx: BrowserContext) {
        if let Err(e) = ctx.browser.close().await {
            warn!("browser close: {e}");
        }
        ctx.handler.abort();
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    fn mode(&self) -> &'static str {
        "browser"
    }

    async fn fetch(
        &self,
        url: &Url,
        attempt: u32,
        pacing: Duration,
    ) -> Result<FetchResponse, ScrapeError> {
        let mut state = self.state.lock().await;

        state.session_requests += 1;
        if state.session_requests >= state.session_limit {
            state.session_requests = 0;
            state.session_limit =
                humanize::session_length(self.session_nominal, &mut state.rng);
            let pause = humanize::session_break(&mut state.rng);
            info!(pause_secs = pause.as_secs(), "session break");
            tokio::time::sleep(pause).await;
        }
        let wait = humanize::jittered(pacing, &mut state.rng);
        tokio::time::sleep(wait).await;

        if state.context.is_none() {
            let fingerprint = Fingerprint::random(&mut state.rng);
            let proxy = self.pool.acquire();
            state.context = Some(self.launch_context(fingerprint, proxy).await?);
        }
        let Some(ctx) = state.context.as_ref() else {
            return Err(ScrapeError::Browser("browser context unavailable".into()));
        };
        let endpoint = ctx.proxy.clone();

        let page = ctx
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScrapeError::Browser(format!("new page: {e}")))?;

        // Camouflage before any site script can look around.
        page.execute(AddScriptToEvaluateOnNewDocumentParams {
            source: ctx.fingerprint.stealth_script(),
            include_command_line_api: None,
            world_name: None,
            run_immediately: None,
        })
        .await
        .map_err(|e| ScrapeError::Browser(format!("stealth inject: {e}")))?;
        page.execute(SetUserAgentOverrideParams {
            user_agent: ctx.fingerprint.user_agent.clone(),
            accept_language: Some(ctx.fingerprint.accept_language.clone()),
            platform: None,
            user_agent_metadata: None,
        })
        .await
        .map_err(|e| ScrapeError::Browser(format!("ua override: {e}")))?;

        debug!(url = %url, proxy = %endpoint, attempt, "navigating");
        let start = Instant::now();
        let navigation = async {
            page.goto(url.as_str())
                .await
                .map_err(|e| ScrapeError::Network(e.to_string()))?;
            page.wait_for_navigation()
                .await
                .map_err(|e| ScrapeError::Network(e.to_string()))?;
            Ok::<(), ScrapeError>(())
        };
        match tokio::time::timeout(self.timeout, navigation).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.pool.report_failure(&endpoint, "network");
                let _ = page.close().await;
                return Err(e);
            }
            Err(_) => {
                self.pool.report_failure(&endpoint, "timeout");
                let _ = page.close().await;
                return Err(ScrapeError::Timeout(self.timeout.as_secs()));
            }
        }

        let body = page
            .content()
            .await
            .map_err(|e| ScrapeError::Browser(format!("content: {e}")))?;
        if body.len() > self.max_body {
            let _ = page.close().await;
            return Err(ScrapeError::BodyTooLarge {
                size: body.len(),
                max: self.max_body,
            });
        }

        // Scroll like a reader, then dwell proportionally to the text.
        for step in humanize::scroll_plan(body.len(), attempt) {
            let _ = page
                .evaluate(format!("window.scrollBy(0, {});", step.pixels))
                .await;
            tokio::time::sleep(step.pause).await;
        }
        tokio::time::sleep(humanize::reading_time(body.len(), attempt)).await;

        let _ = page.close().await;

        // Challenge interstitials render with a 200; the body is the signal
        // worth trusting here.
        let captcha = is_captcha(&body);
        let blocked = is_blocked(200, &body);
        let status = if blocked { 403 } else { 200 };
        if captcha {
            self.pool.report_failure(&endpoint, "captcha");
        } else if blocked {
            self.pool.report_failure(&endpoint, "blocked");
        } else {
            self.pool.report_success(&endpoint);
        }

        Ok(FetchResponse {
            url: url.to_string(),
            status,
            headers: Default::default(),
            body,
            elapsed_ms: start.elapsed().as_millis() as u64,
            fetched_at: chrono::Utc::now(),
            captcha,
            blocked,
            proxy: endpoint,
        })
    }

    async fn rotate_context(&self) -> Result<(), ScrapeError> {
        let mut state = self.state.lock().await;
        if let Some(ctx) = state.context.take() {
            self.teardown(ctx).await;
        }
        // Next fetch relaunches with a fresh fingerprint and proxy.
        Ok(())
    }
}
