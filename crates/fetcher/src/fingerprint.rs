//! Request fingerprints drawn independently per request / browser context
//! from fixed pools.

use rand::seq::SliceRandom;
use rand::Rng;

pub const USER_AGENTS: &[&str] = &[
    // Chrome / Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 11.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    // Chrome / macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    // Chrome / Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    // Firefox / Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Windows NT 11.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0",
    // Firefox / macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.5; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:127.0) Gecko/20100101 Firefox/127.0",
    // Firefox / Linux
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (X11; Fedora; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0",
    // Safari / macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
    // Edge / Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.0.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36 Edg/125.0.0.0",
    "Mozilla/5.0 (Windows NT 11.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

pub const VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1680, 1050),
    (1600, 900),
    (1536, 864),
    (1440, 900),
    (1366, 768),
    (2560, 1440),
];

pub const TIMEZONES: &[&str] = &[
    "America/New_York",
    "America/Chicago",
    "America/Denver",
    "America/Phoenix",
    "America/Los_Angeles",
];

pub const HARDWARE_CONCURRENCY: &[u32] = &[4, 6, 8, 12, 16];
pub const DEVICE_MEMORY_GB: &[u32] = &[4, 8, 16, 32];

pub const LANGUAGE_SETS: &[&str] = &[
    "en-US,en;q=0.9",
    "en-US,en;q=0.9,es;q=0.8",
    "en-US,en;q=0.8",
    "en,en-US;q=0.9",
];

/// One outbound identity: everything a page could read about "the browser".
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub timezone: String,
    pub hardware_concurrency: u32,
    pub device_memory_gb: u32,
    pub accept_language: String,
}

impl Fingerprint {
    /// Each dimension is drawn independently, so the pool of combined
    /// identities is far larger than any single list.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Self {
            user_agent: USER_AGENTS.choose(rng).copied().unwrap_or(USER_AGENTS[0]).to_string(),
            viewport: *VIEWPORTS.choose(rng).unwrap_or(&VIEWPORTS[0]),
            timezone: TIMEZONES.choose(rng).copied().unwrap_or(TIMEZONES[0]).to_string(),
            hardware_concurrency: *HARDWARE_CONCURRENCY.choose(rng).unwrap_or(&8),
            device_memory_gb: *DEVICE_MEMORY_GB.choose(rng).unwrap_or(&8),
            accept_language: LANGUAGE_SETS.choose(rng).copied().unwrap_or(LANGUAGE_SETS[0]).to_string(),
        }
    }

    /// Navigator camouflage injected before any page script runs
    /// (browser mode only): webdriver off, plausible plugins, randomized
    /// hardware hints, automation sentinels removed.
    pub fn stealth_script(&self) -> String {
        format!(
            r#"
Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
Object.defineProperty(navigator, 'hardwareConcurrency', {{ get: () => {hw} }});
Object.defineProperty(navigator, 'deviceMemory', {{ get: () => {mem} }});
Object.defineProperty(navigator, 'languages', {{ get: () => {langs} }});
Object.defineProperty(navigator, 'plugins', {{
    get: () => [
        {{ name: 'PDF Viewer', filename: 'internal-pdf-viewer' }},
        {{ name: 'Chrome PDF Viewer', filename: 'internal-pdf-viewer' }},
        {{ name: 'Native Client', filename: 'internal-nacl-plugin' }}
    ]
}});
delete window.cdc_adoQpoasnfa76pfcZLmcfl_Array;
delete window.cdc_adoQpoasnfa76pfcZLmcfl_Promise;
delete window.cdc_adoQpoasnfa76pfcZLmcfl_Symbol;
delete window.__nightmare;
delete window._phantom;
delete window.callPhantom;
"#,
            hw = self.hardware_concurrency,
            mem = self.device_memory_gb,
            langs = language_array_json(&self.accept_language),
        )
    }
}

fn language_array_json(accept_language: &str) -> String {
    let langs: Vec<String> = accept_language
        .split(',')
        .map(|part| part.split(';').next().unwrap_or("").trim())
        .filter(|l| !l.is_empty())
        .map(|l| format!("'{l}'"))
        .collect();
    format!("[{}]", langs.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn ua_pool_covers_major_browsers() {
        assert!(USER_AGENTS.len() >= 20);
        assert!(USER_AGENTS.iter().any(|u| u.contains("Firefox")));
        assert!(USER_AGENTS.iter().any(|u| u.contains("Edg/")));
        assert!(USER_AGENTS.iter().any(|u| u.contains("Version/") && u.contains("Safari")));
        assert!(USER_AGENTS.iter().any(|u| u.contains("X11; Linux")));
    }

    #[test]
    fn same_seed_same_fingerprint() {
        let a = Fingerprint::random(&mut StdRng::seed_from_u64(7));
        let b = Fingerprint::random(&mut StdRng::seed_from_u64(7));
        assert_eq!(a.user_agent, b.user_agent);
        assert_eq!(a.viewport, b.viewport);
        assert_eq!(a.timezone, b.timezone);
    }

    #[test]
    fn stealth_script_carries_hints() {
        let mut rng = StdRng::seed_from_u64(1);
        let fp = Fingerprint::random(&mut rng);
        let js = fp.stealth_script();
        assert!(js.contains("webdriver"));
        assert!(js.contains(&fp.hardware_concurrency.to_string()));
        assert!(js.contains("'en-US'") || js.contains("'en'"));
        assert!(js.contains("plugins"));
    }
}
