//! Pure normalization helpers. No I/O; everything here is deterministic
//! and safe to call from both the parser and the persistence layer.

use std::collections::HashSet;
use std::sync::OnceLock;

use url::Url;

/// Query parameters that carry tracking state, never identity.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "msclkid", "mc_cid", "mc_eid", "ref", "referrer",
];

/// Domains that can never be a business's own website: the directory
/// itself, social networks, map services, review aggregators.
const IMPLAUSIBLE_DOMAINS: &[&str] = &[
    "yellowpages.com",
    "yp.com",
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "youtube.com",
    "tiktok.com",
    "pinterest.com",
    "yelp.com",
    "tripadvisor.com",
    "foursquare.com",
    "google.com",
    "bing.com",
    "mapquest.com",
    "bbb.org",
    "angi.com",
    "angieslist.com",
    "thumbtack.com",
];

/// Second-level public suffixes we must not treat as registrable domains.
const MULTI_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk", "net.uk",
    "com.au", "net.au", "org.au", "com.br", "com.mx", "com.ar",
    "co.nz", "co.jp", "co.kr", "co.in", "co.za", "com.sg", "com.hk",
];

fn implausible_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| IMPLAUSIBLE_DOMAINS.iter().copied().collect())
}

/// Canonical form of a website URL: https scheme, lowercased punycoded host,
/// no fragment, no tracking params, no trailing slash (except root).
/// Idempotent: canonicalize(canonicalize(u)) == canonicalize(u).
pub fn canonicalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    // Accept bare hosts ("example.com") the way directory pages print them.
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let mut url = Url::parse(&with_scheme).ok()?;
    match url.scheme() {
        "http" => {
            // Reparse rather than set_scheme so a now-default :443 port is
            // dropped and the result stays idempotent.
            let https = format!("https{}", &url.as_str()["http".len()..]);
            url = Url::parse(&https).ok()?;
        }
        "https" => {}
        _ => return None,
    }
    url.host_str()?;

    url.set_fragment(None);

    // Drop tracking params (and the utm_* family) but keep everything else,
    // preserving order.
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_ascii_lowercase();
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let q = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        url.set_query(Some(&q));
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Some(url.to_string())
}

/// Registrable domain (eTLD+1) of a URL, e.g. "https://www.acme.co.uk/x"
/// -> "acme.co.uk". Uses a fixed table of common multi-label suffixes.
pub fn extract_domain(raw: &str) -> Option<String> {
    let canonical = canonicalize_url(raw)?;
    let url = Url::parse(&canonical).ok()?;
    let host = url.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() {
        return Some(host);
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return None;
    }
    let last_two = labels[labels.len() - 2..].join(".");
    let suffix_len = if MULTI_LABEL_SUFFIXES.contains(&last_two.as_str()) {
        3
    } else {
        2
    };
    if labels.len() < suffix_len {
        return None;
    }
    Some(labels[labels.len() - suffix_len..].join("."))
}

/// NANP phone normalization to `+1-XXX-XXX-XXXX`.
/// Rejects anything that is not 10 digits after stripping punctuation and
/// an optional leading country code, or whose area code / exchange starts
/// with 0 or 1.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let mut digits: Vec<u8> = raw
        .bytes()
        .filter(|b| b.is_ascii_digit())
        .map(|b| b - b'0')
        .collect();
    if digits.len() == 11 && digits[0] == 1 {
        digits.remove(0);
    }
    if digits.len() != 10 {
        return None;
    }
    if digits[0] < 2 || digits[3] < 2 {
        return None;
    }
    let d: String = digits.iter().map(|n| (n + b'0') as char).collect();
    Some(format!("+1-{}-{}-{}", &d[0..3], &d[3..6], &d[6..10]))
}

/// Whether a URL could plausibly be a business's own website.
pub fn is_plausible_website(raw: &str) -> bool {
    let Some(domain) = extract_domain(raw) else {
        return false;
    };
    !implausible_set().contains(domain.as_str())
}

/// Collapse whitespace and reject names that carry no identity: shorter
/// than two characters or consisting solely of corporate suffixes.
pub fn clean_name(raw: &str) -> Option<String> {
    const SUFFIXES: &[&str] = &[
        "llc", "l.l.c", "inc", "inc.", "incorporated", "corp", "corp.",
        "co", "co.", "company", "ltd", "ltd.", "llp", "pllc", "pc", "pa",
    ];

    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() < 2 {
        return None;
    }
    let all_suffixes = collapsed.split_whitespace().all(|w| {
        let w = w.trim_matches(|c: char| c == ',' || c == '&').to_ascii_lowercase();
        w.is_empty() || SUFFIXES.contains(&w.as_str())
    });
    if all_suffixes {
        return None;
    }
    Some(collapsed)
}

/// URL slug for a city or category name: lowercase, runs of
/// non-alphanumerics collapsed to single hyphens.
pub fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('-');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_forces_https_and_lowercases() {
        assert_eq!(
            canonicalize_url("HTTP://WWW.Example.COM/About/").as_deref(),
            Some("https://www.example.com/About")
        );
    }

    #[test]
    fn canonicalize_strips_fragment_and_tracking() {
        assert_eq!(
            canonicalize_url(
                "https://example.com/page?utm_source=yp&utm_medium=cpc&id=7&fbclid=xyz#top"
            )
            .as_deref(),
            Some("https://example.com/page?id=7")
        );
        // Query reduced to nothing disappears entirely.
        assert_eq!(
            canonicalize_url("https://example.com/page?utm_source=yp").as_deref(),
            Some("https://example.com/page")
        );
    }

    #[test]
    fn canonicalize_accepts_bare_host() {
        assert_eq!(
            canonicalize_url("acmeplumbing.com").as_deref(),
            Some("https://acmeplumbing.com/")
        );
    }

    #[test]
    fn canonicalize_rejects_non_http() {
        assert_eq!(canonicalize_url("ftp://example.com/x"), None);
        assert_eq!(canonicalize_url("mailto:joe@example.com"), None);
        assert_eq!(canonicalize_url(""), None);
    }

    #[test]
    fn canonicalize_punycodes_idn() {
        let c = canonicalize_url("https://münchen-rohr.de/").unwrap();
        assert!(c.contains("xn--"), "expected punycoded host, got {c}");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let inputs = [
            "HTTP://Example.com/a/b/?utm_source=x&q=1#frag",
            "example.com",
            "https://sub.domain.co.uk/path/",
            "https://münchen-rohr.de/kontakt/",
            "http://example.com:443/x",
        ];
        for raw in inputs {
            let once = canonicalize_url(raw).unwrap();
            let twice = canonicalize_url(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn extract_domain_etld_plus_one() {
        assert_eq!(
            extract_domain("https://www.acme-plumbing.com/contact").as_deref(),
            Some("acme-plumbing.com")
        );
        assert_eq!(
            extract_domain("https://shop.acme.co.uk/x").as_deref(),
            Some("acme.co.uk")
        );
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(
            normalize_phone("(512) 555-0147").as_deref(),
            Some("+1-512-555-0147")
        );
        assert_eq!(
            normalize_phone("1-512-555-0147").as_deref(),
            Some("+1-512-555-0147")
        );
        assert_eq!(normalize_phone("512-555-014"), None); // 9 digits
        assert_eq!(normalize_phone("012-555-0147"), None); // area code 0xx
        assert_eq!(normalize_phone("512-155-0147"), None); // exchange 1xx
        assert_eq!(normalize_phone("call us"), None);
    }

    #[test]
    fn plausible_website_denies_aggregators() {
        assert!(is_plausible_website("https://acmeplumbing.com"));
        assert!(!is_plausible_website("https://www.yellowpages.com/austin-tx"));
        assert!(!is_plausible_website("https://www.facebook.com/acmeplumbing"));
        assert!(!is_plausible_website("https://maps.google.com/?q=acme"));
        assert!(!is_plausible_website("ftp://acme.com"));
    }

    #[test]
    fn name_cleaning() {
        assert_eq!(
            clean_name("  Acme   Plumbing  Co. ").as_deref(),
            Some("Acme Plumbing Co.")
        );
        assert_eq!(clean_name("LLC"), None);
        assert_eq!(clean_name("Inc., LLC"), None);
        assert_eq!(clean_name("A"), None);
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify("Oklahoma City"), "oklahoma-city");
        assert_eq!(slugify("Heating & Air Conditioning"), "heating-air-conditioning");
        assert_eq!(slugify("  Plumbers  "), "plumbers");
    }
}
