//! Extraction of business listings from one search-results page.
//!
//! The directory markup drifts; every field is read through a prioritized
//! list of selector strategies and the first hit wins. A card that matches
//! nothing still yields a null-filled listing rather than an error.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use dirscraper_core::canonical::canonicalize_url;
use dirscraper_core::Listing;

/// Card containers, most specific first.
const CARD_STRATEGIES: &[&str] = &[
    "div.search-results div.result",
    "div.srp-listing",
    "div.organic div.result",
    "article.listing",
];

/// Containers that hold only paid placements.
const AD_CONTAINERS: &[&str] = &["div.paid-listing", "section.ad-leaders div.result"];

const NAME_STRATEGIES: &[&str] = &[
    "a.business-name span",
    "a.business-name",
    "h2.n a",
    "h2 a",
    "h3 a",
];

const PHONE_STRATEGIES: &[&str] = &[
    "div.phones.phone.primary",
    "div.phones",
    "li.phone",
    "span.phone",
];

const ADDRESS_STRATEGIES: &[&str] = &["div.adr", "p.adr", "span.street-address"];

const WEBSITE_STRATEGIES: &[&str] = &[
    "a.track-visit-website",
    "a.website-link",
    "a[class*=website]",
];

const PROFILE_STRATEGIES: &[&str] = &["a.business-name", "h2.n a", "h2 a"];

const CATEGORY_STRATEGIES: &[&str] = &["div.categories a", "div.categories span", "p.categories a"];

const HOURS_STRATEGIES: &[&str] = &["div.open-status", "span.hours", "div.hours"];

const DESCRIPTION_STRATEGIES: &[&str] = &["p.body", "div.snippet", "p.snippet", "div.body p"];

const SERVICE_STRATEGIES: &[&str] = &["div.services a", "ul.services li"];

const RATING_STRATEGIES: &[&str] = &["div.result-rating", "span.result-rating", "div.ratings"];

static REVIEW_COUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)").unwrap());

fn sel(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn first_element<'a>(scope: &ElementRef<'a>, strategies: &[&str]) -> Option<ElementRef<'a>> {
    for s in strategies {
        if let Some(selector) = sel(s) {
            if let Some(el) = scope.select(&selector).next() {
                return Some(el);
            }
        }
    }
    None
}

fn first_text(scope: &ElementRef<'_>, strategies: &[&str]) -> Option<String> {
    let el = first_element(scope, strategies)?;
    let text = el
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn first_attr(scope: &ElementRef<'_>, strategies: &[&str], attr: &str) -> Option<String> {
    for s in strategies {
        if let Some(selector) = sel(s) {
            for el in scope.select(&selector) {
                if let Some(v) = el.value().attr(attr) {
                    let v = v.trim();
                    if !v.is_empty() {
                        return Some(v.to_string());
                    }
                }
            }
        }
    }
    None
}

fn all_texts(scope: &ElementRef<'_>, strategies: &[&str]) -> Vec<String> {
    for s in strategies {
        if let Some(selector) = sel(s) {
            let values: Vec<String> = scope
                .select(&selector)
                .map(|el| {
                    el.text()
                        .collect::<String>()
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .filter(|t| !t.is_empty())
                .collect();
            if !values.is_empty() {
                return values;
            }
        }
    }
    Vec::new()
}

/// Star rating from either a numeric attribute or the directory's
/// word-class convention (`one` .. `five`, plus `half`).
fn extract_rating(card: &ElementRef<'_>) -> Option<f32> {
    let el = first_element(card, RATING_STRATEGIES)?;
    if let Some(v) = el.value().attr("data-rating") {
        if let Ok(n) = v.trim().parse::<f32>() {
            if (0.0..=5.0).contains(&n) {
                return Some(n);
            }
        }
    }
    let mut base: Option<f32> = None;
    let mut half = false;
    for class in el.value().classes() {
        match class {
            "one" => base = Some(1.0),
            "two" => base = Some(2.0),
            "three" => base = Some(3.0),
            "four" => base = Some(4.0),
            "five" => base = Some(5.0),
            "half" => half = true,
            _ => {}
        }
    }
    base.map(|b| if half { b + 0.5 } else { b })
}

fn extract_reviews(card: &ElementRef<'_>) -> Option<i32> {
    let text = first_text(card, &["span.count", "span.rating-count", "a.rating-count"])?;
    let caps = REVIEW_COUNT_RE.captures(&text)?;
    caps[1].parse().ok()
}

fn is_sponsored_card(card: &ElementRef<'_>) -> bool {
    let classes: Vec<&str> = card.value().classes().collect();
    if classes.iter().any(|c| c.contains("paid") || c.contains("sponsored")) {
        return true;
    }
    if let Some(pill) = first_text(card, &["span.ad-pill", "span.ad-badge", "div.ad-label"]) {
        let pill = pill.to_ascii_lowercase();
        return pill == "ad" || pill.contains("sponsor");
    }
    false
}

fn resolve_href(href: &str, base: &Url) -> Option<String> {
    base.join(href).ok().map(|u| u.to_string())
}

fn extract_card(card: &ElementRef<'_>, source_url: &Url, in_ad_container: bool) -> Listing {
    let phone = first_text(card, PHONE_STRATEGIES)
        .or_else(|| first_attr(card, &["a[href^='tel:']"], "href").map(|h| h.trim_start_matches("tel:").to_string()));

    let address = match (
        first_text(card, ADDRESS_STRATEGIES),
        first_text(card, &["div.locality", "span.locality"]),
    ) {
        (Some(street), Some(locality)) if !street.contains(&locality) => {
            Some(format!("{street} {locality}"))
        }
        (street, locality) => street.or(locality),
    };

    let website = first_attr(card, WEBSITE_STRATEGIES, "href");
    let profile_url =
        first_attr(card, PROFILE_STRATEGIES, "href").and_then(|h| resolve_href(&h, source_url));

    Listing {
        name: first_text(card, NAME_STRATEGIES),
        phone,
        address,
        website,
        profile_url,
        category_tags: all_texts(card, CATEGORY_STRATEGIES),
        rating: extract_rating(card),
        reviews: extract_reviews(card),
        is_sponsored: in_ad_container || is_sponsored_card(card),
        business_hours: first_text(card, HOURS_STRATEGIES),
        description: first_text(card, DESCRIPTION_STRATEGIES),
        services: all_texts(card, SERVICE_STRATEGIES),
        source_page_url: source_url.to_string(),
    }
}

/// Parse one search-results page into an ordered list of listings.
///
/// Sponsored cards are tagged; when `include_sponsored` is false, cards in
/// dedicated ad containers are dropped entirely (inline sponsored cards
/// stay, tagged, for the filter to judge). Duplicate websites within the
/// page keep the first occurrence.
pub fn parse_listing_page(html: &str, source_url: &Url, include_sponsored: bool) -> Vec<Listing> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let mut ad_cards: Vec<ElementRef<'_>> = Vec::new();
    for s in AD_CONTAINERS {
        if let Some(selector) = sel(s) {
            ad_cards.extend(root.select(&selector));
        }
    }

    let mut cards: Vec<(ElementRef<'_>, bool)> = Vec::new();
    for s in CARD_STRATEGIES {
        let Some(selector) = sel(s) else { continue };
        let found: Vec<ElementRef<'_>> = root.select(&selector).collect();
        if !found.is_empty() {
            for card in found {
                let in_ad = ad_cards.iter().any(|a| a.id() == card.id());
                cards.push((card, in_ad));
            }
            break;
        }
    }
    // Dedicated ad containers that the organic strategies did not cover.
    for ad in &ad_cards {
        if !cards.iter().any(|(c, _)| c.id() == ad.id()) {
            cards.push((*ad, true));
        }
    }

    let mut listings = Vec::with_capacity(cards.len());
    let mut seen_websites: Vec<String> = Vec::new();
    for (card, in_ad) in cards {
        let listing = extract_card(&card, source_url, in_ad);
        if listing.is_sponsored && in_ad && !include_sponsored {
            continue;
        }
        if let Some(site) = listing.website.as_deref().and_then(canonicalize_url) {
            if seen_websites.iter().any(|s| s == &site) {
                continue;
            }
            seen_websites.push(site);
        }
        listings.push(listing);
    }

    debug!(
        count = listings.len(),
        url = %source_url,
        "parsed listing page"
    );
    listings
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
        <div class="search-results organic">
          <div class="result" id="lid-1">
            <h2 class="n"><a class="business-name" href="/austin-tx/mip/acme-plumbing-1"><span>Acme Plumbing Co</span></a></h2>
            <div class="phones phone primary">(512) 555-0147</div>
            <div class="adr"><span class="street-address">100 Congress Ave</span></div>
            <div class="locality">Austin, TX 78701</div>
            <a class="track-visit-website" href="https://acmeplumbing.com?utm_source=yp">Website</a>
            <div class="categories"><a>Plumbers</a><a>Water Heater Repair</a></div>
            <div class="ratings"><div class="result-rating four half"></div><span class="count">(23)</span></div>
            <div class="open-status">Open 24 Hours</div>
            <p class="body">Licensed residential plumbing and drain service.</p>
          </div>
          <div class="result" id="lid-2">
            <h2 class="n"><a class="business-name" href="/austin-tx/mip/acme-plumbing-dup"><span>Acme Plumbing (Duplicate)</span></a></h2>
            <a class="track-visit-website" href="http://ACMEPLUMBING.com/">Website</a>
            <div class="categories"><a>Plumbers</a></div>
          </div>
          <div class="result" id="lid-3">
            <span class="ad-pill">Ad</span>
            <h2 class="n"><a class="business-name" href="/austin-tx/mip/fastfix"><span>FastFix Drains</span></a></h2>
            <div class="categories"><a>Plumbers</a></div>
          </div>
          <div class="result" id="lid-4">
            <h2 class="n"></h2>
          </div>
        </div>
        <div class="paid-listing">
            <h2><a class="business-name" href="/austin-tx/mip/megacorp"><span>MegaCorp Services</span></a></h2>
            <div class="categories"><a>Plumbers</a></div>
        </div>
        </body></html>
    "#;

    fn src() -> Url {
        Url::parse("https://www.yellowpages.com/austin-tx/plumbers").unwrap()
    }

    #[test]
    fn extracts_full_card() {
        let listings = parse_listing_page(PAGE, &src(), true);
        let first = &listings[0];
        assert_eq!(first.name.as_deref(), Some("Acme Plumbing Co"));
        assert_eq!(first.phone.as_deref(), Some("(512) 555-0147"));
        assert!(first.address.as_deref().unwrap().contains("100 Congress Ave"));
        assert!(first.address.as_deref().unwrap().contains("Austin"));
        assert_eq!(
            first.website.as_deref(),
            Some("https://acmeplumbing.com?utm_source=yp")
        );
        assert_eq!(
            first.profile_url.as_deref(),
            Some("https://www.yellowpages.com/austin-tx/mip/acme-plumbing-1")
        );
        assert_eq!(
            first.category_tags,
            vec!["Plumbers".to_string(), "Water Heater Repair".to_string()]
        );
        assert_eq!(first.rating, Some(4.5));
        assert_eq!(first.reviews, Some(23));
        assert!(!first.is_sponsored);
        assert_eq!(first.business_hours.as_deref(), Some("Open 24 Hours"));
        assert_eq!(first.source_page_url, src().to_string());
    }

    #[test]
    fn dedups_same_canonical_website_keeping_first() {
        let listings = parse_listing_page(PAGE, &src(), true);
        let acme_count = listings
            .iter()
            .filter(|l| {
                l.website
                    .as_deref()
                    .map(|w| w.to_ascii_lowercase().contains("acmeplumbing"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(acme_count, 1);
        assert_eq!(listings[0].name.as_deref(), Some("Acme Plumbing Co"));
    }

    #[test]
    fn tags_inline_sponsored_and_drops_ad_container_without_flag() {
        let with = parse_listing_page(PAGE, &src(), true);
        assert!(with
            .iter()
            .any(|l| l.name.as_deref() == Some("MegaCorp Services") && l.is_sponsored));
        assert!(with
            .iter()
            .any(|l| l.name.as_deref() == Some("FastFix Drains") && l.is_sponsored));

        let without = parse_listing_page(PAGE, &src(), false);
        assert!(!without
            .iter()
            .any(|l| l.name.as_deref() == Some("MegaCorp Services")));
        // Inline sponsored cards stay tagged for the filter.
        assert!(without
            .iter()
            .any(|l| l.name.as_deref() == Some("FastFix Drains") && l.is_sponsored));
    }

    #[test]
    fn malformed_card_yields_nulls_not_errors() {
        let listings = parse_listing_page(PAGE, &src(), true);
        let empty = listings
            .iter()
            .find(|l| l.name.is_none())
            .expect("null-filled card present");
        assert!(empty.phone.is_none());
        assert!(empty.website.is_none());
        assert!(empty.category_tags.is_empty());
    }

    #[test]
    fn empty_page_parses_to_nothing() {
        let listings = parse_listing_page("<html><body><p>No results</p></body></html>", &src(), true);
        assert!(listings.is_empty());
    }
}
