//! Deterministic admit/reject decisions over extracted listings.
//!
//! All configuration is data: five plain-text files loaded once at startup.
//! Given the same configuration and listing, `decide` always returns the
//! same `(accepted, reason, score)`.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;
use tracing::info;

use dirscraper_core::canonical::{clean_name, extract_domain, is_plausible_website};
use dirscraper_core::{FilterDecision, Listing, ScrapeError};

pub struct FilterEngine {
    allowlist: HashSet<String>,
    blocklist: HashSet<String>,
    anti_keywords: Vec<AntiKeyword>,
    positive_hints: Vec<String>,
    deny_domains: HashSet<String>,
    min_score: u8,
    include_sponsored: bool,
}

struct AntiKeyword {
    word: String,
    pattern: Regex,
}

fn read_list(path: &Path) -> Result<Vec<String>, ScrapeError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ScrapeError::Config(format!("cannot read {}: {e}", path.display())))?;
    Ok(content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_ascii_lowercase())
        .collect())
}

/// The distinguished equipment/supplies tag: names a vendor rather than
/// a service provider. Only consulted when it is a listing's sole
/// allowed tag.
fn is_equipment_tag(tag: &str) -> bool {
    tag.contains("equipment") || tag.contains("supplies")
}

impl FilterEngine {
    pub fn load(
        allowlist_path: &Path,
        blocklist_path: &Path,
        anti_keywords_path: &Path,
        positive_hints_path: &Path,
        deny_domains_path: &Path,
        min_score: u8,
        include_sponsored: bool,
    ) -> Result<Self, ScrapeError> {
        let engine = Self::from_parts(
            read_list(allowlist_path)?,
            read_list(blocklist_path)?,
            read_list(anti_keywords_path)?,
            read_list(positive_hints_path)?,
            read_list(deny_domains_path)?,
            min_score,
            include_sponsored,
        )?;
        info!(
            allow = engine.allowlist.len(),
            block = engine.blocklist.len(),
            anti = engine.anti_keywords.len(),
            hints = engine.positive_hints.len(),
            deny_domains = engine.deny_domains.len(),
            min_score,
            "filter configuration loaded"
        );
        Ok(engine)
    }

    pub fn from_parts(
        allowlist: Vec<String>,
        blocklist: Vec<String>,
        anti_keywords: Vec<String>,
        positive_hints: Vec<String>,
        deny_domains: Vec<String>,
        min_score: u8,
        include_sponsored: bool,
    ) -> Result<Self, ScrapeError> {
        if allowlist.is_empty() {
            return Err(ScrapeError::Config("category allowlist is empty".into()));
        }
        let anti_keywords = anti_keywords
            .into_iter()
            .map(|word| {
                let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&word)))
                    .map_err(|e| ScrapeError::Config(format!("anti-keyword {word:?}: {e}")))?;
                Ok(AntiKeyword { word, pattern })
            })
            .collect::<Result<Vec<_>, ScrapeError>>()?;

        Ok(Self {
            allowlist: allowlist.into_iter().map(|s| s.to_ascii_lowercase()).collect(),
            blocklist: blocklist.into_iter().map(|s| s.to_ascii_lowercase()).collect(),
            anti_keywords,
            positive_hints: positive_hints
                .into_iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            deny_domains: deny_domains
                .into_iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            min_score,
            include_sponsored,
        })
    }

    fn website_domain_denied(&self, website: &str) -> bool {
        match extract_domain(website) {
            Some(domain) => self.deny_domains.contains(&domain),
            None => false,
        }
    }

    fn count_hint_occurrences(&self, text: &str) -> i32 {
        let lower = text.to_ascii_lowercase();
        let mut count = 0;
        for hint in &self.positive_hints {
            count += lower.matches(hint.as_str()).count() as i32;
        }
        count
    }

    fn has_hint(&self, listing: &Listing) -> bool {
        let name = listing.name.as_deref().unwrap_or("");
        let desc = listing.description.as_deref().unwrap_or("");
        self.count_hint_occurrences(name) > 0 || self.count_hint_occurrences(desc) > 0
    }

    /// The eleven-step decision procedure. The first firing rule decides;
    /// rules 1-8 reject with score 0, rules 9-11 carry the computed score.
    pub fn decide(&self, listing: &Listing) -> FilterDecision {
        let reject = |reason: String| FilterDecision {
            accepted: false,
            reason,
            score: 0,
        };

        // 1. A card with no tags tells us nothing about what the business does.
        if listing.category_tags.is_empty() {
            return reject("no_category".into());
        }

        let tags: Vec<String> = listing
            .category_tags
            .iter()
            .map(|t| t.to_ascii_lowercase())
            .collect();

        // 2.
        if let Some(tag) = tags.iter().find(|t| self.blocklist.contains(*t)) {
            return reject(format!("blocked_category:{tag}"));
        }

        // 3.
        let allowed: Vec<&String> = tags.iter().filter(|t| self.allowlist.contains(*t)).collect();
        if allowed.is_empty() {
            return reject("mismatch_category".into());
        }

        // 4. Whole-word anti-keyword in the cleaned business name.
        let name = listing
            .name
            .as_deref()
            .and_then(clean_name)
            .unwrap_or_default();
        if let Some(ak) = self.anti_keywords.iter().find(|ak| ak.pattern.is_match(&name)) {
            return reject(format!("anti_keyword:{}", ak.word));
        }

        // 5. A vendor whose single allowed tag is the equipment/supplies
        // one needs a service hint to stay in.
        let equipment_only = allowed.len() == 1 && is_equipment_tag(allowed[0]);
        if equipment_only && !self.has_hint(listing) {
            return reject("equipment_only".into());
        }

        // 6.
        let Some(website) = listing.website.as_deref().filter(|w| !w.trim().is_empty()) else {
            return reject("no_website".into());
        };

        // 7.
        if self.website_domain_denied(website) {
            return reject("ecommerce_url".into());
        }

        // 8.
        if listing.is_sponsored && !self.include_sponsored {
            return reject("sponsored".into());
        }

        // 9. Score.
        let description = listing.description.as_deref().unwrap_or("");
        let mut score: i32 = 50;
        score += (allowed.len() as i32 * 10).min(50);
        score += (self.count_hint_occurrences(description) * 5).min(25);
        if equipment_only {
            score -= 20;
        }
        if is_plausible_website(website) && !self.website_domain_denied(website) {
            score += 5;
        }
        if listing.rating.is_some() && listing.reviews.is_some() {
            score += 3;
        }
        let anti_in_desc = self
            .anti_keywords
            .iter()
            .filter(|ak| ak.pattern.is_match(description))
            .count() as i32;
        score -= (anti_in_desc * 10).min(30);
        let score = score.clamp(0, 100) as u8;

        // 10.
        if score < self.min_score {
            return FilterDecision {
                accepted: false,
                reason: format!("low_score:{score}"),
                score,
            };
        }

        // 11.
        FilterDecision {
            accepted: true,
            reason: "accepted".into(),
            score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> FilterEngine {
        FilterEngine::from_parts(
            vec![
                "plumbers".into(),
                "water heater repair".into(),
                "plumbing equipment & supplies".into(),
                "heating equipment & supplies".into(),
            ],
            vec!["restaurants".into()],
            vec!["staffing".into(), "academy".into()],
            vec!["repair".into(), "installation".into(), "service".into()],
            vec!["amazon.com".into(), "homedepot.com".into()],
            50,
            false,
        )
        .unwrap()
    }

    fn listing() -> Listing {
        Listing {
            name: Some("Acme Plumbing".into()),
            website: Some("https://acmeplumbing.com".into()),
            category_tags: vec!["Plumbers".into()],
            description: Some("Emergency repair and installation service.".into()),
            rating: Some(4.5),
            reviews: Some(23),
            source_page_url: "https://www.yellowpages.com/austin-tx/plumbers".into(),
            ..Listing::default()
        }
    }

    #[test]
    fn accepts_clean_service_listing() {
        let d = engine().decide(&listing());
        assert!(d.accepted);
        assert_eq!(d.reason, "accepted");
        // 50 base + 10 one allowed tag + 15 three hint hits + 5 website + 3 rating&reviews
        assert_eq!(d.score, 83);
    }

    #[test]
    fn rejects_without_categories() {
        let mut l = listing();
        l.category_tags.clear();
        let d = engine().decide(&l);
        assert!(!d.accepted);
        assert_eq!(d.reason, "no_category");
        assert_eq!(d.score, 0);
    }

    #[test]
    fn blocklist_beats_allowlist() {
        let mut l = listing();
        l.category_tags = vec!["Plumbers".into(), "Restaurants".into()];
        let d = engine().decide(&l);
        assert_eq!(d.reason, "blocked_category:restaurants");
    }

    #[test]
    fn rejects_unmatched_categories() {
        let mut l = listing();
        l.category_tags = vec!["Car Dealers".into()];
        assert_eq!(engine().decide(&l).reason, "mismatch_category");
    }

    #[test]
    fn anti_keyword_matches_whole_words_only() {
        let mut l = listing();
        l.name = Some("Plumbing Staffing Solutions".into());
        assert_eq!(engine().decide(&l).reason, "anti_keyword:staffing");

        // "academy" inside another word must not fire.
        l.name = Some("Academynton Plumbing".into());
        assert!(engine().decide(&l).accepted);
    }

    #[test]
    fn equipment_only_needs_positive_hint() {
        let mut l = listing();
        l.category_tags = vec!["Plumbing Equipment & Supplies".into()];
        l.description = None;
        l.name = Some("Pipe World".into());
        assert_eq!(engine().decide(&l).reason, "equipment_only");

        l.description = Some("We also do installation.".into());
        let d = engine().decide(&l);
        assert_ne!(d.reason, "equipment_only");
    }

    #[test]
    fn two_equipment_tags_are_not_equipment_only() {
        // The rule is about a sole allowed tag; two equipment-style tags
        // neither reject without a hint nor draw the score penalty.
        let mut l = listing();
        l.category_tags = vec![
            "Plumbing Equipment & Supplies".into(),
            "Heating Equipment & Supplies".into(),
        ];
        l.description = None;
        l.name = Some("Pipe World".into());
        let d = engine().decide(&l);
        assert!(d.accepted);
        // 50 + 20 two allowed tags + 5 website + 3 rating&reviews, no -20
        assert_eq!(d.score, 78);
    }

    #[test]
    fn equipment_only_score_penalty() {
        let mut l = listing();
        l.category_tags = vec!["Plumbing Equipment & Supplies".into()];
        l.description = Some("installation".into());
        let d = engine().decide(&l);
        // 50 + 10 + 5 - 20 + 5 + 3 = 53
        assert_eq!(d.score, 53);
        assert!(d.accepted);
    }

    #[test]
    fn rejects_missing_and_denied_websites() {
        let mut l = listing();
        l.website = None;
        assert_eq!(engine().decide(&l).reason, "no_website");

        l.website = Some("https://www.amazon.com/shops/acme".into());
        assert_eq!(engine().decide(&l).reason, "ecommerce_url");
    }

    #[test]
    fn sponsored_rejected_unless_admitted() {
        let mut l = listing();
        l.is_sponsored = true;
        assert_eq!(engine().decide(&l).reason, "sponsored");

        let permissive = FilterEngine::from_parts(
            vec!["plumbers".into()],
            vec![],
            vec![],
            vec![],
            vec![],
            50,
            true,
        )
        .unwrap();
        assert!(permissive.decide(&l).accepted);
    }

    #[test]
    fn low_score_reports_the_score() {
        let strict = FilterEngine::from_parts(
            vec!["plumbers".into()],
            vec![],
            vec![],
            vec![],
            vec![],
            90,
            false,
        )
        .unwrap();
        let mut l = listing();
        l.description = None;
        l.rating = None;
        // 50 + 10 + 5 = 65 < 90
        let d = strict.decide(&l);
        assert!(!d.accepted);
        assert_eq!(d.reason, "low_score:65");
        assert_eq!(d.score, 65);
    }

    #[test]
    fn anti_keywords_in_description_capped() {
        let mut l = listing();
        l.description = Some(
            "Staffing academy staffing academy staffing academy repair".into(),
        );
        let d = engine().decide(&l);
        // 50 + 10 + 5 (one "repair" hint) + 5 + 3 - 20 (two distinct anti-keywords) = 53
        assert_eq!(d.score, 53);
    }

    #[test]
    fn decisions_are_deterministic() {
        let e = engine();
        let l = listing();
        let first = e.decide(&l);
        for _ in 0..10 {
            assert_eq!(e.decide(&l), first);
        }
    }

    #[test]
    fn empty_allowlist_is_a_config_error() {
        assert!(FilterEngine::from_parts(
            vec![],
            vec![],
            vec![],
            vec![],
            vec![],
            50,
            false
        )
        .is_err());
    }
}
