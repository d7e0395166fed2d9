use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One unit of crawl work: a (state, city, category) search axis.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: i64,
    pub state: String,
    pub city: String,
    pub city_slug: String,
    pub category: String,
    pub primary_url: String,
    pub fallback_url: String,
    pub priority: i16,
    pub page_target: i16,
    pub status: TargetStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub page_current: i16,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub note: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Planned,
    InProgress,
    Done,
    Failed,
    Stuck,
    Parked,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Planned => "planned",
            TargetStatus::InProgress => "in_progress",
            TargetStatus::Done => "done",
            TargetStatus::Failed => "failed",
            TargetStatus::Stuck => "stuck",
            TargetStatus::Parked => "parked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planned" => Some(TargetStatus::Planned),
            "in_progress" => Some(TargetStatus::InProgress),
            "done" => Some(TargetStatus::Done),
            "failed" => Some(TargetStatus::Failed),
            "stuck" => Some(TargetStatus::Stuck),
            "parked" => Some(TargetStatus::Parked),
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A business card extracted from one search-results page, pre-filter.
/// A field the page did not carry is `None`, never a placeholder string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Listing {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub website: Option<String>,
    pub profile_url: Option<String>,
    /// Category tags in the order they appear on the card, not inferred.
    pub category_tags: Vec<String>,
    pub rating: Option<f32>,
    pub reviews: Option<i32>,
    pub is_sponsored: bool,
    pub business_hours: Option<String>,
    pub description: Option<String>,
    pub services: Vec<String>,
    pub source_page_url: String,
}

/// Outcome of the deterministic filter. The score is always present,
/// whether the listing was admitted or not.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDecision {
    pub accepted: bool,
    pub reason: String,
    pub score: u8,
}

/// Provenance document attached to every Company row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
    #[serde(default)]
    pub category_tags: Vec<String>,
    #[serde(default)]
    pub is_sponsored: bool,
    pub filter_score: u8,
    pub filter_reason: String,
    pub source_page_url: String,
}

impl ParseMetadata {
    pub fn from_listing(listing: &Listing, decision: &FilterDecision) -> Self {
        Self {
            profile_url: listing.profile_url.clone(),
            category_tags: listing.category_tags.clone(),
            is_sponsored: listing.is_sponsored,
            filter_score: decision.score,
            filter_reason: decision.reason.clone(),
            source_page_url: listing.source_page_url.clone(),
        }
    }

    /// Merge a newer sighting into stored metadata: newer scalars win,
    /// `category_tags` is unioned preserving first-seen order.
    pub fn merge_from(&mut self, newer: &ParseMetadata) {
        if newer.profile_url.is_some() {
            self.profile_url = newer.profile_url.clone();
        }
        for tag in &newer.category_tags {
            if !self.category_tags.iter().any(|t| t == tag) {
                self.category_tags.push(tag.clone());
            }
        }
        self.is_sponsored = newer.is_sponsored;
        self.filter_score = newer.filter_score;
        self.filter_reason = newer.filter_reason.clone();
        self.source_page_url = newer.source_page_url.clone();
    }
}

/// What one page fetch produced. CAPTCHA and block conditions are values
/// the caller inspects, not errors.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub elapsed_ms: u64,
    pub fetched_at: DateTime<Utc>,
    pub captcha: bool,
    pub blocked: bool,
    /// Outbound identity used, or "direct".
    pub proxy: String,
}

impl FetchResponse {
    pub fn ok(&self) -> bool {
        (200..400).contains(&self.status) && !self.captcha && !self.blocked
    }
}

/// Terminal result of running one claimed target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// All pages up to page_target processed.
    Done,
    /// Page 1 accepted nothing; remaining pages skipped.
    DoneEarly,
    /// Block or CAPTCHA; target returned to the queue with a cool-down note.
    Requeued,
    /// Repeated page failures; target marked failed with last_error.
    Failed,
    /// Stop signal observed between pages; target released for recovery.
    Stopped,
}

impl CrawlOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlOutcome::Done => "done",
            CrawlOutcome::DoneEarly => "done_early",
            CrawlOutcome::Requeued => "requeued",
            CrawlOutcome::Failed => "failed",
            CrawlOutcome::Stopped => "stopped",
        }
    }
}

/// Result of an idempotent company upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Listing had no usable website; nothing written.
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for s in [
            TargetStatus::Planned,
            TargetStatus::InProgress,
            TargetStatus::Done,
            TargetStatus::Failed,
            TargetStatus::Stuck,
            TargetStatus::Parked,
        ] {
            assert_eq!(TargetStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TargetStatus::parse("bogus"), None);
    }

    #[test]
    fn metadata_merge_unions_tags_in_order() {
        let mut stored = ParseMetadata {
            profile_url: Some("https://yp.example/p/1".into()),
            category_tags: vec!["Plumbers".into(), "Contractors".into()],
            is_sponsored: false,
            filter_score: 70,
            filter_reason: "accepted".into(),
            source_page_url: "https://yp.example/austin-tx/plumbers".into(),
        };
        let newer = ParseMetadata {
            profile_url: None,
            category_tags: vec!["Water Heaters".into(), "Plumbers".into()],
            is_sponsored: true,
            filter_score: 75,
            filter_reason: "accepted".into(),
            source_page_url: "https://yp.example/dallas-tx/plumbers?page=2".into(),
        };
        stored.merge_from(&newer);

        assert_eq!(
            stored.category_tags,
            vec![
                "Plumbers".to_string(),
                "Contractors".to_string(),
                "Water Heaters".to_string()
            ]
        );
        // Newer scalars win, but an absent profile_url does not erase the old one.
        assert_eq!(stored.profile_url.as_deref(), Some("https://yp.example/p/1"));
        assert_eq!(stored.filter_score, 75);
        assert!(stored.is_sponsored);
        assert!(stored.source_page_url.contains("dallas"));
    }

    #[test]
    fn fetch_ok_requires_clean_flags() {
        let mut resp = FetchResponse {
            url: "https://yp.example/a/b".into(),
            status: 200,
            headers: HashMap::new(),
            body: String::new(),
            elapsed_ms: 12,
            fetched_at: Utc::now(),
            captcha: false,
            blocked: false,
            proxy: "direct".into(),
        };
        assert!(resp.ok());
        resp.captcha = true;
        assert!(!resp.ok());
        resp.captcha = false;
        resp.status = 429;
        assert!(!resp.ok());
    }
}
