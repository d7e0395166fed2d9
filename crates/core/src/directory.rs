use url::Url;

use crate::error::ScrapeError;
use crate::types::Listing;

/// Capability set a source directory must provide. The worker core is
/// agnostic about which directory it is crawling; everything
/// site-specific (URL shapes, card selectors) lives behind this trait.
pub trait Directory: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// The two request URLs stored on a freshly seeded target:
    /// (category+city path shape, search fallback shape), page 1.
    fn plan_urls(
        &self,
        state: &str,
        city: &str,
        city_slug: &str,
        category: &str,
    ) -> (String, String);

    /// A stored target URL with the page parameter applied.
    fn page_url(&self, base: &str, page: i16) -> Result<Url, ScrapeError>;

    /// Extract listings from one results page. Total: malformed cards
    /// yield null-filled listings, never errors.
    fn parse_page(&self, html: &str, source_url: &Url, include_sponsored: bool) -> Vec<Listing>;
}
