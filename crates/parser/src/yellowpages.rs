//! Yellow Pages directory implementation: URL shapes and page parsing.

use url::Url;

use dirscraper_core::canonical::slugify;
use dirscraper_core::{Directory, Listing, ScrapeError};

use crate::listing::parse_listing_page;

pub struct YellowPages {
    base_url: String,
}

impl YellowPages {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Directory for YellowPages {
    fn name(&self) -> &'static str {
        "yellowpages"
    }

    fn plan_urls(
        &self,
        state: &str,
        city: &str,
        city_slug: &str,
        category: &str,
    ) -> (String, String) {
        let primary = format!(
            "{}/{}-{}/{}",
            self.base_url,
            city_slug,
            state.to_ascii_lowercase(),
            slugify(category)
        );

        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("search_terms", category)
            .append_pair("geo_location_terms", &format!("{city}, {state}"))
            .finish();
        let fallback = format!("{}/search?{}", self.base_url, query);

        (primary, fallback)
    }

    fn page_url(&self, base: &str, page: i16) -> Result<Url, ScrapeError> {
        let mut url =
            Url::parse(base).map_err(|e| ScrapeError::InvalidUrl(format!("{base}: {e}")))?;
        if page > 1 {
            // Replace any stale page param rather than stacking a second one.
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| k != "page")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            serializer.extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            serializer.append_pair("page", &page.to_string());
            let q = serializer.finish();
            url.set_query(Some(&q));
        }
        Ok(url)
    }

    fn parse_page(&self, html: &str, source_url: &Url, include_sponsored: bool) -> Vec<Listing> {
        parse_listing_page(html, source_url, include_sponsored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_path_and_search_urls() {
        let yp = YellowPages::new("https://www.yellowpages.com/");
        let (primary, fallback) =
            yp.plan_urls("TX", "Oklahoma City", "oklahoma-city", "Heating & Air Conditioning");
        assert_eq!(
            primary,
            "https://www.yellowpages.com/oklahoma-city-tx/heating-air-conditioning"
        );
        assert!(fallback.starts_with("https://www.yellowpages.com/search?"));
        assert!(fallback.contains("search_terms=Heating+%26+Air+Conditioning"));
        assert!(fallback.contains("geo_location_terms=Oklahoma+City%2C+TX"));
    }

    #[test]
    fn page_one_has_no_page_param() {
        let yp = YellowPages::new("https://www.yellowpages.com");
        let url = yp
            .page_url("https://www.yellowpages.com/austin-tx/plumbers", 1)
            .unwrap();
        assert_eq!(url.as_str(), "https://www.yellowpages.com/austin-tx/plumbers");
    }

    #[test]
    fn later_pages_replace_page_param() {
        let yp = YellowPages::new("https://www.yellowpages.com");
        let url = yp
            .page_url("https://www.yellowpages.com/search?search_terms=plumbers&page=9", 3)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.yellowpages.com/search?search_terms=plumbers&page=3"
        );
    }

    #[test]
    fn rejects_garbage_base() {
        let yp = YellowPages::new("https://www.yellowpages.com");
        assert!(yp.page_url("not a url", 2).is_err());
    }
}
