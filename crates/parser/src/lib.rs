pub mod listing;
pub mod yellowpages;

pub use listing::parse_listing_page;
pub use yellowpages::YellowPages;
