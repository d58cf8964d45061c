//! Calendar URL construction and county base-URL resolution.

use chrono::NaiveDate;

use crate::config::RunConfig;

/// Builds the date-scoped calendar preview URL.
pub fn build_auction_url(base_url: &str, date: NaiveDate) -> String {
    format!(
        "{}/index.cfm?zaction=AUCTION&Zmethod=PREVIEW&AUCTIONDATE={}",
        base_url.trim_end_matches('/'),
        date.format("%m/%d/%Y")
    )
}

/// Lowercased county name with spaces and hyphens removed, as used in the
/// fallback hostname.
pub fn county_slug(county: &str) -> String {
    county
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

/// Resolves a county's calendar base URL: configured override first, then
/// the conventional realforeclose hostname.
pub fn base_url_for_county(config: &RunConfig, county: &str) -> String {
    if let Some(url) = config.base_urls.get(county) {
        return url.trim_end_matches('/').to_string();
    }
    format!("https://www.{}.realforeclose.com", county_slug(county))
}
