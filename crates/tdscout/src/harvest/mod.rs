//! Browser-driven page harvester for county auction calendars.

use std::time::Duration;

use chrono::NaiveDate;
use log::{info, warn};

pub mod browser;
pub mod calendar;
pub mod normalize;
pub mod urls;

pub use browser::BrowserSession;
pub use calendar::{parse_calendar_page, parse_page_count, RawAuction};

use crate::error::HarvestError;

const LISTING_WAIT: Duration = Duration::from_secs(10);
const RERENDER_WAIT: Duration = Duration::from_secs(20);

/// Result of harvesting one calendar date. Pagination failures degrade to
/// partial results recorded as warnings, never a hard error.
#[derive(Debug, Default)]
pub struct HarvestOutcome {
    pub auctions: Vec<RawAuction>,
    pub source_url: String,
    pub warnings: Vec<String>,
}

pub struct Harvester<'a> {
    session: &'a BrowserSession,
    base_url: String,
}

impl<'a> Harvester<'a> {
    pub fn new(session: &'a BrowserSession, base_url: &str) -> Self {
        Self {
            session,
            base_url: base_url.to_string(),
        }
    }

    /// Harvests all listings for one auction date, paginating through the
    /// calendar. A navigation failure on the first page propagates (it is a
    /// retryable network condition); an absent listing element means the
    /// date simply has no auctions.
    pub async fn harvest_date(&self, date: NaiveDate) -> Result<HarvestOutcome, HarvestError> {
        let url = urls::build_auction_url(&self.base_url, date);
        let mut outcome = HarvestOutcome {
            source_url: url.clone(),
            ..Default::default()
        };

        info!("Navigating to {}", url);
        self.session.goto(&url).await?;

        if self
            .session
            .wait_for_selector(".AUCTION_ITEM", LISTING_WAIT)
            .await
            .is_err()
        {
            info!("No auctions found for {}", date);
            return Ok(outcome);
        }

        let max_pages = self.total_pages().await;
        info!("Total pages detected: {}", max_pages);

        let mut current_page = 1u32;
        loop {
            let html = self.session.content().await?;
            let page_auctions = parse_calendar_page(&html);
            info!(
                "Parsed {} items on page {} for {}",
                page_auctions.len(),
                current_page,
                date
            );
            outcome.auctions.extend(page_auctions);

            if current_page >= max_pages {
                break;
            }
            match self.advance_to_page(current_page + 1).await {
                Ok(true) => current_page += 1,
                Ok(false) => {
                    let message = format!(
                        "Pagination control missing on page {} for {}; returning partial results",
                        current_page, date
                    );
                    warn!("{}", message);
                    outcome.warnings.push(message);
                    break;
                }
                Err(e) => {
                    let message = format!(
                        "Could not navigate to page {} for {}: {}",
                        current_page + 1,
                        date,
                        e
                    );
                    warn!("{}", message);
                    outcome.warnings.push(message);
                    break;
                }
            }
        }

        info!(
            "Parsed total {} auctions for {} across {} page(s)",
            outcome.auctions.len(),
            date,
            current_page
        );
        Ok(outcome)
    }

    /// Reads the page-count indicator; defaults to 1 when absent.
    async fn total_pages(&self) -> u32 {
        let text = match self.session.try_find("#maxCB").await {
            Some(element) => element.inner_text().await.ok().flatten(),
            None => None,
        };
        parse_page_count(text.as_deref())
    }

    /// Writes the next page number into the page-jump control and waits for
    /// the listing set to re-render. `Ok(false)` means the control is gone.
    async fn advance_to_page(&self, page_number: u32) -> Result<bool, HarvestError> {
        if self.session.try_find("#curPCB").await.is_none() {
            return Ok(false);
        }
        let input = self.session.fill("#curPCB", &page_number.to_string()).await?;
        input
            .press_key("Enter")
            .await
            .map_err(|e| HarvestError::Browser(e.to_string()))?;
        self.session
            .wait_for_selector(".AUCTION_ITEM", RERENDER_WAIT)
            .await?;
        Ok(true)
    }
}
