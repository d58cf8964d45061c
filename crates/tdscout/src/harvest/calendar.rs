//! Calendar page parsing.
//!
//! Everything here is pure string/HTML work so it can be tested without a
//! browser. The markup on the county calendar sites is unreliable: labels
//! vary in spacing, casing, and trailing punctuation, so field extraction
//! normalizes label text and matches it against an ordered regex table.
//! Unmatched labels are ignored.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// One listing as scraped, before normalization. String fields hold the raw
/// page text; empty means the field was not present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawAuction {
    pub auction_id: String,
    pub start_time: String,
    pub auction_type: String,
    pub case_number: String,
    pub final_judgment_amount: String,
    pub parcel_id: String,
    pub property_address: String,
    pub city_state_zip: String,
    pub assessed_value: String,
    pub plaintiff_max_bid: String,
    pub opening_bid: String,
    pub auction_status: String,
    pub sold_amount: String,
    pub sold_to: String,
}

/// Target fields for labeled detail rows.
#[derive(Debug, Clone, Copy)]
enum LabelField {
    AuctionType,
    CaseNumber,
    FinalJudgmentAmount,
    ParcelId,
    PropertyAddress,
    AssessedValue,
    PlaintiffMaxBid,
    OpeningBid,
}

fn label_patterns() -> &'static Vec<(Regex, LabelField)> {
    static PATTERNS: OnceLock<Vec<(Regex, LabelField)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"auction\s*type", LabelField::AuctionType),
            (r"case\s*#|case\s*number", LabelField::CaseNumber),
            (r"final\s*judgment", LabelField::FinalJudgmentAmount),
            (r"parcel\s*id", LabelField::ParcelId),
            (r"property\s*address", LabelField::PropertyAddress),
            (r"assessed\s*value", LabelField::AssessedValue),
            (r"plaintiff\s*max\s*bid", LabelField::PlaintiffMaxBid),
            (r"opening\s*bid", LabelField::OpeningBid),
        ]
        .into_iter()
        .map(|(pattern, field)| {
            (
                Regex::new(pattern).expect("label pattern must compile"),
                field,
            )
        })
        .collect()
    })
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("selector must parse")
}

/// Normalizes raw label text so regex matching stays reliable: NBSP to
/// space, whitespace collapsed, trailing colons stripped, case-folded.
pub fn normalize_label(text: &str) -> String {
    static WS: OnceLock<Regex> = OnceLock::new();
    let ws = WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern must compile"));
    let cleaned = text.replace('\u{a0}', " ");
    let collapsed = ws.replace_all(cleaned.trim(), " ").to_string();
    collapsed.trim_end_matches(':').trim().to_lowercase()
}

fn element_text(element: ElementRef<'_>) -> String {
    let joined = element.text().collect::<Vec<_>>().join(" ");
    let cleaned = joined.replace('\u{a0}', " ");
    static WS: OnceLock<Regex> = OnceLock::new();
    let ws = WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern must compile"));
    ws.replace_all(cleaned.trim(), " ").to_string()
}

fn apply_field(record: &mut RawAuction, field: LabelField, value: String) {
    match field {
        LabelField::AuctionType => record.auction_type = value,
        LabelField::CaseNumber => record.case_number = value,
        LabelField::FinalJudgmentAmount => record.final_judgment_amount = value,
        LabelField::ParcelId => record.parcel_id = value,
        LabelField::PropertyAddress => record.property_address = value,
        LabelField::AssessedValue => record.assessed_value = value,
        LabelField::PlaintiffMaxBid => record.plaintiff_max_bid = value,
        LabelField::OpeningBid => record.opening_bid = value,
    }
}

/// Parses every `.AUCTION_ITEM` listing on a rendered calendar page.
pub fn parse_calendar_page(html: &str) -> Vec<RawAuction> {
    let doc = Html::parse_document(html);
    let item_sel = selector(".AUCTION_ITEM");
    let status_sel = selector(".ASTAT_MSGB");
    let detail_row_sel = selector(".AUCTION_DETAILS table.ad_tab tr");
    let td_sel = selector("td");
    let stats_sel = selector(".AUCTION_STATS");
    let sold_amount_sel = selector(".ASTAT_MSGD");
    let sold_to_sel = selector(".ASTAT_MSG_SOLDTO_MSG");

    let mut auctions = Vec::new();

    for item in doc.select(&item_sel) {
        let mut record = RawAuction {
            auction_id: item.value().attr("aid").unwrap_or("").to_string(),
            ..Default::default()
        };

        let status_text = item
            .select(&status_sel)
            .next()
            .map(element_text)
            .unwrap_or_default();
        if !status_text.is_empty() && !status_text.chars().any(|c| c.is_ascii_digit()) {
            // No digits means this is a textual disposition (Canceled,
            // Postponed, Redeemed, ...) rather than a start time.
            record.auction_status = status_text;
        } else {
            record.start_time = status_text;
        }

        for row in item.select(&detail_row_sel) {
            let tds: Vec<ElementRef<'_>> = row.select(&td_sel).collect();
            if tds.len() < 2 {
                continue;
            }
            let raw_label = normalize_label(&element_text(tds[0]));
            let value = element_text(tds[1]);

            // An empty label cell is the city/state/zip continuation row.
            if raw_label.is_empty() {
                record.city_state_zip = value;
                continue;
            }

            for (pattern, field) in label_patterns() {
                if pattern.is_match(&raw_label) {
                    apply_field(&mut record, *field, value);
                    break;
                }
            }
        }

        if record.auction_status.is_empty() {
            record.auction_status = "Sold".to_string();
            if let Some(stats) = item.select(&stats_sel).next() {
                if let Some(amount) = stats.select(&sold_amount_sel).next() {
                    record.sold_amount = element_text(amount);
                }
                if let Some(buyer) = stats.select(&sold_to_sel).next() {
                    record.sold_to = element_text(buyer);
                }
            }
        }

        auctions.push(record);
    }

    auctions
}

/// Extracts the page count from the `#maxCB` indicator text. Defaults to 1
/// when the indicator is absent or unreadable.
pub fn parse_page_count(text: Option<&str>) -> u32 {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    let digits = DIGITS.get_or_init(|| Regex::new(r"\d+").expect("digit pattern must compile"));
    text.and_then(|t| digits.find(t))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(1)
}
