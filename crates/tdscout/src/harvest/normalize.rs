//! Record normalization: raw scraped strings into typed prospect fields.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::db::prospect_repo::NewProspect;
use crate::rules::ProspectFacts;

use super::calendar::RawAuction;

/// Parses a currency string like `"$1,234.56"` into a number. Currency
/// symbols, thousands separators, and whitespace are stripped; anything
/// unparsable yields `None`, never zero.
pub fn parse_currency(text: &str) -> Option<f64> {
    static NON_NUMERIC: OnceLock<Regex> = OnceLock::new();
    let non_numeric =
        NON_NUMERIC.get_or_init(|| Regex::new(r"[^\d.\-]").expect("pattern must compile"));
    let cleaned = non_numeric.replace_all(text.trim(), "").to_string();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// Splits `"City, ST 12345"` into (city, state, zip). Missing pieces come
/// back empty.
pub fn parse_city_state_zip(text: &str) -> (String, String, String) {
    let mut parts = text.trim().splitn(2, ',');
    let city = parts.next().unwrap_or("").trim().to_string();
    let mut state = String::new();
    let mut zip = String::new();
    if let Some(rest) = parts.next() {
        let mut tokens = rest.split_whitespace();
        if let Some(s) = tokens.next() {
            state = s.to_string();
        }
        if let Some(z) = tokens.next() {
            zip = z.to_string();
        }
    }
    (city, state, zip)
}

/// Canonical auction-status codes keyed by substrings of the scraped text.
const STATUS_MAP: &[(&str, &str)] = &[
    ("sold", "sold_third_party"),
    ("cancel", "cancelled"),
    ("postpon", "postponed"),
    ("redeem", "redeemed"),
    ("struck", "struck_off"),
    ("scheduled", "scheduled"),
];

/// Maps a scraped status string onto a canonical code. Unrecognized
/// statuses default to `scheduled`.
pub fn normalize_status(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    for (needle, code) in STATUS_MAP {
        if lowered.contains(needle) {
            return (*code).to_string();
        }
    }
    "scheduled".to_string()
}

/// Computes the surplus for a sold listing. Tax-deed sales measure surplus
/// against the opening bid; foreclosure types against the final judgment.
/// Absent subtrahends count as zero; no sale means no surplus.
pub fn compute_surplus(
    prospect_type: &str,
    sale_amount: Option<f64>,
    opening_bid: Option<f64>,
    final_judgment: Option<f64>,
) -> Option<f64> {
    let sale = sale_amount?;
    let basis = if prospect_type.eq_ignore_ascii_case("TD") {
        opening_bid.unwrap_or(0.0)
    } else {
        final_judgment.unwrap_or(0.0)
    };
    Some(sale - basis)
}

/// Converts a raw listing into a persistable prospect. Listings without a
/// case number are unusable (no natural key) and yield `None`.
pub fn normalize(
    raw: &RawAuction,
    county: &str,
    auction_date: NaiveDate,
    prospect_type: &str,
    source_url: &str,
) -> Option<NewProspect> {
    let case_number = raw.case_number.trim().to_string();
    if case_number.is_empty() {
        return None;
    }

    let (city, state, zip_code) = parse_city_state_zip(&raw.city_state_zip);
    let final_judgment_amount = parse_currency(&raw.final_judgment_amount);
    let opening_bid = parse_currency(&raw.opening_bid);
    let sale_amount = parse_currency(&raw.sold_amount);
    let surplus_amount =
        compute_surplus(prospect_type, sale_amount, opening_bid, final_judgment_amount);

    let raw_data = serde_json::json!({
        "auction_id": raw.auction_id,
        "start_time": raw.start_time,
        "auction_type": raw.auction_type,
        "case_number": raw.case_number,
        "final_judgment_amount": raw.final_judgment_amount,
        "parcel_id": raw.parcel_id,
        "property_address": raw.property_address,
        "city_state_zip": raw.city_state_zip,
        "assessed_value": raw.assessed_value,
        "plaintiff_max_bid": raw.plaintiff_max_bid,
        "opening_bid": raw.opening_bid,
        "auction_status": raw.auction_status,
        "sold_amount": raw.sold_amount,
        "sold_to": raw.sold_to,
    });

    Some(NewProspect {
        prospect_type: prospect_type.to_string(),
        auction_item_number: raw.auction_id.clone(),
        case_number,
        county: county.to_string(),
        state,
        property_address: raw.property_address.clone(),
        city,
        zip_code,
        parcel_id: raw.parcel_id.clone(),
        final_judgment_amount,
        opening_bid,
        plaintiff_max_bid: parse_currency(&raw.plaintiff_max_bid),
        assessed_value: parse_currency(&raw.assessed_value),
        sale_amount,
        surplus_amount,
        sold_to: raw.sold_to.clone(),
        auction_type: raw.auction_type.clone(),
        auction_date: auction_date.format("%Y-%m-%d").to_string(),
        auction_time: raw.start_time.clone(),
        auction_status: normalize_status(&raw.auction_status),
        source_url: source_url.to_string(),
        raw_data: raw_data.to_string(),
    })
}

/// The rule-engine view of a normalized prospect.
pub fn facts_for(prospect: &NewProspect) -> ProspectFacts {
    ProspectFacts {
        prospect_type: prospect.prospect_type.clone(),
        county: prospect.county.clone(),
        state: prospect.state.clone(),
        auction_date: NaiveDate::parse_from_str(&prospect.auction_date, "%Y-%m-%d").ok(),
        plaintiff_max_bid: prospect.plaintiff_max_bid,
        assessed_value: prospect.assessed_value,
        final_judgment_amount: prospect.final_judgment_amount,
        sale_amount: prospect.sale_amount,
        surplus_amount: prospect.surplus_amount,
        auction_status: prospect.auction_status.clone(),
        auction_type: prospect.auction_type.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_currency() {
        assert_eq!(parse_currency("$1,234.56"), Some(1234.56));
        assert_eq!(parse_currency("$0.00"), Some(0.0));
        assert_eq!(parse_currency("  $180,500.00 "), Some(180_500.0));
        assert_eq!(parse_currency("25000"), Some(25_000.0));
    }

    #[test]
    fn test_parse_currency_unparsable_is_absent() {
        assert_eq!(parse_currency(""), None);
        assert_eq!(parse_currency("N/A"), None);
        assert_eq!(parse_currency("$"), None);
        assert_eq!(parse_currency("1.2.3"), None);
    }

    #[test]
    fn test_parse_city_state_zip() {
        assert_eq!(
            parse_city_state_zip("MIAMI, FL 33101"),
            ("MIAMI".to_string(), "FL".to_string(), "33101".to_string())
        );
        assert_eq!(
            parse_city_state_zip("MIAMI"),
            ("MIAMI".to_string(), String::new(), String::new())
        );
        assert_eq!(
            parse_city_state_zip(""),
            (String::new(), String::new(), String::new())
        );
    }

    #[test]
    fn test_normalize_status() {
        assert_eq!(normalize_status("Sold"), "sold_third_party");
        assert_eq!(normalize_status("Canceled"), "cancelled");
        assert_eq!(normalize_status("Cancelled"), "cancelled");
        assert_eq!(normalize_status("Postponed"), "postponed");
        assert_eq!(normalize_status("Redeemed"), "redeemed");
        assert_eq!(normalize_status("anything else"), "scheduled");
    }

    #[test]
    fn test_surplus_tax_deed_uses_opening_bid() {
        assert_eq!(
            compute_surplus("TD", Some(25_000.0), Some(0.0), Some(99_999.0)),
            Some(25_000.0)
        );
        assert_eq!(
            compute_surplus("TD", Some(25_000.0), Some(5_000.0), None),
            Some(20_000.0)
        );
    }

    #[test]
    fn test_surplus_foreclosure_uses_judgment() {
        assert_eq!(
            compute_surplus("MF", Some(100_000.0), None, Some(80_000.0)),
            Some(20_000.0)
        );
        // Absent judgment counts as zero.
        assert_eq!(compute_surplus("MF", Some(100_000.0), None, None), Some(100_000.0));
    }

    #[test]
    fn test_surplus_absent_without_sale() {
        assert_eq!(compute_surplus("TD", None, Some(0.0), None), None);
    }

    #[test]
    fn test_normalize_full_record() {
        let raw = RawAuction {
            auction_id: "451".to_string(),
            start_time: "10:05 AM".to_string(),
            auction_type: "TAXDEED".to_string(),
            case_number: "2026A00123".to_string(),
            parcel_id: "30-1234".to_string(),
            property_address: "123 MAIN ST".to_string(),
            city_state_zip: "MIAMI, FL 33101".to_string(),
            assessed_value: "$180,500.00".to_string(),
            opening_bid: "$0.00".to_string(),
            auction_status: "Sold".to_string(),
            sold_amount: "$25,000.00".to_string(),
            sold_to: "3rd Party Bidder".to_string(),
            ..Default::default()
        };
        let date = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();
        let prospect = normalize(&raw, "Miami-Dade", date, "TD", "https://example.test").unwrap();

        assert_eq!(prospect.case_number, "2026A00123");
        assert_eq!(prospect.county, "Miami-Dade");
        assert_eq!(prospect.city, "MIAMI");
        assert_eq!(prospect.state, "FL");
        assert_eq!(prospect.zip_code, "33101");
        assert_eq!(prospect.sale_amount, Some(25_000.0));
        assert_eq!(prospect.opening_bid, Some(0.0));
        assert_eq!(prospect.surplus_amount, Some(25_000.0));
        assert_eq!(prospect.auction_status, "sold_third_party");
        assert_eq!(prospect.auction_date, "2026-06-15");
        assert!(prospect.raw_data.contains("2026A00123"));
    }

    #[test]
    fn test_normalize_rejects_missing_case_number() {
        let raw = RawAuction {
            auction_id: "452".to_string(),
            ..Default::default()
        };
        let date = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();
        assert!(normalize(&raw, "Miami-Dade", date, "TD", "").is_none());
    }
}
