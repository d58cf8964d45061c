//! End-to-end qualification flow without a browser: parsed listing →
//! normalizer → rule engine → upsert → verdict persisted.

use chrono::NaiveDate;

use tdscout::db::{prospect_repo, rule_repo};
use tdscout::harvest::calendar::RawAuction;
use tdscout::harvest::normalize;
use tdscout::rules::{self, FilterRule};
use tdscout::Database;

fn sold_listing() -> RawAuction {
    RawAuction {
        auction_id: "451".to_string(),
        start_time: "10:05 AM".to_string(),
        auction_type: "TAXDEED".to_string(),
        case_number: "2026A00123".to_string(),
        property_address: "123 MAIN ST".to_string(),
        city_state_zip: "MIAMI, FL 33101".to_string(),
        opening_bid: "$0.00".to_string(),
        auction_status: "Sold".to_string(),
        sold_amount: "$25,000.00".to_string(),
        sold_to: "3rd Party Bidder".to_string(),
        ..Default::default()
    }
}

#[test]
fn sold_listing_qualifies_against_surplus_floor() {
    let db = Database::open_in_memory().unwrap();
    let date = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();

    rule_repo::insert(
        &db,
        &FilterRule {
            name: "surplus floor".to_string(),
            prospect_types: vec!["TD".to_string()],
            surplus_amount_min: Some(10_000.0),
            is_active: true,
            ..Default::default()
        },
    )
    .unwrap();

    // Harvest produced one sold listing; normalize it.
    let prospect = normalize::normalize(
        &sold_listing(),
        "Miami-Dade",
        date,
        "TD",
        "https://www.miamidade.realforeclose.com/",
    )
    .unwrap();
    assert_eq!(prospect.sale_amount, Some(25_000.0));
    assert_eq!(prospect.opening_bid, Some(0.0));
    assert_eq!(prospect.surplus_amount, Some(25_000.0));

    // Upsert and evaluate.
    let outcome = prospect_repo::upsert(&db, &prospect).unwrap();
    assert!(outcome.created);

    let rules = rule_repo::load_active(&db).unwrap();
    let verdict = rules::evaluate_prospect(&normalize::facts_for(&prospect), &rules);
    assert!(verdict.qualified, "reasons: {:?}", verdict.reasons);

    prospect_repo::set_qualification(&db, outcome.id, verdict.qualified).unwrap();
    let row = prospect_repo::find_by_id(&db, outcome.id).unwrap().unwrap();
    assert_eq!(row.qualification_status, "qualified");
    assert!(row.qualified_at.is_some());
}

#[test]
fn low_surplus_listing_is_disqualified_with_reason() {
    let db = Database::open_in_memory().unwrap();
    let date = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();

    rule_repo::insert(
        &db,
        &FilterRule {
            name: "surplus floor".to_string(),
            surplus_amount_min: Some(10_000.0),
            is_active: true,
            ..Default::default()
        },
    )
    .unwrap();

    let mut listing = sold_listing();
    listing.sold_amount = "$5,000.00".to_string();
    let prospect = normalize::normalize(&listing, "Miami-Dade", date, "TD", "").unwrap();
    assert_eq!(prospect.surplus_amount, Some(5_000.0));

    let outcome = prospect_repo::upsert(&db, &prospect).unwrap();
    let rules = rule_repo::load_active(&db).unwrap();
    let verdict = rules::evaluate_prospect(&normalize::facts_for(&prospect), &rules);
    assert!(!verdict.qualified);
    assert!(verdict.reasons.iter().any(|r| r.contains("below minimum")));

    prospect_repo::set_qualification(&db, outcome.id, verdict.qualified).unwrap();
    let row = prospect_repo::find_by_id(&db, outcome.id).unwrap().unwrap();
    assert_eq!(row.qualification_status, "disqualified");
    assert!(row.disqualified_at.is_some());
}

#[test]
fn county_rule_overrides_stored_state_rule() {
    let db = Database::open_in_memory().unwrap();
    let date = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();

    // State-wide rule would disqualify; county rule passes. The county tier
    // must win outright.
    rule_repo::insert(
        &db,
        &FilterRule {
            name: "state floor".to_string(),
            state: Some("FL".to_string()),
            surplus_amount_min: Some(1_000_000.0),
            is_active: true,
            ..Default::default()
        },
    )
    .unwrap();
    rule_repo::insert(
        &db,
        &FilterRule {
            name: "county floor".to_string(),
            state: Some("FL".to_string()),
            county: Some("Miami-Dade".to_string()),
            surplus_amount_min: Some(10_000.0),
            is_active: true,
            ..Default::default()
        },
    )
    .unwrap();

    let prospect = normalize::normalize(&sold_listing(), "Miami-Dade", date, "TD", "").unwrap();
    let rules = rule_repo::load_active(&db).unwrap();
    let verdict = rules::evaluate_prospect(&normalize::facts_for(&prospect), &rules);
    assert!(verdict.qualified, "reasons: {:?}", verdict.reasons);
}

#[test]
fn reingesting_identical_listing_updates_in_place() {
    let db = Database::open_in_memory().unwrap();
    let date = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();

    let prospect = normalize::normalize(&sold_listing(), "Miami-Dade", date, "TD", "").unwrap();
    let first = prospect_repo::upsert(&db, &prospect).unwrap();
    let second = prospect_repo::upsert(&db, &prospect).unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.id, second.id);

    let count: i64 = db
        .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM prospects", [], |r| r.get(0))?))
        .unwrap();
    assert_eq!(count, 1);
}
