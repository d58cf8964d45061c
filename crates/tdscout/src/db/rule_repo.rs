//! Filter-rule repository. Rules are administered externally; the core only
//! reads them (inserts exist for tests and seeding).

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Row};

use crate::rules::FilterRule;

use super::{Database, DatabaseError};

fn json_string_list(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

fn parse_opt_date(raw: Option<String>) -> Option<NaiveDate> {
    raw.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn rule_from_row(row: &Row<'_>) -> Result<FilterRule, rusqlite::Error> {
    let prospect_types: String = row.get("prospect_types")?;
    let status_types: String = row.get("status_types")?;
    let auction_types: String = row.get("auction_types")?;
    Ok(FilterRule {
        id: row.get("id")?,
        name: row.get("name")?,
        prospect_types: json_string_list(&prospect_types),
        state: row.get("state")?,
        county: row.get("county")?,
        min_date: parse_opt_date(row.get("min_date")?),
        max_date: parse_opt_date(row.get("max_date")?),
        plaintiff_max_bid_min: row.get("plaintiff_max_bid_min")?,
        plaintiff_max_bid_max: row.get("plaintiff_max_bid_max")?,
        assessed_value_min: row.get("assessed_value_min")?,
        assessed_value_max: row.get("assessed_value_max")?,
        final_judgment_min: row.get("final_judgment_min")?,
        final_judgment_max: row.get("final_judgment_max")?,
        sale_amount_min: row.get("sale_amount_min")?,
        sale_amount_max: row.get("sale_amount_max")?,
        surplus_amount_min: row.get("surplus_amount_min")?,
        surplus_amount_max: row.get("surplus_amount_max")?,
        status_types: json_string_list(&status_types),
        auction_types: json_string_list(&auction_types),
        is_active: row.get::<_, i64>("is_active")? != 0,
    })
}

/// Loads all active rules. Scope and type filtering happens in the rule
/// engine, which needs the full set to resolve specificity tiers.
pub fn load_active(db: &Database) -> Result<Vec<FilterRule>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM filter_rules WHERE is_active = 1 ORDER BY id")?;
        let rules = stmt
            .query_map([], rule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    })
}

/// Inserts a rule row. Used by tests and seed tooling.
pub fn insert(db: &Database, rule: &FilterRule) -> Result<i64, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO filter_rules (name, prospect_types, state, county, min_date, max_date,
             plaintiff_max_bid_min, plaintiff_max_bid_max, assessed_value_min, assessed_value_max,
             final_judgment_min, final_judgment_max, sale_amount_min, sale_amount_max,
             surplus_amount_min, surplus_amount_max, status_types, auction_types, is_active,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                     ?18, ?19, ?20, ?20)",
            params![
                rule.name,
                serde_json::to_string(&rule.prospect_types).unwrap_or_else(|_| "[]".to_string()),
                rule.state,
                rule.county,
                rule.min_date.map(|d| d.format("%Y-%m-%d").to_string()),
                rule.max_date.map(|d| d.format("%Y-%m-%d").to_string()),
                rule.plaintiff_max_bid_min,
                rule.plaintiff_max_bid_max,
                rule.assessed_value_min,
                rule.assessed_value_max,
                rule.final_judgment_min,
                rule.final_judgment_max,
                rule.sale_amount_min,
                rule.sale_amount_max,
                rule.surplus_amount_min,
                rule.surplus_amount_max,
                serde_json::to_string(&rule.status_types).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&rule.auction_types).unwrap_or_else(|_| "[]".to_string()),
                rule.is_active as i64,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_load_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let rule = FilterRule {
            name: "FL surplus floor".to_string(),
            prospect_types: vec!["TD".to_string()],
            state: Some("FL".to_string()),
            surplus_amount_min: Some(10_000.0),
            status_types: vec!["sold_third_party".to_string()],
            is_active: true,
            min_date: NaiveDate::from_ymd_opt(2026, 1, 1),
            ..Default::default()
        };
        insert(&db, &rule).unwrap();

        let loaded = load_active(&db).unwrap();
        assert_eq!(loaded.len(), 1);
        let loaded = &loaded[0];
        assert_eq!(loaded.name, "FL surplus floor");
        assert_eq!(loaded.prospect_types, vec!["TD".to_string()]);
        assert_eq!(loaded.state.as_deref(), Some("FL"));
        assert!(loaded.county.is_none());
        assert_eq!(loaded.surplus_amount_min, Some(10_000.0));
        assert_eq!(loaded.min_date, NaiveDate::from_ymd_opt(2026, 1, 1));
    }

    #[test]
    fn test_inactive_rules_not_loaded() {
        let db = Database::open_in_memory().unwrap();
        let rule = FilterRule {
            name: "disabled".to_string(),
            is_active: false,
            ..Default::default()
        };
        insert(&db, &rule).unwrap();
        assert!(load_active(&db).unwrap().is_empty());
    }
}
