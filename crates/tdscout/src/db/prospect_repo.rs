//! Prospect repository — upsert-by-natural-key and filtered reads.
//!
//! A prospect is uniquely identified by (county, case_number, auction_date).
//! Re-ingesting the same listing updates the existing row; it never
//! duplicates.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw prospect row from the database.
#[derive(Debug, Clone)]
pub struct ProspectRow {
    pub id: i64,
    pub prospect_type: String,
    pub auction_item_number: String,
    pub case_number: String,
    pub county: String,
    pub state: String,
    pub property_address: String,
    pub city: String,
    pub zip_code: String,
    pub parcel_id: String,
    pub final_judgment_amount: Option<f64>,
    pub opening_bid: Option<f64>,
    pub plaintiff_max_bid: Option<f64>,
    pub assessed_value: Option<f64>,
    pub sale_amount: Option<f64>,
    pub surplus_amount: Option<f64>,
    pub sold_to: String,
    pub auction_type: String,
    pub auction_date: String,
    pub auction_time: String,
    pub auction_status: String,
    pub qualification_status: String,
    pub qualified_at: Option<String>,
    pub disqualified_at: Option<String>,
    pub source_url: String,
    pub raw_data: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ProspectRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            prospect_type: row.get("prospect_type")?,
            auction_item_number: row.get("auction_item_number")?,
            case_number: row.get("case_number")?,
            county: row.get("county")?,
            state: row.get("state")?,
            property_address: row.get("property_address")?,
            city: row.get("city")?,
            zip_code: row.get("zip_code")?,
            parcel_id: row.get("parcel_id")?,
            final_judgment_amount: row.get("final_judgment_amount")?,
            opening_bid: row.get("opening_bid")?,
            plaintiff_max_bid: row.get("plaintiff_max_bid")?,
            assessed_value: row.get("assessed_value")?,
            sale_amount: row.get("sale_amount")?,
            surplus_amount: row.get("surplus_amount")?,
            sold_to: row.get("sold_to")?,
            auction_type: row.get("auction_type")?,
            auction_date: row.get("auction_date")?,
            auction_time: row.get("auction_time")?,
            auction_status: row.get("auction_status")?,
            qualification_status: row.get("qualification_status")?,
            qualified_at: row.get("qualified_at")?,
            disqualified_at: row.get("disqualified_at")?,
            source_url: row.get("source_url")?,
            raw_data: row.get("raw_data")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// A normalized prospect ready for persistence. Produced by the harvester's
/// normalizer; string fields use `""` for absent, numeric fields `None`.
#[derive(Debug, Clone, Default)]
pub struct NewProspect {
    pub prospect_type: String,
    pub auction_item_number: String,
    pub case_number: String,
    pub county: String,
    pub state: String,
    pub property_address: String,
    pub city: String,
    pub zip_code: String,
    pub parcel_id: String,
    pub final_judgment_amount: Option<f64>,
    pub opening_bid: Option<f64>,
    pub plaintiff_max_bid: Option<f64>,
    pub assessed_value: Option<f64>,
    pub sale_amount: Option<f64>,
    pub surplus_amount: Option<f64>,
    pub sold_to: String,
    pub auction_type: String,
    pub auction_date: String,
    pub auction_time: String,
    pub auction_status: String,
    pub source_url: String,
    pub raw_data: String,
}

/// Result of an upsert: the row id and whether a new row was created.
#[derive(Debug, Clone, Copy)]
pub struct UpsertOutcome {
    pub id: i64,
    pub created: bool,
}

/// Filter parameters for selecting prospects to sync.
#[derive(Debug, Default, Clone)]
pub struct ProspectFilter {
    pub qualification_status: Option<String>,
    pub case_numbers: Vec<String>,
    pub state: Option<String>,
    pub prospect_type: Option<String>,
    pub counties: Vec<String>,
    pub auction_start_date: Option<NaiveDate>,
    pub auction_end_date: Option<NaiveDate>,
    /// Keep only prospects that still have pending auto-downloads.
    pub with_pending_downloads: bool,
}

/// Creates the prospect if its natural key is unseen, otherwise updates the
/// existing row. On update only non-empty incoming values overwrite stored
/// fields; the raw payload is always refreshed.
pub fn upsert(db: &Database, new: &NewProspect) -> Result<UpsertOutcome, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM prospects WHERE county = ?1 AND case_number = ?2 AND auction_date = ?3",
                params![new.county, new.case_number, new.auction_date],
                |r| r.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match existing {
            None => {
                conn.execute(
                    "INSERT INTO prospects (prospect_type, auction_item_number, case_number, county,
                     state, property_address, city, zip_code, parcel_id, final_judgment_amount,
                     opening_bid, plaintiff_max_bid, assessed_value, sale_amount, surplus_amount,
                     sold_to, auction_type, auction_date, auction_time, auction_status, source_url,
                     raw_data, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                             ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?23)",
                    params![
                        new.prospect_type,
                        new.auction_item_number,
                        new.case_number,
                        new.county,
                        new.state,
                        new.property_address,
                        new.city,
                        new.zip_code,
                        new.parcel_id,
                        new.final_judgment_amount,
                        new.opening_bid,
                        new.plaintiff_max_bid,
                        new.assessed_value,
                        new.sale_amount,
                        new.surplus_amount,
                        new.sold_to,
                        new.auction_type,
                        new.auction_date,
                        new.auction_time,
                        new.auction_status,
                        new.source_url,
                        new.raw_data,
                        now,
                    ],
                )?;
                Ok(UpsertOutcome {
                    id: conn.last_insert_rowid(),
                    created: true,
                })
            }
            Some(id) => {
                // Only overwrite with meaningful values; empty strings and
                // absent numbers leave the stored field alone.
                conn.execute(
                    "UPDATE prospects SET
                        auction_status = CASE WHEN ?2 != '' THEN ?2 ELSE auction_status END,
                        sale_amount = COALESCE(?3, sale_amount),
                        surplus_amount = COALESCE(?4, surplus_amount),
                        sold_to = CASE WHEN ?5 != '' THEN ?5 ELSE sold_to END,
                        property_address = CASE WHEN ?6 != '' THEN ?6 ELSE property_address END,
                        city = CASE WHEN ?7 != '' THEN ?7 ELSE city END,
                        state = CASE WHEN ?8 != '' THEN ?8 ELSE state END,
                        zip_code = CASE WHEN ?9 != '' THEN ?9 ELSE zip_code END,
                        assessed_value = COALESCE(?10, assessed_value),
                        final_judgment_amount = COALESCE(?11, final_judgment_amount),
                        plaintiff_max_bid = COALESCE(?12, plaintiff_max_bid),
                        auction_type = CASE WHEN ?13 != '' THEN ?13 ELSE auction_type END,
                        opening_bid = COALESCE(?14, opening_bid),
                        raw_data = ?15,
                        updated_at = ?16
                     WHERE id = ?1",
                    params![
                        id,
                        new.auction_status,
                        new.sale_amount,
                        new.surplus_amount,
                        new.sold_to,
                        new.property_address,
                        new.city,
                        new.state,
                        new.zip_code,
                        new.assessed_value,
                        new.final_judgment_amount,
                        new.plaintiff_max_bid,
                        new.auction_type,
                        new.opening_bid,
                        new.raw_data,
                        now,
                    ],
                )?;
                Ok(UpsertOutcome { id, created: false })
            }
        }
    })
}

/// Records the rule engine's verdict, stamping the matching timestamp.
/// Only the evaluation pass calls this.
pub fn set_qualification(db: &Database, id: i64, qualified: bool) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    let status = if qualified { "qualified" } else { "disqualified" };
    db.with_conn(|conn| {
        if qualified {
            conn.execute(
                "UPDATE prospects SET qualification_status = ?2, qualified_at = ?3, updated_at = ?3
                 WHERE id = ?1",
                params![id, status, now],
            )?;
        } else {
            conn.execute(
                "UPDATE prospects SET qualification_status = ?2, disqualified_at = ?3, updated_at = ?3
                 WHERE id = ?1",
                params![id, status, now],
            )?;
        }
        Ok(())
    })
}

/// Finds a prospect by its row id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<ProspectRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM prospects WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], ProspectRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queries prospects matching the filter. Absent filters match everything;
/// prospects without a case number are always excluded (there is nothing to
/// look up on the portal for them).
pub fn query(db: &Database, filter: &ProspectFilter) -> Result<Vec<ProspectRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = vec!["case_number != ''".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref status) = filter.qualification_status {
            conditions.push(format!("qualification_status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if !filter.case_numbers.is_empty() {
            let placeholders: Vec<String> = filter
                .case_numbers
                .iter()
                .enumerate()
                .map(|(i, _)| format!("?{}", param_values.len() + i + 1))
                .collect();
            conditions.push(format!("case_number IN ({})", placeholders.join(", ")));
            for case in &filter.case_numbers {
                param_values.push(Box::new(case.clone()));
            }
        }
        if let Some(ref state) = filter.state {
            conditions.push(format!("state = ?{}", param_values.len() + 1));
            param_values.push(Box::new(state.clone()));
        }
        if let Some(ref prospect_type) = filter.prospect_type {
            conditions.push(format!("prospect_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(prospect_type.clone()));
        }
        if !filter.counties.is_empty() {
            let placeholders: Vec<String> = filter
                .counties
                .iter()
                .enumerate()
                .map(|(i, _)| format!("?{}", param_values.len() + i + 1))
                .collect();
            conditions.push(format!("county IN ({})", placeholders.join(", ")));
            for county in &filter.counties {
                param_values.push(Box::new(county.clone()));
            }
        }
        if let Some(start) = filter.auction_start_date {
            conditions.push(format!("auction_date >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = filter.auction_end_date {
            conditions.push(format!("auction_date <= ?{}", param_values.len() + 1));
            param_values.push(Box::new(end.format("%Y-%m-%d").to_string()));
        }
        if filter.with_pending_downloads {
            conditions.push(
                "EXISTS (SELECT 1 FROM tdm_documents d WHERE d.prospect_id = prospects.id
                 AND d.is_auto_download = 1 AND d.is_downloaded = 0)"
                    .to_string(),
            );
        }

        let sql = format!(
            "SELECT * FROM prospects WHERE {} ORDER BY auction_date DESC, id",
            conditions.join(" AND ")
        );
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<ProspectRow> = stmt
            .query_map(params_ref.as_slice(), ProspectRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_prospect(case_number: &str) -> NewProspect {
        NewProspect {
            prospect_type: "TD".to_string(),
            case_number: case_number.to_string(),
            county: "Miami-Dade".to_string(),
            state: "FL".to_string(),
            property_address: "123 Main St".to_string(),
            auction_date: "2026-06-15".to_string(),
            auction_status: "sold_third_party".to_string(),
            sale_amount: Some(25_000.0),
            opening_bid: Some(0.0),
            surplus_amount: Some(25_000.0),
            raw_data: "{}".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_creates_then_updates() {
        let db = test_db();
        let first = upsert(&db, &sample_prospect("2026A001")).unwrap();
        assert!(first.created);

        let mut revised = sample_prospect("2026A001");
        revised.sale_amount = Some(30_000.0);
        revised.sold_to = "3rd Party Bidder".to_string();
        let second = upsert(&db, &revised).unwrap();
        assert!(!second.created);
        assert_eq!(second.id, first.id);

        let row = find_by_id(&db, first.id).unwrap().unwrap();
        assert_eq!(row.sale_amount, Some(30_000.0));
        assert_eq!(row.sold_to, "3rd Party Bidder");

        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM prospects", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_upsert_preserves_fields_on_empty_incoming() {
        let db = test_db();
        let first = upsert(&db, &sample_prospect("2026A002")).unwrap();

        let mut sparse = sample_prospect("2026A002");
        sparse.property_address = String::new();
        sparse.sale_amount = None;
        upsert(&db, &sparse).unwrap();

        let row = find_by_id(&db, first.id).unwrap().unwrap();
        assert_eq!(row.property_address, "123 Main St");
        assert_eq!(row.sale_amount, Some(25_000.0));
    }

    #[test]
    fn test_same_case_different_date_is_distinct() {
        let db = test_db();
        upsert(&db, &sample_prospect("2026A003")).unwrap();

        let mut rescheduled = sample_prospect("2026A003");
        rescheduled.auction_date = "2026-07-01".to_string();
        let second = upsert(&db, &rescheduled).unwrap();
        assert!(second.created);
    }

    #[test]
    fn test_set_qualification_stamps_timestamp() {
        let db = test_db();
        let outcome = upsert(&db, &sample_prospect("2026A004")).unwrap();

        set_qualification(&db, outcome.id, true).unwrap();
        let row = find_by_id(&db, outcome.id).unwrap().unwrap();
        assert_eq!(row.qualification_status, "qualified");
        assert!(row.qualified_at.is_some());
        assert!(row.disqualified_at.is_none());

        set_qualification(&db, outcome.id, false).unwrap();
        let row = find_by_id(&db, outcome.id).unwrap().unwrap();
        assert_eq!(row.qualification_status, "disqualified");
        assert!(row.disqualified_at.is_some());
    }

    #[test]
    fn test_query_filters() {
        let db = test_db();
        let a = upsert(&db, &sample_prospect("2026A005")).unwrap();
        set_qualification(&db, a.id, true).unwrap();

        let mut broward = sample_prospect("2026B001");
        broward.county = "Broward".to_string();
        let b = upsert(&db, &broward).unwrap();
        set_qualification(&db, b.id, true).unwrap();

        let filter = ProspectFilter {
            qualification_status: Some("qualified".to_string()),
            counties: vec!["Miami-Dade".to_string()],
            ..Default::default()
        };
        let rows = query(&db, &filter).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].case_number, "2026A005");
    }

    #[test]
    fn test_query_date_range() {
        let db = test_db();
        let a = upsert(&db, &sample_prospect("2026A006")).unwrap();
        set_qualification(&db, a.id, true).unwrap();

        let filter = ProspectFilter {
            qualification_status: Some("qualified".to_string()),
            auction_start_date: NaiveDate::from_ymd_opt(2026, 7, 1),
            ..Default::default()
        };
        assert!(query(&db, &filter).unwrap().is_empty());

        let filter = ProspectFilter {
            qualification_status: Some("qualified".to_string()),
            auction_start_date: NaiveDate::from_ymd_opt(2026, 6, 1),
            auction_end_date: NaiveDate::from_ymd_opt(2026, 6, 30),
            ..Default::default()
        };
        assert_eq!(query(&db, &filter).unwrap().len(), 1);
    }
}
