//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_prospects_table",
        sql: include_str!("sql/001_create_prospects.sql"),
    },
    Migration {
        version: 2,
        description: "create_filter_rules_table",
        sql: include_str!("sql/002_create_filter_rules.sql"),
    },
    Migration {
        version: 3,
        description: "create_scrape_jobs_tables",
        sql: include_str!("sql/003_create_scrape_jobs.sql"),
    },
    Migration {
        version: 4,
        description: "create_tdm_documents_table",
        sql: include_str!("sql/004_create_tdm_documents.sql"),
    },
    Migration {
        version: 5,
        description: "create_prospect_audit_tables",
        sql: include_str!("sql/005_create_prospect_audit.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    // Create the migrations tracking table.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();
        // Running again should be a no-op.
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_prospect_natural_key_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO prospects (prospect_type, case_number, county, auction_date, created_at, updated_at)
             VALUES ('TD', '2026A001', 'Miami-Dade', '2026-06-15', '2026-01-01', '2026-01-01')",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO prospects (prospect_type, case_number, county, auction_date, created_at, updated_at)
             VALUES ('TD', '2026A001', 'Miami-Dade', '2026-06-15', '2026-01-01', '2026-01-01')",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_document_identity_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO prospects (prospect_type, case_number, county, auction_date, created_at, updated_at)
             VALUES ('TD', '2026A001', 'Miami-Dade', '2026-06-15', '2026-01-01', '2026-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO tdm_documents (prospect_id, document_id, created_at) VALUES (1, 'doc-9', '2026-01-01')",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO tdm_documents (prospect_id, document_id, created_at) VALUES (1, 'doc-9', '2026-01-02')",
            [],
        );
        assert!(dup.is_err());
    }
}
