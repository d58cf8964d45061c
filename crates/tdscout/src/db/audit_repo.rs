//! Audit-trail writes: per-job log lines and per-prospect notes/actions.

use chrono::Utc;
use rusqlite::params;

use super::{Database, DatabaseError};

/// Appends a log line for a job. `level` is info/warning/error.
pub fn append_job_log(
    db: &Database,
    job_id: &str,
    level: &str,
    message: &str,
) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO scrape_logs (job_id, level, message, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![job_id, level, message, now],
        )?;
        Ok(())
    })
}

/// Counts a job's log lines at the given level.
pub fn job_log_count(db: &Database, job_id: &str, level: &str) -> Result<u32, DatabaseError> {
    db.with_conn(|conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM scrape_logs WHERE job_id = ?1 AND level = ?2",
            params![job_id, level],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Adds a note to a prospect's record.
pub fn add_prospect_note(
    db: &Database,
    prospect_id: i64,
    content: &str,
) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO prospect_notes (prospect_id, content, created_at) VALUES (?1, ?2, ?3)",
            params![prospect_id, content, now],
        )?;
        Ok(())
    })
}

/// Logs a prospect action with JSON metadata.
pub fn log_prospect_action(
    db: &Database,
    prospect_id: i64,
    action_type: &str,
    description: &str,
    metadata: &serde_json::Value,
) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO prospect_actions (prospect_id, action_type, description, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                prospect_id,
                action_type,
                description,
                metadata.to_string(),
                now
            ],
        )?;
        Ok(())
    })
}
