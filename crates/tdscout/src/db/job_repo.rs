//! Scrape-job repository — job rows are the audit trail of all scheduled
//! work and the source of truth for scope locking. Jobs are never deleted.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A job row. `kind` is `scrape` or `sync`; counters are populated
/// according to the kind.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub state: String,
    pub county: String,
    pub job_type: String,
    pub target_date: String,
    pub end_date: String,
    pub status: String,
    pub prospects_created: u32,
    pub prospects_updated: u32,
    pub prospects_qualified: u32,
    pub prospects_disqualified: u32,
    pub docs_scraped: u32,
    pub docs_new: u32,
    pub docs_downloaded: u32,
    pub download_errors: u32,
    pub warnings: u32,
    pub error_message: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl JobRow {
    /// Creates a fresh pending scrape job for a county/type/date-range scope.
    pub fn new_scrape(
        name: &str,
        state: &str,
        county: &str,
        job_type: &str,
        target_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            kind: "scrape".to_string(),
            state: state.to_string(),
            county: county.to_string(),
            job_type: job_type.to_string(),
            target_date: target_date.format("%Y-%m-%d").to_string(),
            end_date: end_date.format("%Y-%m-%d").to_string(),
            status: "pending".to_string(),
            prospects_created: 0,
            prospects_updated: 0,
            prospects_qualified: 0,
            prospects_disqualified: 0,
            docs_scraped: 0,
            docs_new: 0,
            docs_downloaded: 0,
            download_errors: 0,
            warnings: 0,
            error_message: String::new(),
            created_at: Utc::now().to_rfc3339(),
            started_at: None,
            completed_at: None,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            kind: row.get("kind")?,
            state: row.get("state")?,
            county: row.get("county")?,
            job_type: row.get("job_type")?,
            target_date: row.get("target_date")?,
            end_date: row.get("end_date")?,
            status: row.get("status")?,
            prospects_created: row.get("prospects_created")?,
            prospects_updated: row.get("prospects_updated")?,
            prospects_qualified: row.get("prospects_qualified")?,
            prospects_disqualified: row.get("prospects_disqualified")?,
            docs_scraped: row.get("docs_scraped")?,
            docs_new: row.get("docs_new")?,
            docs_downloaded: row.get("docs_downloaded")?,
            download_errors: row.get("download_errors")?,
            warnings: row.get("warnings")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// A recorded failed attempt. One row per attempt, immutable.
#[derive(Debug, Clone)]
pub struct JobErrorRow {
    pub id: i64,
    pub job_id: String,
    pub category: String,
    pub message: String,
    pub context: String,
    pub is_retryable: bool,
    pub retry_attempt: u32,
    pub created_at: String,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO scrape_jobs (id, name, kind, state, county, job_type, target_date,
             end_date, status, prospects_created, prospects_updated, prospects_qualified,
             prospects_disqualified, docs_scraped, docs_new, docs_downloaded, download_errors,
             warnings, error_message, created_at, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                     ?18, ?19, ?20, ?21, ?22)",
            params![
                job.id,
                job.name,
                job.kind,
                job.state,
                job.county,
                job.job_type,
                job.target_date,
                job.end_date,
                job.status,
                job.prospects_created,
                job.prospects_updated,
                job.prospects_qualified,
                job.prospects_disqualified,
                job.docs_scraped,
                job.docs_new,
                job.docs_downloaded,
                job.download_errors,
                job.warnings,
                job.error_message,
                job.created_at,
                job.started_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Updates an existing job row. All fields except `id` and `created_at`
/// are overwritten.
pub fn update(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE scrape_jobs SET name=?2, kind=?3, state=?4, county=?5, job_type=?6,
             target_date=?7, end_date=?8, status=?9, prospects_created=?10,
             prospects_updated=?11, prospects_qualified=?12, prospects_disqualified=?13,
             docs_scraped=?14, docs_new=?15, docs_downloaded=?16, download_errors=?17,
             warnings=?18, error_message=?19, started_at=?20, completed_at=?21
             WHERE id=?1",
            params![
                job.id,
                job.name,
                job.kind,
                job.state,
                job.county,
                job.job_type,
                job.target_date,
                job.end_date,
                job.status,
                job.prospects_created,
                job.prospects_updated,
                job.prospects_qualified,
                job.prospects_disqualified,
                job.docs_scraped,
                job.docs_new,
                job.docs_downloaded,
                job.download_errors,
                job.warnings,
                job.error_message,
                job.started_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM scrape_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds the most recent job for an exact scope, regardless of status.
pub fn find_for_scope(
    db: &Database,
    county: &str,
    job_type: &str,
    target_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM scrape_jobs
             WHERE county = ?1 AND job_type = ?2 AND target_date = ?3 AND end_date = ?4
             ORDER BY created_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(
            params![
                county,
                job_type,
                target_date.format("%Y-%m-%d").to_string(),
                end_date.format("%Y-%m-%d").to_string()
            ],
            JobRow::from_row,
        )?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// True when another job is `running` for an overlapping scope (same
/// county and type, intersecting date ranges). This is the persisted
/// logical lock; jobs may run in separate processes, so an in-memory
/// mutex would not do.
pub fn running_exists_for_scope(
    db: &Database,
    county: &str,
    job_type: &str,
    target_date: &str,
    end_date: &str,
    exclude_job_id: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scrape_jobs
             WHERE county = ?1 AND job_type = ?2 AND status = 'running' AND id != ?5
               AND NOT (end_date < ?3 OR target_date > ?4)",
            params![county, job_type, target_date, end_date, exclude_job_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Records one failed attempt.
pub fn record_error(
    db: &Database,
    job_id: &str,
    category: &str,
    message: &str,
    context: &str,
    is_retryable: bool,
    retry_attempt: u32,
) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_errors (job_id, category, message, context, is_retryable,
             retry_attempt, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job_id,
                category,
                message,
                context,
                is_retryable as i64,
                retry_attempt,
                now
            ],
        )?;
        Ok(())
    })
}

/// Counts the recorded failed attempts for a job.
pub fn error_count(db: &Database, job_id: &str) -> Result<u32, DatabaseError> {
    db.with_conn(|conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM job_errors WHERE job_id = ?1",
            params![job_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// The most recent recorded error for a job.
pub fn last_error(db: &Database, job_id: &str) -> Result<Option<JobErrorRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM job_errors WHERE job_id = ?1 ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![job_id], |row| {
            Ok(JobErrorRow {
                id: row.get("id")?,
                job_id: row.get("job_id")?,
                category: row.get("category")?,
                message: row.get("message")?,
                context: row.get("context")?,
                is_retryable: row.get::<_, i64>("is_retryable")? != 0,
                retry_attempt: row.get("retry_attempt")?,
                created_at: row.get("created_at")?,
            })
        })?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}
