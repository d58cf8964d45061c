//! TDM document repository — append-only archive of documents observed on
//! the portal, one row per (prospect, remote document id).

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A document row. `is_auto_download && !is_downloaded` means pending.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: i64,
    pub prospect_id: i64,
    pub case_id: String,
    pub document_id: String,
    pub title: String,
    pub filename: String,
    pub details: String,
    pub doc_date: String,
    pub doc_type: String,
    pub is_auto_download: bool,
    pub is_downloaded: bool,
    pub downloaded_at: Option<String>,
    pub local_path: String,
    pub download_error: String,
    pub last_checked_at: Option<String>,
    pub created_at: String,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            prospect_id: row.get("prospect_id")?,
            case_id: row.get("case_id")?,
            document_id: row.get("document_id")?,
            title: row.get("title")?,
            filename: row.get("filename")?,
            details: row.get("details")?,
            doc_date: row.get("doc_date")?,
            doc_type: row.get("doc_type")?,
            is_auto_download: row.get::<_, i64>("is_auto_download")? != 0,
            is_downloaded: row.get::<_, i64>("is_downloaded")? != 0,
            downloaded_at: row.get("downloaded_at")?,
            local_path: row.get("local_path")?,
            download_error: row.get("download_error")?,
            last_checked_at: row.get("last_checked_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// A newly observed portal document.
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub prospect_id: i64,
    pub case_id: String,
    pub document_id: String,
    pub title: String,
    pub filename: String,
    pub details: String,
    pub doc_date: String,
    pub doc_type: String,
    pub is_auto_download: bool,
}

/// Returns the remote document ids already stored for a prospect.
pub fn existing_ids(db: &Database, prospect_id: i64) -> Result<HashSet<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT document_id FROM tdm_documents WHERE prospect_id = ?1")?;
        let ids = stmt
            .query_map(params![prospect_id], |r| r.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    })
}

/// Inserts a newly observed document.
pub fn insert(db: &Database, doc: &NewDocument) -> Result<i64, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO tdm_documents (prospect_id, case_id, document_id, title, filename,
             details, doc_date, doc_type, is_auto_download, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                doc.prospect_id,
                doc.case_id,
                doc.document_id,
                doc.title,
                doc.filename,
                doc.details,
                doc.doc_date,
                doc.doc_type,
                doc.is_auto_download as i64,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Documents flagged for download that have not completed yet. When
/// `retry_failed` is false, documents that already recorded a download
/// error are excluded.
pub fn pending(
    db: &Database,
    prospect_id: i64,
    retry_failed: bool,
) -> Result<Vec<DocumentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = if retry_failed {
            "SELECT * FROM tdm_documents
             WHERE prospect_id = ?1 AND is_auto_download = 1 AND is_downloaded = 0
             ORDER BY id"
        } else {
            "SELECT * FROM tdm_documents
             WHERE prospect_id = ?1 AND is_auto_download = 1 AND is_downloaded = 0
               AND download_error = ''
             ORDER BY id"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![prospect_id], DocumentRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Documents already marked downloaded, for revalidation passes.
pub fn downloaded(db: &Database, prospect_id: i64) -> Result<Vec<DocumentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM tdm_documents
             WHERE prospect_id = ?1 AND is_downloaded = 1
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![prospect_id], DocumentRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Marks a document downloaded, clearing any previous error.
pub fn mark_downloaded(db: &Database, id: i64, local_path: &str) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE tdm_documents SET is_downloaded = 1, downloaded_at = ?2, local_path = ?3,
             download_error = '', last_checked_at = ?2 WHERE id = ?1",
            params![id, now, local_path],
        )?;
        Ok(())
    })
}

/// Records a download failure; the document stays pending for the next run.
pub fn mark_error(db: &Database, id: i64, error: &str) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE tdm_documents SET download_error = ?2, last_checked_at = ?3 WHERE id = ?1",
            params![id, error, now],
        )?;
        Ok(())
    })
}

/// Resets a downloaded document back to pending. The only backward
/// transition in the document state machine, taken when the on-disk file
/// is missing or fails content validation.
pub fn requeue(db: &Database, id: i64, reason: &str) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    let error = format!("re-queued: {}", reason);
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE tdm_documents SET is_downloaded = 0, downloaded_at = NULL,
             download_error = ?2, last_checked_at = ?3 WHERE id = ?1",
            params![id, error, now],
        )?;
        Ok(())
    })
}
