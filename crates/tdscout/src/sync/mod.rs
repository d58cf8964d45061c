//! TDM document sync engine.
//!
//! One pass per prospect: scrape the portal's document list, diff against
//! stored document ids, persist the new ones (flagging surplus paperwork
//! for auto-download), write an audit trail, then run the download
//! pipeline over everything still pending.

use std::collections::HashSet;

use log::info;

pub mod download;
pub mod portal;
pub mod status;

pub use download::DownloadPipeline;
pub use portal::{scrape_case_documents, PortalDocument};
pub use status::{SyncPhase, SyncStatus, SyncStatusMap};

use crate::config::RunConfig;
use crate::db::document_repo::{self, NewDocument};
use crate::db::prospect_repo::ProspectRow;
use crate::db::{audit_repo, Database};
use crate::error::SyncError;
use crate::harvest::BrowserSession;
use crate::storage::DocumentStorage;

/// Document titles that are always retrieved unattended.
pub const DOWNLOAD_TITLES: &[&str] =
    &["Surplus Claim/Affidavit", "COM_SURPLUS", "SURPLUS_LETTER"];

/// Counters for one prospect's sync pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOutcome {
    pub docs_scraped: u32,
    pub docs_new: u32,
    pub docs_downloaded: u32,
    pub download_errors: u32,
    pub requeued: u32,
}

/// True when a document title marks it for unattended download.
pub fn needs_auto_download(title: &str) -> bool {
    DOWNLOAD_TITLES.iter().any(|kw| title.contains(kw))
}

/// Scraped documents not yet present in the store. Documents without a
/// remote id cannot be tracked and are skipped.
pub fn partition_new<'a>(
    scraped: &'a [PortalDocument],
    existing: &HashSet<String>,
) -> Vec<&'a PortalDocument> {
    scraped
        .iter()
        .filter(|d| !d.document_id.is_empty() && !existing.contains(&d.document_id))
        .collect()
}

#[derive(Clone)]
pub struct SyncEngine {
    db: Database,
    storage: DocumentStorage,
    config: RunConfig,
}

impl SyncEngine {
    pub fn new(db: Database, storage: DocumentStorage, config: RunConfig) -> Self {
        Self {
            db,
            storage,
            config,
        }
    }

    /// Scrapes, diffs, persists, audits, and downloads for one prospect.
    pub async fn sync_prospect(
        &self,
        session: &BrowserSession,
        prospect: &ProspectRow,
    ) -> Result<SyncOutcome, SyncError> {
        let dry_tag = if self.config.dry_run { "[DRY RUN] " } else { "" };
        info!(
            "[{}] {}Syncing TDM documents...",
            prospect.case_number, dry_tag
        );

        let mut outcome = SyncOutcome::default();

        let scraped = portal::scrape_case_documents(session, &prospect.case_number).await?;
        outcome.docs_scraped = scraped.documents.len() as u32;
        info!(
            "[{}] TDM returned {} document(s)",
            prospect.case_number, outcome.docs_scraped
        );

        let existing = document_repo::existing_ids(&self.db, prospect.id)?;
        let new_docs = partition_new(&scraped.documents, &existing);

        if self.config.dry_run {
            if new_docs.is_empty() {
                info!("[{}] No new documents", prospect.case_number);
            }
            for doc in &new_docs {
                let flag = if needs_auto_download(&doc.title) {
                    " [auto-download]"
                } else {
                    ""
                };
                info!(
                    "[{}] [DRY RUN] Would create: {}{}",
                    prospect.case_number, doc.title, flag
                );
            }
            let pipeline = self.pipeline();
            pipeline
                .download_pending(session, prospect, &mut outcome)
                .await?;
            return Ok(outcome);
        }

        outcome.docs_new =
            self.persist_new_documents(prospect.id, &scraped.case_id, &new_docs)? as u32;

        if !new_docs.is_empty() {
            let titles: Vec<&str> = new_docs.iter().map(|d| d.title.as_str()).collect();
            let description = format!(
                "TDM sync: {} new document(s) found: {}",
                new_docs.len(),
                titles.join(", ")
            );
            audit_repo::log_prospect_action(
                &self.db,
                prospect.id,
                "updated",
                &description,
                &serde_json::json!({
                    "new_document_count": new_docs.len(),
                    "document_titles": titles,
                }),
            )?;
            audit_repo::add_prospect_note(
                &self.db,
                prospect.id,
                &format!("[TDM Auto-Sync] {}", description),
            )?;
            info!(
                "[{}] {} new document(s) logged and noted",
                prospect.case_number,
                new_docs.len()
            );
        } else {
            info!("[{}] No new documents", prospect.case_number);
        }

        let pipeline = self.pipeline();
        if self.config.force_validate_downloaded {
            pipeline.revalidate_downloaded(prospect, &mut outcome)?;
        }
        pipeline
            .download_pending(session, prospect, &mut outcome)
            .await?;

        Ok(outcome)
    }

    /// Persists the diffed documents, flagging surplus paperwork for
    /// unattended download. Returns the number inserted.
    pub fn persist_new_documents(
        &self,
        prospect_id: i64,
        case_id: &str,
        new_docs: &[&PortalDocument],
    ) -> Result<usize, SyncError> {
        for doc in new_docs {
            document_repo::insert(
                &self.db,
                &NewDocument {
                    prospect_id,
                    case_id: case_id.to_string(),
                    document_id: doc.document_id.clone(),
                    title: doc.title.clone(),
                    filename: doc.filename.clone(),
                    details: doc.details.clone(),
                    doc_date: doc.date.clone(),
                    doc_type: doc.doc_type.clone(),
                    is_auto_download: needs_auto_download(&doc.title),
                },
            )?;
        }
        Ok(new_docs.len())
    }

    fn pipeline(&self) -> DownloadPipeline<'_> {
        DownloadPipeline {
            db: &self.db,
            storage: &self.storage,
            config: &self.config,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }
}
