//! Multi-strategy document download pipeline.
//!
//! The portal's View button behaves differently per document and browser
//! mode: usually a new tab opens with the PDF, sometimes the PDF response
//! lands in the same tab, and occasionally the page itself navigates to
//! the file. The capture strategies are an ordered list tried in sequence;
//! the first captured URL wins. Downloads are at-least-once and
//! idempotent: a valid file already on disk short-circuits the network
//! round trip, and failures leave the document pending for the next run.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use chromiumoxide::cdp::browser_protocol::network::EventResponseReceived;
use futures_util::StreamExt;
use log::{info, warn};
use tokio::time::{sleep, timeout};

use crate::config::RunConfig;
use crate::db::document_repo::{self, DocumentRow};
use crate::db::prospect_repo::ProspectRow;
use crate::db::Database;
use crate::error::SyncError;
use crate::harvest::browser::USER_AGENT;
use crate::harvest::BrowserSession;
use crate::storage::DocumentStorage;

use super::portal::{self, PORTAL_LIST_URL};
use super::SyncOutcome;

const NEW_TAB_WAIT: Duration = Duration::from_secs(10);
const RESPONSE_WAIT: Duration = Duration::from_secs(15);
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// True when the payload carries the PDF magic bytes.
pub fn is_pdf_bytes(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

/// Validates a PDF on disk: signature first, then a structural parse to
/// catch truncated or corrupted downloads.
pub fn validate_pdf_file(path: &Path) -> bool {
    let Ok(bytes) = std::fs::read(path) else {
        return false;
    };
    if !is_pdf_bytes(&bytes) {
        return false;
    }
    lopdf::Document::load_mem(&bytes).is_ok()
}

/// Ordered capture strategies, tried in sequence per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureStrategy {
    /// Expect the View click to open the PDF in a new tab.
    NewTab,
    /// Expect a PDF response in the same tab after the click.
    SameTabResponse,
    /// Fall back to the current page URL if it left the listing page.
    CurrentUrl,
}

const STRATEGIES: &[CaptureStrategy] = &[
    CaptureStrategy::NewTab,
    CaptureStrategy::SameTabResponse,
    CaptureStrategy::CurrentUrl,
];

/// What one strategy attempt produced.
enum Capture {
    Url(String),
    NoUrl,
    /// The View button could not be located; further strategies are moot.
    NoButton,
}

pub struct DownloadPipeline<'a> {
    pub db: &'a Database,
    pub storage: &'a DocumentStorage,
    pub config: &'a RunConfig,
}

impl<'a> DownloadPipeline<'a> {
    /// Re-validates previously downloaded files. A missing or corrupt file
    /// resets its document to pending with a re-queued reason, the only
    /// backward transition a document can take.
    pub fn revalidate_downloaded(
        &self,
        prospect: &ProspectRow,
        outcome: &mut SyncOutcome,
    ) -> Result<(), SyncError> {
        for doc in document_repo::downloaded(self.db, prospect.id)? {
            let reason = if doc.local_path.is_empty() {
                Some("no stored path".to_string())
            } else {
                let path = self.storage.absolute_path(&doc.local_path);
                if !path.exists() {
                    Some("file missing on disk".to_string())
                } else if !validate_pdf_file(&path) {
                    Some("failed PDF validation".to_string())
                } else {
                    None
                }
            };

            if let Some(reason) = reason {
                warn!(
                    "[{}] Re-queuing document {}: {}",
                    prospect.case_number, doc.document_id, reason
                );
                document_repo::requeue(self.db, doc.id, &reason)?;
                outcome.requeued += 1;
            }
        }
        Ok(())
    }

    /// Downloads every pending document for the prospect. Failures are
    /// per-document; the pass always continues to the next one.
    pub async fn download_pending(
        &self,
        session: &BrowserSession,
        prospect: &ProspectRow,
        outcome: &mut SyncOutcome,
    ) -> Result<(), SyncError> {
        let pending = document_repo::pending(self.db, prospect.id, self.config.retry_failed)?;
        if pending.is_empty() {
            return Ok(());
        }
        info!(
            "[{}] {} pending download(s)",
            prospect.case_number,
            pending.len()
        );

        if self.config.dry_run {
            for doc in &pending {
                info!(
                    "[{}] [DRY RUN] Would download: {}",
                    prospect.case_number, doc.title
                );
            }
            return Ok(());
        }

        if let Err(e) = portal::navigate_to_documents_tab(session, &prospect.case_number).await {
            warn!(
                "[{}] Could not navigate to Documents tab for downloads: {}",
                prospect.case_number, e
            );
            for doc in &pending {
                document_repo::mark_error(self.db, doc.id, "Navigation to Documents tab failed")?;
                outcome.download_errors += 1;
            }
            return Ok(());
        }

        let total = pending.len();
        for (index, doc) in pending.iter().enumerate() {
            match self.download_one(session, prospect, doc).await {
                Ok(true) => outcome.docs_downloaded += 1,
                Ok(false) => outcome.download_errors += 1,
                Err(e) => {
                    document_repo::mark_error(self.db, doc.id, &e.to_string())?;
                    outcome.download_errors += 1;
                    warn!("[{}] Download error: {}", prospect.case_number, e);
                }
            }

            sleep(Duration::from_secs(1)).await;

            // Clicking View changes page state; return to the Documents tab
            // before the next document of the same case.
            if index + 1 < total {
                if let Err(e) =
                    portal::navigate_to_documents_tab(session, &prospect.case_number).await
                {
                    warn!(
                        "[{}] Re-navigation failed, stopping downloads for this case: {}",
                        prospect.case_number, e
                    );
                    break;
                }
            }
        }
        Ok(())
    }

    /// Downloads one document. `Ok(true)` means a file landed on disk,
    /// `Ok(false)` means the failure was recorded on the document row.
    async fn download_one(
        &self,
        session: &BrowserSession,
        prospect: &ProspectRow,
        doc: &DocumentRow,
    ) -> Result<bool, SyncError> {
        let dest = self
            .storage
            .dest_path(prospect.id, &doc.filename, &doc.title)?;

        // Already on disk from a previous run; just record it.
        if dest.exists() && validate_pdf_file(&dest) {
            let relative = self.storage.relative_path(&dest);
            document_repo::mark_downloaded(self.db, doc.id, &relative)?;
            info!(
                "[{}] Already on disk: {}",
                prospect.case_number,
                dest.display()
            );
            return Ok(true);
        }

        let mut captured: Option<String> = None;
        for strategy in STRATEGIES {
            match self
                .attempt_capture(session, prospect, doc, *strategy)
                .await?
            {
                Capture::Url(url) => {
                    captured = Some(url);
                    break;
                }
                Capture::NoUrl => continue,
                Capture::NoButton => {
                    document_repo::mark_error(self.db, doc.id, "View button not found")?;
                    return Ok(false);
                }
            }
        }

        let Some(pdf_url) = captured else {
            document_repo::mark_error(self.db, doc.id, "No PDF URL captured")?;
            info!(
                "[{}] No PDF URL for document_id={}",
                prospect.case_number, doc.document_id
            );
            return Ok(false);
        };

        let mut bytes = self.fetch_via_session(session, &pdf_url).await?;

        if !is_pdf_bytes(&bytes) {
            // One fallback: let the browser itself fetch the file with its
            // own session state before giving up on this document.
            match self.fetch_via_browser(session, &pdf_url).await {
                Some(browser_bytes) if is_pdf_bytes(&browser_bytes) => bytes = browser_bytes,
                _ => {
                    document_repo::mark_error(self.db, doc.id, "Response was not a PDF")?;
                    return Ok(false);
                }
            }
        }

        self.storage.write_document(&dest, &bytes)?;
        let relative = self.storage.relative_path(&dest);
        document_repo::mark_downloaded(self.db, doc.id, &relative)?;
        info!("[{}] Saved: {}", prospect.case_number, dest.display());
        Ok(true)
    }

    async fn attempt_capture(
        &self,
        session: &BrowserSession,
        prospect: &ProspectRow,
        doc: &DocumentRow,
        strategy: CaptureStrategy,
    ) -> Result<Capture, SyncError> {
        match strategy {
            CaptureStrategy::NewTab => {
                let known = session.page_ids().await;
                if !portal::find_and_click_view_button(
                    session,
                    &prospect.case_number,
                    &doc.document_id,
                )
                .await?
                {
                    return Ok(Capture::NoButton);
                }
                match session.wait_for_new_page(&known, NEW_TAB_WAIT).await {
                    Some(page) => {
                        let _ = page.wait_for_navigation().await;
                        let url = page.url().await.ok().flatten().unwrap_or_default();
                        let _ = page.close().await;
                        if url.is_empty() {
                            Ok(Capture::NoUrl)
                        } else {
                            info!("[{}] PDF tab URL: {}", prospect.case_number, url);
                            Ok(Capture::Url(url))
                        }
                    }
                    None => Ok(Capture::NoUrl),
                }
            }
            CaptureStrategy::SameTabResponse => {
                let mut responses = session
                    .page()
                    .event_listener::<EventResponseReceived>()
                    .await
                    .map_err(|e| SyncError::Download(e.to_string()))?;

                if !portal::find_and_click_view_button(
                    session,
                    &prospect.case_number,
                    &doc.document_id,
                )
                .await?
                {
                    return Ok(Capture::NoButton);
                }

                let deadline = tokio::time::Instant::now() + RESPONSE_WAIT;
                loop {
                    let remaining = deadline
                        .checked_duration_since(tokio::time::Instant::now())
                        .unwrap_or_default();
                    if remaining.is_zero() {
                        return Ok(Capture::NoUrl);
                    }
                    match timeout(remaining, responses.next()).await {
                        Ok(Some(event)) => {
                            let url = event.response.url.clone();
                            let mime = event.response.mime_type.to_lowercase();
                            if mime.contains("pdf") || url.to_lowercase().ends_with(".pdf") {
                                info!("[{}] PDF response URL: {}", prospect.case_number, url);
                                return Ok(Capture::Url(url));
                            }
                        }
                        Ok(None) | Err(_) => return Ok(Capture::NoUrl),
                    }
                }
            }
            CaptureStrategy::CurrentUrl => {
                let url = session.current_url().await;
                if !url.is_empty() && url != PORTAL_LIST_URL {
                    info!("[{}] PDF current URL: {}", prospect.case_number, url);
                    Ok(Capture::Url(url))
                } else {
                    Ok(Capture::NoUrl)
                }
            }
        }
    }

    /// Fetches the captured URL with the browser session's cookies, never
    /// a fresh unauthenticated client.
    async fn fetch_via_session(
        &self,
        session: &BrowserSession,
        url: &str,
    ) -> Result<Vec<u8>, SyncError> {
        let cookies = session.cookie_header().await?;
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Download(e.to_string()))?;
        let response = client
            .get(url)
            .header(reqwest::header::COOKIE, cookies)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| SyncError::Download(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SyncError::Download(format!("HTTP {}", response.status())));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::Download(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// In-page fetch fallback: the browser downloads the bytes itself and
    /// hands them back base64-encoded.
    async fn fetch_via_browser(&self, session: &BrowserSession, url: &str) -> Option<Vec<u8>> {
        let url_json = serde_json::to_string(url).ok()?;
        let js = format!(
            r#"(async () => {{
                try {{
                    const resp = await fetch({}, {{ credentials: 'include' }});
                    if (!resp.ok) return '';
                    const buf = await resp.arrayBuffer();
                    const bytes = new Uint8Array(buf);
                    let binary = '';
                    for (let i = 0; i < bytes.length; i++) {{
                        binary += String.fromCharCode(bytes[i]);
                    }}
                    return btoa(binary);
                }} catch (e) {{
                    return '';
                }}
            }})()"#,
            url_json
        );
        let encoded: String = session.evaluate(&js).await.ok()?;
        if encoded.is_empty() {
            return None;
        }
        base64::engine::general_purpose::STANDARD.decode(encoded).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::prospect_repo::{self, NewProspect};
    use crate::db::document_repo::NewDocument;

    fn minimal_pdf() -> Vec<u8> {
        use lopdf::{dictionary, Document, Object};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let page_id = doc.new_object_id();

        doc.objects.insert(
            page_id,
            Object::Dictionary(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_is_pdf_bytes() {
        assert!(is_pdf_bytes(b"%PDF-1.7 rest"));
        assert!(!is_pdf_bytes(b"<html>not a pdf</html>"));
        assert!(!is_pdf_bytes(b""));
    }

    #[test]
    fn test_validate_pdf_file() {
        let dir = tempfile::tempdir().unwrap();

        let valid = dir.path().join("valid.pdf");
        std::fs::write(&valid, minimal_pdf()).unwrap();
        assert!(validate_pdf_file(&valid));

        let bad_magic = dir.path().join("bad.pdf");
        std::fs::write(&bad_magic, b"<html>error page</html>").unwrap();
        assert!(!validate_pdf_file(&bad_magic));

        // Right magic, broken structure.
        let truncated = dir.path().join("truncated.pdf");
        std::fs::write(&truncated, b"%PDF-1.7 then nothing useful").unwrap();
        assert!(!validate_pdf_file(&truncated));

        assert!(!validate_pdf_file(&dir.path().join("missing.pdf")));
    }

    #[test]
    fn test_revalidate_requeues_missing_and_corrupt_files() {
        let db = Database::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let storage = DocumentStorage::new(dir.path());
        let config = RunConfig::default();

        let prospect_id = prospect_repo::upsert(
            &db,
            &NewProspect {
                prospect_type: "TD".to_string(),
                case_number: "2026A001".to_string(),
                county: "Miami-Dade".to_string(),
                auction_date: "2026-06-15".to_string(),
                raw_data: "{}".to_string(),
                ..Default::default()
            },
        )
        .unwrap()
        .id;
        let prospect = prospect_repo::find_by_id(&db, prospect_id).unwrap().unwrap();

        // One valid file, one deleted, one corrupted.
        let mut ids = Vec::new();
        for (doc_id, name) in [("d1", "good.pdf"), ("d2", "gone.pdf"), ("d3", "corrupt.pdf")] {
            let id = document_repo::insert(
                &db,
                &NewDocument {
                    prospect_id,
                    document_id: doc_id.to_string(),
                    title: "Surplus Claim/Affidavit".to_string(),
                    filename: name.to_string(),
                    is_auto_download: true,
                    ..Default::default()
                },
            )
            .unwrap();
            let dest = storage.dest_path(prospect_id, name, "").unwrap();
            storage.write_document(&dest, &minimal_pdf()).unwrap();
            document_repo::mark_downloaded(&db, id, &storage.relative_path(&dest)).unwrap();
            ids.push(id);
        }
        std::fs::remove_file(storage.dest_path(prospect_id, "gone.pdf", "").unwrap()).unwrap();
        storage
            .write_document(
                &storage.dest_path(prospect_id, "corrupt.pdf", "").unwrap(),
                b"<html>session expired</html>",
            )
            .unwrap();

        let pipeline = DownloadPipeline {
            db: &db,
            storage: &storage,
            config: &config,
        };
        let mut outcome = SyncOutcome::default();
        pipeline.revalidate_downloaded(&prospect, &mut outcome).unwrap();

        assert_eq!(outcome.requeued, 2);
        let pending = document_repo::pending(&db, prospect_id, true).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|d| d.download_error.contains("re-queued")));

        // The valid file stays downloaded.
        let downloaded = document_repo::downloaded(&db, prospect_id).unwrap();
        assert_eq!(downloaded.len(), 1);
        assert_eq!(downloaded[0].document_id, "d1");
    }
}
