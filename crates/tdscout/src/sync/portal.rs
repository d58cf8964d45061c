//! TDM portal navigation and document-list extraction.
//!
//! The portal has no per-case URLs: every visit replays the same flow the
//! site's own UI uses: list page, case-number search, select the first
//! result row, batch actions, then the Documents tab. Table extraction is
//! pure HTML work, kept separate from navigation so it is testable.

use std::time::Duration;

use scraper::{ElementRef, Html, Selector};
use tokio::time::sleep;

use crate::error::SyncError;
use crate::harvest::BrowserSession;

/// Public case-list entry point of the portal.
pub const PORTAL_LIST_URL: &str = "https://miamidade.realtdm.com/public/cases/List";

/// One row of a case's Documents tab.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortalDocument {
    pub title: String,
    pub filename: String,
    pub details: String,
    pub date: String,
    pub document_id: String,
    pub doc_type: String,
}

/// The scraped document list for a case.
#[derive(Debug, Clone, Default)]
pub struct CaseDocuments {
    pub case_id: String,
    pub documents: Vec<PortalDocument>,
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("selector must parse")
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses document rows from `table.table-public`.
///
/// Table columns (from live HTML):
///   col 0 — icon (skipped)
///   col 1 — `<strong>` document type + muted filename div
///   col 2 — details
///   col 3 — upload date
///   col 4 — View button carrying `data-documentid` / `data-doctype`
pub fn extract_documents(html: &str) -> Vec<PortalDocument> {
    let doc = Html::parse_document(html);
    let row_sel = selector("table.table-public tbody tr");
    let td_sel = selector("td");
    let strong_sel = selector("strong");
    let muted_sel = selector("div.muted");
    let button_sel = selector("button[data-documentid]");

    let mut documents = Vec::new();

    for row in doc.select(&row_sel) {
        let cells: Vec<ElementRef<'_>> = row.select(&td_sel).collect();
        if cells.len() < 2 {
            continue;
        }

        let title_cell = cells[1];
        let title = title_cell
            .select(&strong_sel)
            .next()
            .map(cell_text)
            .unwrap_or_else(|| cell_text(title_cell));
        if title.is_empty() {
            continue;
        }

        let filename = title_cell
            .select(&muted_sel)
            .next()
            .map(cell_text)
            .unwrap_or_default();

        let details = cells.get(2).map(|c| cell_text(*c)).unwrap_or_default();
        let date = cells.get(3).map(|c| cell_text(*c)).unwrap_or_default();

        let mut document_id = String::new();
        let mut doc_type = String::new();
        if let Some(cell) = cells.get(4) {
            if let Some(button) = cell.select(&button_sel).next() {
                document_id = button.value().attr("data-documentid").unwrap_or("").to_string();
                doc_type = button.value().attr("data-doctype").unwrap_or("").to_string();
            }
        }

        documents.push(PortalDocument {
            title,
            filename,
            details,
            date,
            document_id,
            doc_type,
        });
    }

    documents
}

fn nav_err(case_number: &str, reason: impl Into<String>) -> SyncError {
    SyncError::PortalNavigation {
        case_number: case_number.to_string(),
        reason: reason.into(),
    }
}

/// Replays the portal flow up to an open Documents tab. Returns the portal
/// case id captured from the result row.
pub async fn navigate_to_documents_tab(
    session: &BrowserSession,
    case_number: &str,
) -> Result<String, SyncError> {
    session
        .goto(PORTAL_LIST_URL)
        .await
        .map_err(|e| nav_err(case_number, e.to_string()))?;
    sleep(Duration::from_secs(1)).await;

    // Search for the case number.
    let search_input = session
        .fill("input[name*='filterCaseNumber']", case_number)
        .await
        .map_err(|e| nav_err(case_number, format!("search input: {}", e)))?;

    // The search button has no stable id; find it by its label, falling
    // back to submitting from the input.
    let clicked: bool = session
        .evaluate(
            r#"(() => {
                const candidates = [...document.querySelectorAll("button, input[type='submit'], a")];
                const btn = candidates.find(el => ((el.textContent || el.value || "").includes("Search")));
                if (btn) { btn.click(); return true; }
                return false;
            })()"#,
        )
        .await
        .unwrap_or(false);
    if !clicked {
        log::info!("[{}] Search button not found, pressing Enter instead", case_number);
        search_input
            .press_key("Enter")
            .await
            .map_err(|e| nav_err(case_number, format!("submit search: {}", e)))?;
    }
    sleep(Duration::from_secs(2)).await;

    // Wait for the results table.
    if session
        .wait_for_selector("table#county-setup", Duration::from_secs(10))
        .await
        .is_err()
    {
        let page_text = session.content().await.unwrap_or_default().to_lowercase();
        if page_text.contains("no results")
            || page_text.contains("no records")
            || page_text.contains("not found")
        {
            return Err(SyncError::CaseNotFound(case_number.to_string()));
        }
        return Err(nav_err(case_number, "results table did not appear"));
    }

    // Select the first result row; its checkbox is hidden, so click via JS
    // and grab the case id for downstream calls.
    let checkbox_css = "table#county-setup tbody tr:first-child input[name='selectedCases']";
    let checkbox = session
        .wait_for_selector(checkbox_css, Duration::from_secs(5))
        .await
        .map_err(|e| nav_err(case_number, format!("selectedCases checkbox: {}", e)))?;
    let case_id = checkbox
        .attribute("data-caseid")
        .await
        .ok()
        .flatten()
        .unwrap_or_default();
    session
        .js_click(checkbox_css)
        .await
        .map_err(|e| nav_err(case_number, format!("checkbox click: {}", e)))?;
    sleep(Duration::from_secs(1)).await;

    // Open the case through batch actions.
    session
        .wait_for_selector("#batchActions", Duration::from_secs(5))
        .await
        .map_err(|e| nav_err(case_number, format!("batchActions: {}", e)))?;
    session
        .js_click("#batchActions")
        .await
        .map_err(|e| nav_err(case_number, format!("batchActions click: {}", e)))?;
    sleep(Duration::from_secs(2)).await;

    session
        .wait_for_selector("div.public-tabs", Duration::from_secs(15))
        .await
        .map_err(|_| nav_err(case_number, "case detail page did not load"))?;
    sleep(Duration::from_secs(1)).await;

    // The Documents tab's href is javascript:void(0); click via JS.
    let tab_css = "a.public-tab[data-handler='dspCaseDocuments']";
    session
        .wait_for_selector(tab_css, Duration::from_secs(10))
        .await
        .map_err(|_| nav_err(case_number, "Documents tab not found"))?;
    session
        .js_click(tab_css)
        .await
        .map_err(|e| nav_err(case_number, format!("Documents tab click: {}", e)))?;
    sleep(Duration::from_secs(2)).await;

    session
        .wait_for_selector("table.table-public", Duration::from_secs(10))
        .await
        .map_err(|_| nav_err(case_number, "documents table not found"))?;
    sleep(Duration::from_secs(1)).await;

    Ok(case_id)
}

/// Navigates to a case's Documents tab and extracts every page of its
/// document table.
pub async fn scrape_case_documents(
    session: &BrowserSession,
    case_number: &str,
) -> Result<CaseDocuments, SyncError> {
    let case_id = navigate_to_documents_tab(session, case_number).await?;

    let mut documents = Vec::new();
    let mut page_num = 1u32;

    loop {
        let html = session
            .content()
            .await
            .map_err(|e| nav_err(case_number, e.to_string()))?;
        let page_docs = extract_documents(&html);
        log::info!(
            "[{}] Page {}: extracted {} document(s)",
            case_number,
            page_num,
            page_docs.len()
        );
        documents.extend(page_docs);

        if !advance_documents_page(session, page_num + 1).await {
            break;
        }
        page_num += 1;
    }

    log::info!("[{}] Total extracted: {} document(s)", case_number, documents.len());
    Ok(CaseDocuments { case_id, documents })
}

/// Clicks the pagination link for `page_number` if it exists. The link
/// lives inside a collapsed dropdown, so the click goes through JS.
async fn advance_documents_page(session: &BrowserSession, page_number: u32) -> bool {
    let link_css = format!(
        "a.public-pagination-page[data-pagenumber='{}']",
        page_number
    );
    if session
        .wait_for_selector(&link_css, Duration::from_secs(3))
        .await
        .is_err()
    {
        return false;
    }
    if session.js_click(&link_css).await.is_err() {
        return false;
    }
    sleep(Duration::from_secs(2)).await;
    session
        .wait_for_selector("table.table-public", Duration::from_secs(8))
        .await
        .is_ok()
}

/// Locates the View button for a document across all table pages and
/// clicks it. Returns false when the button cannot be found.
pub async fn find_and_click_view_button(
    session: &BrowserSession,
    case_number: &str,
    document_id: &str,
) -> Result<bool, SyncError> {
    let mut page_num = 1u32;

    loop {
        let button_css = format!("button[data-documentid='{}']", document_id);
        if session
            .wait_for_selector(&button_css, Duration::from_secs(3))
            .await
            .is_ok()
        {
            session
                .js_click(&button_css)
                .await
                .map_err(|e| nav_err(case_number, format!("View button click: {}", e)))?;
            log::info!(
                "[{}] Clicked View button for document_id={} on page {}",
                case_number,
                document_id,
                page_num
            );
            return Ok(true);
        }

        if !advance_documents_page(session, page_num + 1).await {
            log::warn!(
                "[{}] View button for document_id={} not found",
                case_number,
                document_id
            );
            return Ok(false);
        }
        page_num += 1;
    }
}
