//! Document sync idempotence and re-queue behaviour at the store level.

use tdscout::db::document_repo::{self, NewDocument};
use tdscout::db::prospect_repo::{self, NewProspect};
use tdscout::sync::{self, PortalDocument};
use tdscout::Database;

fn db_with_prospect() -> (Database, i64) {
    let db = Database::open_in_memory().unwrap();
    let id = prospect_repo::upsert(
        &db,
        &NewProspect {
            prospect_type: "TD".to_string(),
            case_number: "2026A00123".to_string(),
            county: "Miami-Dade".to_string(),
            auction_date: "2026-06-15".to_string(),
            raw_data: "{}".to_string(),
            ..Default::default()
        },
    )
    .unwrap()
    .id;
    (db, id)
}

fn remote_listing() -> Vec<PortalDocument> {
    vec![
        PortalDocument {
            title: "Surplus Claim/Affidavit".to_string(),
            filename: "affidavit.pdf".to_string(),
            document_id: "9001".to_string(),
            ..Default::default()
        },
        PortalDocument {
            title: "Notice of Sale".to_string(),
            document_id: "9002".to_string(),
            ..Default::default()
        },
    ]
}

fn persist_pass(db: &Database, prospect_id: i64, remote: &[PortalDocument]) -> usize {
    let existing = document_repo::existing_ids(db, prospect_id).unwrap();
    let fresh = sync::partition_new(remote, &existing);
    for doc in &fresh {
        document_repo::insert(
            db,
            &NewDocument {
                prospect_id,
                document_id: doc.document_id.clone(),
                title: doc.title.clone(),
                filename: doc.filename.clone(),
                is_auto_download: sync::needs_auto_download(&doc.title),
                ..Default::default()
            },
        )
        .unwrap();
    }
    fresh.len()
}

#[test]
fn second_pass_over_unchanged_listing_creates_nothing() {
    let (db, prospect_id) = db_with_prospect();
    let remote = remote_listing();

    assert_eq!(persist_pass(&db, prospect_id, &remote), 2);
    assert_eq!(persist_pass(&db, prospect_id, &remote), 0);

    let count: i64 = db
        .with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM tdm_documents", [], |r| r.get(0))?)
        })
        .unwrap();
    assert_eq!(count, 2);
}

#[test]
fn new_remote_document_is_picked_up_incrementally() {
    let (db, prospect_id) = db_with_prospect();
    let mut remote = remote_listing();
    persist_pass(&db, prospect_id, &remote);

    remote.push(PortalDocument {
        title: "SURPLUS_LETTER".to_string(),
        document_id: "9003".to_string(),
        ..Default::default()
    });
    assert_eq!(persist_pass(&db, prospect_id, &remote), 1);

    // The new letter is flagged for auto-download.
    let pending = document_repo::pending(&db, prospect_id, true).unwrap();
    assert!(pending.iter().any(|d| d.document_id == "9003"));
}

#[test]
fn downloaded_document_is_not_pending_again() {
    let (db, prospect_id) = db_with_prospect();
    persist_pass(&db, prospect_id, &remote_listing());

    let pending = document_repo::pending(&db, prospect_id, true).unwrap();
    assert_eq!(pending.len(), 1);
    let doc_id = pending[0].id;

    document_repo::mark_downloaded(&db, doc_id, "prospects/1/tdm/affidavit.pdf").unwrap();

    // Re-running the pass finds nothing to create and nothing to download.
    assert_eq!(persist_pass(&db, prospect_id, &remote_listing()), 0);
    assert!(document_repo::pending(&db, prospect_id, true).unwrap().is_empty());
}

#[test]
fn requeued_document_becomes_pending_with_reason() {
    let (db, prospect_id) = db_with_prospect();
    persist_pass(&db, prospect_id, &remote_listing());

    let pending = document_repo::pending(&db, prospect_id, true).unwrap();
    let doc_id = pending[0].id;
    document_repo::mark_downloaded(&db, doc_id, "prospects/1/tdm/affidavit.pdf").unwrap();

    document_repo::requeue(&db, doc_id, "file missing on disk").unwrap();

    let pending = document_repo::pending(&db, prospect_id, true).unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].download_error.contains("re-queued"));
    assert!(pending[0].download_error.contains("file missing on disk"));
}
