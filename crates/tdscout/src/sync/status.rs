//! On-demand single-prospect sync with a keyed concurrent status map.
//!
//! The UI can trigger a sync for one prospect and poll its state. The map
//! guards against double-starts per prospect; each running sync owns a
//! dedicated worker thread, runtime, and browser session.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use log::{error, info};

use crate::db::prospect_repo;
use crate::harvest::BrowserSession;

use super::{SyncEngine, SyncOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Snapshot of one prospect's on-demand sync state.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<SyncOutcome>,
    pub error: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            started_at: None,
            finished_at: None,
            outcome: None,
            error: None,
        }
    }
}

/// Concurrent map of prospect id → sync status. Cloning shares the map.
#[derive(Clone, Default)]
pub struct SyncStatusMap {
    inner: Arc<RwLock<HashMap<i64, SyncStatus>>>,
}

impl SyncStatusMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current status; idle when the prospect is unknown.
    pub fn get_status(&self, prospect_id: i64) -> SyncStatus {
        self.inner
            .read()
            .ok()
            .and_then(|map| map.get(&prospect_id).cloned())
            .unwrap_or_default()
    }

    /// Claims the running slot for a prospect. Returns false when a sync is
    /// already running for it.
    pub fn start(&self, prospect_id: i64) -> bool {
        let Ok(mut map) = self.inner.write() else {
            return false;
        };
        if map
            .get(&prospect_id)
            .map(|s| s.phase == SyncPhase::Running)
            .unwrap_or(false)
        {
            return false;
        }
        map.insert(
            prospect_id,
            SyncStatus {
                phase: SyncPhase::Running,
                started_at: Some(Utc::now()),
                ..Default::default()
            },
        );
        true
    }

    fn finish(&self, prospect_id: i64, status: SyncStatus) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(prospect_id, status);
        }
    }

    pub fn complete(&self, prospect_id: i64, outcome: SyncOutcome) {
        let started_at = self.get_status(prospect_id).started_at;
        self.finish(
            prospect_id,
            SyncStatus {
                phase: SyncPhase::Completed,
                started_at,
                finished_at: Some(Utc::now()),
                outcome: Some(outcome),
                error: None,
            },
        );
    }

    pub fn fail(&self, prospect_id: i64, message: String) {
        let started_at = self.get_status(prospect_id).started_at;
        self.finish(
            prospect_id,
            SyncStatus {
                phase: SyncPhase::Failed,
                started_at,
                finished_at: Some(Utc::now()),
                outcome: None,
                error: Some(message),
            },
        );
    }
}

/// Starts a background sync for one prospect. Returns false when one is
/// already running for it. The spawned thread owns its runtime and
/// browser session and reports back through the map only.
pub fn spawn_sync(map: &SyncStatusMap, engine: SyncEngine, prospect_id: i64) -> bool {
    if !map.start(prospect_id) {
        return false;
    }

    let map = map.clone();
    std::thread::spawn(move || {
        let result = run_sync(&engine, prospect_id);
        match result {
            Ok(outcome) => {
                info!(
                    "On-demand sync for prospect {} finished: {} downloaded, {} errors",
                    prospect_id, outcome.docs_downloaded, outcome.download_errors
                );
                map.complete(prospect_id, outcome);
            }
            Err(message) => {
                error!("On-demand sync for prospect {} failed: {}", prospect_id, message);
                map.fail(prospect_id, message);
            }
        }
    });
    true
}

fn run_sync(engine: &SyncEngine, prospect_id: i64) -> Result<SyncOutcome, String> {
    let prospect = prospect_repo::find_by_id(engine.db(), prospect_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Prospect {} not found", prospect_id))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| e.to_string())?;

    runtime.block_on(async {
        let session = BrowserSession::launch(engine.config().headless)
            .await
            .map_err(|e| e.to_string())?;
        let result = engine
            .sync_prospect(&session, &prospect)
            .await
            .map_err(|e| e.to_string());
        session.close().await;
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_prospect_is_idle() {
        let map = SyncStatusMap::new();
        assert_eq!(map.get_status(42).phase, SyncPhase::Idle);
    }

    #[test]
    fn test_start_refuses_while_running() {
        let map = SyncStatusMap::new();
        assert!(map.start(42));
        assert!(!map.start(42));
        // A different prospect is unaffected.
        assert!(map.start(43));
    }

    #[test]
    fn test_complete_releases_and_records() {
        let map = SyncStatusMap::new();
        assert!(map.start(42));
        map.complete(
            42,
            SyncOutcome {
                docs_downloaded: 2,
                ..Default::default()
            },
        );

        let status = map.get_status(42);
        assert_eq!(status.phase, SyncPhase::Completed);
        assert_eq!(status.outcome.unwrap().docs_downloaded, 2);
        assert!(status.finished_at.is_some());

        // Finished syncs can be started again.
        assert!(map.start(42));
    }

    #[test]
    fn test_fail_records_error() {
        let map = SyncStatusMap::new();
        assert!(map.start(7));
        map.fail(7, "portal unreachable".to_string());

        let status = map.get_status(7);
        assert_eq!(status.phase, SyncPhase::Failed);
        assert_eq!(status.error.as_deref(), Some("portal unreachable"));
    }
}
