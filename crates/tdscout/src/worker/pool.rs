//! Sync worker pool.
//!
//! Each worker thread owns a current-thread tokio runtime and a dedicated
//! browser session; sessions are never shared across workers. Documents
//! within one prospect download sequentially; distinct prospects sync
//! concurrently up to the pool size.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::db::prospect_repo::ProspectRow;
use crate::error::WorkerError;
use crate::harvest::BrowserSession;
use crate::sync::{SyncEngine, SyncOutcome};

/// Result of one prospect's sync pass.
#[derive(Debug)]
pub struct SyncResult {
    pub prospect_id: i64,
    pub case_number: String,
    pub outcome: Result<SyncOutcome, String>,
}

pub struct SyncWorkerPool {
    task_sender: Sender<ProspectRow>,
    result_receiver: Receiver<SyncResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl SyncWorkerPool {
    /// Starts `worker_count` workers. The cancel flag is cooperative: a
    /// set flag stops workers before their next prospect, not mid-flight.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(engine: SyncEngine, worker_count: usize, cancel: Arc<AtomicBool>) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (task_sender, task_receiver) = bounded::<ProspectRow>(worker_count * 2);
        // Results are unbounded so a full batch can be submitted up front
        // without the submitter and workers deadlocking on each other.
        let (result_sender, result_receiver) = unbounded::<SyncResult>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let task_rx = task_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let cancel_flag = Arc::clone(&cancel);
            let worker_engine = engine.clone();

            let handle = thread::spawn(move || {
                run_worker(
                    worker_id,
                    task_rx,
                    result_tx,
                    shutdown_flag,
                    cancel_flag,
                    worker_engine,
                );
            });
            workers.push(handle);
        }

        info!("Started {} sync workers", worker_count);

        Self {
            task_sender,
            result_receiver,
            workers,
            shutdown,
        }
    }

    pub fn submit(&self, prospect: ProspectRow) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }
        self.task_sender
            .send(prospect)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn recv_result(&self) -> Option<SyncResult> {
        self.result_receiver.recv().ok()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop the sender so idle workers see a disconnect and exit.
        drop(self.task_sender);
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Sync worker {} panicked: {:?}", i, e);
            } else {
                debug!("Sync worker {} finished", i);
            }
        }
    }
}

fn run_worker(
    worker_id: usize,
    task_receiver: Receiver<ProspectRow>,
    result_sender: Sender<SyncResult>,
    shutdown: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    engine: SyncEngine,
) {
    debug!("Sync worker {} started", worker_id);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Sync worker {} could not build a runtime: {}", worker_id, e);
            return;
        }
    };

    // The browser session is launched on first use so an idle worker never
    // spawns a browser.
    let mut session: Option<BrowserSession> = None;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Sync worker {} received shutdown signal", worker_id);
            break;
        }

        let prospect = match task_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(prospect) => prospect,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        };

        if cancel.load(Ordering::Relaxed) {
            let _ = result_sender.send(SyncResult {
                prospect_id: prospect.id,
                case_number: prospect.case_number.clone(),
                outcome: Err("cancelled".to_string()),
            });
            continue;
        }

        if session.is_none() {
            match runtime.block_on(BrowserSession::launch(engine.config().headless)) {
                Ok(s) => session = Some(s),
                Err(e) => {
                    warn!("Sync worker {} browser launch failed: {}", worker_id, e);
                    let _ = result_sender.send(SyncResult {
                        prospect_id: prospect.id,
                        case_number: prospect.case_number.clone(),
                        outcome: Err(format!("browser launch failed: {}", e)),
                    });
                    continue;
                }
            }
        }

        let outcome = match session.as_ref() {
            Some(s) => runtime
                .block_on(engine.sync_prospect(s, &prospect))
                .map_err(|e| e.to_string()),
            None => Err("no browser session".to_string()),
        };

        let result = SyncResult {
            prospect_id: prospect.id,
            case_number: prospect.case_number.clone(),
            outcome,
        };
        if result_sender.send(result).is_err() {
            error!("Sync worker {} failed to send result", worker_id);
            break;
        }
    }

    if let Some(s) = session.take() {
        runtime.block_on(s.close());
    }
    debug!("Sync worker {} stopped", worker_id);
}

/// Syncs a batch of prospects through a temporary pool and collects all
/// results.
pub fn sync_all(
    engine: SyncEngine,
    prospects: Vec<ProspectRow>,
    worker_count: usize,
    cancel: Arc<AtomicBool>,
) -> Vec<SyncResult> {
    let total = prospects.len();
    if total == 0 {
        return Vec::new();
    }
    let workers = worker_count.clamp(1, total.max(1));
    let pool = SyncWorkerPool::new(engine, workers, cancel);

    let mut submitted = 0usize;
    for prospect in prospects {
        if pool.submit(prospect).is_err() {
            break;
        }
        submitted += 1;
    }

    let mut results = Vec::with_capacity(submitted);
    for _ in 0..submitted {
        match pool.recv_result() {
            Some(result) => results.push(result),
            None => break,
        }
    }

    pool.shutdown();
    pool.wait();
    results
}
