//! Job lifecycle engine.
//!
//! `run` owns the whole lifecycle: scope-lock check, pending→running,
//! the work pipeline, bounded retries with backoff, and the terminal
//! completed/failed write. Errors never escape to the caller: every
//! outcome is observable through the job row and its error rows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use log::{debug, error, info, warn};
use tracing::info_span;

use crate::config::RunConfig;
use crate::db::job_repo::{self, JobRow};
use crate::db::prospect_repo::{self, ProspectFilter};
use crate::db::{audit_repo, rule_repo, Database};
use crate::error::{ConfigError, TdscoutError, WorkerError};
use crate::harvest::{normalize, urls, BrowserSession, Harvester};
use crate::progress::{NoopProgress, ProgressEvent, ProgressReporter};
use crate::rules::FilterRule;
use crate::storage::DocumentStorage;
use crate::sync::SyncEngine;
use crate::worker;

use super::classifier;
use super::status::{can_transition, JobStatus};

/// How a `run` call ended, for the immediate caller. The durable record
/// is always the job row itself.
#[derive(Debug)]
pub enum JobOutcome {
    Completed(Box<JobRow>),
    Failed { category: String, message: String },
    /// A job is already running for an overlapping scope; nothing was
    /// mutated.
    AlreadyRunning,
    Rejected(String),
    NotFound,
}

pub struct JobRunner {
    db: Database,
    config: RunConfig,
    storage: DocumentStorage,
    progress: Arc<dyn ProgressReporter>,
    cancel: Arc<AtomicBool>,
}

impl JobRunner {
    pub fn new(db: Database, config: RunConfig, storage: DocumentStorage) -> Self {
        Self {
            db,
            config,
            storage,
            progress: Arc::new(NoopProgress),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn log(&self, job_id: &str, level: &str, message: &str) {
        if let Err(e) = audit_repo::append_job_log(&self.db, job_id, level, message) {
            error!("Failed to append job log: {}", e);
        }
    }

    /// Runs a job to a terminal state and blocks until it gets there.
    pub fn run(&self, job_id: &str) -> JobOutcome {
        let job = match job_repo::find_by_id(&self.db, job_id) {
            Ok(Some(job)) => job,
            Ok(None) => return JobOutcome::NotFound,
            Err(e) => return JobOutcome::Rejected(e.to_string()),
        };

        let Some(status) = JobStatus::parse(&job.status) else {
            return JobOutcome::Rejected(format!("Unknown job status '{}'", job.status));
        };
        if status == JobStatus::Running {
            return JobOutcome::AlreadyRunning;
        }
        if let Err(reason) = can_transition(status, JobStatus::Running) {
            return JobOutcome::Rejected(reason);
        }

        // The logical scope lock lives in persisted job status, so jobs in
        // other processes are seen too.
        match job_repo::running_exists_for_scope(
            &self.db,
            &job.county,
            &job.job_type,
            &job.target_date,
            &job.end_date,
            &job.id,
        ) {
            Ok(true) => return JobOutcome::AlreadyRunning,
            Ok(false) => {}
            Err(e) => return JobOutcome::Rejected(e.to_string()),
        }

        self.execute(job)
    }

    fn execute(&self, mut job: JobRow) -> JobOutcome {
        job.status = JobStatus::Running.as_str().to_string();
        job.started_at = Some(Utc::now().to_rfc3339());
        if let Err(e) = job_repo::update(&self.db, &job) {
            return JobOutcome::Rejected(e.to_string());
        }
        info!(
            "Starting {} job {} for {} {} {}..{}",
            job.kind, job.id, job.county, job.job_type, job.target_date, job.end_date
        );

        let mut attempt = 0u32;
        loop {
            let result = if job.kind == "sync" {
                self.run_sync_pipeline(&mut job)
            } else {
                self.run_scrape_pipeline(&mut job)
            };

            match result {
                Ok(()) => {
                    job.status = JobStatus::Completed.as_str().to_string();
                    job.completed_at = Some(Utc::now().to_rfc3339());
                    job.error_message.clear();
                    if let Err(e) = job_repo::update(&self.db, &job) {
                        error!("Failed to persist completed job {}: {}", job.id, e);
                    }
                    self.log(
                        &job.id,
                        "info",
                        &format!(
                            "Completed: {} created, {} updated, {} qualified",
                            job.prospects_created, job.prospects_updated, job.prospects_qualified
                        ),
                    );
                    return JobOutcome::Completed(Box::new(job));
                }
                Err(e) => {
                    let (category, retryable) = classifier::classify(&e);
                    let message = e.to_string();
                    if let Err(db_err) = job_repo::record_error(
                        &self.db,
                        &job.id,
                        category.as_str(),
                        &message,
                        classifier::kind_of(&e),
                        retryable,
                        attempt,
                    ) {
                        error!("Failed to record job error: {}", db_err);
                    }
                    self.log(
                        &job.id,
                        "error",
                        &format!("Attempt {} failed ({}): {}", attempt + 1, category, message),
                    );

                    let next_attempt = attempt + 1;
                    if classifier::should_retry(next_attempt, &e) && !self.cancelled() {
                        let delay = classifier::backoff(attempt);
                        warn!(
                            "Job {} attempt {} failed, retrying in {}s: {}",
                            job.id,
                            attempt + 1,
                            delay.as_secs(),
                            message
                        );
                        std::thread::sleep(delay);
                        attempt = next_attempt;
                        continue;
                    }

                    job.status = JobStatus::Failed.as_str().to_string();
                    job.error_message = format!("{}: {}", category, message);
                    job.completed_at = Some(Utc::now().to_rfc3339());
                    if let Err(db_err) = job_repo::update(&self.db, &job) {
                        error!("Failed to persist failed job {}: {}", job.id, db_err);
                    }
                    return JobOutcome::Failed {
                        category: category.as_str().to_string(),
                        message,
                    };
                }
            }
        }
    }

    /// Harvest → normalize → evaluate → upsert for every date in scope.
    fn run_scrape_pipeline(&self, job: &mut JobRow) -> Result<(), TdscoutError> {
        let _span = info_span!("scrape_job", job_id = %job.id, county = %job.county).entered();

        let rules = rule_repo::load_active(&self.db)?;
        let base_url = urls::base_url_for_county(&self.config, &job.county);
        let start = parse_job_date(&job.target_date)?;
        let end = parse_job_date(&job.end_date)?;
        debug!("Using base URL: {}", base_url);

        let runtime = build_runtime()?;
        runtime.block_on(async {
            let session = BrowserSession::launch(self.config.headless).await?;
            let result = self
                .scrape_dates(&session, job, &base_url, start, end, &rules)
                .await;
            session.close().await;
            result
        })
    }

    async fn scrape_dates(
        &self,
        session: &BrowserSession,
        job: &mut JobRow,
        base_url: &str,
        start: NaiveDate,
        end: NaiveDate,
        rules: &[FilterRule],
    ) -> Result<(), TdscoutError> {
        let harvester = Harvester::new(session, base_url);

        let mut date = start;
        while date <= end {
            if self.cancelled() {
                self.log(&job.id, "warning", "Run cancelled, stopping before next date");
                break;
            }
            self.progress.report(ProgressEvent::Current(format!(
                "{} {} {}",
                job.county, job.job_type, date
            )));

            let outcome = harvester.harvest_date(date).await?;
            for warning in &outcome.warnings {
                job.warnings += 1;
                self.log(&job.id, "warning", warning);
            }

            let _persist_span = info_span!("persist_listings", %date).entered();
            for raw in &outcome.auctions {
                let Some(prospect) = normalize::normalize(
                    raw,
                    &job.county,
                    date,
                    &job.job_type,
                    &outcome.source_url,
                ) else {
                    debug!("Skipping listing {} without case number", raw.auction_id);
                    continue;
                };

                // One bad listing must not sink the date: log it and move on.
                match self.persist_and_evaluate(job, &prospect, rules) {
                    Ok(()) => {}
                    Err(e) => {
                        job.warnings += 1;
                        self.log(
                            &job.id,
                            "error",
                            &format!("Error saving prospect {}: {}", prospect.case_number, e),
                        );
                    }
                }
            }

            date = date + ChronoDuration::days(1);
        }
        Ok(())
    }

    fn persist_and_evaluate(
        &self,
        job: &mut JobRow,
        prospect: &prospect_repo::NewProspect,
        rules: &[FilterRule],
    ) -> Result<(), TdscoutError> {
        let outcome = prospect_repo::upsert(&self.db, prospect)?;
        if outcome.created {
            job.prospects_created += 1;
        } else {
            job.prospects_updated += 1;
        }

        let facts = normalize::facts_for(prospect);
        let verdict = crate::rules::evaluate_prospect(&facts, rules);
        prospect_repo::set_qualification(&self.db, outcome.id, verdict.qualified)?;
        if verdict.qualified {
            job.prospects_qualified += 1;
        } else {
            job.prospects_disqualified += 1;
            debug!(
                "Disqualified {}: {}",
                prospect.case_number,
                verdict.reasons.join("; ")
            );
        }
        Ok(())
    }

    /// Syncs documents for every prospect matching the job's scope, fanned
    /// out over the worker pool. Per-prospect failures are recorded, never
    /// fatal.
    fn run_sync_pipeline(&self, job: &mut JobRow) -> Result<(), TdscoutError> {
        let _span = info_span!("sync_job", job_id = %job.id).entered();

        let mut filter = ProspectFilter {
            qualification_status: Some("qualified".to_string()),
            case_numbers: self.config.case_numbers.clone(),
            state: self.config.state.clone(),
            prospect_type: self.config.prospect_type.clone(),
            counties: self.config.counties.clone(),
            auction_start_date: self.config.auction_start_date(),
            auction_end_date: self.config.auction_end_date(),
            with_pending_downloads: self.config.skip_completed,
        };
        if !job.county.is_empty() {
            filter.counties = vec![job.county.clone()];
        }

        let prospects = prospect_repo::query(&self.db, &filter)?;
        info!("Found {} qualified prospect(s) to sync", prospects.len());
        if prospects.is_empty() {
            return Ok(());
        }

        let engine = SyncEngine::new(
            self.db.clone(),
            self.storage.clone(),
            self.config.clone(),
        );
        let results = worker::sync_all(
            engine,
            prospects,
            self.config.max_workers,
            Arc::clone(&self.cancel),
        );

        for result in results {
            match result.outcome {
                Ok(outcome) => {
                    job.docs_scraped += outcome.docs_scraped;
                    job.docs_new += outcome.docs_new;
                    job.docs_downloaded += outcome.docs_downloaded;
                    job.download_errors += outcome.download_errors;
                }
                Err(message) => {
                    job.warnings += 1;
                    self.log(
                        &job.id,
                        "warning",
                        &format!("Sync failed for {}: {}", result.case_number, message),
                    );
                }
            }
        }
        Ok(())
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime, TdscoutError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TdscoutError::Worker(WorkerError::SpawnFailed(e.to_string())))
}

fn parse_job_date(raw: &str) -> Result<NaiveDate, TdscoutError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        TdscoutError::Config(ConfigError::Validation {
            message: format!("Invalid job date '{}'", raw),
        })
    })
}

/// What `prepare_job` decided to do with an existing or new job.
#[derive(Debug)]
pub struct PreparedJob {
    pub job: Option<JobRow>,
    pub action: &'static str,
    /// Set when the target should be skipped rather than run.
    pub skip_reason: Option<String>,
}

/// Reuses, resets, or creates the job for a scope, honoring the
/// skip-completed / retry-failed / dry-run knobs.
#[allow(clippy::too_many_arguments)]
pub fn prepare_job(
    db: &Database,
    name: &str,
    state: &str,
    county: &str,
    job_type: &str,
    target_date: NaiveDate,
    end_date: NaiveDate,
    skip_completed: bool,
    retry_failed: bool,
    dry_run: bool,
) -> Result<PreparedJob, TdscoutError> {
    if let Some(existing) = job_repo::find_for_scope(db, county, job_type, target_date, end_date)? {
        match existing.status.as_str() {
            "running" => {
                return Ok(PreparedJob {
                    job: Some(existing),
                    action: "existing-running",
                    skip_reason: Some("existing job is running".to_string()),
                })
            }
            "completed" if skip_completed => {
                return Ok(PreparedJob {
                    job: Some(existing),
                    action: "existing-completed",
                    skip_reason: Some("existing job already completed".to_string()),
                })
            }
            "failed" if !retry_failed => {
                return Ok(PreparedJob {
                    job: Some(existing),
                    action: "existing-failed",
                    skip_reason: Some(
                        "existing failed job and retry_failed=false".to_string(),
                    ),
                })
            }
            "failed" => {
                let job = if dry_run {
                    existing
                } else {
                    reset_for_retry(db, &existing)?
                };
                return Ok(PreparedJob {
                    job: Some(job),
                    action: "retry-failed",
                    skip_reason: None,
                });
            }
            "pending" => {
                return Ok(PreparedJob {
                    job: Some(existing),
                    action: "reuse-pending",
                    skip_reason: None,
                })
            }
            _ => {}
        }
    }

    if dry_run {
        return Ok(PreparedJob {
            job: None,
            action: "create",
            skip_reason: None,
        });
    }

    let job = JobRow::new_scrape(name, state, county, job_type, target_date, end_date);
    job_repo::insert(db, &job)?;
    Ok(PreparedJob {
        job: Some(job),
        action: "created",
        skip_reason: None,
    })
}

/// Resets a terminal job back to pending, clearing counters, error
/// message, and timestamps. Validated against the status machine.
pub fn reset_for_retry(db: &Database, job: &JobRow) -> Result<JobRow, TdscoutError> {
    let Some(status) = JobStatus::parse(&job.status) else {
        return Err(TdscoutError::Worker(WorkerError::JobFailed(format!(
            "Unknown job status '{}'",
            job.status
        ))));
    };
    can_transition(status, JobStatus::Pending)
        .map_err(|reason| TdscoutError::Worker(WorkerError::JobFailed(reason)))?;

    let mut reset = job.clone();
    reset.status = JobStatus::Pending.as_str().to_string();
    reset.error_message.clear();
    reset.prospects_created = 0;
    reset.prospects_updated = 0;
    reset.prospects_qualified = 0;
    reset.prospects_disqualified = 0;
    reset.docs_scraped = 0;
    reset.docs_new = 0;
    reset.docs_downloaded = 0;
    reset.download_errors = 0;
    reset.warnings = 0;
    reset.started_at = None;
    reset.completed_at = None;
    job_repo::update(db, &reset)?;
    Ok(reset)
}
