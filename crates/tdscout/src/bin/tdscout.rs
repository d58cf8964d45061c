use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use clap::{Parser, Subcommand};

use tdscout::db::job_repo::{self, JobRow};
use tdscout::jobs::{self, JobOutcome, JobRunner};
use tdscout::progress::{
    MarkdownProgress, NoopProgress, ProgressEvent, ProgressReporter, ReportRow, RunHeader,
    RunStats,
};
use tdscout::{Database, DocumentStorage, RunConfig};

#[derive(Parser)]
#[command(name = "tdscout")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "County auction scraper with rule-based qualification and TDM document sync")]
struct Cli {
    /// Path to the JSON config file.
    #[arg(short, long, global = true, default_value = "tdscout_config.json")]
    config: PathBuf,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape auction calendars and qualify prospects
    Scrape(ScrapeArgs),
    /// Sync TDM documents for qualified prospects
    Sync(SyncArgs),
    /// Show a job's status and counters
    Status(StatusArgs),
}

#[derive(clap::Args)]
struct ScrapeArgs {
    /// State abbreviation, e.g. FL
    #[arg(long)]
    state: Option<String>,
    /// Prospect type: TD, TL, SS, MF
    #[arg(long = "doc-type")]
    doc_type: Option<String>,
    /// Comma-separated county names
    #[arg(long, value_delimiter = ',')]
    counties: Vec<String>,
    /// First auction date to scrape (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    start_date: Option<NaiveDate>,
    /// Last auction date to scrape (YYYY-MM-DD, default today)
    #[arg(long, value_parser = parse_date)]
    end_date: Option<NaiveDate>,
    /// Days per job chunk
    #[arg(long)]
    chunk_days: Option<u32>,
    #[arg(long)]
    skip_completed: bool,
    /// Do not retry previously failed jobs
    #[arg(long)]
    no_retry_failed: bool,
    #[arg(long)]
    dry_run: bool,
    /// Run the browser with a visible window
    #[arg(long)]
    headed: bool,
    /// Markdown progress report path
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(clap::Args)]
struct SyncArgs {
    #[arg(long)]
    state: Option<String>,
    #[arg(long = "prospect-type")]
    prospect_type: Option<String>,
    #[arg(long, value_delimiter = ',')]
    counties: Vec<String>,
    /// Comma-separated case numbers to sync
    #[arg(long, value_delimiter = ',')]
    case_numbers: Vec<String>,
    #[arg(long, value_parser = parse_date)]
    auction_start_date: Option<NaiveDate>,
    #[arg(long, value_parser = parse_date)]
    auction_end_date: Option<NaiveDate>,
    /// Skip prospects with no pending auto-downloads
    #[arg(long)]
    skip_completed: bool,
    /// Do not retry documents that previously failed to download
    #[arg(long)]
    no_retry_failed: bool,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    headed: bool,
    /// Revalidate previously downloaded files
    #[arg(long)]
    force_validate_downloaded: bool,
}

#[derive(clap::Args)]
struct StatusArgs {
    /// Job id to inspect
    #[arg(long)]
    job: String,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{}' (expected YYYY-MM-DD)", raw))
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_database(config: &RunConfig) -> Database {
    let path = config
        .database_path
        .clone()
        .or_else(tdscout::db::default_database_path)
        .unwrap_or_else(|| PathBuf::from("tdscout.db"));
    match Database::open(&path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Could not open database {}: {}", path.display(), e);
            process::exit(2);
        }
    }
}

fn storage_for(config: &RunConfig) -> DocumentStorage {
    let root = config
        .download_root
        .clone()
        .unwrap_or_else(|| PathBuf::from("media"));
    DocumentStorage::new(root)
}

fn cancel_flag() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    let result = ctrlc::set_handler(move || {
        eprintln!("Interrupt received; finishing the current item...");
        handler_flag.store(true, Ordering::Relaxed);
    });
    if result.is_err() {
        log::warn!("Could not install the Ctrl-C handler");
    }
    cancel
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match tdscout::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {}", e);
            process::exit(2);
        }
    };

    match cli.command {
        Commands::Scrape(args) => run_scrape(&mut config, args),
        Commands::Sync(args) => run_sync(&mut config, args),
        Commands::Status(args) => show_status(&config, args),
    }
}

/// A single county/date-range scrape target.
struct Target {
    county: String,
    start: NaiveDate,
    end: NaiveDate,
}

fn build_targets(counties: &[String], start: NaiveDate, end: NaiveDate, chunk_days: u32) -> Vec<Target> {
    let mut targets = Vec::new();
    for county in counties {
        let mut current = start;
        while current <= end {
            let chunk_end = std::cmp::min(current + ChronoDuration::days(chunk_days as i64 - 1), end);
            targets.push(Target {
                county: county.clone(),
                start: current,
                end: chunk_end,
            });
            current = chunk_end + ChronoDuration::days(1);
        }
    }
    targets
}

fn run_scrape(config: &mut RunConfig, args: ScrapeArgs) {
    // CLI overrides win over the config file.
    if let Some(state) = args.state {
        config.state = Some(state);
    }
    if let Some(doc_type) = args.doc_type {
        config.prospect_type = Some(doc_type);
    }
    if !args.counties.is_empty() {
        config.counties = args.counties;
    }
    if let Some(chunk_days) = args.chunk_days {
        config.chunk_days = chunk_days.max(1);
    }
    if args.skip_completed {
        config.skip_completed = true;
    }
    if args.no_retry_failed {
        config.retry_failed = false;
    }
    if args.dry_run {
        config.dry_run = true;
    }
    if args.headed {
        config.headless = false;
    }

    let state = match &config.state {
        Some(state) => state.to_uppercase(),
        None => {
            eprintln!("A state is required (--state FL)");
            process::exit(2);
        }
    };
    let job_type = config
        .prospect_type
        .clone()
        .unwrap_or_else(|| "TD".to_string())
        .to_uppercase();
    if config.counties.is_empty() {
        eprintln!("At least one county is required (--counties \"Miami-Dade\")");
        process::exit(2);
    }
    let Some(start) = args.start_date.or_else(|| config.auction_start_date()) else {
        eprintln!("A start date is required (--start-date 2026-06-01)");
        process::exit(2);
    };
    let end = args
        .end_date
        .or_else(|| config.auction_end_date())
        .unwrap_or_else(|| Utc::now().date_naive());
    if end < start {
        eprintln!("end date must be on or after start date");
        process::exit(2);
    }

    let db = open_database(config);
    let storage = storage_for(config);
    let cancel = cancel_flag();

    let progress: Arc<dyn ProgressReporter> = match args.report.or_else(|| config.report_path.clone()) {
        Some(path) => Arc::new(MarkdownProgress::new(path)),
        None => Arc::new(NoopProgress),
    };

    let targets = build_targets(&config.counties, start, end, config.chunk_days);
    progress.report(ProgressEvent::RunStarted(RunHeader {
        state: state.clone(),
        job_type: job_type.clone(),
        range_start: start.format("%Y-%m-%d").to_string(),
        range_end: end.format("%Y-%m-%d").to_string(),
        chunk_days: config.chunk_days,
        dry_run: config.dry_run,
        total_targets: targets.len(),
    }));

    if targets.is_empty() {
        progress.report(ProgressEvent::Event("No matching targets found".to_string()));
        progress.report(ProgressEvent::RunFinished);
        println!("No targets to process.");
        return;
    }

    println!(
        "Starting scrape: {} target(s), {}, {}, {}..{}, chunk={}",
        targets.len(),
        state,
        job_type,
        start,
        end,
        config.chunk_days
    );

    let group_name = format!("scrape_{}_{}", job_type, Utc::now().format("%Y%m%d_%H%M%S"));
    let runner = JobRunner::new(db.clone(), config.clone(), storage)
        .with_progress(Arc::clone(&progress))
        .with_cancel_flag(Arc::clone(&cancel));

    let mut stats = RunStats::default();
    let total = targets.len();

    for (index, target) in targets.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            progress.report(ProgressEvent::Event("Run cancelled".to_string()));
            break;
        }

        let label = format!(
            "{} ({}) {}..{}",
            target.county, state, target.start, target.end
        );
        progress.report(ProgressEvent::Current(format!(
            "[{}/{}] {}",
            index + 1,
            total,
            label
        )));
        progress.report(ProgressEvent::Event(format!("Processing {}", label)));

        let job_name = format!(
            "{} | {} | {}..{}",
            group_name, target.county, target.start, target.end
        );
        let prepared = match jobs::prepare_job(
            &db,
            &job_name,
            &state,
            &target.county,
            &job_type,
            target.start,
            target.end,
            config.skip_completed,
            config.retry_failed,
            config.dry_run,
        ) {
            Ok(prepared) => prepared,
            Err(e) => {
                stats.failed += 1;
                progress.report(ProgressEvent::Event(format!("Failed {}: {}", label, e)));
                progress.report(ProgressEvent::Stats(stats));
                continue;
            }
        };

        let mut row = ReportRow {
            county: target.county.clone(),
            state: state.clone(),
            date_start: target.start.format("%Y-%m-%d").to_string(),
            date_end: target.end.format("%Y-%m-%d").to_string(),
            job_id: prepared
                .job
                .as_ref()
                .map(|j| j.id.clone())
                .unwrap_or_default(),
            action: prepared.action.to_string(),
            status: "pending".to_string(),
            ..Default::default()
        };

        if let Some(reason) = prepared.skip_reason {
            row.status = "skipped".to_string();
            row.error = reason.clone();
            stats.skipped += 1;
            progress.report(ProgressEvent::Row(row));
            progress.report(ProgressEvent::Event(format!("Skipped {}: {}", label, reason)));
            progress.report(ProgressEvent::Stats(stats));
            continue;
        }

        if config.dry_run {
            row.status = "dry-run".to_string();
            progress.report(ProgressEvent::Row(row));
            progress.report(ProgressEvent::Event(format!("Dry run only: {}", label)));
            continue;
        }

        let Some(job) = prepared.job else {
            continue;
        };
        stats.started += 1;
        row.status = "running".to_string();
        row.started_at = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        progress.report(ProgressEvent::Row(row.clone()));

        let outcome = runner.run(&job.id);
        let finished = job_repo::find_by_id(&db, &job.id).ok().flatten();
        if let Some(ref done) = finished {
            row.status = done.status.clone();
            row.created = done.prospects_created;
            row.updated = done.prospects_updated;
            row.qualified = done.prospects_qualified;
            row.disqualified = done.prospects_disqualified;
            row.error = done.error_message.clone();
            stats.created += done.prospects_created;
            stats.updated += done.prospects_updated;
            stats.qualified += done.prospects_qualified;
            stats.disqualified += done.prospects_disqualified;
        }
        row.ended_at = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

        match outcome {
            JobOutcome::Completed(_) => {
                stats.completed += 1;
                progress.report(ProgressEvent::Event(format!("Finished {}: completed", label)));
            }
            JobOutcome::Failed { category, message } => {
                stats.failed += 1;
                progress.report(ProgressEvent::Event(format!(
                    "Failed {} ({}): {}",
                    label, category, message
                )));
            }
            JobOutcome::AlreadyRunning => {
                stats.skipped += 1;
                row.status = "skipped".to_string();
                row.error = "job already running for this scope".to_string();
                progress.report(ProgressEvent::Event(format!(
                    "Skipped {}: already running",
                    label
                )));
            }
            JobOutcome::Rejected(reason) => {
                stats.failed += 1;
                row.error = reason.clone();
                progress.report(ProgressEvent::Event(format!("Failed {}: {}", label, reason)));
            }
            JobOutcome::NotFound => {
                stats.failed += 1;
                row.error = "job disappeared".to_string();
                progress.report(ProgressEvent::Event(format!(
                    "Failed {}: job disappeared",
                    label
                )));
            }
        }

        progress.report(ProgressEvent::Row(row));
        progress.report(ProgressEvent::Stats(stats));
    }

    progress.report(ProgressEvent::RunFinished);
    println!(
        "Done. started={} completed={} failed={} skipped={} created={} updated={}",
        stats.started, stats.completed, stats.failed, stats.skipped, stats.created, stats.updated
    );
}

fn run_sync(config: &mut RunConfig, args: SyncArgs) {
    if let Some(state) = args.state {
        config.state = Some(state.to_uppercase());
    }
    if let Some(prospect_type) = args.prospect_type {
        config.prospect_type = Some(prospect_type.to_uppercase());
    }
    if !args.counties.is_empty() {
        config.counties = args.counties;
    }
    if !args.case_numbers.is_empty() {
        config.case_numbers = args.case_numbers;
    }
    if let Some(date) = args.auction_start_date {
        config.auction_start_date = Some(date.format("%Y-%m-%d").to_string());
    }
    if let Some(date) = args.auction_end_date {
        config.auction_end_date = Some(date.format("%Y-%m-%d").to_string());
    }
    if args.skip_completed {
        config.skip_completed = true;
    }
    if args.no_retry_failed {
        config.retry_failed = false;
    }
    if args.dry_run {
        config.dry_run = true;
    }
    if args.headed {
        config.headless = false;
    }
    if args.force_validate_downloaded {
        config.force_validate_downloaded = true;
    }

    if config.dry_run {
        println!("=== DRY RUN MODE: no database writes or file saves ===");
    }
    let mut filters = Vec::new();
    if let Some(ref state) = config.state {
        filters.push(format!("state={}", state));
    }
    if let Some(ref prospect_type) = config.prospect_type {
        filters.push(format!("type={}", prospect_type));
    }
    if !config.counties.is_empty() {
        filters.push(format!("counties={}", config.counties.join(",")));
    }
    if !config.case_numbers.is_empty() {
        filters.push(format!("case_numbers={}", config.case_numbers.join(",")));
    }
    if config.skip_completed {
        filters.push("skip_completed=true".to_string());
    }
    if !config.retry_failed {
        filters.push("retry_failed=false".to_string());
    }
    if !filters.is_empty() {
        println!("Active filters: {}", filters.join(", "));
    }

    let db = open_database(config);
    let storage = storage_for(config);
    let cancel = cancel_flag();

    // The sync pass runs as a job of its own so it holds the scope lock and
    // leaves an auditable record.
    let today = Utc::now().date_naive();
    let start = config.auction_start_date().unwrap_or(today);
    let end = config.auction_end_date().unwrap_or(today);
    let county_scope = if config.counties.len() == 1 {
        config.counties[0].clone()
    } else {
        String::new()
    };
    let mut job = JobRow::new_scrape(
        &format!("tdm_sync_{}", Utc::now().format("%Y%m%d_%H%M%S")),
        config.state.as_deref().unwrap_or(""),
        &county_scope,
        config.prospect_type.as_deref().unwrap_or(""),
        start,
        end,
    );
    job.kind = "sync".to_string();
    if let Err(e) = job_repo::insert(&db, &job) {
        eprintln!("Could not create the sync job: {}", e);
        process::exit(2);
    }

    let runner = JobRunner::new(db.clone(), config.clone(), storage)
        .with_cancel_flag(Arc::clone(&cancel));

    match runner.run(&job.id) {
        JobOutcome::Completed(done) => {
            println!(
                "Sync complete. scraped={} new={} downloaded={} errors={}",
                done.docs_scraped, done.docs_new, done.docs_downloaded, done.download_errors
            );
        }
        JobOutcome::Failed { category, message } => {
            eprintln!("Sync failed ({}): {}", category, message);
            process::exit(1);
        }
        JobOutcome::AlreadyRunning => {
            eprintln!("A sync is already running for this scope.");
            process::exit(1);
        }
        JobOutcome::Rejected(reason) => {
            eprintln!("Sync rejected: {}", reason);
            process::exit(1);
        }
        JobOutcome::NotFound => {
            eprintln!("Sync job disappeared before it could run.");
            process::exit(1);
        }
    }
}

fn show_status(config: &RunConfig, args: StatusArgs) {
    let db = open_database(config);
    match job_repo::find_by_id(&db, &args.job) {
        Ok(Some(job)) => {
            println!("Job {}", job.id);
            println!("  name:      {}", job.name);
            println!("  kind:      {}", job.kind);
            println!(
                "  scope:     {} {} {}..{}",
                job.county, job.job_type, job.target_date, job.end_date
            );
            println!("  status:    {}", job.status);
            if job.kind == "sync" {
                println!(
                    "  counters:  scraped={} new={} downloaded={} errors={}",
                    job.docs_scraped, job.docs_new, job.docs_downloaded, job.download_errors
                );
            } else {
                println!(
                    "  counters:  created={} updated={} qualified={} disqualified={}",
                    job.prospects_created,
                    job.prospects_updated,
                    job.prospects_qualified,
                    job.prospects_disqualified
                );
            }
            println!("  warnings:  {}", job.warnings);
            if !job.error_message.is_empty() {
                println!("  error:     {}", job.error_message);
            }
            if let Ok(Some(last)) = job_repo::last_error(&db, &job.id) {
                println!(
                    "  last attempt error: [{}] {} (attempt {}, retryable={})",
                    last.category, last.message, last.retry_attempt + 1, last.is_retryable
                );
            }
        }
        Ok(None) => {
            eprintln!("Job not found: {}", args.job);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Could not read job: {}", e);
            process::exit(2);
        }
    }
}
