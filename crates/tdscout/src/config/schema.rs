//! Run configuration schema.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_chunk_days() -> u32 {
    1
}

fn default_max_workers() -> usize {
    // Each worker owns a full browser session; cap the default well below
    // the core count.
    num_cpus::get().clamp(1, 4)
}

/// Options recognized by scrape and sync runs. Unknown or absent filters
/// default to "match all"; JSON-file values are overridden by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunConfig {
    /// State abbreviation filter, e.g. "FL".
    #[serde(default)]
    pub state: Option<String>,
    /// Prospect type filter, e.g. "TD", "TL", "SS", "MF".
    #[serde(default)]
    pub prospect_type: Option<String>,
    /// County names to include; empty means all.
    #[serde(default)]
    pub counties: Vec<String>,
    /// Explicit case numbers to sync; empty means all qualified prospects.
    #[serde(default)]
    pub case_numbers: Vec<String>,
    /// Include only prospects with auction_date >= this (YYYY-MM-DD).
    #[serde(default)]
    pub auction_start_date: Option<String>,
    /// Include only prospects with auction_date <= this (YYYY-MM-DD).
    #[serde(default)]
    pub auction_end_date: Option<String>,
    /// Skip prospects/jobs that are already complete.
    #[serde(default)]
    pub skip_completed: bool,
    /// Retry documents/jobs that previously failed.
    #[serde(default = "default_true")]
    pub retry_failed: bool,
    /// Report actions without writing to the database or disk.
    #[serde(default)]
    pub dry_run: bool,
    /// Run the browser headless.
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Revalidate previously downloaded files and re-queue corrupt ones.
    #[serde(default)]
    pub force_validate_downloaded: bool,
    /// County name → calendar base URL overrides.
    #[serde(default)]
    pub base_urls: BTreeMap<String, String>,
    /// Days per scrape-job date chunk.
    #[serde(default = "default_chunk_days")]
    pub chunk_days: u32,
    /// Concurrent sync workers (each owns a browser session).
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Root directory for downloaded documents.
    #[serde(default)]
    pub download_root: Option<PathBuf>,
    /// SQLite database path; defaults to ~/.tdscout/data/tdscout.db.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Markdown progress report path.
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            state: None,
            prospect_type: None,
            counties: Vec::new(),
            case_numbers: Vec::new(),
            auction_start_date: None,
            auction_end_date: None,
            skip_completed: false,
            retry_failed: true,
            dry_run: false,
            headless: true,
            force_validate_downloaded: false,
            base_urls: BTreeMap::new(),
            chunk_days: default_chunk_days(),
            max_workers: default_max_workers(),
            download_root: None,
            database_path: None,
            report_path: None,
        }
    }
}

impl RunConfig {
    /// Parsed auction start date. Malformed values are warned about and
    /// ignored rather than failing the run.
    pub fn auction_start_date(&self) -> Option<NaiveDate> {
        parse_date_filter(self.auction_start_date.as_deref(), "auction_start_date")
    }

    /// Parsed auction end date; same leniency as the start date.
    pub fn auction_end_date(&self) -> Option<NaiveDate> {
        parse_date_filter(self.auction_end_date.as_deref(), "auction_end_date")
    }
}

fn parse_date_filter(raw: Option<&str>, name: &str) -> Option<NaiveDate> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            log::warn!(
                "Invalid {} '{}' (expected YYYY-MM-DD), ignoring",
                name,
                raw
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: RunConfig = serde_json::from_str("{}").unwrap();
        assert!(config.retry_failed);
        assert!(config.headless);
        assert!(!config.dry_run);
        assert_eq!(config.chunk_days, 1);
        assert!(config.counties.is_empty());
    }

    #[test]
    fn test_default_matches_empty_json() {
        let from_json: RunConfig = serde_json::from_str("{}").unwrap();
        let constructed = RunConfig::default();
        assert_eq!(from_json.retry_failed, constructed.retry_failed);
        assert_eq!(from_json.headless, constructed.headless);
        assert_eq!(from_json.chunk_days, constructed.chunk_days);
        assert_eq!(from_json.max_workers, constructed.max_workers);
    }

    #[test]
    fn test_date_filters() {
        let config: RunConfig = serde_json::from_str(
            r#"{"auction_start_date": "2026-01-01", "auction_end_date": "garbage"}"#,
        )
        .unwrap();
        assert_eq!(
            config.auction_start_date(),
            NaiveDate::from_ymd_opt(2026, 1, 1)
        );
        // Malformed dates are ignored, not fatal.
        assert_eq!(config.auction_end_date(), None);
    }
}
