//! Error classification and retry policy.
//!
//! A pure, stateless lookup: an error's kind name is matched first, then
//! its message, against ordered keyword tables. Consumed by the job runner
//! and independently testable.

use std::time::Duration;

use crate::db::DatabaseError;
use crate::error::{HarvestError, SyncError, TdscoutError};

/// Error taxonomy for job failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Parsing,
    DataValidation,
    System,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "Network",
            ErrorCategory::Parsing => "Parsing",
            ErrorCategory::DataValidation => "DataValidation",
            ErrorCategory::System => "System",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered keyword tables. The first matching pattern decides the
/// category; earlier tables take precedence.
const CATEGORY_PATTERNS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Network,
        &[
            "connection",
            "timeout",
            "timed out",
            "dns",
            "http",
            "request",
            "navigation",
            "socket",
            "unreachable",
        ],
    ),
    (
        ErrorCategory::Parsing,
        &["parse", "selector", "decode", "markup", "unexpected token"],
    ),
    (
        ErrorCategory::DataValidation,
        &[
            "validation",
            "unique",
            "constraint",
            "integrity",
            "not null",
            "invalid value",
        ],
    ),
];

/// Keywords that are never retryable regardless of category.
const NON_RETRYABLE_PATTERNS: &[&str] = &["validation", "integrity", "constraint", "permission"];

/// Retry configuration: max attempts and the exponential backoff schedule.
pub const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_SECONDS: &[u64] = &[5, 25, 125];

fn match_category(haystack: &str) -> Option<ErrorCategory> {
    let lowered = haystack.to_lowercase();
    for (category, patterns) in CATEGORY_PATTERNS {
        if patterns.iter().any(|p| lowered.contains(p)) {
            return Some(*category);
        }
    }
    None
}

/// Classifies by kind name first, then by message. Unmatched errors are
/// System errors.
pub fn classify_parts(kind: &str, message: &str) -> ErrorCategory {
    match_category(kind)
        .or_else(|| match_category(message))
        .unwrap_or(ErrorCategory::System)
}

/// A stable kind name for an error, playing the role an exception class
/// name plays elsewhere.
pub fn kind_of(err: &TdscoutError) -> &'static str {
    match err {
        TdscoutError::Config(_) => "ConfigError",
        TdscoutError::Harvest(HarvestError::BrowserLaunch(_)) => "BrowserLaunchError",
        TdscoutError::Harvest(HarvestError::Navigation { .. }) => "NavigationError",
        TdscoutError::Harvest(HarvestError::SelectorTimeout { .. }) => "SelectorTimeoutError",
        TdscoutError::Harvest(HarvestError::Browser(_)) => "BrowserCommandError",
        TdscoutError::Harvest(HarvestError::ParsePage(_)) => "ParseError",
        TdscoutError::Sync(SyncError::PortalNavigation { .. }) => "NavigationError",
        TdscoutError::Sync(SyncError::CaseNotFound(_)) => "CaseNotFoundError",
        TdscoutError::Sync(SyncError::Download(_)) => "DownloadError",
        TdscoutError::Sync(SyncError::Harvest(_)) => "NavigationError",
        TdscoutError::Sync(SyncError::Storage(_)) => "StorageError",
        TdscoutError::Sync(SyncError::Database(e)) | TdscoutError::Database(e) => match e {
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(code, _))
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                "IntegrityError"
            }
            _ => "DatabaseError",
        },
        TdscoutError::Storage(_) => "StorageError",
        TdscoutError::Worker(_) => "WorkerError",
    }
}

/// Classifies an error into a category plus a retryable flag.
pub fn classify(err: &TdscoutError) -> (ErrorCategory, bool) {
    let kind = kind_of(err);
    let message = err.to_string();
    let category = classify_parts(kind, &message);
    (category, is_retryable(kind, &message, category))
}

fn is_retryable(kind: &str, message: &str, category: ErrorCategory) -> bool {
    let lowered_kind = kind.to_lowercase();
    let lowered_msg = message.to_lowercase();
    if NON_RETRYABLE_PATTERNS
        .iter()
        .any(|p| lowered_kind.contains(p) || lowered_msg.contains(p))
    {
        return false;
    }
    matches!(category, ErrorCategory::Network | ErrorCategory::Parsing)
}

/// True when the attempt count and error category allow another try.
pub fn should_retry(attempt: u32, err: &TdscoutError) -> bool {
    if attempt >= MAX_ATTEMPTS {
        return false;
    }
    classify(err).1
}

/// Delay before the given retry attempt (0-indexed). Clamped to the last
/// entry beyond the configured schedule.
pub fn backoff(attempt: u32) -> Duration {
    let idx = (attempt as usize).min(BACKOFF_SECONDS.len() - 1);
    Duration::from_secs(BACKOFF_SECONDS[idx])
}
