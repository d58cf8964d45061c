use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TdscoutError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Harvest error: {0}")]
    Harvest(#[from] HarvestError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Failed to launch browser: {0}")]
    BrowserLaunch(String),

    #[error("Navigation to '{url}' failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Timed out after {timeout_secs}s waiting for '{selector}'")]
    SelectorTimeout { selector: String, timeout_secs: u64 },

    #[error("Browser command failed: {0}")]
    Browser(String),

    #[error("Failed to parse page content: {0}")]
    ParsePage(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Portal navigation failed for case '{case_number}': {reason}")]
    PortalNavigation { case_number: String, reason: String },

    #[error("No results found for case '{0}'")]
    CaseNotFound(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Harvest error: {0}")]
    Harvest(#[from] HarvestError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Job failed: {0}")]
    JobFailed(String),
}

pub type Result<T> = std::result::Result<T, TdscoutError>;
