pub mod config;
pub mod db;
pub mod error;
pub mod harvest;
pub mod jobs;
pub mod progress;
pub mod rules;
pub mod storage;
pub mod sync;
pub mod worker;

pub use config::{load_config, load_or_default, RunConfig};
pub use db::Database;
pub use error::{
    ConfigError, HarvestError, Result, StorageError, SyncError, TdscoutError, WorkerError,
};
pub use jobs::{JobOutcome, JobRunner, JobStatus};
pub use progress::{MarkdownProgress, NoopProgress, ProgressReporter};
pub use rules::{evaluate_prospect, FilterRule, ProspectFacts, Verdict};
pub use storage::DocumentStorage;
pub use sync::{SyncEngine, SyncOutcome, SyncStatusMap};
