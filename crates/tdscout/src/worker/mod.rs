//! Concurrent sync execution.

pub mod pool;

pub use pool::{sync_all, SyncResult, SyncWorkerPool};
