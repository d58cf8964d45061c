//! Run configuration: JSON file + CLI overrides, defaults when absent.

pub mod loader;
pub mod schema;

pub use loader::{load_config, load_config_from_str, load_or_default};
pub use schema::RunConfig;
