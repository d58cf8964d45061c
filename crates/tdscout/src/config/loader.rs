use std::path::Path;

use crate::error::ConfigError;

use super::schema::RunConfig;

/// Loads a config file. Errors on unreadable or malformed content.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RunConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    load_config_from_str(&content)
}

/// Parses config JSON and validates it.
pub fn load_config_from_str(content: &str) -> Result<RunConfig, ConfigError> {
    let config: RunConfig = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Loads a config file if it exists; a missing file yields defaults so runs
/// work without any configuration on disk.
pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<RunConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        log::debug!("Config file {} not found, using defaults", path.display());
        return Ok(RunConfig::default());
    }
    load_config(path)
}

fn validate_config(config: &RunConfig) -> Result<(), ConfigError> {
    if config.chunk_days < 1 {
        return Err(ConfigError::Validation {
            message: "chunk_days must be >= 1".to_string(),
        });
    }
    if config.max_workers < 1 {
        return Err(ConfigError::Validation {
            message: "max_workers must be >= 1".to_string(),
        });
    }
    if let (Some(start), Some(end)) = (config.auction_start_date(), config.auction_end_date()) {
        if end < start {
            return Err(ConfigError::Validation {
                message: "auction_end_date must be on or after auction_start_date".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(dir.path().join("absent.json")).unwrap();
        assert!(config.retry_failed);
        assert!(config.counties.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync_config.json");
        std::fs::write(
            &path,
            r#"{
                "state": "FL",
                "prospect_type": "TD",
                "counties": ["Miami-Dade", "Broward"],
                "skip_completed": true,
                "headless": false
            }"#,
        )
        .unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.state.as_deref(), Some("FL"));
        assert_eq!(config.counties.len(), 2);
        assert!(config.skip_completed);
        assert!(!config.headless);
        // Untouched options keep their defaults.
        assert!(config.retry_failed);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(load_config_from_str("{not json").is_err());
    }

    #[test]
    fn test_inverted_date_range_rejected() {
        let result = load_config_from_str(
            r#"{"auction_start_date": "2026-06-01", "auction_end_date": "2026-01-01"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_chunk_days_rejected() {
        assert!(load_config_from_str(r#"{"chunk_days": 0}"#).is_err());
    }
}
