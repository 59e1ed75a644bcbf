//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::{AppConfig, StoreBackend};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `store_timeout_ms` is less than 10ms or exceeds 60 seconds
    /// - `search_page_size` is 0 or exceeds 100
    /// - a path required by the selected backend is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_timeout_ms < 10 {
            return Err(ConfigError::Invalid {
                field: "store_timeout_ms".into(),
                reason: "must be at least 10ms".into(),
            });
        }
        if self.store_timeout_ms > 60_000 {
            return Err(ConfigError::Invalid {
                field: "store_timeout_ms".into(),
                reason: "must not exceed 60 seconds (60000ms)".into(),
            });
        }

        if self.search_page_size == 0 || self.search_page_size > 100 {
            return Err(ConfigError::Invalid {
                field: "search_page_size".into(),
                reason: "must be between 1 and 100".into(),
            });
        }

        if self.store_backend == StoreBackend::Sqlite && self.store_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid { field: "store_path".into(), reason: "must not be empty".into() });
        }
        if self.catalog_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid { field: "catalog_path".into(), reason: "must not be empty".into() });
        }
        if self.client_cache_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "client_cache_path".into(),
                reason: "must not be empty".into(),
            });
        }

        if self.store_backend == StoreBackend::Memory {
            tracing::warn!(
                store_backend = "memory",
                "Remote store is process-local; versions reset on restart and are not shared"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_timeout_too_small() {
        let config = AppConfig { store_timeout_ms: 5, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "store_timeout_ms"));
    }

    #[test]
    fn test_validate_timeout_exceeds_limit() {
        let config = AppConfig { store_timeout_ms: 60_001, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "store_timeout_ms"));
    }

    #[test]
    fn test_validate_page_size_bounds() {
        let zero = AppConfig { search_page_size: 0, ..Default::default() };
        assert!(matches!(zero.validate(), Err(ConfigError::Invalid { field, .. }) if field == "search_page_size"));

        let large = AppConfig { search_page_size: 101, ..Default::default() };
        assert!(matches!(large.validate(), Err(ConfigError::Invalid { field, .. }) if field == "search_page_size"));
    }

    #[test]
    fn test_validate_empty_store_path() {
        let config = AppConfig { store_path: PathBuf::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "store_path"));
    }

    #[test]
    fn test_memory_backend_ignores_store_path() {
        let config = AppConfig { store_backend: StoreBackend::Memory, store_path: PathBuf::new(), ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_edge_case_values() {
        let config = AppConfig { store_timeout_ms: 10, search_page_size: 1, ..Default::default() };
        assert!(config.validate().is_ok());

        let config = AppConfig { store_timeout_ms: 60_000, search_page_size: 100, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
