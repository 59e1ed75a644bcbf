//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (VERSYNC_*)
//! 2. TOML config file (if VERSYNC_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Which backend holds version counters and cached payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// SQLite file shared by every process pointing at `store_path`.
    #[default]
    Sqlite,
    /// Process-local store; nothing survives a restart.
    Memory,
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (VERSYNC_*)
/// 2. TOML config file (if VERSYNC_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend for the shared remote store.
    ///
    /// Set via VERSYNC_STORE_BACKEND environment variable.
    #[serde(default)]
    pub store_backend: StoreBackend,

    /// Path to the SQLite remote store (versions and cached payloads).
    ///
    /// Set via VERSYNC_STORE_PATH environment variable.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Path to the SQLite database of record.
    ///
    /// Set via VERSYNC_CATALOG_PATH environment variable.
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    /// Path to the client-side persistent cache.
    ///
    /// Set via VERSYNC_CLIENT_CACHE_PATH environment variable.
    #[serde(default = "default_client_cache_path")]
    pub client_cache_path: PathBuf,

    /// Upper bound for a single remote store operation in milliseconds.
    ///
    /// Set via VERSYNC_STORE_TIMEOUT_MS environment variable.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Page size for paginated search resources.
    ///
    /// Set via VERSYNC_SEARCH_PAGE_SIZE environment variable.
    #[serde(default = "default_search_page_size")]
    pub search_page_size: u32,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./versync-store.sqlite")
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("./versync-catalog.sqlite")
}

fn default_client_cache_path() -> PathBuf {
    PathBuf::from("./versync-client.sqlite")
}

fn default_store_timeout_ms() -> u64 {
    1_500
}

fn default_search_page_size() -> u32 {
    9
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::default(),
            store_path: default_store_path(),
            catalog_path: default_catalog_path(),
            client_cache_path: default_client_cache_path(),
            store_timeout_ms: default_store_timeout_ms(),
            search_page_size: default_search_page_size(),
        }
    }
}

impl AppConfig {
    /// Store timeout as Duration for use with tokio.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `VERSYNC_`
    /// 2. TOML file from `VERSYNC_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("VERSYNC_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("VERSYNC_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.store_backend, StoreBackend::Sqlite);
        assert_eq!(config.store_path, PathBuf::from("./versync-store.sqlite"));
        assert_eq!(config.catalog_path, PathBuf::from("./versync-catalog.sqlite"));
        assert_eq!(config.client_cache_path, PathBuf::from("./versync-client.sqlite"));
        assert_eq!(config.store_timeout_ms, 1_500);
        assert_eq!(config.search_page_size, 9);
    }

    #[test]
    fn test_store_timeout_duration() {
        let config = AppConfig::default();
        assert_eq!(config.store_timeout(), Duration::from_millis(1_500));
    }

    #[test]
    fn test_backend_from_toml() {
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string("store_backend = \"memory\"\nstore_timeout_ms = 250"))
            .extract()
            .unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.store_timeout_ms, 250);
        assert_eq!(config.search_page_size, 9);
    }
}
