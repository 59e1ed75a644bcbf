//! Shared remote store holding version counters and cached payloads.
//!
//! The store is the one piece of state every request handler shares. It is
//! reached through [`StoreHandle`], which bounds each operation with the
//! configured timeout so a degraded backend turns into an error quickly
//! instead of stalling the read path.
//!
//! Backends:
//!
//! - [`SqliteStore`]: file-backed, WAL mode, safe to share across processes
//! - [`MemoryStore`]: process-local, used for tests and single-node setups

pub mod memory;
pub mod sqlite;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::Error;
use crate::config::{AppConfig, StoreBackend};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage operations the sync layer needs from a remote key-value store.
///
/// Counter operations must be atomic per key. Payload operations only need
/// last-write-wins semantics.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Get a payload. Expired entries are reported as absent.
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Store a payload that expires after `ttl`.
    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<(), Error>;

    /// Delete a payload. Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, Error>;

    /// Read a counter without creating it.
    async fn get_counter(&self, key: &str) -> Result<Option<u64>, Error>;

    /// Create a counter at `initial` if absent, returning whatever value the
    /// counter holds afterwards.
    async fn init_counter(&self, key: &str, initial: u64) -> Result<u64, Error>;

    /// Atomically add one to a counter and return the new value.
    ///
    /// An absent counter is treated as holding [`crate::registry::INITIAL_VERSION`],
    /// so the first increment yields `INITIAL_VERSION + 1`.
    async fn incr(&self, key: &str) -> Result<u64, Error>;

    /// Delete expired payloads. Returns the number removed.
    async fn purge_expired(&self) -> Result<u64, Error>;

    /// Cheap round-trip proving the backend answers.
    async fn health_check(&self) -> Result<(), Error>;

    /// Release the backend. Later calls may fail.
    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}

/// Cloneable handle to the configured store with a per-operation timeout.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn RemoteStore>,
    timeout: Duration,
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("backend", &self.store.backend_name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl StoreHandle {
    pub fn new(store: Arc<dyn RemoteStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Open the backend selected by the configuration.
    pub async fn open(config: &AppConfig) -> Result<Self, Error> {
        let store: Arc<dyn RemoteStore> = match config.store_backend {
            StoreBackend::Sqlite => Arc::new(SqliteStore::open(&config.store_path).await?),
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };

        tracing::info!(
            backend = store.backend_name(),
            timeout_ms = config.store_timeout_ms,
            "remote store connected"
        );

        Ok(Self::new(store, config.store_timeout()))
    }

    /// Handle over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Duration::from_millis(1_500))
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(&self, op: impl Future<Output = Result<T, Error>>) -> Result<T, Error> {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(Error::StoreTimeout(self.timeout)),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.bounded(self.store.get(key)).await
    }

    pub async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<(), Error> {
        self.bounded(self.store.set(key, payload, ttl)).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, Error> {
        self.bounded(self.store.delete(key)).await
    }

    pub async fn get_counter(&self, key: &str) -> Result<Option<u64>, Error> {
        self.bounded(self.store.get_counter(key)).await
    }

    pub async fn init_counter(&self, key: &str, initial: u64) -> Result<u64, Error> {
        self.bounded(self.store.init_counter(key, initial)).await
    }

    pub async fn incr(&self, key: &str) -> Result<u64, Error> {
        self.bounded(self.store.incr(key)).await
    }

    pub async fn purge_expired(&self) -> Result<u64, Error> {
        self.bounded(self.store.purge_expired()).await
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        self.bounded(self.store.health_check()).await
    }

    pub async fn close(&self) -> Result<(), Error> {
        let result = self.store.close().await;
        tracing::info!(backend = self.store.backend_name(), "remote store closed");
        result
    }
}
