//! Version registry: one monotonically increasing counter per resource key.
//!
//! Counters are created lazily at [`INITIAL_VERSION`] the first time anyone
//! asks for them and only ever move forward. Nothing deletes them.

use crate::Error;
use crate::store::StoreHandle;

/// Value a counter takes when first observed.
pub const INITIAL_VERSION: u64 = 1;

/// Version reported when the registry could not be consulted.
///
/// Real counters start at [`INITIAL_VERSION`], so this never matches a
/// version a client obtained while the registry was healthy.
pub const UNKNOWN_VERSION: &str = "0";

#[derive(Debug, Clone)]
pub struct VersionRegistry {
    store: StoreHandle,
}

impl VersionRegistry {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Current version of `key`, initializing it to `"1"` when absent.
    ///
    /// # Errors
    ///
    /// Fails when the store is unreachable or times out. Callers must treat
    /// that as "freshness unknown", never as a match.
    pub async fn get_version(&self, key: &str) -> Result<String, Error> {
        if let Some(value) = self.store.get_counter(key).await? {
            return Ok(value.to_string());
        }

        let value = self.store.init_counter(key, INITIAL_VERSION).await?;
        tracing::debug!(key, version = value, "initialized version counter");
        Ok(value.to_string())
    }

    /// Atomically bump `key`, returning the new version.
    pub async fn increment_version(&self, key: &str) -> Result<String, Error> {
        let value = self.store.incr(key).await?;
        tracing::debug!(key, version = value, "bumped version counter");
        Ok(value.to_string())
    }
}
