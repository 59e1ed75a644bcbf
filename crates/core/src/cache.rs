//! Cache-aside store of precomputed response payloads.
//!
//! Entries are JSON documents keyed independently from versions. They carry
//! no version of their own: a payload is fresh only as long as no cascade has
//! removed it and its TTL has not run out.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Error;
use crate::store::StoreHandle;

#[derive(Debug, Clone)]
pub struct ResourceCache {
    store: StoreHandle,
}

impl ResourceCache {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Get a cached payload.
    ///
    /// A payload that no longer deserializes as `T` is dropped and reported
    /// as a miss, so the caller recomputes it from the source.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding unreadable cache entry");
                if let Err(e) = self.store.delete(key).await {
                    tracing::debug!(key, error = %e, "failed to delete unreadable cache entry");
                }
                Ok(None)
            }
        }
    }

    /// Store a payload for `ttl`.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, payload: &T, ttl: Duration) -> Result<(), Error> {
        let json = serde_json::to_string(payload)?;
        self.store.set(key, json, ttl).await
    }

    /// Remove a payload. Invalidating an absent key is a no-op.
    pub async fn invalidate(&self, key: &str) -> Result<(), Error> {
        let existed = self.store.delete(key).await?;
        tracing::debug!(key, existed, "invalidated cache entry");
        Ok(())
    }

    /// Delete every expired payload, returning how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        let deleted = self.store.purge_expired().await?;
        if deleted > 0 {
            tracing::info!(deleted, "purged expired cache entries");
        }
        Ok(deleted)
    }
}
