//! In-process remote store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::RemoteStore;
use crate::Error;
use crate::registry::INITIAL_VERSION;

/// Cap for TTLs too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(10 * 365 * 86_400);

#[derive(Debug)]
struct Entry {
    payload: String,
    expires_at: Instant,
}

/// Store backed by two mutex-guarded maps.
///
/// Counters are mutated under their lock, which makes `incr` atomic within
/// the process. Nothing is shared with other processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    counters: Mutex<HashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.payload.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<(), Error> {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE);
        self.entries
            .lock()
            .await
            .insert(key.to_string(), Entry { payload, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn get_counter(&self, key: &str) -> Result<Option<u64>, Error> {
        Ok(self.counters.lock().await.get(key).copied())
    }

    async fn init_counter(&self, key: &str, initial: u64) -> Result<u64, Error> {
        let mut counters = self.counters.lock().await;
        Ok(*counters.entry(key.to_string()).or_insert(initial))
    }

    async fn incr(&self, key: &str) -> Result<u64, Error> {
        let mut counters = self.counters.lock().await;
        let value = counters.entry(key.to_string()).or_insert(INITIAL_VERSION);
        *value += 1;
        Ok(*value)
    }

    async fn purge_expired(&self) -> Result<u64, Error> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok((before - entries.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("admin-users-list", "[]".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("admin-users-list").await.unwrap().as_deref(), Some("[]"));
        assert!(store.delete("admin-users-list").await.unwrap());
        assert!(store.get("admin-users-list").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let store = MemoryStore::new();
        store.set("k", "1".into(), Duration::from_millis(30)).await.unwrap();
        assert!(store.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired_counts_removed() {
        let store = MemoryStore::new();
        store.set("short", "1".into(), Duration::from_millis(10)).await.unwrap();
        store.set("long", "1".into(), Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let store = Arc::new(MemoryStore::new());
        store.init_counter("courses-version", 5).await.unwrap();

        let a = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.incr("courses-version").await.unwrap() }
        });
        let b = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.incr("courses-version").await.unwrap() }
        });
        let mut seen = vec![a.await.unwrap(), b.await.unwrap()];
        seen.sort();

        assert_eq!(seen, vec![6, 7]);
        assert_eq!(store.get_counter("courses-version").await.unwrap(), Some(7));
    }
}
