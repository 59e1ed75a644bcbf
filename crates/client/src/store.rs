//! Persistent per-client record store.
//!
//! Records are kept in a local SQLite file under a hashed `namespace:scope`
//! key. Timed records expire lazily: nothing sweeps them, the first read past
//! their deadline deletes them.
//!
//! Every clone of a store is a separate handle onto the same records and the
//! same change channel. Writes through one handle are announced to all
//! subscribers as [`StorageEvent`]s; listeners re-read what they care about.
//! Handles never lock each other out, so concurrent writes resolve
//! last-write-wins.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_rusqlite::rusqlite::OptionalExtension;
use tokio_rusqlite::{Connection, params};
use versync_core::AppConfig;
use versync_core::migrate::{self, Migration};

use crate::error::ClientError;
use crate::record::{ClientCacheRecord, ClientTtl, UserScope, storage_key};

const MIGRATIONS: &[Migration] = &[Migration::new(1, include_str!("../migrations/001_client_records.sql"))];

/// Buffered change notifications per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 64;

/// A change made through any handle of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    Set { namespace: String, scope: UserScope, version: String },
    Touched { namespace: String, scope: UserScope },
    Invalidated { namespace: String, scope: UserScope },
    Cleared { prefix: Option<String> },
}

impl StorageEvent {
    /// Whether a listener interested in `namespace` should re-read.
    pub fn affects(&self, namespace: &str) -> bool {
        match self {
            StorageEvent::Set { namespace: ns, .. }
            | StorageEvent::Touched { namespace: ns, .. }
            | StorageEvent::Invalidated { namespace: ns, .. } => ns == namespace,
            StorageEvent::Cleared { prefix } => prefix.as_deref().is_none_or(|p| namespace.starts_with(p)),
        }
    }
}

struct StoredRow {
    version: String,
    data_json: String,
    timestamp_ms: i64,
    ttl_ms: Option<i64>,
}

impl StoredRow {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.ttl_ms
            .is_some_and(|ttl| self.timestamp_ms.saturating_add(ttl) <= now_ms)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Client cache handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread.
#[derive(Clone, Debug)]
pub struct ClientCacheStore {
    conn: Connection,
    events: broadcast::Sender<StorageEvent>,
}

impl ClientCacheStore {
    /// Open a store at the specified path, creating and migrating it as needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let conn = Connection::open(path)
            .await
            .map_err(|e| ClientError::Database(e.into()))?;
        Self::init(conn).await
    }

    /// Open the store at the configured `client_cache_path`.
    pub async fn open_configured(config: &AppConfig) -> Result<Self, ClientError> {
        let store = Self::open(&config.client_cache_path).await?;
        tracing::info!(path = %config.client_cache_path.display(), "client cache opened");
        Ok(store)
    }

    /// Open an in-memory store for testing.
    pub async fn open_in_memory() -> Result<Self, ClientError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| ClientError::Database(e.into()))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, ClientError> {
        migrate::run(&conn, MIGRATIONS).await?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self { conn, events })
    }

    /// Listen for changes made through any handle of this store.
    ///
    /// A receiver that falls more than a few dozen events behind gets
    /// `RecvError::Lagged` and should re-read everything it displays.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    fn announce(&self, event: StorageEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// Get a record. Expired and corrupt records are deleted and reported as
    /// absent.
    ///
    /// A record that parses but does not fit `T` is left in place and
    /// reported as a serialization error; the caller decides what to do
    /// with it.
    pub async fn get<T: DeserializeOwned>(
        &self, namespace: &str, scope: &UserScope,
    ) -> Result<Option<ClientCacheRecord<T>>, ClientError> {
        let key = storage_key(namespace, scope);
        let now = now_ms();

        let row = self
            .conn
            .call(move |conn| -> Result<Option<StoredRow>, ClientError> {
                let row = conn
                    .query_row(
                        "SELECT version, data_json, timestamp_ms, ttl_ms
                         FROM client_records WHERE hashed_key = ?1",
                        params![key],
                        |row| {
                            Ok(StoredRow {
                                version: row.get(0)?,
                                data_json: row.get(1)?,
                                timestamp_ms: row.get(2)?,
                                ttl_ms: row.get(3)?,
                            })
                        },
                    )
                    .optional()?;

                match row {
                    Some(row) if row.is_expired(now) => {
                        conn.execute("DELETE FROM client_records WHERE hashed_key = ?1", params![key])?;
                        Ok(None)
                    }
                    row => Ok(row),
                }
            })
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let timestamp = DateTime::from_timestamp_millis(row.timestamp_ms);
        let (Ok(value), Some(timestamp)) = (serde_json::from_str::<Value>(&row.data_json), timestamp) else {
            tracing::debug!(namespace, scope = %scope, "discarding corrupt client record");
            if let Err(e) = self.remove(namespace, scope).await {
                tracing::debug!(namespace, error = %e, "failed to delete corrupt client record");
            }
            return Ok(None);
        };

        let data = serde_json::from_value::<T>(value)?;
        Ok(Some(ClientCacheRecord { data, version: row.version, timestamp }))
    }

    /// Replace the record for `namespace` with a fresh copy.
    pub async fn set<T: Serialize + ?Sized>(
        &self, namespace: &str, data: &T, scope: &UserScope, version: &str, ttl: ClientTtl,
    ) -> Result<(), ClientError> {
        let data_json = serde_json::to_string(data)?;
        let key = storage_key(namespace, scope);
        let ns = namespace.to_string();
        let scope_str = scope.as_str().to_string();
        let version_owned = version.to_string();
        let ttl_ms = ttl.as_millis();
        let now = now_ms();

        self.conn
            .call(move |conn| -> Result<(), ClientError> {
                conn.execute(
                    "INSERT INTO client_records (hashed_key, namespace, scope, version, data_json, timestamp_ms, ttl_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(hashed_key) DO UPDATE SET
                        version = excluded.version,
                        data_json = excluded.data_json,
                        timestamp_ms = excluded.timestamp_ms,
                        ttl_ms = excluded.ttl_ms",
                    params![key, ns, scope_str, version_owned, data_json, now, ttl_ms],
                )?;
                Ok(())
            })
            .await?;

        tracing::debug!(namespace, scope = %scope, version, "stored client record");
        self.announce(StorageEvent::Set {
            namespace: namespace.to_string(),
            scope: scope.clone(),
            version: version.to_string(),
        });
        Ok(())
    }

    /// Mark a record as just confirmed by the server without touching its
    /// data or version. The new timestamp is always later than the old one.
    ///
    /// Returns `false` if there was no record to touch.
    pub async fn touch(&self, namespace: &str, scope: &UserScope) -> Result<bool, ClientError> {
        let key = storage_key(namespace, scope);
        let now = now_ms();

        let updated = self
            .conn
            .call(move |conn| -> Result<usize, ClientError> {
                Ok(conn.execute(
                    "UPDATE client_records SET timestamp_ms = MAX(?2, timestamp_ms + 1) WHERE hashed_key = ?1",
                    params![key, now],
                )?)
            })
            .await?;

        if updated > 0 {
            self.announce(StorageEvent::Touched { namespace: namespace.to_string(), scope: scope.clone() });
        }
        Ok(updated > 0)
    }

    /// Drop a record. Returns `false` if it did not exist.
    pub async fn invalidate(&self, namespace: &str, scope: &UserScope) -> Result<bool, ClientError> {
        let existed = self.remove(namespace, scope).await?;
        if existed {
            self.announce(StorageEvent::Invalidated { namespace: namespace.to_string(), scope: scope.clone() });
        }
        Ok(existed)
    }

    async fn remove(&self, namespace: &str, scope: &UserScope) -> Result<bool, ClientError> {
        let key = storage_key(namespace, scope);
        let deleted = self
            .conn
            .call(move |conn| -> Result<usize, ClientError> {
                Ok(conn.execute("DELETE FROM client_records WHERE hashed_key = ?1", params![key])?)
            })
            .await?;
        Ok(deleted > 0)
    }

    /// Drop every record, or every record whose namespace starts with
    /// `prefix`, for all scopes. Returns the number removed.
    pub async fn clear(&self, prefix: Option<&str>) -> Result<u64, ClientError> {
        let prefix_owned = prefix.map(str::to_string);
        let deleted = self
            .conn
            .call(move |conn| -> Result<usize, ClientError> {
                let deleted = match prefix_owned {
                    Some(p) => conn.execute(
                        "DELETE FROM client_records WHERE substr(namespace, 1, length(?1)) = ?1",
                        params![p],
                    )?,
                    None => conn.execute("DELETE FROM client_records", [])?,
                };
                Ok(deleted)
            })
            .await?;

        tracing::debug!(prefix, deleted, "cleared client records");
        self.announce(StorageEvent::Cleared { prefix: prefix.map(str::to_string) });
        Ok(deleted as u64)
    }

    /// Number of stored records, expired ones included.
    pub async fn len(&self) -> Result<u64, ClientError> {
        self.conn
            .call(|conn| -> Result<u64, ClientError> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM client_records", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(ClientError::from)
    }

    pub async fn is_empty(&self) -> Result<bool, ClientError> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    async fn store() -> ClientCacheStore {
        ClientCacheStore::open_in_memory().await.unwrap()
    }

    fn user(id: &str) -> UserScope {
        UserScope::User(id.into())
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = store().await;
        store
            .set("courses-list", &json!(["intro"]), &UserScope::Guest, "4", ClientTtl::Permanent)
            .await
            .unwrap();

        let record = store.get::<Value>("courses-list", &UserScope::Guest).await.unwrap().unwrap();
        assert_eq!(record.data, json!(["intro"]));
        assert_eq!(record.version, "4");
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let store = store().await;
        store
            .set("admin-users-list", &json!([1]), &user("admin"), "2", ClientTtl::Permanent)
            .await
            .unwrap();

        assert!(store.get::<Value>("admin-users-list", &user("other")).await.unwrap().is_none());
        assert!(store.get::<Value>("admin-users-list", &UserScope::Guest).await.unwrap().is_none());
        assert!(store.get::<Value>("admin-users-list", &user("admin")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_touch_advances_timestamp_only() {
        let store = store().await;
        store
            .set("user-enrollments:u1", &json!([{"course": "c1"}]), &user("u1"), "7", ClientTtl::Permanent)
            .await
            .unwrap();
        let before = store.get::<Value>("user-enrollments:u1", &user("u1")).await.unwrap().unwrap();

        assert!(store.touch("user-enrollments:u1", &user("u1")).await.unwrap());

        let after = store.get::<Value>("user-enrollments:u1", &user("u1")).await.unwrap().unwrap();
        assert!(after.timestamp > before.timestamp);
        assert_eq!(after.data, before.data);
        assert_eq!(after.version, before.version);
    }

    #[tokio::test]
    async fn test_touch_missing_record() {
        let store = store().await;
        assert!(!store.touch("courses-list", &UserScope::Guest).await.unwrap());
    }

    #[tokio::test]
    async fn test_timed_record_expires_on_read() {
        let store = store().await;
        store
            .set("chat-threads:u1", &json!([]), &user("u1"), "1", ClientTtl::Timed(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(store.get::<Value>("chat-threads:u1", &user("u1")).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.get::<Value>("chat-threads:u1", &user("u1")).await.unwrap().is_none());
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_discarded() {
        let store = store().await;
        store
            .set("course-detail:c1", &json!({"title": "Intro"}), &UserScope::Guest, "1", ClientTtl::Permanent)
            .await
            .unwrap();
        store
            .conn
            .call(|conn| -> Result<(), ClientError> {
                conn.execute("UPDATE client_records SET data_json = '{\"title\": '", [])?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(store.get::<Value>("course-detail:c1", &UserScope::Guest).await.unwrap().is_none());
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_type_mismatch_keeps_record() {
        let store = store().await;
        store
            .set("course-detail:c1", &json!({"title": "Intro"}), &UserScope::Guest, "1", ClientTtl::Permanent)
            .await
            .unwrap();

        let as_list = store.get::<Vec<String>>("course-detail:c1", &UserScope::Guest).await;
        assert!(matches!(as_list, Err(ClientError::Serialization(_))));

        let record = store.get::<Value>("course-detail:c1", &UserScope::Guest).await.unwrap().unwrap();
        assert_eq!(record.data, json!({"title": "Intro"}));
    }

    #[tokio::test]
    async fn test_open_configured() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig { client_cache_path: dir.path().join("client.sqlite"), ..Default::default() };

        let store = ClientCacheStore::open_configured(&config).await.unwrap();
        store.set("courses-list", &json!([]), &UserScope::Guest, "1", ClientTtl::Permanent).await.unwrap();
        drop(store);

        assert!(config.client_cache_path.exists());
        let reopened = ClientCacheStore::open(&config.client_cache_path).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear_prefix() {
        let store = store().await;
        for ns in ["chat-threads:u1", "chat-messages:t1", "chat-messages:t2", "courses-list"] {
            store.set(ns, &json!([]), &user("u1"), "1", ClientTtl::Permanent).await.unwrap();
        }

        assert!(store.invalidate("chat-threads:u1", &user("u1")).await.unwrap());
        assert!(!store.invalidate("chat-threads:u1", &user("u1")).await.unwrap());

        assert_eq!(store.clear(Some("chat-")).await.unwrap(), 2);
        assert_eq!(store.len().await.unwrap(), 1);

        assert_eq!(store.clear(None).await.unwrap(), 1);
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_other_handles_see_changes() {
        let tab_a = store().await;
        let tab_b = tab_a.clone();
        let mut events = tab_b.subscribe();

        tab_a
            .set("courses-list", &json!(["intro"]), &UserScope::Guest, "3", ClientTtl::Permanent)
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert!(event.affects("courses-list"));
        assert_eq!(
            event,
            StorageEvent::Set { namespace: "courses-list".into(), scope: UserScope::Guest, version: "3".into() }
        );

        let seen = tab_b.get::<Value>("courses-list", &UserScope::Guest).await.unwrap().unwrap();
        assert_eq!(seen.version, "3");
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let tab_a = store().await;
        let tab_b = tab_a.clone();

        tab_a.set("admin-analytics", &json!({"n": 1}), &UserScope::Guest, "5", ClientTtl::Permanent).await.unwrap();
        tab_b.set("admin-analytics", &json!({"n": 2}), &UserScope::Guest, "6", ClientTtl::Permanent).await.unwrap();

        let record = tab_a.get::<Value>("admin-analytics", &UserScope::Guest).await.unwrap().unwrap();
        assert_eq!(record.data, json!({"n": 2}));
        assert_eq!(record.version, "6");
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.sqlite");

        let store = ClientCacheStore::open(&path).await.unwrap();
        store.set("courses-list", &json!(["a"]), &UserScope::Guest, "2", ClientTtl::Permanent).await.unwrap();
        drop(store);

        let reopened = ClientCacheStore::open(&path).await.unwrap();
        let record = reopened.get::<Value>("courses-list", &UserScope::Guest).await.unwrap().unwrap();
        assert_eq!(record.version, "2");
    }

    #[test]
    fn test_cleared_event_matches_prefix() {
        let all = StorageEvent::Cleared { prefix: None };
        let chat = StorageEvent::Cleared { prefix: Some("chat-".into()) };
        assert!(all.affects("courses-list"));
        assert!(chat.affects("chat-messages:t1"));
        assert!(!chat.affects("courses-list"));
    }
}
