//! SQLite-backed remote store.
//!
//! Payloads and counters live in one database file opened in WAL mode, so
//! several server processes can share it. Expiry is stored as epoch
//! milliseconds and checked on every read.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_rusqlite::rusqlite::{OptionalExtension, TransactionBehavior};
use tokio_rusqlite::{Connection, params};

use super::RemoteStore;
use crate::Error;
use crate::migrate::{self, Migration};
use crate::registry::INITIAL_VERSION;

const MIGRATIONS: &[Migration] = &[
    Migration::new(1, include_str!("../../migrations/001_cache_entries.sql")),
    Migration::new(2, include_str!("../../migrations/002_version_counters.sql")),
];

/// Remote store handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pub(crate) conn: Connection,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

fn counter_value(key: &str, raw: i64) -> Result<u64, Error> {
    u64::try_from(raw).map_err(|_| Error::CorruptVersion(key.to_string()))
}

impl SqliteStore {
    /// Open a store at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies pragmas, and runs any
    /// pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        migrate::run(&conn, MIGRATIONS).await?;
        Ok(Self { conn })
    }

    /// Open an in-memory store for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        migrate::run(&conn, MIGRATIONS).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let key = key.to_string();
        let now = now_ms();
        self.conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let payload = conn
                    .query_row(
                        "SELECT payload_json FROM cache_entries WHERE key = ?1 AND expires_at_ms > ?2",
                        params![key, now],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(payload)
            })
            .await
            .map_err(Error::from)
    }

    /// Uses UPSERT semantics: a second `set` for the same key replaces the
    /// payload and restarts its TTL.
    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<(), Error> {
        let key = key.to_string();
        let stored_at = now_ms();
        let expires_at = stored_at.saturating_add(ttl_ms(ttl));
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cache_entries (key, payload_json, stored_at_ms, expires_at_ms)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(key) DO UPDATE SET
                        payload_json = excluded.payload_json,
                        stored_at_ms = excluded.stored_at_ms,
                        expires_at_ms = excluded.expires_at_ms",
                    params![key, payload, stored_at, expires_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    async fn get_counter(&self, key: &str) -> Result<Option<u64>, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<u64>, Error> {
                let raw: Option<i64> = conn
                    .query_row("SELECT value FROM version_counters WHERE key = ?1", params![key], |row| {
                        row.get(0)
                    })
                    .optional()?;
                raw.map(|v| counter_value(&key, v)).transpose()
            })
            .await
            .map_err(Error::from)
    }

    async fn init_counter(&self, key: &str, initial: u64) -> Result<u64, Error> {
        let key = key.to_string();
        let initial = i64::try_from(initial).map_err(|_| Error::InvalidInput("initial version too large".into()))?;
        let updated_at = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                tx.execute(
                    "INSERT INTO version_counters (key, value, updated_at) VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO NOTHING",
                    params![key, initial, updated_at],
                )?;
                let raw: i64 =
                    tx.query_row("SELECT value FROM version_counters WHERE key = ?1", params![key], |row| {
                        row.get(0)
                    })?;
                tx.commit()?;
                counter_value(&key, raw)
            })
            .await
            .map_err(Error::from)
    }

    /// The upsert and the read-back share an IMMEDIATE transaction, so two
    /// processes incrementing the same key serialize on the write lock.
    async fn incr(&self, key: &str) -> Result<u64, Error> {
        let key = key.to_string();
        let first = (INITIAL_VERSION + 1) as i64;
        let updated_at = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                tx.execute(
                    "INSERT INTO version_counters (key, value, updated_at) VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET
                        value = value + 1,
                        updated_at = excluded.updated_at",
                    params![key, first, updated_at],
                )?;
                let raw: i64 =
                    tx.query_row("SELECT value FROM version_counters WHERE key = ?1", params![key], |row| {
                        row.get(0)
                    })?;
                tx.commit()?;
                counter_value(&key, raw)
            })
            .await
            .map_err(Error::from)
    }

    async fn purge_expired(&self) -> Result<u64, Error> {
        let now = now_ms();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE expires_at_ms <= ?1", params![now])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    async fn health_check(&self) -> Result<(), Error> {
        self.conn
            .call(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.conn
            .clone()
            .close()
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
